// FILE: src/cli/config.rs

use crate::error::{CompilerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings read from `tmplx.toml` or `tmplx.json`. Every field is optional;
/// CLI flags and environment variables take precedence.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub pages_dir: Option<PathBuf>,
    pub components_dir: Option<PathBuf>,
    pub out_file: Option<PathBuf>,
    pub package_name: Option<String>,
    pub max_component_depth: Option<usize>,
    pub page_extensions: Option<Vec<String>>,
    pub component_extensions: Option<Vec<String>>,
}

pub fn load(config_path: &Path) -> Result<ConfigFile> {
    let config_content = fs::read_to_string(config_path).map_err(|e| {
        CompilerError::config(format!("cannot read config file {}: {}", config_path.display(), e))
    })?;
    let config = parse(config_path, &config_content)?;
    log::info!("Loaded configuration from {}", config_path.display());
    Ok(config)
}

fn parse(config_path: &Path, content: &str) -> Result<ConfigFile> {
    match config_path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| CompilerError::InvalidFormat {
            message: format!("Invalid JSON config: {}", e),
        }),
        Some("toml") => toml::from_str(content).map_err(|e| CompilerError::InvalidFormat {
            message: format!("Invalid TOML config: {}", e),
        }),
        _ => Err(CompilerError::InvalidFormat {
            message: "Config file must be .json or .toml format".to_string(),
        }),
    }
}
