// FILE: src/cli/mod.rs

mod config;
mod handlers;

pub use config::ConfigFile;

use crate::error::{CompilerError, Result};
use crate::CompilerOptions;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;

pub const ENV_PAGES_PATH: &str = "TMPLX_PAGES_PATH";
pub const ENV_COMPONENTS_PATH: &str = "TMPLX_COMPONENTS_PATH";
pub const ENV_OUT_FILE: &str = "TMPLX_OUT_FILE";

/// How diagnostics and results are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

pub struct TmplxCli {
    config: ConfigFile,
    start_time: Instant,
}

impl Default for TmplxCli {
    fn default() -> Self {
        Self::new()
    }
}

impl TmplxCli {
    pub fn new() -> Self {
        Self {
            config: ConfigFile::default(),
            start_time: Instant::now(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let matches = Self::build_cli().get_matches();
        self.run_with(&matches)
    }

    pub fn run_with(&mut self, matches: &ArgMatches) -> Result<()> {
        self.start_time = Instant::now();
        self.setup_logging(matches.get_count("verbose"));

        if let Some(config_path) = matches.get_one::<PathBuf>("config") {
            self.config = config::load(config_path)?;
        }

        handlers::handle_compile_command(self, matches)
    }

    pub fn build_cli() -> Command {
        Command::new(crate::NAME)
            .version(crate::VERSION)
            .about("Compile HTML pages and components with embedded Go into one Go source file")
            .arg(
                Arg::new("pages")
                    .long("pages")
                    .value_name("DIR")
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("Pages directory [env: TMPLX_PAGES_PATH] [default: ./pages]"),
            )
            .arg(
                Arg::new("components")
                    .long("components")
                    .value_name("DIR")
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("Components directory [env: TMPLX_COMPONENTS_PATH] [default: ./components]"),
            )
            .arg(
                Arg::new("out-file")
                    .short('o')
                    .long("out-file")
                    .value_name("FILE")
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("Generated Go file [env: TMPLX_OUT_FILE]"),
            )
            .arg(
                Arg::new("package")
                    .long("package")
                    .value_name("NAME")
                    .help("Go package name of the generated file [default: tmplx]"),
            )
            .arg(
                Arg::new("max-depth")
                    .long("max-depth")
                    .value_name("N")
                    .value_parser(clap::value_parser!(usize))
                    .help("Maximum unconditional component nesting [default: 64]"),
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("Configuration file path (.toml or .json)"),
            )
            .arg(
                Arg::new("check")
                    .long("check")
                    .help("Analyse only, write nothing")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("format")
                    .short('f')
                    .long("format")
                    .value_parser(clap::value_parser!(ReportFormat))
                    .default_value("text")
                    .help("Report format"),
            )
            .arg(
                Arg::new("stats")
                    .long("stats")
                    .help("Show detailed compilation statistics")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .help("Increase verbosity (can be used multiple times)")
                    .action(ArgAction::Count),
            )
    }

    fn setup_logging(&self, verbose_count: u8) {
        let log_level = match verbose_count {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        let initialised = env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_secs()
            .try_init();
        if initialised.is_err() {
            log::debug!("Logger already initialised");
        }
    }

    /// Resolve options: CLI flags, then environment, then config file, then defaults
    pub fn build_compiler_options(
        &self,
        matches: &ArgMatches,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<CompilerOptions> {
        let defaults = CompilerOptions::default();
        let config = &self.config;

        let pages_dir = matches
            .get_one::<PathBuf>("pages")
            .cloned()
            .or_else(|| env(ENV_PAGES_PATH).map(PathBuf::from))
            .or_else(|| config.pages_dir.clone())
            .unwrap_or(defaults.pages_dir);
        let components_dir = matches
            .get_one::<PathBuf>("components")
            .cloned()
            .or_else(|| env(ENV_COMPONENTS_PATH).map(PathBuf::from))
            .or_else(|| config.components_dir.clone())
            .unwrap_or(defaults.components_dir);
        let out_file = matches
            .get_one::<PathBuf>("out-file")
            .cloned()
            .or_else(|| env(ENV_OUT_FILE).map(PathBuf::from))
            .or_else(|| config.out_file.clone());

        let package_name = matches
            .get_one::<String>("package")
            .cloned()
            .or_else(|| config.package_name.clone())
            .unwrap_or(defaults.package_name);
        if !crate::utils::is_valid_identifier(&package_name) {
            return Err(CompilerError::config(format!(
                "'{}' is not a valid Go package name",
                package_name
            )));
        }

        let max_component_depth = matches
            .get_one::<usize>("max-depth")
            .copied()
            .or(config.max_component_depth)
            .unwrap_or(defaults.max_component_depth);
        if max_component_depth == 0 {
            return Err(CompilerError::config("max component depth must be at least 1"));
        }

        Ok(CompilerOptions {
            pages_dir,
            components_dir,
            out_file,
            package_name,
            max_component_depth,
            page_extensions: config.page_extensions.clone().unwrap_or(defaults.page_extensions),
            component_extensions: config
                .component_extensions
                .clone()
                .unwrap_or(defaults.component_extensions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["tmplx"];
        argv.extend_from_slice(args);
        TmplxCli::build_cli().try_get_matches_from(argv).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let cli = TmplxCli::new();
        let options = cli.build_compiler_options(&matches(&[]), &no_env).unwrap();
        assert_eq!(options.pages_dir, PathBuf::from("./pages"));
        assert_eq!(options.components_dir, PathBuf::from("./components"));
        assert!(options.out_file.is_none());
        assert_eq!(options.package_name, "tmplx");
    }

    #[test]
    fn test_precedence() {
        let mut cli = TmplxCli::new();
        cli.config = ConfigFile {
            pages_dir: Some(PathBuf::from("config/pages")),
            components_dir: Some(PathBuf::from("config/components")),
            out_file: Some(PathBuf::from("config.go")),
            package_name: Some("site".to_string()),
            ..ConfigFile::default()
        };
        let env = |name: &str| match name {
            ENV_PAGES_PATH => Some("env/pages".to_string()),
            ENV_COMPONENTS_PATH => Some("env/components".to_string()),
            _ => None,
        };
        let options = cli
            .build_compiler_options(&matches(&["--pages", "cli/pages"]), &env)
            .unwrap();
        assert_eq!(options.pages_dir, PathBuf::from("cli/pages"));
        assert_eq!(options.components_dir, PathBuf::from("env/components"));
        assert_eq!(options.out_file, Some(PathBuf::from("config.go")));
        assert_eq!(options.package_name, "site");
    }

    #[test]
    fn test_flags() {
        let m = matches(&["--check", "--format", "json", "--max-depth", "8", "-vv", "-o", "gen/tmplx.go"]);
        assert!(m.get_flag("check"));
        assert_eq!(m.get_one::<ReportFormat>("format"), Some(&ReportFormat::Json));
        assert_eq!(m.get_count("verbose"), 2);
        let options = TmplxCli::new().build_compiler_options(&m, &no_env).unwrap();
        assert_eq!(options.max_component_depth, 8);
        assert_eq!(options.out_file, Some(PathBuf::from("gen/tmplx.go")));
    }

    #[test]
    fn test_invalid_package_and_depth() {
        let cli = TmplxCli::new();
        assert!(cli.build_compiler_options(&matches(&["--package", "my-site"]), &no_env).is_err());
        assert!(cli.build_compiler_options(&matches(&["--max-depth", "0"]), &no_env).is_err());
    }
}
