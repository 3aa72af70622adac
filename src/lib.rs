//! tmplx template compiler
//!
//! Compiles a directory of HTML pages and components with embedded Go
//! (`<script type="text/tmplx">`) into a single Go source file holding the
//! route handlers, the render procedures and the client runtime.
//!
//! # Basic Usage
//!
//! ```no_run
//! use tmplx::{compile_project, CompilerOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let options = CompilerOptions {
//!         out_file: Some("server/tmplx.go".into()),
//!         ..CompilerOptions::default()
//!     };
//!     compile_project(&options)?;
//!     Ok(())
//! }
//! ```
//!
//! # Compilation Pipeline
//!
//! 1. **Loader**: walk `pages/` and `components/`, derive routes, tags and identifiers
//! 2. **Extractor**: parse HTML, take out the script block
//! 3. **Script analyser**: classify declarations into state, derived, props and handlers
//! 4. **Lowerer**: turn the template tree into render ops, synthesise inline handlers
//! 5. **Emitter**: write the Go file

pub mod cli;
pub mod codegen;
pub mod driver;
pub mod error;
pub mod extractor;
pub mod html;
pub mod interpolation;
pub mod lexer;
pub mod loader;
pub mod lowerer;
pub mod naming;
pub mod registry;
pub mod runtime;
pub mod script;
pub mod types;
pub mod utils;

use serde::Serialize;
use std::path::PathBuf;

pub use codegen::{CodeGenerator, CompiledUnit, Route};
pub use driver::Compilation;
pub use error::{CompilerError, Diagnostic, DiagnosticKind, Diagnostics, Result, Severity, Span};
pub use lexer::{Lexer, Token, TokenType};
pub use registry::ComponentRegistry;
pub use types::*;

/// Compiler version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Compilation options and settings
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Root of the page tree; paths below it become routes
    pub pages_dir: PathBuf,

    /// Root of the component tree; paths below it become `tx-` tags
    pub components_dir: PathBuf,

    /// Destination of the generated Go file
    pub out_file: Option<PathBuf>,

    /// Go package clause of the generated file
    pub package_name: String,

    /// Maximum unconditional component nesting
    pub max_component_depth: usize,

    /// File extensions treated as pages
    pub page_extensions: Vec<String>,

    /// File extensions treated as components
    pub component_extensions: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            pages_dir: PathBuf::from("./pages"),
            components_dir: PathBuf::from("./components"),
            out_file: None,
            package_name: "tmplx".to_string(),
            max_component_depth: 64,
            page_extensions: vec!["html".to_string()],
            component_extensions: vec!["html".to_string()],
        }
    }
}

/// Compilation statistics and metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompilationStats {
    pub page_count: usize,
    pub component_count: usize,
    /// Named and inline handlers, one endpoint each
    pub handler_count: usize,
    pub route_count: usize,
    /// Total size of all source units in bytes
    pub source_size: u64,
    /// Size of the generated Go file in bytes
    pub output_size: u64,
    pub warning_count: usize,
    pub compile_time_ms: u64,
}

/// Compile the project and write the generated file to `options.out_file`
pub fn compile_project(options: &CompilerOptions) -> Result<Compilation> {
    let out_file = options
        .out_file
        .as_ref()
        .ok_or_else(|| CompilerError::config("no output file given (use --out-file or --check)"))?;

    log::info!("{} v{}", NAME, VERSION);
    log::debug!("Compiler options: {:?}", options);

    let compilation = driver::compile(options)?;
    driver::write_output(out_file, &compilation.output)?;
    Ok(compilation)
}

/// Run every phase without writing anything
pub fn check_project(options: &CompilerOptions) -> Result<Compilation> {
    log::debug!("Checking with options: {:?}", options);
    driver::compile(options)
}
