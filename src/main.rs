//! tmplx compiler binary

use std::process;
use tmplx::cli::TmplxCli;
use tmplx::CompilerError;

fn main() {
    let mut cli = TmplxCli::new();
    match cli.run() {
        Ok(()) => {}
        // already reported in the selected format
        Err(e @ CompilerError::Diagnostics(_)) => process::exit(e.exit_code()),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(e.exit_code());
        }
    }
}
