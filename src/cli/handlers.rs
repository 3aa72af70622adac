// FILE: src/cli/handlers.rs
use super::{ReportFormat, TmplxCli};
use crate::codegen::Route;
use crate::error::{CompilerError, Diagnostic, Diagnostics, Result};
use crate::{check_project, compile_project, CompilationStats, Compilation};
use serde::Serialize;
use std::env;

#[derive(Debug, Serialize)]
struct Report<'a> {
    success: bool,
    checked_only: bool,
    diagnostics: Vec<&'a Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a CompilationStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    routes: Option<&'a [Route]>,
}

// --- COMPILE ---
pub fn handle_compile_command(cli: &TmplxCli, matches: &clap::ArgMatches) -> Result<()> {
    let options = cli.build_compiler_options(matches, &|name: &str| env::var(name).ok())?;
    let format = matches
        .get_one::<ReportFormat>("format")
        .copied()
        .unwrap_or(ReportFormat::Text);
    let check_only = matches.get_flag("check");
    let show_stats = matches.get_flag("stats");

    let result = if check_only {
        check_project(&options)
    } else {
        compile_project(&options)
    };

    match result {
        Ok(compilation) => {
            match format {
                ReportFormat::Json => print_json(&Report {
                    success: true,
                    checked_only: check_only,
                    diagnostics: compilation.diagnostics.iter().collect(),
                    stats: Some(&compilation.stats),
                    routes: Some(compilation.routes.as_slice()),
                })?,
                ReportFormat::Text => {
                    print_text_diagnostics(&compilation.diagnostics);
                    print_success(cli, &compilation, &options, check_only);
                    if show_stats {
                        print_detailed_stats(&compilation.stats);
                    }
                }
            }
            Ok(())
        }
        Err(CompilerError::Diagnostics(diagnostics)) => {
            match format {
                ReportFormat::Json => print_json(&Report {
                    success: false,
                    checked_only: check_only,
                    diagnostics: diagnostics.iter().collect(),
                    stats: None,
                    routes: None,
                })?,
                ReportFormat::Text => {
                    print_text_diagnostics(&diagnostics);
                    eprintln!("❌ {}", diagnostics_summary(&diagnostics));
                }
            }
            Err(CompilerError::Diagnostics(diagnostics))
        }
        Err(e) => Err(e),
    }
}

fn print_text_diagnostics(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.iter() {
        eprintln!("{}", diagnostic);
    }
}

fn diagnostics_summary(diagnostics: &Diagnostics) -> String {
    format!(
        "{} error(s), {} warning(s)",
        diagnostics.error_count(),
        diagnostics.warning_count()
    )
}

fn print_success(cli: &TmplxCli, compilation: &Compilation, options: &crate::CompilerOptions, check_only: bool) {
    let elapsed = cli.start_time.elapsed();
    if check_only {
        println!("✅ No errors found ({})", diagnostics_summary(&compilation.diagnostics));
    } else {
        let out = options
            .out_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("✅ Generated {}", out);
        println!("   Output: {} bytes", compilation.stats.output_size);
        println!("   Routes: {}", compilation.stats.route_count);
    }
    println!("   Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
}

fn print_detailed_stats(stats: &CompilationStats) {
    println!("\n📊 Detailed Compilation Statistics:");
    println!("   Source size: {} bytes", stats.source_size);
    println!("   Output size: {} bytes", stats.output_size);
    println!("   Compile time: {}ms", stats.compile_time_ms);
    println!("\n   Unit breakdown:");
    println!("     Pages: {}", stats.page_count);
    println!("     Components: {}", stats.component_count);
    println!("     Handlers: {}", stats.handler_count);
    println!("     Routes: {}", stats.route_count);
    if stats.warning_count > 0 {
        println!("     Warnings: {}", stats.warning_count);
    }
}

fn print_json(report: &Report) -> Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(|e| CompilerError::InvalidFormat {
        message: format!("cannot serialise report: {}", e),
    })?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Span;

    #[test]
    fn test_json_report_shape() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::template(
            Span::new("pages/index.html", 3, 5),
            "tx-else-if/tx-else without a preceding tx-if",
        ));
        let report = Report {
            success: false,
            checked_only: true,
            diagnostics: diagnostics.iter().collect(),
            stats: None,
            routes: None,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["diagnostics"][0]["span"]["line"], 3);
        assert!(value.get("stats").is_none());
    }

    #[test]
    fn test_summary() {
        assert_eq!(diagnostics_summary(&Diagnostics::new()), "0 error(s), 0 warning(s)");
    }
}
