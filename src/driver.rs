//! Compilation driver: runs every phase over every unit and batches diagnostics

use crate::codegen::{route_table, CodeGenerator, CompiledUnit, Route};
use crate::error::{CompilerError, Diagnostics, Result, Span};
use crate::registry::{scan_slots, ComponentInfo, ComponentRegistry};
use crate::types::{Document, DocumentBody, LoweredUnit, SourceUnit, SymbolTable};
use crate::{extractor, loader, lowerer, script, CompilationStats, CompilerOptions};
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Result of a successful compilation
#[derive(Debug)]
pub struct Compilation {
    pub output: String,
    pub routes: Vec<Route>,
    pub stats: CompilationStats,
    /// Warnings only; errors are returned as [`CompilerError::Diagnostics`]
    pub diagnostics: Diagnostics,
}

struct AnalysedUnit {
    unit: SourceUnit,
    document: Document,
    symbols: SymbolTable,
}

struct LoweredSource {
    unit: SourceUnit,
    symbols: SymbolTable,
    lowered: LoweredUnit,
}

/// Run every phase and return the generated source. Nothing is written.
pub fn compile(options: &CompilerOptions) -> Result<Compilation> {
    let start_time = Instant::now();
    let mut diagnostics = Diagnostics::new();

    // Phase 1: load
    let units = loader::load_units(options, &mut diagnostics)?;
    let source_size: usize = units.iter().map(|u| u.raw_html.len()).sum();
    log::debug!("Phase 1 complete: {} unit(s) loaded", units.len());

    // Phase 2: extract and analyse
    let mut analysed = Vec::new();
    for unit in units {
        let document = match extractor::extract(&unit, &mut diagnostics) {
            Ok(document) => document,
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                continue;
            }
        };
        match script::analyze(&unit, document.script.as_ref()) {
            Ok(symbols) => analysed.push(AnalysedUnit {
                unit,
                document,
                symbols,
            }),
            Err(diagnostic) => diagnostics.push(diagnostic),
        }
    }
    log::debug!("Phase 2 complete: {} unit(s) analysed", analysed.len());

    // Phase 3: lower
    let mut registry = build_registry(&analysed);
    let mut lowered = Vec::new();
    for AnalysedUnit {
        unit,
        document,
        symbols,
    } in analysed
    {
        match lowerer::lower_unit(&unit, &document, &symbols, &registry, &mut diagnostics) {
            Ok(result) => lowered.push(LoweredSource {
                unit,
                symbols,
                lowered: result,
            }),
            Err(diagnostic) => diagnostics.push(diagnostic),
        }
    }
    for source in &lowered {
        if let Some(tag) = &source.unit.component_tag {
            registry.set_lowered(tag, source.lowered.clone());
        }
    }
    for source in lowered.iter().filter(|s| s.unit.is_page()) {
        if let Err(diagnostic) =
            registry.check_depth(&source.unit.owner_name, &source.lowered.ops, options.max_component_depth)
        {
            diagnostics.push(diagnostic);
        }
    }
    log::debug!("Phase 3 complete: {} unit(s) lowered", lowered.len());

    if diagnostics.has_errors() {
        return Err(CompilerError::Diagnostics(diagnostics));
    }

    // Phase 4: emit
    let compiled: Vec<CompiledUnit> = lowered
        .iter()
        .map(|source| CompiledUnit {
            unit: &source.unit,
            symbols: &source.symbols,
            lowered: &source.lowered,
        })
        .collect();
    let output = CodeGenerator::new(options.package_name.clone(), &registry).generate(&compiled)?;
    let routes = route_table(&compiled);

    let stats = CompilationStats {
        page_count: compiled.iter().filter(|c| c.unit.is_page()).count(),
        component_count: registry.len(),
        handler_count: compiled.iter().map(|c| c.handlers().count()).sum(),
        route_count: routes.len(),
        source_size: source_size as u64,
        output_size: output.len() as u64,
        warning_count: diagnostics.warning_count(),
        compile_time_ms: start_time.elapsed().as_millis() as u64,
    };
    log::info!(
        "Compiled {} page(s) and {} component(s) into {} route(s)",
        stats.page_count,
        stats.component_count,
        stats.route_count
    );

    Ok(Compilation {
        output,
        routes,
        stats,
        diagnostics,
    })
}

fn build_registry(analysed: &[AnalysedUnit]) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    for source in analysed {
        let (Some(tag), DocumentBody::Component(component)) = (&source.unit.component_tag, &source.document.body)
        else {
            continue;
        };
        registry.register(ComponentInfo {
            tag: tag.clone(),
            ident: source.unit.ident.clone(),
            span: Span::file_start(source.unit.display_path()),
            symbols: source.symbols.clone(),
            slots: scan_slots(&component.template),
            lowered: None,
        });
    }
    registry
}

/// Write the generated file, creating its parent directory when needed
pub fn write_output(path: &Path, output: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, output)?;
    log::info!("Wrote {} ({} bytes)", path.display(), output.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Project {
        dir: TempDir,
    }

    impl Project {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("pages")).unwrap();
            fs::create_dir_all(dir.path().join("components")).unwrap();
            Self { dir }
        }

        fn page(self, rel: &str, html: &str) -> Self {
            self.file("pages", rel, html)
        }

        fn component(self, rel: &str, html: &str) -> Self {
            self.file("components", rel, html)
        }

        fn file(self, root: &str, rel: &str, html: &str) -> Self {
            let path = self.dir.path().join(root).join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, html).unwrap();
            self
        }

        fn options(&self) -> CompilerOptions {
            CompilerOptions {
                pages_dir: self.dir.path().join("pages"),
                components_dir: self.dir.path().join("components"),
                out_file: Some(self.dir.path().join("out").join("tmplx.go")),
                ..CompilerOptions::default()
            }
        }

        fn compile(&self) -> Result<Compilation> {
            compile(&self.options())
        }
    }

    fn section<'a>(go: &'a str, start: &str) -> &'a str {
        let from = go.find(start).unwrap_or_else(|| panic!("missing {}", start));
        let rest = &go[from..];
        let end = rest.find("\n}\n").map_or(rest.len(), |e| e + 3);
        &rest[..end]
    }

    #[test]
    fn test_counter_page() {
        let project = Project::new().page(
            "index.html",
            "<script type=\"text/tmplx\">\nvar counter int\n</script>\n<button tx-onclick=\"counter++\">+</button><span>{counter}</span>\n",
        );
        let compilation = project.compile().unwrap();
        let go = &compilation.output;

        let render = section(go, "func render_page_2F_(");
        assert!(render.contains("io.WriteString(tx_w, \" tx-onclick=\\\"\" + \"page_2F__anon_func_1\" + \"\\\"\")"));
        assert!(render.contains("io.WriteString(tx_w, \" tx-swap=\\\"\" + txEscape(tx_key) + \"\\\"\")"));
        assert!(render.contains("io.WriteString(tx_w, \">+</button><span>\")\n\tio.WriteString(tx_w, txEscape(counter))\n"));

        let route = section(go, "func route_page_2F_(");
        assert!(route.contains("\tvar counter int\n"));
        assert!(route.contains("\ttx_newStates[\"tx_\"] = &state_page_2F_{S_counter: counter}\n"));
        assert!(route.contains("txWritePage(tx_w, &tx_buf, tx_newStates)"));

        let endpoint = section(go, "func endpoint_page_2F__anon_func_1(");
        assert!(endpoint.contains("\tvar counter int = tx_state.S_counter\n\tfunc() {\n\t\tcounter++\n\t}()\n\ttx_state.S_counter = counter\n"));
        assert!(endpoint.contains("txWritePage(tx_w, &tx_buf, tx_newStates)"));

        let patterns: Vec<&str> = compilation.routes.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["GET /{$}", "GET /tx/page_2F__anon_func_1"]);
        assert_eq!(compilation.stats.page_count, 1);
        assert_eq!(compilation.stats.handler_count, 1);
    }

    #[test]
    fn test_derived_chain() {
        let project = Project::new().page(
            "index.html",
            "<script type=\"text/tmplx\">\nvar a int = 1\nvar b int = a*10\nfunc bump() {\n\ta = 2\n}\n</script>\n<p>{b}</p><button tx-onclick=\"bump()\">go</button>\n",
        );
        let go = project.compile().unwrap().output;

        let route = section(go.as_str(), "func route_page_2F_(");
        assert!(route.contains("\tvar a int = 1\n\tvar b int = a*10\n"));
        assert!(route.contains("&state_page_2F_{S_a: a}"));

        let endpoint = section(go.as_str(), "func endpoint_page_2F__bump(");
        assert!(endpoint.contains("\tvar a int = tx_state.S_a\n\tvar b int = a*10\n\tfunc() {\n\t\ta = 2\n\t}()\n\tb = a*10\n"));
        assert!(endpoint.contains("render_page_2F_(&tx_buf, tx_swap, tx_states, tx_newStates, a, b)"));
    }

    #[test]
    fn test_keyed_loop() {
        let project = Project::new().page(
            "index.html",
            "<script type=\"text/tmplx\">\nvar list []string = []string{\"x\", \"y\"}\n</script>\n<ul><li tx-for=\"i,l := range list\" tx-key=\"l\">{l}</li></ul>\n",
        );
        let compilation = project.compile().unwrap();
        assert_eq!(compilation.diagnostics.warning_count(), 0);
        let render = section(compilation.output.as_str(), "func render_page_2F_(");
        assert!(render.contains(
            "\tfor i,l := range list {\n\t\t_ = i\n\t\t_ = l\n\t\tio.WriteString(tx_w, \"<li>\")\n\t\tio.WriteString(tx_w, txEscape(l))\n\t\tio.WriteString(tx_w, \"</li>\")\n\t}\n"
        ));
    }

    #[test]
    fn test_component_with_slot() {
        let project = Project::new()
            .page("index.html", "<tx-wrapper><p>hi</p></tx-wrapper>\n")
            .component("wrapper.html", "<template><div><slot></slot></div></template>\n");
        let go = project.compile().unwrap().output;

        let render_page = section(go.as_str(), "func render_page_2F_(");
        assert!(render_page.contains("tx_slotarg := func() {\n\t\t\tio.WriteString(tx_w, \"<p>hi</p>\")\n\t\t}"));
        assert!(render_page.contains("tx_ckey := tx_key + \"_/index_tx-wrapper_1\""));
        assert!(render_page.contains("render_tx_2D_wrapper(tx_w, tx_ckey, tx_states, tx_newStates, tx_slotarg)"));

        let render_wrapper = section(go.as_str(), "func render_tx_2D_wrapper(");
        assert!(render_wrapper.contains(
            "io.WriteString(tx_w, \"<template id=\\\"\" + txEscape(tx_key) + \"\\\"></template>\")\n\tio.WriteString(tx_w, \"<div>\")\n\tif tx_slot != nil {\n\t\ttx_slot()\n\t}\n\tio.WriteString(tx_w, \"</div>\")\n"
        ));
    }

    #[test]
    fn test_component_initialisers_use_own_values() {
        let project = Project::new()
            .page(
                "index.html",
                "<script type=\"text/tmplx\">\nvar n int = 100\n</script>\n<p>{n}</p><tx-label></tx-label>\n",
            )
            .component(
                "label.html",
                "<script type=\"text/tmplx\">\nvar n int = 1\n// tx:prop\nvar label string = fmt.Sprint(n)\n</script>\n<template><span>{label}</span></template>\n",
            );
        let go = project.compile().unwrap().output;

        let render_page = section(go.as_str(), "func render_page_2F_(");
        assert!(render_page.contains(
            "\t} else {\n\t\t\tvar n int = 1\n\t\t\tvar label string = fmt.Sprint(n)\n\t\t\ttx_state.S_n = n\n\t\t\ttx_state.S_label = label\n\t\t}\n"
        ));
        assert!(render_page.contains("\t\tvar n int = tx_state.S_n\n\t\tvar label string = tx_state.S_label\n"));
    }

    #[test]
    fn test_input_binding_round_trip() {
        let project = Project::new()
            .page("index.html", "<tx-todo></tx-todo>\n")
            .component(
                "todo.html",
                "<script type=\"text/tmplx\">\nvar list []string = []string{}\nvar item string\nfunc add() {\n\tlist = append(list, item)\n\titem = \"\"\n}\n</script>\n<template><input type=\"text\" tx-value=\"item\"><button tx-onclick=\"add()\">add</button></template>\n",
            );
        let go = project.compile().unwrap().output;

        let render = section(go.as_str(), "func render_tx_2D_todo(");
        assert!(render.contains("\" tx-value=\\\"item\\\" tx-swap=\\\"\" + txEscape(tx_key)"));

        let endpoint = section(go.as_str(), "func endpoint_tx_2D_todo_add(");
        assert!(endpoint.contains("tx_states := txStates(tx_query, tx_swap)"));
        assert!(endpoint.contains("\ttx_state.S_list = list\n\ttx_state.S_item = item\n\ttx_newStates[tx_swap] = tx_state\n"));
        assert!(endpoint.contains("txWriteFragment(tx_w, &tx_buf, tx_newStates)"));
    }

    #[test]
    fn test_escape_policy() {
        let project = Project::new().page(
            "index.html",
            "<script type=\"text/tmplx\">\nvar s string = \"<b>\"\n</script>\n<p title=\"{s}\">{s}</p>\n",
        );
        let go = project.compile().unwrap().output;
        let render = section(go.as_str(), "func render_page_2F_(");
        assert!(render.contains(
            "io.WriteString(tx_w, \"<p title=\\\"\")\n\tio.WriteString(tx_w, fmt.Sprint(s))\n\tio.WriteString(tx_w, \"\\\">\")\n\tio.WriteString(tx_w, txEscape(s))\n"
        ));
    }

    #[test]
    fn test_errors_are_batched_across_units() {
        let project = Project::new()
            .page("a.html", "<script type=\"text/tmplx\">\nx := 1\n</script><p></p>")
            .page("b.html", "<p tx-else>orphan</p>")
            .page("c.html", "<p>fine</p>");
        let err = project.compile().unwrap_err();
        match &err {
            CompilerError::Diagnostics(diagnostics) => {
                assert_eq!(diagnostics.error_count(), 2);
                let files: Vec<String> = diagnostics.iter().map(|d| d.span.file.clone()).collect();
                assert!(files[0].ends_with("a.html"));
                assert!(files[1].ends_with("b.html"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_unconditional_recursion_is_rejected() {
        let project = Project::new()
            .page("index.html", "<tx-loop></tx-loop>")
            .component("loop.html", "<template><div><tx-loop></tx-loop></div></template>");
        let err = project.compile().unwrap_err();
        assert!(err.to_string().contains("1 error(s)"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let project = Project::new()
            .page("index.html", "<script type=\"text/tmplx\">\nvar n int\n</script><tx-b></tx-b><tx-a></tx-a><p tx-onclick=\"n++\">{n}</p>")
            .page("blog/{slug}.html", "<script type=\"text/tmplx\">\n// tx:path slug\nvar slug string\n</script><h1>{slug}</h1>")
            .component("a.html", "<template><i>a</i></template>")
            .component("b.html", "<template><b>b</b></template>");
        let first = project.compile().unwrap().output;
        let second = project.compile().unwrap().output;
        assert_eq!(first, second);
        assert!(first.contains("\tvar slug string = tx_r.PathValue(\"slug\")\n"));
        assert!(first.contains("{Pattern: \"GET /blog/{slug}\", Handler: route_page_2F_blog_2F__7B_slug_7D_},"));
    }

    #[test]
    fn test_missing_pages_dir_is_io_error() {
        let options = CompilerOptions {
            pages_dir: PathBuf::from("/nonexistent/tmplx/pages"),
            ..CompilerOptions::default()
        };
        let err = compile(&options).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_write_output_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen").join("tmplx.go");
        write_output(&path, "package tmplx\n").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "package tmplx\n");
    }
}
