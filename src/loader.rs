//! Source tree loading: walk the pages and components directories

use crate::error::{Diagnostic, Diagnostics, Result, Span};
use crate::naming;
use crate::types::{SourceUnit, UnitKind};
use crate::CompilerOptions;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Load every page and component, pages first, each group in sorted path order.
/// Naming conflicts and unreadable files are recorded as diagnostics; the
/// affected unit is skipped.
pub fn load_units(options: &CompilerOptions, diagnostics: &mut Diagnostics) -> Result<Vec<SourceUnit>> {
    let mut units = Vec::new();

    let pages = collect_files(&options.pages_dir, &options.page_extensions, true)?;
    log::debug!("Found {} page file(s) under {}", pages.len(), options.pages_dir.display());
    for (rel_path, path) in pages {
        if let Some(unit) = load_unit(UnitKind::Page, rel_path, path, diagnostics) {
            units.push(unit);
        }
    }

    let components = collect_files(&options.components_dir, &options.component_extensions, false)?;
    log::debug!(
        "Found {} component file(s) under {}",
        components.len(),
        options.components_dir.display()
    );
    for (rel_path, path) in components {
        if let Some(unit) = load_unit(UnitKind::Component, rel_path, path, diagnostics) {
            units.push(unit);
        }
    }

    Ok(check_conflicts(units, diagnostics))
}

/// Sorted `(relative path, path)` pairs of every file with a matching extension
fn collect_files(root: &Path, extensions: &[String], required: bool) -> Result<Vec<(String, PathBuf)>> {
    if !root.is_dir() {
        if required {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("directory not found: {}", root.display()),
            )
            .into());
        }
        log::debug!("Skipping missing directory {}", root.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if !matches {
            log::debug!("Skipping {}", path.display());
            continue;
        }

        let rel = path.strip_prefix(root).unwrap_or(path);
        let rel_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((rel_path, path.to_path_buf()));
    }
    Ok(files)
}

fn load_unit(kind: UnitKind, rel_path: String, path: PathBuf, diagnostics: &mut Diagnostics) -> Option<SourceUnit> {
    let span = Span::file_start(path.to_string_lossy());

    let raw_html = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            diagnostics.push(Diagnostic::io(span, format!("cannot read source file: {}", e)));
            return None;
        }
    };

    let unit = match kind {
        UnitKind::Page => {
            let route = match naming::route_for_page(&rel_path) {
                Ok(route) => route,
                Err(message) => {
                    diagnostics.push(Diagnostic::naming(span, message));
                    return None;
                }
            };
            SourceUnit {
                kind,
                ident: naming::page_ident(&route),
                owner_name: naming::page_owner_name(&rel_path),
                route_pattern: Some(route),
                component_tag: None,
                rel_path,
                path,
                raw_html,
            }
        }
        UnitKind::Component => {
            let tag = match naming::tag_for_component(&rel_path) {
                Ok(tag) => tag,
                Err(message) => {
                    diagnostics.push(Diagnostic::naming(span, message));
                    return None;
                }
            };
            SourceUnit {
                kind,
                ident: naming::component_ident(&tag),
                owner_name: tag.clone(),
                route_pattern: None,
                component_tag: Some(tag),
                rel_path,
                path,
                raw_html,
            }
        }
    };

    log::debug!("Loaded {} as {}", unit.display_path(), unit.name());
    Some(unit)
}

/// Drop units whose route, tag or identifier is already taken
fn check_conflicts(units: Vec<SourceUnit>, diagnostics: &mut Diagnostics) -> Vec<SourceUnit> {
    let mut names: BTreeMap<(UnitKind, String), String> = BTreeMap::new();
    let mut idents: BTreeMap<String, String> = BTreeMap::new();
    let mut kept = Vec::with_capacity(units.len());

    for unit in units {
        let span = Span::file_start(unit.display_path());
        let what = if unit.is_page() { "route" } else { "component tag" };

        if let Some(first) = names.get(&(unit.kind, unit.name().to_string())) {
            diagnostics.push(Diagnostic::naming(
                span,
                format!("duplicate {} '{}' (also defined by {})", what, unit.name(), first),
            ));
            continue;
        }
        if let Some(first) = idents.get(&unit.ident) {
            diagnostics.push(Diagnostic::naming(
                span,
                format!("generated identifier '{}' collides with {}", unit.ident, first),
            ));
            continue;
        }

        names.insert((unit.kind, unit.name().to_string()), unit.display_path());
        idents.insert(unit.ident.clone(), unit.display_path());
        kept.push(unit);
    }
    kept
}
