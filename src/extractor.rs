//! Semantic extraction: split a source unit into its script and template tree

use crate::error::{Diagnostic, DiagnosticKind, Diagnostics, Span, UnitResult};
use crate::html::{self, Attribute, Node};
use crate::types::{
    ComponentDocument, Document, DocumentBody, PageDocument, ScriptBlock, SourceUnit, UnitKind,
    SCRIPT_MIME_TYPE,
};

const METADATA_ELEMENTS: &[&str] = &["base", "link", "meta", "noscript", "script", "style", "title"];

/// Parse a unit and pull out its script block and template structure.
pub fn extract(unit: &SourceUnit, diagnostics: &mut Diagnostics) -> UnitResult<Document> {
    let file = unit.display_path();
    let mut nodes = html::parse(&unit.raw_html, &file);

    let mut scripts = Vec::new();
    take_scripts(&mut nodes, &mut scripts);
    if let Some(extra) = scripts.get(1) {
        return Err(Diagnostic::naming(
            extra.span.clone(),
            format!("more than one <script type=\"{}\"> block", SCRIPT_MIME_TYPE),
        ));
    }
    let script = scripts.into_iter().next();

    let body = match unit.kind {
        UnitKind::Page => DocumentBody::Page(split_page(nodes)),
        UnitKind::Component => DocumentBody::Component(component_template(nodes, &file, diagnostics)?),
    };

    log::debug!(
        "Extracted {} (script: {})",
        file,
        if script.is_some() { "yes" } else { "no" }
    );
    Ok(Document { script, body })
}

fn is_tmplx_script(node: &Node) -> bool {
    node.as_element().map_or(false, |el| {
        el.name == "script"
            && el
                .attr("type")
                .map_or(false, |a| a.value_str().trim().eq_ignore_ascii_case(SCRIPT_MIME_TYPE))
    })
}

/// Remove every tmplx script from the tree, collecting them in document order
fn take_scripts(nodes: &mut Vec<Node>, found: &mut Vec<ScriptBlock>) {
    let mut i = 0;
    while i < nodes.len() {
        if is_tmplx_script(&nodes[i]) {
            if let Node::Element(el) = nodes.remove(i) {
                let span = el
                    .children
                    .first()
                    .map(|child| child.span().clone())
                    .unwrap_or_else(|| el.span.clone());
                found.push(ScriptBlock {
                    source: el.text_content(),
                    span,
                });
            }
            continue;
        }
        if let Node::Element(el) = &mut nodes[i] {
            take_scripts(&mut el.children, found);
        }
        i += 1;
    }
}

fn split_page(nodes: Vec<Node>) -> PageDocument {
    let mut page = PageDocument::default();
    let mut content = Vec::new();

    for node in nodes {
        match node {
            Node::Doctype(text, _) if page.doctype.is_none() => page.doctype = Some(text),
            Node::Element(el) if el.name == "html" => {
                page.html_attrs = el.attrs;
                content.extend(el.children);
            }
            other => content.push(other),
        }
    }

    let mut head: Option<(Vec<Attribute>, Vec<Node>)> = None;
    let mut body: Option<(Vec<Attribute>, Vec<Node>)> = None;
    let mut loose = Vec::new();
    for node in content {
        match node {
            Node::Element(el) if el.name == "head" && head.is_none() => head = Some((el.attrs, el.children)),
            Node::Element(el) if el.name == "body" && body.is_none() => body = Some((el.attrs, el.children)),
            other => loose.push(other),
        }
    }

    match (head, body) {
        (Some((head_attrs, head_nodes)), Some((body_attrs, mut body_nodes))) => {
            page.head_attrs = head_attrs;
            page.head = head_nodes;
            page.body_attrs = body_attrs;
            body_nodes.extend(loose.into_iter().filter(|n| !n.is_blank()));
            page.body = body_nodes;
        }
        (Some((head_attrs, head_nodes)), None) => {
            page.head_attrs = head_attrs;
            page.head = head_nodes;
            page.body = trim_blank_edges(loose);
        }
        (None, Some((body_attrs, body_nodes))) => {
            page.body_attrs = body_attrs;
            page.body = body_nodes;
            page.head = loose.into_iter().filter(|n| !n.is_blank()).collect();
        }
        (None, None) => {
            let split = loose
                .iter()
                .position(|n| match n {
                    Node::Element(el) => !METADATA_ELEMENTS.contains(&el.name.as_str()),
                    other => !other.is_blank(),
                })
                .unwrap_or(loose.len());
            let rest = loose.split_off(split);
            page.head = loose;
            page.body = trim_blank_edges(rest);
        }
    }
    page
}

fn trim_blank_edges(mut nodes: Vec<Node>) -> Vec<Node> {
    while nodes.first().map_or(false, |n| matches!(n, Node::Text(_)) && n.is_blank()) {
        nodes.remove(0);
    }
    while nodes.last().map_or(false, |n| matches!(n, Node::Text(_)) && n.is_blank()) {
        nodes.pop();
    }
    nodes
}

fn component_template(
    nodes: Vec<Node>,
    file: &str,
    diagnostics: &mut Diagnostics,
) -> UnitResult<ComponentDocument> {
    let mut templates = Vec::new();
    for node in nodes {
        match node {
            Node::Element(el) if el.name == "template" => templates.push(el),
            other if other.is_blank() || matches!(other, Node::Doctype(..)) => {}
            other => diagnostics.push(Diagnostic::warning(
                DiagnosticKind::Naming,
                other.span().clone(),
                "content outside the component <template> is ignored",
            )),
        }
    }

    match templates.len() {
        0 => Err(Diagnostic::naming(
            Span::file_start(file),
            "component has no top-level <template> element",
        )),
        1 => {
            let template = templates.remove(0);
            Ok(ComponentDocument {
                template: template.children,
                template_span: template.span,
            })
        }
        _ => Err(Diagnostic::naming(
            templates[1].span.clone(),
            "component has more than one top-level <template> element",
        )),
    }
}
