//! Core data model shared by the compilation phases

use crate::error::Span;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// MIME type marking the embedded script block
pub const SCRIPT_MIME_TYPE: &str = "text/tmplx";

/// State-map key of the page root instance
pub const PAGE_ROOT_KEY: &str = "tx_";

/// Placeholder replaced with the serialised state map in full-page responses
pub const STATE_PLACEHOLDER: &str = "TX_STATE_JSON";

/// Prefix of every component tag
pub const COMPONENT_TAG_PREFIX: &str = "tx-";

/// Path prefix of handler endpoints
pub const HANDLER_ROUTE_PREFIX: &str = "/tx/";

/// Prefix reserved for identifiers introduced by generated code
pub const RESERVED_IDENT_PREFIX: &str = "tx_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitKind {
    Page,
    Component,
}

/// A named input file
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub kind: UnitKind,
    /// Path relative to its root directory, `/`-separated
    pub rel_path: String,
    /// Path as it was found on disk, used in diagnostics
    pub path: PathBuf,
    /// Pages only: `/about`, `/user/{id}`, `/{$}`
    pub route_pattern: Option<String>,
    /// Components only: `tx-todo`
    pub component_tag: Option<String>,
    /// Escaped Go identifier used for generated symbols
    pub ident: String,
    /// Name embedded in component keys: `/index` for pages, the tag for components
    pub owner_name: String,
    pub raw_html: String,
}

impl SourceUnit {
    pub fn display_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn is_page(&self) -> bool {
        self.kind == UnitKind::Page
    }

    /// Route pattern or component tag, whichever applies
    pub fn name(&self) -> &str {
        self.route_pattern
            .as_deref()
            .or(self.component_tag.as_deref())
            .unwrap_or(&self.rel_path)
    }

    /// Path parameter names of the route pattern, in order
    pub fn path_params(&self) -> Vec<String> {
        let Some(route) = &self.route_pattern else {
            return Vec::new();
        };
        route
            .split('/')
            .filter_map(|segment| {
                segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .map(|s| s.trim_end_matches("...").to_string())
            })
            .filter(|name| name != "$")
            .collect()
    }
}

/// The embedded script, with the position where its text starts
#[derive(Debug, Clone)]
pub struct ScriptBlock {
    pub source: String,
    pub span: Span,
}

/// Extracted structure of one source unit
#[derive(Debug, Clone)]
pub struct Document {
    pub script: Option<ScriptBlock>,
    pub body: DocumentBody,
}

#[derive(Debug, Clone)]
pub enum DocumentBody {
    Page(PageDocument),
    Component(ComponentDocument),
}

#[derive(Debug, Clone, Default)]
pub struct PageDocument {
    pub doctype: Option<String>,
    pub html_attrs: Vec<crate::html::Attribute>,
    pub head_attrs: Vec<crate::html::Attribute>,
    pub head: Vec<crate::html::Node>,
    pub body_attrs: Vec<crate::html::Attribute>,
    pub body: Vec<crate::html::Node>,
}

#[derive(Debug, Clone)]
pub struct ComponentDocument {
    /// Children of the single top-level `<template>`
    pub template: Vec<crate::html::Node>,
    pub template_span: Span,
}

/// A handler parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: String,
}

/// A handler symbol, named or synthesised from an inline statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    pub name: String,
    pub params: Vec<Param>,
    /// Go statements re-emitted verbatim into the endpoint
    pub body: String,
    /// Identifier of the owning page or component
    pub owner: String,
    pub span: Span,
}

impl Handler {
    /// Endpoint identifier, also the last path segment of its route
    pub fn id(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    State {
        ty: String,
        init: Option<String>,
        path_param: Option<String>,
    },
    Derived {
        ty: String,
        init: String,
        deps: BTreeSet<String>,
    },
    Prop {
        ty: String,
        default: Option<String>,
    },
    Handler(Handler),
    Init {
        body: String,
    },
}

/// A named declaration from a script block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub span: Span,
    pub kind: SymbolKind,
}

impl Symbol {
    /// Declared type for value symbols
    pub fn ty(&self) -> Option<&str> {
        match &self.kind {
            SymbolKind::State { ty, .. }
            | SymbolKind::Derived { ty, .. }
            | SymbolKind::Prop { ty, .. } => Some(ty),
            SymbolKind::Handler(_) | SymbolKind::Init { .. } => None,
        }
    }

    pub fn is_value(&self) -> bool {
        self.ty().is_some()
    }

    /// Values that live in the serialised state record
    pub fn is_persisted(&self) -> bool {
        matches!(self.kind, SymbolKind::State { .. } | SymbolKind::Prop { .. })
    }

    pub fn is_state(&self) -> bool {
        matches!(self.kind, SymbolKind::State { .. })
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.kind, SymbolKind::Derived { .. })
    }

    pub fn is_prop(&self) -> bool {
        matches!(self.kind, SymbolKind::Prop { .. })
    }
}

/// A Go import collected from script blocks
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImportSpec {
    pub alias: Option<String>,
    /// Quoted import path as written, e.g. `"strings"`
    pub path: String,
}

/// Classified declarations of one unit, in declaration order
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub symbols: Vec<Symbol>,
    pub imports: Vec<ImportSpec>,
    /// Names of derived values in evaluation order
    pub derived_order: Vec<String>,
}

impl SymbolTable {
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// State, Derived and Prop symbols in declaration order
    pub fn values(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| s.is_value())
    }

    /// State and Prop symbols, the fields of the state record
    pub fn persisted(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| s.is_persisted())
    }

    pub fn props(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| s.is_prop())
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Handler> {
        self.symbols.iter().filter_map(|s| match &s.kind {
            SymbolKind::Handler(handler) => Some(handler),
            _ => None,
        })
    }

    pub fn handler(&self, name: &str) -> Option<&Handler> {
        self.handlers().find(|h| h.name == name)
    }

    pub fn init_body(&self) -> Option<&str> {
        self.symbols.iter().find_map(|s| match &s.kind {
            SymbolKind::Init { body } => Some(body.as_str()),
            _ => None,
        })
    }

    /// Derived symbols in evaluation order
    pub fn derived_in_order(&self) -> impl Iterator<Item = &Symbol> {
        self.derived_order.iter().filter_map(|name| self.get(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeMode {
    /// HTML-escaped, used for text content
    Escape,
    /// Written as-is, used for attribute values
    Raw,
}

/// A key evaluated at runtime: the enclosing render key, a static suffix,
/// and one `_<value>` segment per enclosing keyed loop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyExpr {
    pub suffix: String,
    pub loop_keys: Vec<String>,
}

impl KeyExpr {
    /// The key of the instance currently being rendered
    pub fn current() -> Self {
        Self::default()
    }
}

/// Value bound to a component prop at the instantiation site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    /// Go expression evaluated in the parent's scope
    Expr(String),
    /// Plain attribute text, emitted as a Go string literal
    Literal(String),
    /// Valueless attribute
    Flag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropBinding {
    pub prop: String,
    pub value: PropValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentCall {
    pub tag: String,
    pub props: Vec<PropBinding>,
    pub named_slots: Vec<(String, Vec<RenderOp>)>,
    pub default_slot: Option<Vec<RenderOp>>,
    pub key: KeyExpr,
    pub span: Span,
}

/// One argument of a handler call, bound to the handler parameter it feeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerArg {
    pub param: String,
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CondBranch {
    pub cond: String,
    pub body: Vec<RenderOp>,
}

/// One instruction of a lowered template
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    EmitLiteral(String),
    EmitInterp {
        expr: String,
        mode: EscapeMode,
    },
    Cond {
        chain: Vec<CondBranch>,
        else_body: Option<Vec<RenderOp>>,
    },
    Loop {
        header: String,
        key_expr: Option<String>,
        body: Vec<RenderOp>,
    },
    Component(ComponentCall),
    Slot {
        name: Option<String>,
        fallback: Vec<RenderOp>,
    },
    InputBinding {
        state: String,
        swap_key: KeyExpr,
    },
    EventBinding {
        event: String,
        handler_id: String,
        args: Vec<HandlerArg>,
        /// Set on the first binding of an element only
        swap_key: Option<KeyExpr>,
    },
    SwapAnchors {
        key: KeyExpr,
        body: Vec<RenderOp>,
    },
}

/// Slots a component body declares through `<slot>` outlets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotSet {
    pub default: bool,
    pub named: Vec<String>,
}

impl SlotSet {
    pub fn contains(&self, name: &str) -> bool {
        self.named.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        !self.default && self.named.is_empty()
    }
}

/// Render program and synthesised handlers of one unit
#[derive(Debug, Clone, Default)]
pub struct LoweredUnit {
    /// For pages: ops of the whole document. For components: the body.
    pub ops: Vec<RenderOp>,
    pub anon_handlers: Vec<Handler>,
}
