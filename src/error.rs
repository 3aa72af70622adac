//! Error and diagnostic types for the tmplx compiler

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A location inside one source file. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Span pointing at the start of a file
    pub fn file_start(file: impl Into<String>) -> Self {
        Self::new(file, 1, 1)
    }

    /// Translate a (line, column) relative to an embedded block back into
    /// file coordinates, given where the block starts.
    pub fn offset_by(&self, line: usize, column: usize) -> Self {
        if line <= 1 {
            Self::new(self.file.clone(), self.line, self.column + column.saturating_sub(1))
        } else {
            Self::new(self.file.clone(), self.line + line - 1, column)
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Naming,
    Script,
    Template,
    Io,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Naming => write!(f, "naming"),
            DiagnosticKind::Script => write!(f, "script"),
            DiagnosticKind::Template => write!(f, "template"),
            DiagnosticKind::Io => write!(f, "io"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One source-located compiler message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            span,
            message: message.into(),
        }
    }

    pub fn warning(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            span,
            message: message.into(),
        }
    }

    pub fn naming(span: Span, message: impl Into<String>) -> Self {
        Self::error(DiagnosticKind::Naming, span, message)
    }

    pub fn script(span: Span, message: impl Into<String>) -> Self {
        Self::error(DiagnosticKind::Script, span, message)
    }

    pub fn template(span: Span, message: impl Into<String>) -> Self {
        Self::error(DiagnosticKind::Template, span, message)
    }

    pub fn io(span: Span, message: impl Into<String>) -> Self {
        Self::error(DiagnosticKind::Io, span, message)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}[{}]: {}", self.span, level, self.kind, self.message)
    }
}

/// Batched diagnostics collected across all units of one compilation
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        if !diagnostic.is_error() {
            log::warn!("{}", diagnostic);
        }
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn has_io_errors(&self) -> bool {
        self.items
            .iter()
            .any(|d| d.is_error() && d.kind == DiagnosticKind::Io)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.items.iter().filter(|d| !d.is_error()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.items {
            writeln!(f, "{}", diagnostic)?;
        }
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.error_count(),
            self.warning_count()
        )
    }
}

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory traversal error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Compilation failed with {} error(s)", .0.error_count())]
    Diagnostics(Diagnostics),
}

pub type Result<T> = std::result::Result<T, CompilerError>;

/// Outcome of a per-unit phase: the first fatal diagnostic stops the unit
pub type UnitResult<T> = std::result::Result<T, Diagnostic>;

impl CompilerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Process exit code for this failure: 2 for I/O, 1 for everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            CompilerError::Io(_) | CompilerError::Walk(_) => 2,
            CompilerError::Diagnostics(diagnostics) if diagnostics.has_io_errors() => 2,
            _ => 1,
        }
    }
}
