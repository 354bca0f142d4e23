//! Collected diagnostics with source context.
//!
//! Compilation errors are collected, not thrown: a single pass may report
//! many. Each diagnostic renders as a `file:line:col` header with a stable
//! error-kind prefix, the core message, and a source-line snippet with a
//! caret underline. Coloring is the caller's concern; rendering here is
//! plain text into any `fmt::Write` sink.

use std::fmt::{self, Write as _};

use strum_macros::{Display, EnumString};

use aro_core::span::Span;

/// Stable, user-facing error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum CompileErrorKind {
    UnknownVerb,
    TypeMismatch,
    UndefinedSymbol,
    InvalidExpression,
    ModuleVerificationFailed,
    NoEntryPoint,
    /// Recorded for compatibility; never raised. Multiple entry points are
    /// legal and the last one is the application main.
    MultipleEntryPoints,
    InvalidPreposition,
    MissingOperationId,
    DuplicateOperationId,
    MissingHandler,
    InvalidSchemaReference,
    NoContract,
    CircularEventChain,
}

/// A single reported error.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: CompileErrorKind,
    pub message: String,
    pub span: Span,
    /// The source line the span starts on, when the reporter has the text.
    pub source_line: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            source_line: None,
        }
    }

    pub fn with_source_line(mut self, line: impl Into<String>) -> Self {
        self.source_line = Some(line.into());
        self
    }

    fn render(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let file = self.span.file.as_deref().unwrap_or("<input>");
        writeln!(
            out,
            "{}:{}:{}: {}: {}",
            file, self.span.start.line, self.span.start.col, self.kind, self.message
        )?;
        if let Some(line) = &self.source_line {
            writeln!(out, "  {line}")?;
            let pad = " ".repeat(self.span.start.col.saturating_sub(1) as usize);
            writeln!(out, "  {}{}", pad, "^".repeat(self.span.underline_width()))?;
        }
        Ok(())
    }
}

/// Collects diagnostics across a compilation pass.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
    /// Full source text, used to attach snippet lines as errors arrive.
    source: Option<String>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            diagnostics: Vec::new(),
            source: Some(source.into()),
        }
    }

    pub fn report(&mut self, kind: CompileErrorKind, message: impl Into<String>, span: Span) {
        let mut diagnostic = Diagnostic::new(kind, message, span);
        if let Some(line) = self.source_line(diagnostic.span.start.line) {
            diagnostic = diagnostic.with_source_line(line);
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render every diagnostic, with the `N errors generated.` trailer when
    /// more than one is present.
    pub fn render_all(&self) -> String {
        let mut out = String::new();
        for diagnostic in &self.diagnostics {
            let _ = diagnostic.render(&mut out);
        }
        if self.diagnostics.len() > 1 {
            let _ = writeln!(out, "{} errors generated.", self.diagnostics.len());
        }
        out
    }

    fn source_line(&self, line: u32) -> Option<String> {
        let source = self.source.as_deref()?;
        source
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_core::span::SourceLocation;

    fn span(line: u32, start_col: u32, end_col: u32) -> Span {
        Span::in_file(
            SourceLocation::new(line, start_col),
            SourceLocation::new(line, end_col),
            "app.aro",
        )
    }

    #[test]
    fn kinds_render_as_stable_identifiers() {
        assert_eq!(CompileErrorKind::UnknownVerb.to_string(), "unknown-verb");
        assert_eq!(
            CompileErrorKind::ModuleVerificationFailed.to_string(),
            "module-verification-failed"
        );
        assert_eq!(
            CompileErrorKind::CircularEventChain.to_string(),
            "circular-event-chain"
        );
    }

    #[test]
    fn single_error_renders_without_trailer() {
        let mut reporter = ErrorReporter::with_source("<Extract> the <user> from the <request>.");
        reporter.report(
            CompileErrorKind::UnknownVerb,
            "no action is registered for verb 'extrct'",
            span(1, 2, 8),
        );
        let rendered = reporter.render_all();
        assert!(rendered.starts_with("app.aro:1:2: unknown-verb:"));
        assert!(rendered.contains("<Extract> the <user>"));
        assert!(rendered.contains("\n   ^^^^^^\n"));
        assert!(!rendered.contains("errors generated"));
    }

    #[test]
    fn multiple_errors_append_trailer() {
        let mut reporter = ErrorReporter::new();
        reporter.report(CompileErrorKind::UndefinedSymbol, "unknown 'a'", span(1, 1, 2));
        reporter.report(CompileErrorKind::TypeMismatch, "expected integer", span(2, 1, 4));
        let rendered = reporter.render_all();
        assert!(rendered.ends_with("2 errors generated.\n"));
    }

    #[test]
    fn caret_width_is_at_least_one() {
        let mut reporter = ErrorReporter::with_source("x");
        reporter.report(CompileErrorKind::InvalidExpression, "empty span", span(1, 1, 1));
        let rendered = reporter.render_all();
        assert!(rendered.contains("\n  ^\n"));
    }
}
