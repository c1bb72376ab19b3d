// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic type used by import, the rewrite, and the
// pass driver. A diagnostic may be anchored to an operation (id and name) and
// to a source span when the operation came from parsed text.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;
use crate::ir::{IrError, Module, OpId};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// A required attribute is absent.
    pub const E0001: DiagCode = DiagCode("E0001");
    /// An attribute is present but malformed.
    pub const E0002: DiagCode = DiagCode("E0002");
    /// An operand type has no runtime data type.
    pub const E0003: DiagCode = DiagCode("E0003");
    /// Device resolution failed.
    pub const E0004: DiagCode = DiagCode("E0004");
    /// A referenced symbol is missing or the IR is structurally unusable.
    pub const E0005: DiagCode = DiagCode("E0005");
    /// Text syntax error.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// SSA or structure error while importing text.
    pub const E0101: DiagCode = DiagCode("E0101");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub op: Option<OpId>,
    pub op_name: Option<String>,
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, anchor, or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            op: None,
            op_name: None,
            span: None,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    /// Error anchored on `op`; the op's name prefixes the rendered message.
    pub fn op_error(module: &Module, op: OpId, message: impl Into<String>) -> Self {
        Self::error(message).at_op(module, op)
    }

    /// Anchor on an operation, taking its span when it has one.
    pub fn at_op(mut self, module: &Module, op: OpId) -> Self {
        let operation = module.op(op);
        self.op = Some(op);
        self.op_name = Some(operation.name().to_string());
        if self.span.is_none() {
            self.span = operation.span;
        }
        self
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    // ── Attribute message formats ──

    pub fn missing_attribute(name: &str) -> Self {
        Self::error(format!("requires attribute '{}'", name)).with_code(codes::E0001)
    }

    pub fn attribute_not_a_string(name: &str, index: usize) -> Self {
        Self::error(format!("bad '{}' attribute at index {}, not a string", name, index))
            .with_code(codes::E0002)
    }

    pub fn attribute_parse_failure(name: &str, index: usize, value: &str, target: &str) -> Self {
        Self::error(format!(
            "bad '{}' attribute at index {} with value '{}': failed to parse to {}",
            name, index, value, target
        ))
        .with_code(codes::E0002)
    }

    pub fn attribute_size_mismatch(name: &str, expected: usize, actual: usize) -> Self {
        Self::error(format!(
            "bad '{}' attribute, expected array attribute of size {}, got size {}",
            name, expected, actual
        ))
        .with_code(codes::E0002)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: ", level, code)?;
        } else {
            write!(f, "{}: ", level)?;
        }
        if let Some(name) = &self.op_name {
            write!(f, "'{}' op ", name)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(span) = &self.span {
            write!(f, " (at {}..{})", span.start, span.end)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

impl From<IrError> for Diagnostic {
    fn from(err: IrError) -> Self {
        Diagnostic::error(err.to_string()).with_code(codes::E0005)
    }
}
