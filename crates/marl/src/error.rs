use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can fail inside the engine.
pub(crate) type ExecResult<T> = Result<T, EngineError>;

/// Categories of engine failures.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g. `TypeError` -> "TypeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unexpected byte in the source stream.
    LexError,
    /// Unexpected token or grammar violation.
    ParseError,
    /// Unknown type, invalid conversion, or const violation.
    TypeError,
    /// A name did not resolve against the scope chain.
    NameError,
    /// Arity mismatch or a bad cast while binding call arguments.
    ArgumentError,
    /// Bad call target, void used as a value, integer division by zero,
    /// and other failures only detectable while executing.
    RuntimeError,
    /// An error surfaced by a native callback.
    HostError,
}

/// A 1-based source position attached to tokens, AST nodes, and errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeLoc {
    pub row: u32,
    pub col: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.row, self.col)
    }
}

/// An engine failure: a kind, a message, and the source position when one
/// is available.
///
/// `EngineError` flows through [`ExecResult`] inside the parser and the
/// evaluator and is what native callbacks return to signal failure. At the
/// `build`/`run` boundary it is converted into a [`Diagnostic`] for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    kind: ErrorKind,
    msg: Cow<'static, str>,
    loc: Option<CodeLoc>,
}

impl EngineError {
    pub(crate) fn new(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            loc: None,
        }
    }

    /// Attaches a source position. The first position wins: re-tagging an
    /// error that already carries one is a no-op, so the innermost frame
    /// decides where the error points.
    #[must_use]
    pub(crate) fn at(mut self, loc: CodeLoc) -> Self {
        if self.loc.is_none() {
            self.loc = Some(loc);
        }
        self
    }

    pub(crate) fn lex(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::LexError, msg)
    }

    pub(crate) fn parse(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ParseError, msg)
    }

    pub(crate) fn type_error(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::TypeError, msg)
    }

    pub(crate) fn name(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NameError, msg)
    }

    pub(crate) fn argument(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ArgumentError, msg)
    }

    pub(crate) fn runtime(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::RuntimeError, msg)
    }

    /// Constructor for native callbacks that need to surface a failure to
    /// the script. The resulting diagnostic carries [`ErrorKind::HostError`].
    #[must_use]
    pub fn host(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::HostError, msg)
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.msg
    }

    #[must_use]
    pub fn loc(&self) -> Option<CodeLoc> {
        self.loc
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}: {} at line {loc}", self.kind, self.msg),
            None => write!(f, "{}: {}", self.kind, self.msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// What the host sees when `build` or `run` fails.
///
/// The same value is emitted to the configured [`DiagnosticSink`] and
/// returned as the `Err` arm, so embedders can either match on it or just
/// inspect the sink.
///
/// [`DiagnosticSink`]: crate::DiagnosticSink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Option<CodeLoc>,
}

impl From<EngineError> for Diagnostic {
    fn from(err: EngineError) -> Self {
        Self {
            kind: err.kind,
            message: err.msg.into_owned(),
            loc: err.loc,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}: {} at line {loc}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}
