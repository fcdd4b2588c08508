use serde::{Deserialize, Serialize};

/// Default bound on expression/statement nesting in the parser.
pub const DEFAULT_MAX_PARSE_DEPTH: u32 = 200;

/// Default bound on script function call depth in the evaluator.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 256;

/// Resource bounds applied to a single engine.
///
/// Both limits exist to turn runaway scripts into diagnostics instead of
/// native stack overflows: the parser and the evaluator are recursive, so
/// guest nesting depth translates directly into host stack depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineLimits {
    /// Maximum nesting depth of expressions and statements while parsing.
    /// Exceeding it is a `ParseError`.
    pub max_parse_depth: u32,
    /// Maximum script function call depth while running. Exceeding it is a
    /// `RuntimeError`.
    pub max_call_depth: u32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_parse_depth: DEFAULT_MAX_PARSE_DEPTH,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}
