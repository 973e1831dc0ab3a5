use thiserror::Error;

/// Every way a compilation unit can be rejected.
///
/// Each variant carries the source line of the token that triggered it, so
/// diagnostics can be reported as `[line N] ...` without keeping the whole
/// tree alive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("[line {line}] unexpected character '{ch}'")]
    UnexpectedChar { ch: char, line: u32 },

    #[error("[line {line}] unterminated string literal")]
    UnterminatedString { line: u32 },

    #[error("[line {line}] unbalanced delimiter '{found}'")]
    UnbalancedDelimiter { found: char, line: u32 },

    #[error("[line {line}] unexpected end of input")]
    UnexpectedEof { line: u32 },

    #[error("[line {line}] integer literal {value} does not fit in a tagged word")]
    IntegerRange { value: String, line: u32 },

    #[error("[line {line}] unable to resolve symbol {name}")]
    UnresolvedSymbol { name: String, line: u32 },

    #[error("[line {line}] wrong number of args ({got}) passed to {form}")]
    WrongArgCount { form: String, got: usize, line: u32 },

    #[error("[line {line}] {callee} requires {expected} argument(s), got {got}")]
    ArityMismatch {
        callee: String,
        expected: String,
        got: usize,
        line: u32,
    },

    #[error("[line {line}] {context}: expected {expected}, got {actual}")]
    TypeMismatch {
        context: String,
        expected: String,
        actual: String,
        line: u32,
    },

    #[error("[line {line}] cannot narrow frozen type {actual} to {expected}")]
    FrozenType {
        actual: String,
        expected: String,
        line: u32,
    },

    #[error("[line {line}] {callee} is not a function (got {actual})")]
    NotAFunction {
        callee: String,
        actual: String,
        line: u32,
    },

    #[error("[line {line}] malformed parameters: {reason}")]
    MalformedParams { reason: &'static str, line: u32 },

    #[error("[line {line}] malformed bindings: {reason}")]
    MalformedBindings { reason: &'static str, line: u32 },

    #[error("[line {line}] defn is only allowed at top level")]
    DefnNotTopLevel { line: u32 },

    #[error("[line {line}] expected a symbol or list in operator position")]
    BadOperator { line: u32 },
}

impl CompileError {
    pub fn line(&self) -> u32 {
        match self {
            Self::UnexpectedChar { line, .. }
            | Self::UnterminatedString { line }
            | Self::UnbalancedDelimiter { line, .. }
            | Self::UnexpectedEof { line }
            | Self::IntegerRange { line, .. }
            | Self::UnresolvedSymbol { line, .. }
            | Self::WrongArgCount { line, .. }
            | Self::ArityMismatch { line, .. }
            | Self::TypeMismatch { line, .. }
            | Self::FrozenType { line, .. }
            | Self::NotAFunction { line, .. }
            | Self::MalformedParams { line, .. }
            | Self::MalformedBindings { line, .. }
            | Self::DefnNotTopLevel { line }
            | Self::BadOperator { line } => *line,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
