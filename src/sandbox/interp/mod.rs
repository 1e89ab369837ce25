//! Restricted fragment interpreter.
//!
//! Fragments run against an allow-listed symbol table (the sandbox
//! environment) — there is no ambient access to host state. Every fault
//! converts into an [`EvalError`] whose display text becomes the `error`
//! string of the execution response; nothing propagates out as a panic.

mod ast;
mod eval;
mod lexer;
mod parser;
pub mod value;

use thiserror::Error;

pub use value::Value;

use crate::sandbox::env::SandboxEnvironment;

/// Evaluation fault. Always recoverable: reported as the response's
/// `error` string, never a crash of either side.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("syntax error: {message}")]
    Syntax { message: String },

    #[error("undefined symbol `{name}`")]
    Undefined { name: String },

    #[error("`{name}` expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("type error: {message}")]
    Type { message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    /// A `throw` statement. The thrown value's text is preserved verbatim.
    #[error("{message}")]
    Thrown { message: String },

    #[error("expression nesting exceeds {limit} levels")]
    TooDeep { limit: usize },

    #[error("fragment exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("capability `{name}` failed: {message}")]
    Capability { name: String, message: String },
}

impl EvalError {
    pub fn is_thrown(&self) -> bool {
        matches!(self, Self::Thrown { .. })
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}

/// Evaluates one fragment against the environment.
///
/// Resolves once top-level evaluation completes: capability invocations
/// made by the fragment are awaited, background work a capability spawns
/// is not (fire-and-forget).
pub async fn evaluate(code: &str, env: &SandboxEnvironment) -> Result<Value, EvalError> {
    let tokens = lexer::tokenize(code)?;
    let program = parser::parse(tokens)?;
    eval::Evaluator::new(env).run(&program).await
}
