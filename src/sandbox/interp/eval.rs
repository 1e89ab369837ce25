//! Tree-walking evaluator.
//!
//! Capability invocations are async, so expression evaluation recurses
//! through boxed futures. One evaluator instance lives for exactly one
//! fragment; `let` bindings are fragment-local and die with it.

use std::collections::HashMap;

use futures::future::BoxFuture;

use super::ast::{BinaryOp, Expr, Stmt, UnaryOp};
use super::value::Value;
use super::EvalError;
use crate::sandbox::env::SandboxEnvironment;

pub(super) struct Evaluator<'a> {
    env: &'a SandboxEnvironment,
    locals: HashMap<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub(super) fn new(env: &'a SandboxEnvironment) -> Self {
        Self {
            env,
            locals: HashMap::new(),
        }
    }

    /// Runs the statement list; the fragment's value is the last
    /// expression's value (Null for let-terminated or empty fragments).
    pub(super) async fn run(&mut self, program: &[Stmt]) -> Result<Value, EvalError> {
        let mut last = Value::Null;
        for stmt in program {
            match stmt {
                Stmt::Let { name, value } => {
                    let value = self.eval(value).await?;
                    self.locals.insert(name.clone(), value);
                    last = Value::Null;
                }
                Stmt::Throw(expr) => {
                    let value = self.eval(expr).await?;
                    return Err(EvalError::Thrown {
                        message: value.to_string(),
                    });
                }
                Stmt::Expr(expr) => last = self.eval(expr).await?,
            }
        }
        Ok(last)
    }

    fn eval<'b>(&'b mut self, expr: &'b Expr) -> BoxFuture<'b, Result<Value, EvalError>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(value) => Ok(value.clone()),
                Expr::Var(name) => self.lookup(name),
                Expr::Unary { op, operand } => {
                    let value = self.eval(operand).await?;
                    unary(*op, value)
                }
                Expr::Binary {
                    op: BinaryOp::And,
                    lhs,
                    rhs,
                } => {
                    // Short-circuit: rhs untouched when lhs is falsy
                    if !self.eval(lhs).await?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(self.eval(rhs).await?.is_truthy()))
                }
                Expr::Binary {
                    op: BinaryOp::Or,
                    lhs,
                    rhs,
                } => {
                    if self.eval(lhs).await?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(self.eval(rhs).await?.is_truthy()))
                }
                Expr::Binary { op, lhs, rhs } => {
                    let lhs = self.eval(lhs).await?;
                    let rhs = self.eval(rhs).await?;
                    binary(*op, lhs, rhs)
                }
                Expr::Call { name, args } => {
                    let capability = self.env.capability(name).ok_or_else(|| {
                        EvalError::Undefined {
                            name: name.clone(),
                        }
                    })?;
                    if capability.arity() != args.len() {
                        return Err(EvalError::Arity {
                            name: name.clone(),
                            expected: capability.arity(),
                            got: args.len(),
                        });
                    }
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg).await?);
                    }
                    capability
                        .invoke(&values, self.env.context())
                        .await
                        .map_err(|e| EvalError::Capability {
                            name: name.clone(),
                            message: e.to_string(),
                        })
                }
            }
        })
    }

    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        if let Some(value) = self.locals.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.env.constant(name) {
            return Ok(value.clone());
        }
        if self.env.capability(name).is_some() {
            return Err(EvalError::Type {
                message: format!("capability `{name}` must be called"),
            });
        }
        Err(EvalError::Undefined {
            name: name.to_string(),
        })
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or(EvalError::Overflow),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(EvalError::Type {
            message: format!("cannot negate {}", other.type_name()),
        }),
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => {
                a.checked_add(*b).map(Value::Int).ok_or(EvalError::Overflow)
            }
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => numeric(op, &lhs, &rhs, |a, b| a + b),
        },
        BinaryOp::Sub => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => {
                a.checked_sub(*b).map(Value::Int).ok_or(EvalError::Overflow)
            }
            _ => numeric(op, &lhs, &rhs, |a, b| a - b),
        },
        BinaryOp::Mul => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => {
                a.checked_mul(*b).map(Value::Int).ok_or(EvalError::Overflow)
            }
            _ => numeric(op, &lhs, &rhs, |a, b| a * b),
        },
        BinaryOp::Div => match (&lhs, &rhs) {
            (_, Value::Int(0)) => Err(EvalError::DivisionByZero),
            (Value::Int(a), Value::Int(b)) => {
                a.checked_div(*b).map(Value::Int).ok_or(EvalError::Overflow)
            }
            (_, Value::Float(f)) if *f == 0.0 => Err(EvalError::DivisionByZero),
            _ => numeric(op, &lhs, &rhs, |a, b| a / b),
        },
        BinaryOp::Rem => match (&lhs, &rhs) {
            (_, Value::Int(0)) => Err(EvalError::DivisionByZero),
            (Value::Int(a), Value::Int(b)) => {
                a.checked_rem(*b).map(Value::Int).ok_or(EvalError::Overflow)
            }
            (_, Value::Float(f)) if *f == 0.0 => Err(EvalError::DivisionByZero),
            _ => numeric(op, &lhs, &rhs, |a, b| a % b),
        },
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &lhs, &rhs),
        // Short-circuit forms are handled in the evaluator
        BinaryOp::And | BinaryOp::Or => unreachable!("logical ops evaluate short-circuit"),
    }
}

/// Mixed int/float arithmetic; anything non-numeric is a type fault.
fn numeric(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    apply: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(apply(a, b))),
        _ => Err(EvalError::Type {
            message: format!(
                "`{}` not supported between {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            ),
        }),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let ordering = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => {
                a.partial_cmp(&b).ok_or_else(|| EvalError::Type {
                    message: "cannot order NaN".to_string(),
                })?
            }
            _ => {
                return Err(EvalError::Type {
                    message: format!(
                        "`{}` not supported between {} and {}",
                        op.symbol(),
                        lhs.type_name(),
                        rhs.type_name()
                    ),
                })
            }
        },
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::evaluate;
    use super::*;
    use crate::sandbox::builtin::register_defaults;
    use crate::sandbox::env::EnvironmentBuilder;
    use crate::sandbox::state::SharedState;

    fn test_env() -> SandboxEnvironment {
        let state = Arc::new(SharedState::new());
        register_defaults(EnvironmentBuilder::new(state))
            .constant("pi", Value::Float(std::f64::consts::PI))
            .build()
    }

    async fn eval_ok(code: &str) -> Value {
        evaluate(code, &test_env()).await.unwrap()
    }

    async fn eval_err(code: &str) -> EvalError {
        evaluate(code, &test_env()).await.unwrap_err()
    }

    #[tokio::test]
    async fn test_integer_addition() {
        assert_eq!(eval_ok("1+1").await, Value::Int(2));
    }

    #[tokio::test]
    async fn test_precedence_and_parens() {
        assert_eq!(eval_ok("1 + 2 * 3").await, Value::Int(7));
        assert_eq!(eval_ok("(1 + 2) * 3").await, Value::Int(9));
        assert_eq!(eval_ok("10 - 3 - 2").await, Value::Int(5));
    }

    #[tokio::test]
    async fn test_mixed_arithmetic_promotes_to_float() {
        assert_eq!(eval_ok("1 + 0.5").await, Value::Float(1.5));
        assert_eq!(eval_ok("3 / 2").await, Value::Int(1));
        assert_eq!(eval_ok("3.0 / 2").await, Value::Float(1.5));
    }

    #[tokio::test]
    async fn test_string_concatenation() {
        assert_eq!(
            eval_ok("'foo' + 'bar'").await,
            Value::Str("foobar".into())
        );
    }

    #[tokio::test]
    async fn test_adding_string_and_int_is_a_type_fault() {
        let err = eval_err("'foo' + 1").await;
        assert!(matches!(err, EvalError::Type { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_comparisons() {
        assert_eq!(eval_ok("1 < 2").await, Value::Bool(true));
        assert_eq!(eval_ok("2 <= 1").await, Value::Bool(false));
        assert_eq!(eval_ok("'a' < 'b'").await, Value::Bool(true));
        assert_eq!(eval_ok("1 == 1.0").await, Value::Bool(true));
        assert_eq!(eval_ok("1 != 'one'").await, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_logic_short_circuits() {
        // The rhs would fault if evaluated
        assert_eq!(eval_ok("false && missing()").await, Value::Bool(false));
        assert_eq!(eval_ok("true || missing()").await, Value::Bool(true));
        assert_eq!(eval_ok("!0").await, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_division_by_zero() {
        assert!(matches!(eval_err("1 / 0").await, EvalError::DivisionByZero));
        assert!(matches!(eval_err("1 % 0").await, EvalError::DivisionByZero));
        assert!(matches!(
            eval_err("1.0 / 0.0").await,
            EvalError::DivisionByZero
        ));
    }

    #[tokio::test]
    async fn test_integer_overflow() {
        let max = i64::MAX;
        assert!(matches!(
            eval_err(&format!("{max} + 1")).await,
            EvalError::Overflow
        ));
        assert!(matches!(
            eval_err(&format!("-{max} - 2")).await,
            EvalError::Overflow
        ));
    }

    #[tokio::test]
    async fn test_undefined_symbol() {
        let err = eval_err("nonexistent").await;
        assert!(matches!(err, EvalError::Undefined { ref name } if name == "nonexistent"));
        let err = eval_err("nonexistent(1)").await;
        assert!(matches!(err, EvalError::Undefined { .. }));
    }

    #[tokio::test]
    async fn test_bare_capability_reference_is_a_fault() {
        let err = eval_err("counter_value").await;
        assert!(err.to_string().contains("must be called"));
    }

    #[tokio::test]
    async fn test_throw_preserves_description() {
        let err = eval_err("throw 'boom'").await;
        assert!(err.is_thrown());
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_unparseable_fragment_is_a_syntax_fault() {
        assert!(eval_err("1 +").await.is_syntax());
        assert!(eval_err("let = 3").await.is_syntax());
    }

    #[tokio::test]
    async fn test_let_bindings_and_sequencing() {
        assert_eq!(eval_ok("let x = 2; let y = 3; x * y").await, Value::Int(6));
        // A fragment ending in `let` has no value
        assert_eq!(eval_ok("let x = 2;").await, Value::Null);
        assert_eq!(eval_ok("").await, Value::Null);
    }

    #[tokio::test]
    async fn test_locals_shadow_constants() {
        assert_eq!(eval_ok("let pi = 3; pi").await, Value::Int(3));
        assert!(matches!(eval_ok("pi").await, Value::Float(_)));
    }

    #[tokio::test]
    async fn test_capability_invocation_and_arity() {
        assert_eq!(eval_ok("counter_add(2) + counter_add(3)").await, Value::Int(7));
        let err = eval_err("counter_add()").await;
        assert!(
            matches!(err, EvalError::Arity { expected: 1, got: 0, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_capability_argument_type_fault() {
        let err = eval_err("counter_add('two')").await;
        assert!(matches!(err, EvalError::Capability { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_state_visible_across_fragments() {
        let env = test_env();
        evaluate("counter_add(5); start()", &env).await.unwrap();
        assert_eq!(
            evaluate("counter_value()", &env).await.unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            evaluate("started()", &env).await.unwrap(),
            Value::Bool(true)
        );
    }
}
