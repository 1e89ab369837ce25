//! Hand-written recursive descent parser for fragments.
//!
//! Expressions use precedence climbing. Precedence, lowest to highest:
//!
//! 1. `||`
//! 2. `&&`
//! 3. `==` `!=` `<` `<=` `>` `>=`
//! 4. `+` `-`
//! 5. `*` `/` `%`
//! 6. unary `-` `!`
//!
//! Nesting depth is bounded so hostile fragments cannot blow the stack.

use super::ast::{BinaryOp, Expr, Stmt, UnaryOp};
use super::lexer::Token;
use super::value::Value;
use super::EvalError;

/// Maximum expression nesting (parens, unary chains, call args).
const MAX_DEPTH: usize = 64;

struct TokenStream {
    tokens: Vec<(Token, std::ops::Range<usize>)>,
    pos: usize,
    depth: usize,
}

impl TokenStream {
    fn new(tokens: Vec<(Token, std::ops::Range<usize>)>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes the current token if it matches.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), EvalError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(context))
        }
    }

    fn unexpected(&self, context: &str) -> EvalError {
        let found = match self.tokens.get(self.pos) {
            Some((t, span)) => format!("{t:?} at byte {}", span.start),
            None => "end of input".to_string(),
        };
        EvalError::Syntax {
            message: format!("expected {context}, found {found}"),
        }
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

/// Parses a fragment into its statement list.
pub fn parse(tokens: Vec<(Token, std::ops::Range<usize>)>) -> Result<Vec<Stmt>, EvalError> {
    let mut stream = TokenStream::new(tokens);
    let mut stmts = Vec::new();

    loop {
        // Tolerate empty statements and a trailing semicolon
        while stream.eat(&Token::Semi) {}
        if stream.peek().is_none() {
            break;
        }
        stmts.push(parse_stmt(&mut stream)?);
        if stream.peek().is_some() {
            stream.expect(&Token::Semi, "`;` between statements")?;
        }
    }

    Ok(stmts)
}

fn parse_stmt(stream: &mut TokenStream) -> Result<Stmt, EvalError> {
    match stream.peek() {
        Some(Token::Let) => {
            stream.advance();
            let name = match stream.advance() {
                Some(Token::Ident(name)) => name,
                _ => return Err(stream.unexpected("binding name after `let`")),
            };
            stream.expect(&Token::Assign, "`=` after binding name")?;
            let value = parse_expr(stream, 0)?;
            Ok(Stmt::Let { name, value })
        }
        Some(Token::Throw) => {
            stream.advance();
            Ok(Stmt::Throw(parse_expr(stream, 0)?))
        }
        _ => Ok(Stmt::Expr(parse_expr(stream, 0)?)),
    }
}

/// Binding power of an infix operator, None if the token is not one.
fn infix_power(token: &Token) -> Option<(BinaryOp, u8)> {
    let entry = match token {
        Token::OrOr => (BinaryOp::Or, 1),
        Token::AndAnd => (BinaryOp::And, 2),
        Token::EqEq => (BinaryOp::Eq, 3),
        Token::NotEq => (BinaryOp::Ne, 3),
        Token::Lt => (BinaryOp::Lt, 3),
        Token::Le => (BinaryOp::Le, 3),
        Token::Gt => (BinaryOp::Gt, 3),
        Token::Ge => (BinaryOp::Ge, 3),
        Token::Plus => (BinaryOp::Add, 4),
        Token::Minus => (BinaryOp::Sub, 4),
        Token::Star => (BinaryOp::Mul, 5),
        Token::Slash => (BinaryOp::Div, 5),
        Token::Percent => (BinaryOp::Rem, 5),
        _ => return None,
    };
    Some(entry)
}

fn parse_expr(stream: &mut TokenStream, min_power: u8) -> Result<Expr, EvalError> {
    stream.enter()?;
    let mut lhs = parse_primary(stream)?;

    while let Some((op, power)) = stream.peek().and_then(infix_power) {
        if power < min_power {
            break;
        }
        stream.advance();
        // All infix operators are left associative
        let rhs = parse_expr(stream, power + 1)?;
        lhs = Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
    }

    stream.leave();
    Ok(lhs)
}

fn parse_primary(stream: &mut TokenStream) -> Result<Expr, EvalError> {
    match stream.peek() {
        Some(Token::Minus) => {
            stream.advance();
            stream.enter()?;
            let operand = parse_primary(stream)?;
            stream.leave();
            Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            })
        }
        Some(Token::Bang) => {
            stream.advance();
            stream.enter()?;
            let operand = parse_primary(stream)?;
            stream.leave();
            Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            })
        }
        _ => parse_atom(stream),
    }
}

fn parse_atom(stream: &mut TokenStream) -> Result<Expr, EvalError> {
    match stream.advance() {
        Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
        Some(Token::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
        Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
        Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
        Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
        Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
        Some(Token::LParen) => {
            let inner = parse_expr(stream, 0)?;
            stream.expect(&Token::RParen, "closing `)`")?;
            Ok(inner)
        }
        Some(Token::Ident(name)) => {
            if !stream.eat(&Token::LParen) {
                return Ok(Expr::Var(name));
            }
            let mut args = Vec::new();
            if !stream.eat(&Token::RParen) {
                loop {
                    args.push(parse_expr(stream, 0)?);
                    if stream.eat(&Token::Comma) {
                        continue;
                    }
                    stream.expect(&Token::RParen, "`,` or closing `)` in call")?;
                    break;
                }
            }
            Ok(Expr::Call { name, args })
        }
        _ => {
            // advance() already consumed; step back for an accurate message
            stream.pos = stream.pos.saturating_sub(1);
            Err(stream.unexpected("an expression"))
        }
    }
}
