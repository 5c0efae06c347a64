//! Hand-written recursive descent parser for formulas.
//!
//! Precedence, loosest first:
//!
//! | level        | operators                 | associativity |
//! |--------------|---------------------------|---------------|
//! | conditional  | `c ? a : b`               | right         |
//! | nullish      | `??`                      | left          |
//! | logical or   | `\|\|`                    | left          |
//! | logical and  | `&&`                      | left          |
//! | equality     | `==` `!=` `===` `!==`     | left          |
//! | comparison   | `<` `<=` `>` `>=`         | left          |
//! | additive     | `+` `-`                   | left          |
//! | multiplicative | `*` `/` `%`             | left          |
//! | unary        | `-` `+` `!`               | prefix        |
//! | power        | `**`                      | right         |
//! | postfix      | `.name` `[i]` `f(args)`   | left          |

use super::FormulaLimits;
use super::ast::{BinaryOp, Expr, UnaryOp};
use super::functions;
use super::token::{Lexer, Spanned, Token};
use crate::error::FormulaError;
use crate::value::Value;

struct Parser<'input> {
    tokens: Vec<Spanned<Token<'input>>>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    text_len: usize,
}

/// Parses `input` into an expression tree, enforcing `limits`.
pub(crate) fn parse(input: &str, limits: &FormulaLimits) -> Result<Expr, FormulaError> {
    if input.len() > limits.max_length {
        return Err(FormulaError::TooLong {
            max: limits.max_length,
        });
    }
    let tokens = Lexer::new(input).collect::<Result<Vec<_>, _>>()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth: limits.max_depth,
        text_len: input.len(),
    };
    parser.parse_formula()
}

impl<'input> Parser<'input> {
    fn peek(&self) -> Option<&Token<'input>> {
        self.tokens.get(self.pos).map(|(_, tok, _)| tok)
    }

    fn peek_is(&self, expected: &Token<'_>) -> bool {
        self.peek() == Some(expected)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.text_len, |(start, _, _)| *start)
    }

    fn advance(&mut self) -> Option<Spanned<Token<'input>>> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, expected: &str) -> FormulaError {
        match self.peek() {
            Some(tok) => FormulaError::syntax(
                self.offset(),
                format!("expected {expected}, found {}", tok.describe()),
            ),
            None => FormulaError::syntax(
                self.offset(),
                format!("expected {expected}, found end of formula"),
            ),
        }
    }

    fn expect(&mut self, expected: &Token<'_>) -> Result<(), FormulaError> {
        if self.peek_is(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&expected.describe()))
        }
    }

    fn enter(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(FormulaError::TooDeep {
                max: self.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_formula(&mut self) -> Result<Expr, FormulaError> {
        if self.tokens.is_empty() {
            return Err(FormulaError::syntax(0, "formula is empty"));
        }
        let expr = self.parse_expr()?;
        if self.peek().is_some() {
            return Err(self.unexpected("end of formula"));
        }
        Ok(expr)
    }

    /// Top-level expression, including the conditional operator.
    fn parse_expr(&mut self) -> Result<Expr, FormulaError> {
        self.enter()?;
        let cond = self.parse_nullish()?;
        let expr = if self.peek_is(&Token::Question) {
            self.advance();
            let then_expr = self.parse_expr()?;
            self.expect(&Token::Colon)?;
            let else_expr = self.parse_expr()?;
            Expr::If(Box::new(cond), Box::new(then_expr), Box::new(else_expr))
        } else {
            cond
        };
        self.leave();
        Ok(expr)
    }

    /// Parses one left-associative binary level.
    fn parse_binary(
        &mut self,
        ops: &[(Token<'static>, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, FormulaError>,
    ) -> Result<Expr, FormulaError> {
        let mut left = next(self)?;
        let mut folded = 0;
        loop {
            let Some(op) = self
                .peek()
                .and_then(|tok| ops.iter().find(|(t, _)| t == tok).map(|(_, op)| *op))
            else {
                break;
            };
            self.advance();
            // every fold nests the tree one level deeper
            self.enter()?;
            folded += 1;
            let right = next(self)?;
            left = Expr::Op2(op, Box::new(left), Box::new(right));
        }
        self.depth -= folded;
        Ok(left)
    }

    fn parse_nullish(&mut self) -> Result<Expr, FormulaError> {
        self.parse_binary(&[(Token::Nullish, BinaryOp::Nullish)], Self::parse_or)
    }

    fn parse_or(&mut self) -> Result<Expr, FormulaError> {
        self.parse_binary(&[(Token::Or, BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, FormulaError> {
        self.parse_binary(&[(Token::And, BinaryOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, FormulaError> {
        self.parse_binary(
            &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::Neq)],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, FormulaError> {
        self.parse_binary(
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Lte, BinaryOp::Lte),
                (Token::Gt, BinaryOp::Gt),
                (Token::Gte, BinaryOp::Gte),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, FormulaError> {
        self.parse_binary(
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, FormulaError> {
        self.parse_binary(
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    /// Prefix operators (-, +, !). They bind looser than `**`, so `-2 ** 2`
    /// is `-(2 ** 2)`.
    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Negative,
            Some(Token::Plus) => UnaryOp::Positive,
            Some(Token::Not) => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Op1(op, Box::new(operand)))
    }

    fn parse_power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.parse_postfix()?;
        if !self.peek_is(&Token::StarStar) {
            return Ok(base);
        }
        self.advance();
        self.enter()?;
        let exponent = self.parse_unary()?;
        self.leave();
        Ok(Expr::Op2(BinaryOp::Exp, Box::new(base), Box::new(exponent)))
    }

    /// Member access, indexing and builtin calls. Each step counts towards
    /// the depth limit.
    fn parse_postfix(&mut self) -> Result<Expr, FormulaError> {
        let start_depth = self.depth;
        let expr = self.parse_postfix_chain();
        self.depth = start_depth;
        expr
    }

    fn parse_postfix_chain(&mut self) -> Result<Expr, FormulaError> {
        let mut expr = self.parse_atom()?;
        loop {
            if matches!(self.peek(), Some(Token::Dot | Token::LBracket | Token::LParen)) {
                self.enter()?;
            }
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let name = match self.peek() {
                        Some(Token::Ident(name)) => name.to_string(),
                        _ => return Err(self.unexpected("property name")),
                    };
                    self.advance();
                    expr = Expr::Member(Box::new(expr), name);
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some(Token::LParen) => {
                    let offset = self.offset();
                    let name = callee_name(&expr).ok_or_else(|| {
                        FormulaError::syntax(offset, "only builtin functions can be called")
                    })?;
                    if !functions::is_builtin(&name) {
                        return Err(FormulaError::UnknownFunction(name));
                    }
                    self.advance();
                    let args = self.parse_list(&Token::RParen)?;
                    expr = Expr::App(name, args);
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma separated expressions up to `close`; a trailing comma is allowed.
    fn parse_list(&mut self, close: &Token<'_>) -> Result<Vec<Expr>, FormulaError> {
        let mut items = Vec::new();
        while !self.peek_is(close) {
            items.push(self.parse_expr()?);
            if self.peek_is(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_object(&mut self) -> Result<Expr, FormulaError> {
        let mut entries = Vec::new();
        while !self.peek_is(&Token::RBrace) {
            let (key, is_name) = match self.peek() {
                Some(Token::Ident(name)) => (name.to_string(), true),
                Some(Token::Str(s)) => (s.clone(), false),
                Some(Token::Num(n)) => (n.to_string(), false),
                _ => return Err(self.unexpected("property name")),
            };
            self.advance();
            let value = if self.peek_is(&Token::Colon) {
                self.advance();
                self.parse_expr()?
            } else if is_name {
                // shorthand `{ area }` means `{ area: area }`
                Expr::Var(key.clone())
            } else {
                return Err(self.unexpected("':'"));
            };
            entries.push((key, value));
            if self.peek_is(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::Object(entries))
    }

    fn parse_atom(&mut self) -> Result<Expr, FormulaError> {
        let Some((start, tok, _)) = self.advance() else {
            return Err(self.unexpected("expression"));
        };
        match tok {
            Token::Num(text) => match text.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(Expr::Const(Value::Number(n))),
                Ok(_) => Err(FormulaError::syntax(
                    start,
                    format!("number '{text}' is out of range"),
                )),
                Err(_) => Err(FormulaError::syntax(start, format!("invalid number '{text}'"))),
            },
            Token::Str(s) => Ok(Expr::Const(Value::String(s))),
            Token::True => Ok(Expr::Const(Value::Bool(true))),
            Token::False => Ok(Expr::Const(Value::Bool(false))),
            Token::Null => Ok(Expr::Const(Value::Null)),
            Token::Ident(name) => Ok(Expr::Var(name.to_string())),
            Token::LParen => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                self.enter()?;
                let items = self.parse_list(&Token::RBracket)?;
                self.leave();
                Ok(Expr::Array(items))
            }
            Token::LBrace => {
                self.enter()?;
                let object = self.parse_object()?;
                self.leave();
                Ok(object)
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected("expression"))
            }
        }
    }
}

/// `min(...)` and `Math.min(...)` both name the builtin `min`.
fn callee_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Var(name) => Some(name.clone()),
        Expr::Member(base, name) if matches!(base.as_ref(), Expr::Var(m) if m == "Math") => {
            Some(name.clone())
        }
        _ => None,
    }
}
