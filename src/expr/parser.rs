//! Recursive-descent parser for rule expressions.
//!
//! Grammar (left-associative, unary minus binds tightest):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | IDENT | QUOTED_IDENT | FUNCTION '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! Function names are checked against the whitelist and column names against the caller's
//! [`ColumnScope`] while parsing, so an expression that parses successfully can only read
//! visible columns and call whitelisted functions.

use std::collections::HashMap;

use crate::error::{ParseError, ParseResult};
use crate::types::{Schema, Value};

use super::ast::{BinaryOp, Expr, Function};
use super::lexer::{tokenize, Token, TokenKind};

/// Maximum nesting of parentheses, calls and unary operators.
const MAX_DEPTH: usize = 128;

/// Maximum number of binary operators in one expression. Chains build left-deep trees, so this
/// also bounds the depth every later tree walk recurses to.
const MAX_OPERATORS: usize = 256;

/// The set of column names an expression may reference, with the row slot each one reads.
pub trait ColumnScope {
    fn slot_of(&self, name: &str) -> Option<usize>;
}

impl ColumnScope for Schema {
    fn slot_of(&self, name: &str) -> Option<usize> {
        self.index_of(name)
    }
}

impl ColumnScope for HashMap<String, usize> {
    fn slot_of(&self, name: &str) -> Option<usize> {
        self.get(name).copied()
    }
}

/// Parse `input` into an [`Expr`], resolving column references against `scope`.
pub fn parse_expression(input: &str, scope: &dyn ColumnScope) -> ParseResult<Expr> {
    let tokens = tokenize(input)?;
    if matches!(tokens.first().map(|t| &t.kind), Some(TokenKind::End)) {
        return Err(ParseError::Syntax {
            position: 0,
            message: "empty expression".to_string(),
        });
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        operators: 0,
        scope,
    };
    let expr = parser.expr()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::End {
        return Err(ParseError::Syntax {
            position: trailing.position,
            message: format!("unexpected {} after expression", trailing.kind.describe()),
        });
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    operators: usize,
    scope: &'a dyn ColumnScope,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // `tokenize` always terminates the stream with `End`, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::End {
            self.pos += 1;
        }
        tok
    }

    fn enter(&mut self, position: usize) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::Syntax {
                position,
                message: format!("expression nested deeper than {MAX_DEPTH} levels"),
            });
        }
        Ok(())
    }

    fn count_operator(&mut self, position: usize) -> ParseResult<()> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(ParseError::Syntax {
                position,
                message: format!("expression has more than {MAX_OPERATORS} operators"),
            });
        }
        Ok(())
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            let tok = self.advance();
            self.count_operator(tok.position)?;
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            let tok = self.advance();
            self.count_operator(tok.position)?;
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        if self.peek().kind == TokenKind::Minus {
            let tok = self.advance();
            self.enter(tok.position)?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Int(v) => Ok(Expr::Literal(Value::Int64(v))),
            TokenKind::Float(v) => Ok(Expr::Literal(Value::Float64(v))),
            TokenKind::LParen => {
                self.enter(tok.position)?;
                let inner = self.expr()?;
                self.expect_close(tok.position)?;
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if self.peek().kind == TokenKind::LParen {
                    let func = Function::from_name(&name).ok_or(ParseError::UnknownIdentifier {
                        name: name.clone(),
                        position: tok.position,
                    })?;
                    self.call(func, tok.position)
                } else {
                    self.column(name, tok.position)
                }
            }
            TokenKind::QuotedIdent(name) => self.column(name, tok.position),
            other => Err(ParseError::Syntax {
                position: tok.position,
                message: format!("expected a number, column or '(', found {}", other.describe()),
            }),
        }
    }

    fn column(&self, name: String, position: usize) -> ParseResult<Expr> {
        match self.scope.slot_of(&name) {
            Some(slot) => Ok(Expr::Column { name, slot }),
            None => Err(ParseError::UnknownColumn { name, position }),
        }
    }

    fn call(&mut self, func: Function, position: usize) -> ParseResult<Expr> {
        // consume '('
        let open = self.advance();
        self.enter(open.position)?;

        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                args.push(self.expr()?);
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect_close(open.position)?;
        self.depth -= 1;

        if !func.accepts_arity(args.len()) {
            return Err(ParseError::Syntax {
                position,
                message: format!(
                    "{}() takes {}, got {}",
                    func.name(),
                    func.arity_description(),
                    args.len()
                ),
            });
        }
        Ok(Expr::Call { func, args })
    }

    fn expect_close(&mut self, open_position: usize) -> ParseResult<()> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::RParen => Ok(()),
            TokenKind::End => Err(ParseError::Syntax {
                position: open_position,
                message: "unclosed '('".to_string(),
            }),
            other => Err(ParseError::Syntax {
                position: tok.position,
                message: format!("expected ')', found {}", other.describe()),
            }),
        }
    }
}
