//! Hand-written Pratt parser over the token stream.
//!
//! ## Precedence (lowest to highest)
//!
//! 1. `c ? a : b`, `a if c else b` (conditional) - right associative
//! 2. `or`, `||` - left associative
//! 3. `and`, `&&` - left associative
//! 4. `not`, `!` - prefix, binds looser than comparison
//! 5. `==`, `!=`, `<`, `<=`, `>`, `>=` - left associative
//! 6. `+`, `-` - left associative
//! 7. `*`, `/`, `%` - left associative
//! 8. unary `-`, `+` - prefix
//! 9. `**`, `^` - right associative
//! 10. postfix: `f(args)`, `x[i]`

use super::ExpressionError;
use super::ast::{BinaryOp, Builtin, Expr, UnaryOp};
use super::lexer::{Spanned, Token};

/// Deepest nesting accepted before the parser gives up.
const MAX_DEPTH: usize = 200;

const PREC_NOT: u8 = 30;
const PREC_POW: u8 = 60;

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

/// Token stream with lookahead and position tracking.
pub struct TokenStream<'src> {
    tokens: &'src [Spanned],
    pos: usize,
    source_len: usize,
    depth: usize,
}

impl<'src> TokenStream<'src> {
    pub fn new(tokens: &'src [Spanned], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            source_len,
            depth: 0,
        }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    /// Advance to the next token and return the current one.
    pub fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|s| &s.token);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check if the current token matches the expected token's variant.
    pub fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Expect a specific token and advance past it.
    pub fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        if self.check(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}', found {}", self.describe_current())))
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Byte offset of the current token, or the end of input.
    pub fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source_len, |s| s.offset)
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(t) => format!("'{t}'"),
            None => "end of input".to_string(),
        }
    }

    fn error(&self, message: String) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.offset(),
            message,
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("expression nested deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

/// Parse a complete expression, rejecting trailing tokens.
pub fn parse(tokens: &[Spanned], source_len: usize) -> Result<Expr, ExpressionError> {
    let mut stream = TokenStream::new(tokens, source_len);
    if stream.at_end() {
        return Err(stream.error("empty expression".to_string()));
    }
    let expr = parse_expr(&mut stream)?;
    if !stream.at_end() {
        return Err(stream.error(format!("unexpected {}", stream.describe_current())));
    }
    Ok(expr)
}

/// Parse an expression including conditional forms.
fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ExpressionError> {
    stream.enter()?;
    let value = parse_pratt(stream, 0)?;
    let expr = match stream.peek() {
        Some(Token::Question) => {
            stream.advance();
            let then = parse_expr(stream)?;
            stream.expect(Token::Colon)?;
            let otherwise = parse_expr(stream)?;
            Expr::Ternary {
                cond: Box::new(value),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        }
        Some(Token::If) => {
            stream.advance();
            let cond = parse_pratt(stream, 0)?;
            stream.expect(Token::Else)?;
            let otherwise = parse_expr(stream)?;
            Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            }
        }
        _ => value,
    };
    stream.exit();
    Ok(expr)
}

/// Get binary operator metadata (precedence, associativity, and operator enum).
///
/// Higher precedence binds tighter.
fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinaryOp)> {
    match token {
        Token::Or | Token::OrOr => Some((10, Assoc::Left, BinaryOp::Or)),
        Token::And | Token::AndAnd => Some((20, Assoc::Left, BinaryOp::And)),
        Token::EqEq => Some((PREC_NOT + 5, Assoc::Left, BinaryOp::Eq)),
        Token::BangEq => Some((PREC_NOT + 5, Assoc::Left, BinaryOp::Ne)),
        Token::Lt => Some((PREC_NOT + 5, Assoc::Left, BinaryOp::Lt)),
        Token::LtEq => Some((PREC_NOT + 5, Assoc::Left, BinaryOp::Le)),
        Token::Gt => Some((PREC_NOT + 5, Assoc::Left, BinaryOp::Gt)),
        Token::GtEq => Some((PREC_NOT + 5, Assoc::Left, BinaryOp::Ge)),
        Token::Plus => Some((40, Assoc::Left, BinaryOp::Add)),
        Token::Minus => Some((40, Assoc::Left, BinaryOp::Sub)),
        Token::Star => Some((50, Assoc::Left, BinaryOp::Mul)),
        Token::Slash => Some((50, Assoc::Left, BinaryOp::Div)),
        Token::Percent => Some((50, Assoc::Left, BinaryOp::Mod)),
        Token::StarStar | Token::Caret => Some((PREC_POW, Assoc::Right, BinaryOp::Pow)),
        _ => None,
    }
}

/// Precedence climbing over binary operators.
fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ExpressionError> {
    stream.enter()?;
    let mut left = parse_prefix(stream)?;

    while let Some(token) = stream.peek() {
        let Some((prec, assoc, op)) = binary_op_info(token) else {
            break;
        };
        if prec < min_prec {
            break;
        }
        stream.advance();
        let next_prec = if assoc == Assoc::Left { prec + 1 } else { prec };
        let right = parse_pratt(stream, next_prec)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }

    stream.exit();
    Ok(left)
}

/// Parse prefix operators, then postfix chains.
fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ExpressionError> {
    match stream.peek() {
        Some(Token::Not) | Some(Token::Bang) => {
            stream.advance();
            let operand = parse_pratt(stream, PREC_NOT)?;
            Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            })
        }
        Some(Token::Minus) => {
            stream.advance();
            // `-x ** 2` is `-(x ** 2)`.
            let operand = parse_pratt(stream, PREC_POW)?;
            Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            })
        }
        Some(Token::Plus) => {
            stream.advance();
            parse_pratt(stream, PREC_POW)
        }
        _ => parse_postfix(stream),
    }
}

/// Parse calls and subscripts trailing an atom.
fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ExpressionError> {
    let mut expr = parse_atom(stream)?;

    loop {
        match stream.peek() {
            Some(Token::LParen) => {
                let Expr::Var(name) = &expr else {
                    return Err(ExpressionError::Forbidden(
                        "only named functions may be called".to_string(),
                    ));
                };
                let func = Builtin::from_name(name)
                    .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                let args = parse_call_args(stream)?;
                check_arity(func, args.len())?;
                expr = Expr::Call { func, args };
            }
            Some(Token::LBracket) => {
                stream.advance();
                let index = parse_expr(stream)?;
                stream.expect(Token::RBracket)?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            }
            Some(Token::Dot) => {
                return Err(ExpressionError::Forbidden(
                    "attribute access is not permitted".to_string(),
                ));
            }
            _ => break,
        }
    }

    Ok(expr)
}

fn check_arity(func: Builtin, got: usize) -> Result<(), ExpressionError> {
    let (min, max) = func.arity();
    let ok = got >= min && max.is_none_or(|m| got <= m);
    if ok {
        return Ok(());
    }
    let expected = match max {
        Some(m) if m == min => format!("{min}"),
        Some(m) => format!("{min} to {m}"),
        None => format!("at least {min}"),
    };
    Err(ExpressionError::Arity {
        function: func.name(),
        expected,
        got,
    })
}

/// Parse a parenthesized, comma-separated argument list.
fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<Expr>, ExpressionError> {
    stream.expect(Token::LParen)?;
    let args = parse_sequence(stream, &Token::RParen)?;
    stream.expect(Token::RParen)?;
    Ok(args)
}

/// Comma-separated expressions up to (not including) `close`; allows a trailing comma.
fn parse_sequence(stream: &mut TokenStream, close: &Token) -> Result<Vec<Expr>, ExpressionError> {
    let mut items = Vec::new();
    while !stream.check(close) {
        items.push(parse_expr(stream)?);
        if !stream.check(&Token::Comma) {
            break;
        }
        stream.advance();
    }
    Ok(items)
}

/// Parse literals, identifiers, groups, lists and dicts.
fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ExpressionError> {
    let offset = stream.offset();
    let Some(token) = stream.advance().cloned() else {
        return Err(ExpressionError::Syntax {
            position: offset,
            message: "unexpected end of input".to_string(),
        });
    };

    match token {
        Token::Number(n) => Ok(Expr::Number(n)),
        Token::Str(s) => Ok(Expr::Str(s)),
        Token::True => Ok(Expr::Bool(true)),
        Token::False => Ok(Expr::Bool(false)),
        Token::Ident(name) => {
            if name.starts_with("__") {
                return Err(ExpressionError::Forbidden(format!(
                    "reserved identifier '{name}'"
                )));
            }
            Ok(Expr::Var(name))
        }
        Token::LParen => {
            let inner = parse_expr(stream)?;
            stream.expect(Token::RParen)?;
            Ok(inner)
        }
        Token::LBracket => {
            let items = parse_sequence(stream, &Token::RBracket)?;
            stream.expect(Token::RBracket)?;
            Ok(Expr::List(items))
        }
        Token::LBrace => {
            let mut entries = Vec::new();
            while !stream.check(&Token::RBrace) {
                let key = parse_pratt(stream, 0)?;
                stream.expect(Token::Colon)?;
                let value = parse_expr(stream)?;
                entries.push((key, value));
                if !stream.check(&Token::Comma) {
                    break;
                }
                stream.advance();
            }
            stream.expect(Token::RBrace)?;
            Ok(Expr::Dict(entries))
        }
        other => Err(ExpressionError::Syntax {
            position: offset,
            message: format!("unexpected '{other}'"),
        }),
    }
}
