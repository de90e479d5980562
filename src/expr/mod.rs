// Formula parser and evaluator - converts formula strings into an AST once,
// then evaluates the AST against a Context as often as needed.
// Supports: numbers, names, function calls, + - * / % ^, unary minus,
// comparisons (< > <= >= == !=, yielding 1 or 0) and parentheses.

pub mod context;
pub mod ternary;

pub use context::{
    BooleanContext, CombinedContext, Context, MathContext, SettingsContext, ValueContext, is_truthy,
};
pub use ternary::resolve_ternary;

use std::fmt;
use std::str::FromStr;

use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Bare identifier, resolved as a zero-argument name
    Name(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Negate(Box<Expr>),
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    NotEq,
}

impl Op {
    fn apply(self, a: f64, b: f64) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div => a / b,
            Op::Rem => a % b,
            Op::Pow => a.powf(b),
            Op::Lt => flag(a < b),
            Op::Gt => flag(a > b),
            Op::LtEq => flag(a <= b),
            Op::GtEq => flag(a >= b),
            Op::Eq => flag((a - b).abs() <= crate::constants::math::EPSILON),
            Op::NotEq => flag((a - b).abs() > crate::constants::math::EPSILON),
        }
    }
}

/// A parsed formula together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        Ok(Self {
            source: source.to_string(),
            root: parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.root
    }

    pub fn evaluate(&self, ctx: &dyn Context) -> Result<f64, ExprError> {
        evaluate(&self.root, ctx)
    }
}

impl FromStr for Formula {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Evaluate an expression tree. Unknown names and wrong arity are errors, never defaults.
pub fn evaluate(expr: &Expr, ctx: &dyn Context) -> Result<f64, ExprError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Name(name) => ctx.resolve(name, &[]),
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.resolve(name, &values)
        }
        Expr::Negate(inner) => Ok(-evaluate(inner, ctx)?),
        Expr::BinaryOp { op, left, right } => {
            let a = evaluate(left, ctx)?;
            let b = evaluate(right, ctx)?;
            Ok(op.apply(a, b))
        }
    }
}

/// Parse a formula string into an AST
pub fn parse(formula: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(formula)?;
    if tokens.is_empty() {
        return Err(ExprError::Parse("empty formula".to_string()));
    }
    let (expr, pos) = parse_comparison(&tokens, 0)?;
    if pos != tokens.len() {
        return Err(ExprError::Parse(format!("unexpected {:?} at token {}", tokens[pos], pos)));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
    Lt,
    Gt,
    LtEq,
    GtEq,
    EqEq,
    NotEq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '-' | '*' | '/' | '%' | '^' | '(' | ')' | ',' => {
                chars.next();
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    _ => Token::Comma,
                });
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::LtEq);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::GtEq);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' | '!' => {
                chars.next();
                if chars.peek() != Some(&'=') {
                    return Err(ExprError::Parse(format!("expected '=' after '{c}'")));
                }
                chars.next();
                tokens.push(if c == '=' { Token::EqEq } else { Token::NotEq });
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else if (d == 'e' || d == 'E') && !text.contains(|ch: char| ch == 'e' || ch == 'E') {
                        text.push(d);
                        chars.next();
                        if let Some(&sign) = chars.peek()
                            && (sign == '+' || sign == '-')
                        {
                            text.push(sign);
                            chars.next();
                        }
                    } else {
                        break;
                    }
                }
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::Parse(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '.' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ExprError::Parse(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

// Lowest precedence: comparison operators
fn parse_comparison(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ExprError> {
    let (mut left, mut pos) = parse_add_sub(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::LtEq => Op::LtEq,
            Token::GtEq => Op::GtEq,
            Token::EqEq => Op::Eq,
            Token::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_add_sub(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ExprError> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ExprError> {
    let (mut left, mut pos) = parse_unary(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            Token::Percent => Op::Rem,
            _ => break,
        };
        let (right, new_pos) = parse_unary(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_unary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ExprError> {
    match tokens.get(pos) {
        Some(Token::Minus) => {
            let (inner, pos) = parse_unary(tokens, pos + 1)?;
            Ok((Expr::Negate(Box::new(inner)), pos))
        }
        Some(Token::Plus) => parse_unary(tokens, pos + 1),
        _ => parse_power(tokens, pos),
    }
}

// Exponentiation (^) - right-associative, binds tighter than unary minus on its left
fn parse_power(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ExprError> {
    let (base, pos) = parse_primary(tokens, pos)?;

    if let Some(Token::Caret) = tokens.get(pos) {
        let (exponent, new_pos) = parse_unary(tokens, pos + 1)?;
        return Ok((
            Expr::BinaryOp {
                op: Op::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            new_pos,
        ));
    }

    Ok((base, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ExprError> {
    match tokens.get(pos) {
        Some(Token::Number(n)) => Ok((Expr::Number(*n), pos + 1)),
        Some(Token::Ident(name)) => {
            if let Some(Token::LParen) = tokens.get(pos + 1) {
                let (args, new_pos) = parse_args(tokens, pos + 2)?;
                Ok((
                    Expr::Call {
                        name: name.clone(),
                        args,
                    },
                    new_pos,
                ))
            } else {
                Ok((Expr::Name(name.clone()), pos + 1))
            }
        }
        Some(Token::LParen) => {
            let (expr, new_pos) = parse_comparison(tokens, pos + 1)?;
            match tokens.get(new_pos) {
                Some(Token::RParen) => Ok((expr, new_pos + 1)),
                _ => Err(ExprError::Parse("missing closing parenthesis".to_string())),
            }
        }
        Some(other) => Err(ExprError::Parse(format!("unexpected {other:?}"))),
        None => Err(ExprError::Parse("unexpected end of formula".to_string())),
    }
}

// Arguments after the opening parenthesis, up to and including the closing one
fn parse_args(tokens: &[Token], pos: usize) -> Result<(Vec<Expr>, usize), ExprError> {
    let mut args = Vec::new();

    if let Some(Token::RParen) = tokens.get(pos) {
        return Ok((args, pos + 1));
    }

    let mut pos = pos;
    loop {
        let (arg, new_pos) = parse_comparison(tokens, pos)?;
        args.push(arg);
        match tokens.get(new_pos) {
            Some(Token::Comma) => pos = new_pos + 1,
            Some(Token::RParen) => return Ok((args, new_pos + 1)),
            _ => return Err(ExprError::Parse("expected ',' or ')' in argument list".to_string())),
        }
    }
}
