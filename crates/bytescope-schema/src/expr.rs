//! Expression syntax used inside schema documents
//!
//! Expressions drive sizes, repeat counts, conditions, switch selection and
//! `valid` checks. The language is a bounded subset: literals, references,
//! member access, enum literals, arithmetic, bitwise, comparison and logical
//! operators. There are no function calls or method invocations.

use crate::{Error, Result};
use std::fmt;

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i128),
    Bool(bool),
    Str(String),
    /// A bare identifier (`len`, `_`, `_index`, `_io`, `_parent`, `_root`, ...)
    Name(String),
    /// Member access `target.name`
    Member(Box<Expr>, String),
    /// Enum literal `enum_name::case` before the compiler resolves it
    EnumCase { enum_name: String, case: String },
    /// Enum literal resolved to its integer value
    EnumValue { value: i64, label: String },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

impl Expr {
    /// Parse expression text
    pub fn parse(text: &str) -> Result<Expr> {
        let tokens = tokenize(text).map_err(|message| Error::expression(text, message))?;
        let mut parser = Parser {
            tokens,
            pos: 0,
        };
        let expr = parser
            .parse_or()
            .map_err(|message| Error::expression(text, message))?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::expression(
                text,
                format!("unexpected token '{}'", parser.tokens[parser.pos]),
            ));
        }
        Ok(expr)
    }

    /// Literal integer expression
    pub fn int(value: impl Into<i128>) -> Expr {
        Expr::Int(value.into())
    }

    /// Visit every sub-expression mutably, children first
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match self {
            Expr::Member(target, _) | Expr::Unary(_, target) => target.visit_mut(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.visit_mut(f);
                rhs.visit_mut(f);
            }
            _ => {}
        }
        f(self);
    }

    /// Visit every sub-expression, children first
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        match self {
            Expr::Member(target, _) | Expr::Unary(_, target) => target.visit(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.visit(f);
                rhs.visit(f);
            }
            _ => {}
        }
        f(self);
    }

    /// Root identifier of a reference chain (`a` for `a.b.c`)
    pub fn root_name(&self) -> Option<&str> {
        match self {
            Expr::Name(name) => Some(name),
            Expr::Member(target, _) => target.root_name(),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Str(s) => write!(f, "\"{s}\""),
            Expr::Name(n) => f.write_str(n),
            Expr::Member(target, name) => write!(f, "{target}.{name}"),
            Expr::EnumCase { enum_name, case } => write!(f, "{enum_name}::{case}"),
            Expr::EnumValue { label, .. } => f.write_str(label),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "-{e}"),
            Expr::Unary(UnaryOp::Not, e) => write!(f, "not {e}"),
            Expr::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i128),
    Str(String),
    Ident(String),
    Op(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(v) => write!(f, "{v}"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Ident(s) => f.write_str(s),
            Token::Op(s) => f.write_str(s),
        }
    }
}

const OPERATORS: &[&str] = &[
    "::", "==", "!=", "<=", ">=", "<<", ">>", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "&",
    "|", "!", "(", ")", ".",
];

fn tokenize(text: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            tokens.push(Token::Int(parse_int(&literal)?));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '"' || c == '\'' {
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i] != c {
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated string literal".to_string());
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| format!("unexpected character '{c}'"))?;
            tokens.push(Token::Op(op));
            i += op.len();
        }
    }

    Ok(tokens)
}

fn parse_int(literal: &str) -> std::result::Result<i128, String> {
    let lower = literal.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        i128::from_str_radix(hex, 16)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i128::from_str_radix(bin, 2)
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i128::from_str_radix(oct, 8)
    } else {
        lower.parse::<i128>()
    };
    parsed.map_err(|_| format!("invalid integer literal '{literal}'"))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult = std::result::Result<Expr, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> ParseResult {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") || self.eat_op("||") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("and") || self.eat_op("&&") {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> ParseResult {
        if self.eat_keyword("not") || self.eat_op("!") {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult {
        let lhs = self.parse_bitor()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => BinOp::Eq,
            Some(Token::Op("!=")) => BinOp::Ne,
            Some(Token::Op("<")) => BinOp::Lt,
            Some(Token::Op("<=")) => BinOp::Le,
            Some(Token::Op(">")) => BinOp::Gt,
            Some(Token::Op(">=")) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_bitor()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_bitor(&mut self) -> ParseResult {
        let mut lhs = self.parse_bitand()?;
        while self.eat_op("|") {
            let rhs = self.parse_bitand()?;
            lhs = Expr::Binary(BinOp::BitOr, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> ParseResult {
        let mut lhs = self.parse_shift()?;
        while self.eat_op("&") {
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary(BinOp::BitAnd, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> ParseResult {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_op("<<") {
                BinOp::Shl
            } else if self.eat_op(">>") {
                BinOp::Shr
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_additive(&mut self) -> ParseResult {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> ParseResult {
        if self.eat_op("-") {
            let inner = self.parse_unary()?;
            return Ok(match inner {
                Expr::Int(v) => Expr::Int(-v),
                other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult {
        let mut expr = self.parse_primary()?;
        while self.eat_op(".") {
            match self.tokens.get(self.pos).cloned() {
                Some(Token::Ident(name)) => {
                    self.pos += 1;
                    expr = Expr::Member(Box::new(expr), name);
                }
                _ => return Err("expected member name after '.'".to_string()),
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;

        match token {
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(word) => {
                match word.as_str() {
                    "true" => return Ok(Expr::Bool(true)),
                    "false" => return Ok(Expr::Bool(false)),
                    "and" | "or" | "not" => return Err(format!("unexpected keyword '{word}'")),
                    _ => {}
                }
                if !self.eat_op("::") {
                    return Ok(Expr::Name(word));
                }
                match self.tokens.get(self.pos).cloned() {
                    Some(Token::Ident(case)) => {
                        self.pos += 1;
                        Ok(Expr::EnumCase {
                            enum_name: word,
                            case,
                        })
                    }
                    _ => Err(format!("expected enum case after '{word}::'")),
                }
            }
            Token::Op("(") => {
                let inner = self.parse_or()?;
                if self.eat_op(")") {
                    Ok(inner)
                } else {
                    Err("missing ')'".to_string())
                }
            }
            Token::Op(op) => Err(format!("unexpected operator '{op}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    #[test]
    fn test_integer_literals() {
        assert_eq!(Expr::parse("42").unwrap(), Expr::Int(42));
        assert_eq!(Expr::parse("0x1F").unwrap(), Expr::Int(31));
        assert_eq!(Expr::parse("0b1010").unwrap(), Expr::Int(10));
        assert_eq!(Expr::parse("0o17").unwrap(), Expr::Int(15));
        assert_eq!(Expr::parse("1_000").unwrap(), Expr::Int(1000));
        assert_eq!(Expr::parse("-5").unwrap(), Expr::Int(-5));
        assert!(Expr::parse("0xZZ").is_err());
    }

    #[test]
    fn test_member_access() {
        let parsed = Expr::parse("_parent.header.len").unwrap();
        let expected = Expr::Member(
            Box::new(Expr::Member(name("_parent"), "header".to_string())),
            "len".to_string(),
        );
        assert_eq!(parsed, expected);
        assert_eq!(parsed.root_name(), Some("_parent"));
    }

    #[test]
    fn test_precedence() {
        let parsed = Expr::parse("len - 4 * 2 == 0 and not eof").unwrap();
        assert_eq!(parsed.to_string(), "(((len - (4 * 2)) == 0) and not eof)");

        let grouped = Expr::parse("(a + b) % 4").unwrap();
        assert_eq!(grouped.to_string(), "((a + b) % 4)");

        let bits = Expr::parse("flags & 0x80 != 0").unwrap();
        assert_eq!(bits.to_string(), "((flags & 128) != 0)");
    }

    #[test]
    fn test_enum_literal_and_strings() {
        assert_eq!(
            Expr::parse("chunk_type::iend").unwrap(),
            Expr::EnumCase {
                enum_name: "chunk_type".to_string(),
                case: "iend".to_string()
            }
        );
        assert_eq!(
            Expr::parse("type == 'IEND'").unwrap(),
            Expr::Binary(BinOp::Eq, name("type"), Box::new(Expr::Str("IEND".to_string())))
        );
    }

    #[test]
    fn test_io_and_underscore() {
        let parsed = Expr::parse("_.len == 0 or _io.eof").unwrap();
        let mut names = Vec::new();
        parsed.visit(&mut |e| {
            if let Expr::Name(n) = e {
                names.push(n.clone());
            }
        });
        assert_eq!(names, vec!["_", "_io"]);
    }

    #[test]
    fn test_malformed_expressions() {
        for bad in ["", "a +", "(a", "a b", "x.", "'open", "a @ b", "foo::"] {
            assert!(Expr::parse(bad).is_err(), "expected error for {bad:?}");
        }
    }
}
