//! Recursive-descent parser producing the expression AST.
//!
//! ```text
//! expr    := or
//! or      := and ('||' and)*
//! and     := cmp ('&&' cmp)*
//! cmp     := unary (('=='|'!='|'<'|'<='|'>'|'>=') unary)?
//! unary   := '!' unary | postfix
//! postfix := primary ('.' IDENT | '[' expr ']')*
//! primary := literal | ROOT | 'FN' '.' IDENT '(' args? ')' | '(' expr ')'
//! ```

use serde_json::Value;

use super::functions;
use super::lexer::{tokenize, Spanned, Token};
use super::ExpressionError;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Top-level namespaces an expression can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRoot {
    Actions,
    Trigger,
    Env,
    Secrets,
    Vars,
    Inputs,
    /// Loop-local variables (`var.<name>`).
    Local,
}

impl ContextRoot {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "ACTIONS" => Some(Self::Actions),
            "TRIGGER" => Some(Self::Trigger),
            "ENV" => Some(Self::Env),
            "SECRETS" => Some(Self::Secrets),
            "VARS" => Some(Self::Vars),
            "INPUTS" => Some(Self::Inputs),
            "var" => Some(Self::Local),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actions => "ACTIONS",
            Self::Trigger => "TRIGGER",
            Self::Env => "ENV",
            Self::Secrets => "SECRETS",
            Self::Vars => "VARS",
            Self::Inputs => "INPUTS",
            Self::Local => "var",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Root(ContextRoot),
    Member { target: Box<Expr>, field: String },
    Index { target: Box<Expr>, index: Box<Expr> },
    Not(Box<Expr>),
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { function: String, args: Vec<Expr> },
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "'{s}'"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Root(root) => f.write_str(root.as_str()),
            Expr::Member { target, field } => write!(f, "{target}.{field}"),
            Expr::Index { target, index } => write!(f, "{target}[{index}]"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Binary { op, lhs, rhs } => {
                let symbol = match op {
                    BinaryOp::Eq => "==",
                    BinaryOp::Ne => "!=",
                    BinaryOp::Lt => "<",
                    BinaryOp::Le => "<=",
                    BinaryOp::Gt => ">",
                    BinaryOp::Ge => ">=",
                    BinaryOp::And => "&&",
                    BinaryOp::Or => "||",
                };
                write!(f, "{lhs} {symbol} {rhs}")
            }
            Expr::Call { function, args } => {
                write!(f, "FN.{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A parsed `for var.<name> in <expr>` loop header.
#[derive(Debug, Clone, PartialEq)]
pub struct ForEach {
    pub variable: String,
    pub iterable: Expr,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a bare expression (the text between `${{` and `}}`).
pub fn parse_expression(source: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser::new(source)?;
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a bare loop header: `for var.<name> in <expr>`.
pub fn parse_for_each_header(source: &str) -> Result<ForEach, ExpressionError> {
    let mut parser = Parser::new(source)?;
    parser.keyword("for")?;
    parser.keyword("var")?;
    parser.expect(&Token::Dot, "'.'")?;
    let variable = parser.ident("loop variable name")?;
    parser.keyword("in")?;
    let iterable = parser.expr()?;
    parser.expect_end()?;
    Ok(ForEach { variable, iterable })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::parse("empty expression"));
        }
        Ok(Self {
            tokens,
            pos: 0,
            end: source.len(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.pos).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn unexpected(&self, wanted: &str) -> ExpressionError {
        match self.peek() {
            Some(token) => ExpressionError::parse(format!(
                "expected {wanted} but found {} at position {}",
                describe(token),
                self.position()
            )),
            None => ExpressionError::parse(format!(
                "expected {wanted} but the expression ended"
            )),
        }
    }

    fn expect(&mut self, token: &Token, wanted: &str) -> Result<(), ExpressionError> {
        if self.peek() == Some(token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(wanted))
        }
    }

    fn expect_end(&self) -> Result<(), ExpressionError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ExpressionError::parse(format!(
                "unexpected {} at position {}",
                describe(token),
                self.position()
            ))),
        }
    }

    fn ident(&mut self, wanted: &str) -> Result<String, ExpressionError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(wanted)),
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), ExpressionError> {
        match self.peek() {
            Some(Token::Ident(name)) if name == keyword => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unexpected(&format!("'{keyword}'"))),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        self.or()
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.comparison()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.unary()?;
        Ok(binary(op, lhs, rhs))
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let field = self.ident("a field name")?;
                    expr = Expr::Member {
                        target: Box::new(expr),
                        field,
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let pos = self.position();
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Float(x)) => Ok(Expr::Literal(Value::from(x))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "None" => Ok(Expr::Literal(Value::Null)),
                "FN" => self.call(),
                other => ContextRoot::from_ident(other).map(Expr::Root).ok_or_else(|| {
                    ExpressionError::parse(format!(
                        "unknown identifier '{other}' at position {pos}"
                    ))
                }),
            },
            Some(token) => Err(ExpressionError::parse(format!(
                "unexpected {} at position {pos}",
                describe(&token)
            ))),
            None => Err(ExpressionError::parse(
                "expected a value but the expression ended",
            )),
        }
    }

    fn call(&mut self) -> Result<Expr, ExpressionError> {
        self.expect(&Token::Dot, "'.'")?;
        let pos = self.position();
        let function = self.ident("a function name")?;
        if !functions::is_known(&function) {
            return Err(ExpressionError::parse(format!(
                "unknown function 'FN.{function}' at position {pos}"
            )));
        }
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.expr()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(Expr::Call { function, args })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("'{name}'"),
        Token::Str(_) => "a string".to_string(),
        Token::Int(_) | Token::Float(_) => "a number".to_string(),
        Token::Dot => "'.'".to_string(),
        Token::Comma => "','".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::Eq => "'=='".to_string(),
        Token::Ne => "'!='".to_string(),
        Token::Lt => "'<'".to_string(),
        Token::Le => "'<='".to_string(),
        Token::Gt => "'>'".to_string(),
        Token::Ge => "'>='".to_string(),
        Token::And => "'&&'".to_string(),
        Token::Or => "'||'".to_string(),
        Token::Not => "'!'".to_string(),
    }
}
