//! 规则表达式解析器（手写递归下降）
//!
//! 文法：
//! ```text
//! expr    := and_expr ( "or" and_expr )*
//! and_expr:= unary ( "and" unary )*
//! unary   := "not" unary | primary
//! primary := "(" expr ")" | "@" | "!" | kind ":" value
//! ```
//! 关键字大小写不敏感；`and` 的优先级高于 `or`。

use crate::ast::BoolExpr;

/// 解析结果
pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unbalanced parenthesis at token {position}")]
    UnbalancedParen { position: usize },
    #[error("unexpected token '{token}' at position {position}")]
    UnexpectedToken { position: usize, token: String },
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("invalid check '{token}': expected kind:value")]
    InvalidCheck { token: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Word(String),
}

impl Token {
    fn text(&self) -> &str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::Word(w) => w,
        }
    }
}

/// Split on whitespace, then peel leading `(` and trailing `)` off each
/// chunk. Parentheses inside a chunk (`%(project_id)s`) stay part of it.
fn tokenize(expr: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for chunk in expr.split_whitespace() {
        let inner = chunk.trim_start_matches('(');
        let opening = chunk.len() - inner.len();
        let core = inner.trim_end_matches(')');
        let closing = inner.len() - core.len();

        tokens.extend(std::iter::repeat_n(Token::LParen, opening));
        if !core.is_empty() {
            tokens.push(keyword_or_word(core));
        }
        tokens.extend(std::iter::repeat_n(Token::RParen, closing));
    }
    tokens
}

fn keyword_or_word(text: &str) -> Token {
    match text.to_ascii_lowercase().as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        _ => Token::Word(text.to_string()),
    }
}

/// Parse a rule expression into a boolean tree. An empty expression is
/// [`BoolExpr::Always`].
pub fn parse_expression(expr: &str) -> ParseResult<BoolExpr> {
    let tokens = tokenize(expr);
    if tokens.is_empty() {
        return Ok(BoolExpr::Always);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let tree = parser.parse_or()?;
    match parser.peek() {
        None => Ok(tree),
        Some(Token::RParen) => Err(ParseError::UnbalancedParen {
            position: parser.pos,
        }),
        Some(tok) => Err(ParseError::UnexpectedToken {
            position: parser.pos,
            token: tok.text().to_string(),
        }),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_or(&mut self) -> ParseResult<BoolExpr> {
        let mut children = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            children.push(self.parse_and()?);
        }
        Ok(collapse(children, BoolExpr::Or))
    }

    fn parse_and(&mut self) -> ParseResult<BoolExpr> {
        let mut children = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            children.push(self.parse_unary()?);
        }
        Ok(collapse(children, BoolExpr::And))
    }

    fn parse_unary(&mut self) -> ParseResult<BoolExpr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let child = self.parse_unary()?;
            return Ok(BoolExpr::Not(Box::new(child)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult<BoolExpr> {
        let position = self.pos;
        match self.advance() {
            None => Err(ParseError::UnexpectedEof),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    None => Err(ParseError::UnbalancedParen { position }),
                    Some(tok) => Err(ParseError::UnexpectedToken {
                        position: self.pos - 1,
                        token: tok.text().to_string(),
                    }),
                }
            }
            Some(Token::Word(word)) => parse_check(&word),
            Some(tok) => Err(ParseError::UnexpectedToken {
                position,
                token: tok.text().to_string(),
            }),
        }
    }
}

fn collapse(mut children: Vec<BoolExpr>, build: fn(Vec<BoolExpr>) -> BoolExpr) -> BoolExpr {
    if children.len() == 1 {
        children.remove(0)
    } else {
        build(children)
    }
}

fn parse_check(word: &str) -> ParseResult<BoolExpr> {
    match word {
        "@" => return Ok(BoolExpr::Always),
        "!" => return Ok(BoolExpr::Never),
        _ => {}
    }
    match word.split_once(':') {
        Some((kind, value)) if !kind.is_empty() => Ok(BoolExpr::atom(kind, value)),
        _ => Err(ParseError::InvalidCheck {
            token: word.to_string(),
        }),
    }
}
