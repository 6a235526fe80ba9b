//! Filter expression tokenizer

use super::ast::Span;
use super::error::SpannedError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals and identifiers
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),

    // Keywords
    And,
    Or,
    Not,
    In,
    Is,
    True,
    False,
    None,

    // Comparison
    EqEq,  // ==
    NotEq, // !=
    Lt,    // <
    LtE,   // <=
    Gt,    // >
    GtE,   // >=

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Minus,

    Eof,
}

impl Token {
    /// Human readable form for error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Name(n) => format!("name '{}'", n),
            Token::Int(i) => format!("number {}", i),
            Token::Float(f) => format!("number {}", f),
            Token::Str(_) => "string literal".to_string(),
            Token::And => "'and'".to_string(),
            Token::Or => "'or'".to_string(),
            Token::Not => "'not'".to_string(),
            Token::In => "'in'".to_string(),
            Token::Is => "'is'".to_string(),
            Token::True => "'True'".to_string(),
            Token::False => "'False'".to_string(),
            Token::None => "'None'".to_string(),
            Token::EqEq => "'=='".to_string(),
            Token::NotEq => "'!='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::LtE => "'<='".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::GtE => "'>='".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::LBrace => "'{'".to_string(),
            Token::RBrace => "'}'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Colon => "':'".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Tokenize the whole input, ending with `Token::Eof`
    pub fn tokenize(mut self) -> Result<Vec<SpannedToken>, SpannedError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<SpannedToken, SpannedError> {
        self.skip_whitespace();
        let start = self.position;

        let Some(ch) = self.current() else {
            return Ok(SpannedToken {
                token: Token::Eof,
                span: Span::new(start, start),
            });
        };

        let token = match ch {
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            ',' => self.single(Token::Comma),
            ':' => self.single(Token::Colon),
            '-' => self.single(Token::Minus),
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number()?,
            '.' => self.single(Token::Dot),
            '=' if self.peek() == Some('=') => self.double(Token::EqEq),
            '!' if self.peek() == Some('=') => self.double(Token::NotEq),
            '<' if self.peek() == Some('=') => self.double(Token::LtE),
            '<' => self.single(Token::Lt),
            '>' if self.peek() == Some('=') => self.double(Token::GtE),
            '>' => self.single(Token::Gt),
            '\'' | '"' => self.read_string(ch)?,
            c if c.is_ascii_digit() => self.read_number()?,
            c if c.is_alphabetic() || c == '_' => self.read_name(),
            c => {
                return Err(SpannedError::syntax(
                    format!("invalid syntax: unexpected character '{}'", c),
                    Span::new(start, start + 1),
                ));
            }
        };

        Ok(SpannedToken {
            token,
            span: Span::new(start, self.position),
        })
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn double(&mut self, token: Token) -> Token {
        self.advance();
        self.advance();
        token
    }

    fn read_name(&mut self) -> Token {
        let mut name = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match name.as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            "is" => Token::Is,
            "True" => Token::True,
            "False" => Token::False,
            "None" => Token::None,
            _ => Token::Name(name),
        }
    }

    fn read_number(&mut self) -> Result<Token, SpannedError> {
        let start = self.position;
        let mut text = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() || ch == '_' {
                if ch != '_' {
                    text.push(ch);
                }
                self.advance();
            } else if ch == '.' && !is_float {
                is_float = true;
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if matches!(self.current(), Some('e' | 'E')) {
            let sign = matches!(self.peek(), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self
                .input
                .get(self.position + digit_at)
                .is_some_and(|c| c.is_ascii_digit())
            {
                is_float = true;
                text.push('e');
                self.advance();
                if sign {
                    if let Some(s) = self.current() {
                        text.push(s);
                    }
                    self.advance();
                }
                while let Some(ch) = self.current().filter(|c| c.is_ascii_digit()) {
                    text.push(ch);
                    self.advance();
                }
            }
        }

        let span = Span::new(start, self.position);
        if self.current().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(SpannedError::syntax("invalid decimal literal", span));
        }

        if is_float {
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Token::Float(v)),
                _ => Err(SpannedError::syntax(
                    format!("invalid float literal '{}'", text),
                    span,
                )),
            }
        } else {
            text.parse::<i64>().map(Token::Int).map_err(|_| {
                SpannedError::syntax(format!("integer literal '{}' is out of range", text), span)
            })
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, SpannedError> {
        let start = self.position;
        self.advance(); // opening quote
        let mut value = String::new();

        loop {
            match self.current() {
                None | Some('\n') => {
                    return Err(SpannedError::syntax(
                        "unterminated string literal",
                        Span::new(start, self.position),
                    ));
                }
                Some(ch) if ch == quote => {
                    self.advance();
                    return Ok(Token::Str(value));
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('0') => value.push('\0'),
                        Some(c @ ('\\' | '\'' | '"')) => value.push(c),
                        Some(c) => {
                            // unknown escapes are kept verbatim
                            value.push('\\');
                            value.push(c);
                        }
                        None => continue,
                    }
                    self.advance();
                }
                Some(ch) => {
                    value.push(ch);
                    self.advance();
                }
            }
        }
    }
}
