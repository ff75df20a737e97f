//! Tokenizer for ani source text.

use std::fmt;

use crate::error::ParseError;

/// Largest integer literal the lexer accepts: the magnitude of `i32::MIN`.
pub const INT_MAGNITUDE_MAX: i64 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Int,
    Scalar,
    Range,
    String,
    Vector,
    Matrix,
    Object,
    If,
    Else,
    While,
    Do,
    For,
    Return,
    Break,
    New,
    Null,
}

impl Keyword {
    fn from_word(w: &str) -> Option<Keyword> {
        Some(match w {
            "int" => Keyword::Int,
            "scalar" => Keyword::Scalar,
            "range" => Keyword::Range,
            "string" => Keyword::String,
            "vector" => Keyword::Vector,
            "matrix" => Keyword::Matrix,
            "object" => Keyword::Object,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "do" => Keyword::Do,
            "for" => Keyword::For,
            "return" => Keyword::Return,
            "break" => Keyword::Break,
            "new" => Keyword::New,
            "null" => Keyword::Null,
            _ => return None,
        })
    }

    /// Keywords that start a type spec.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Keyword::Int | Keyword::Scalar | Keyword::Range | Keyword::String | Keyword::Vector | Keyword::Matrix
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Magnitude of an integer literal.  `2147483648` only makes sense
    /// under a unary minus, which the parser checks.
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Kw(Keyword),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    PlusPlus,
    MinusMinus,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,

    Question,
    Colon,
    Comma,
    Semi,
    Dot,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{n}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Ident(s) => write!(f, "`{s}`"),
            Token::Kw(k) => write!(f, "`{}`", format!("{k:?}").to_lowercase()),
            Token::Eof => write!(f, "end of input"),
            other => {
                let s = match other {
                    Token::Plus => "+",
                    Token::Minus => "-",
                    Token::Star => "*",
                    Token::Slash => "/",
                    Token::Percent => "%",
                    Token::Bang => "!",
                    Token::PlusPlus => "++",
                    Token::MinusMinus => "--",
                    Token::Eq => "==",
                    Token::Ne => "!=",
                    Token::Lt => "<",
                    Token::Le => "<=",
                    Token::Gt => ">",
                    Token::Ge => ">=",
                    Token::And => "&&",
                    Token::Or => "||",
                    Token::Assign => "=",
                    Token::PlusAssign => "+=",
                    Token::MinusAssign => "-=",
                    Token::StarAssign => "*=",
                    Token::SlashAssign => "/=",
                    Token::PercentAssign => "%=",
                    Token::Question => "?",
                    Token::Colon => ":",
                    Token::Comma => ",",
                    Token::Semi => ";",
                    Token::Dot => ".",
                    Token::LParen => "(",
                    Token::RParen => ")",
                    Token::LBrace => "{",
                    Token::RBrace => "}",
                    Token::LBracket => "[",
                    Token::RBracket => "]",
                    _ => "?",
                };
                write!(f, "`{s}`")
            }
        }
    }
}

/// A token and the line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub tok: Token,
    pub line: u32,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src: src.as_bytes(), pos: 0, line: 1 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.src.get(self.pos).copied();
        if let Some(c) = ch {
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
            }
        }
        ch
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError { line: self.line, message: message.into() }
    }

    /// Skip whitespace and both comment forms.
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(), self.peek2()) {
                (Some(b' ' | b'\t' | b'\r' | b'\n'), _) => {
                    self.advance();
                }
                (Some(b'/'), Some(b'/')) => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.advance();
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let start = self.line;
                    self.pos += 2;
                    loop {
                        match self.advance() {
                            None => {
                                return Err(ParseError {
                                    line: start,
                                    message: "unterminated block comment".into(),
                                })
                            }
                            Some(b'*') if self.eat(b'/') => break,
                            Some(_) => {}
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_number(&mut self, first: u8) -> Result<Token, ParseError> {
        let mut s = String::new();
        s.push(first as char);
        let mut is_float = first == b'.';

        while matches!(self.peek(), Some(b'0'..=b'9')) {
            s.push(self.pos_char());
        }
        if !is_float && self.peek() == Some(b'.') && matches!(self.peek2(), Some(b'0'..=b'9')) {
            is_float = true;
            s.push(self.pos_char());
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                s.push(self.pos_char());
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            s.push(self.pos_char());
            if matches!(self.peek(), Some(b'+' | b'-')) {
                s.push(self.pos_char());
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                s.push(self.pos_char());
            }
        }

        if is_float {
            s.parse()
                .map(Token::Float)
                .map_err(|_| self.err(format!("malformed number `{s}`")))
        } else {
            match s.parse::<i64>() {
                Ok(n) if n <= INT_MAGNITUDE_MAX => Ok(Token::Int(n)),
                _ => Err(self.err(format!("integer literal `{s}` out of range"))),
            }
        }
    }

    fn pos_char(&mut self) -> char {
        self.advance().map_or('\0', char::from)
    }

    fn read_string(&mut self) -> Result<Token, ParseError> {
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                None | Some(b'\n') => return Err(self.err("unterminated string literal")),
                Some(b'\\') => match self.advance() {
                    Some(b'n') => bytes.push(b'\n'),
                    Some(b't') => bytes.push(b'\t'),
                    Some(c) => bytes.push(c),
                    None => return Err(self.err("unterminated string literal")),
                },
                Some(b'"') => break,
                Some(c) => bytes.push(c),
            }
        }
        String::from_utf8(bytes)
            .map(Token::Str)
            .map_err(|_| self.err("string literal is not valid UTF-8"))
    }

    fn read_word(&mut self, first: u8) -> Token {
        let mut s = String::new();
        s.push(first as char);
        while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')) {
            s.push(self.pos_char());
        }
        match Keyword::from_word(&s) {
            Some(k) => Token::Kw(k),
            None => Token::Ident(s),
        }
    }

    fn with_assign(&mut self, plain: Token, assign: Token) -> Token {
        if self.eat(b'=') {
            assign
        } else {
            plain
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let ch = match self.advance() {
            None => return Ok(Token::Eof),
            Some(c) => c,
        };

        Ok(match ch {
            b'0'..=b'9' => return self.read_number(ch),
            b'.' if matches!(self.peek(), Some(b'0'..=b'9')) => return self.read_number(ch),
            b'"' => return self.read_string(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.read_word(ch),
            b'+' if self.eat(b'+') => Token::PlusPlus,
            b'-' if self.eat(b'-') => Token::MinusMinus,
            b'+' => self.with_assign(Token::Plus, Token::PlusAssign),
            b'-' => self.with_assign(Token::Minus, Token::MinusAssign),
            b'*' => self.with_assign(Token::Star, Token::StarAssign),
            b'/' => self.with_assign(Token::Slash, Token::SlashAssign),
            b'%' => self.with_assign(Token::Percent, Token::PercentAssign),
            b'!' => self.with_assign(Token::Bang, Token::Ne),
            b'=' => self.with_assign(Token::Assign, Token::Eq),
            b'<' => self.with_assign(Token::Lt, Token::Le),
            b'>' => self.with_assign(Token::Gt, Token::Ge),
            b'&' if self.eat(b'&') => Token::And,
            b'|' if self.eat(b'|') => Token::Or,
            b'?' => Token::Question,
            b':' => Token::Colon,
            b',' => Token::Comma,
            b';' => Token::Semi,
            b'.' => Token::Dot,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            c => return Err(self.err(format!("unexpected character `{}`", c as char))),
        })
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let tok = self.next_token()?;
            let done = tok == Token::Eof;
            tokens.push(Spanned { tok, line });
            if done {
                return Ok(tokens);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|s| s.tok).collect()
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("42 2.5 .5 1e3"), vec![
            Token::Int(42),
            Token::Float(2.5),
            Token::Float(0.5),
            Token::Float(1000.0),
            Token::Eof
        ]);
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let err = Lexer::new("99999999999").tokenize().unwrap_err();
        assert!(err.message.contains("out of range"));
        assert_eq!(toks("2147483648"), vec![Token::Int(2147483648), Token::Eof]);
        assert!(Lexer::new("2147483649").tokenize().is_err());
    }

    #[test]
    fn operators_and_keywords() {
        assert_eq!(toks("i++ += <= != && new"), vec![
            Token::Ident("i".into()),
            Token::PlusPlus,
            Token::PlusAssign,
            Token::Le,
            Token::Ne,
            Token::And,
            Token::Kw(Keyword::New),
            Token::Eof
        ]);
    }

    #[test]
    fn comments_and_lines() {
        let spanned = Lexer::new("a // one\n/* two\n three */ b").tokenize().unwrap();
        assert_eq!(spanned[0], Spanned { tok: Token::Ident("a".into()), line: 1 });
        assert_eq!(spanned[1], Spanned { tok: Token::Ident("b".into()), line: 3 });
    }

    #[test]
    fn strings() {
        assert_eq!(toks(r#""a\"b\n""#), vec![Token::Str("a\"b\n".into()), Token::Eof]);
        assert!(Lexer::new("\"open").tokenize().is_err());
    }

    #[test]
    fn member_dot_vs_number() {
        assert_eq!(toks("v.x"), vec![
            Token::Ident("v".into()),
            Token::Dot,
            Token::Ident("x".into()),
            Token::Eof
        ]);
    }
}
