//! Tokenizer.

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(u64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Ident(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Uint(u) => format!("{u}u"),
            Self::Double(d) => d.to_string(),
            Self::String(_) => "string literal".to_string(),
            Self::Bytes(_) => "bytes literal".to_string(),
            Self::Ident(name) => format!("'{name}'"),
            Self::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    const fn symbol(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::In => "in",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::Dot => ".",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Question => "?",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Bang => "!",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            _ => "",
        }
    }
}

/// A lexing failure at a byte offset.
pub(crate) type LexError = (usize, String);

pub(crate) struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenizes the whole input, ending with [`Token::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<(usize, Token)>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.pos;
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push((start, token));
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += 1;
            } else if c == b'/' && self.peek_at(1) == Some(b'/') {
                while let Some(c) = self.peek() {
                    if c == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(Token::Eof);
        };

        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            return self.number();
        }

        if c == b'"' || c == b'\'' {
            return self.string(false, false);
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            let (raw, bytes, prefix_len) = self.string_prefix();
            if prefix_len > 0 {
                self.pos += prefix_len;
                return self.string(raw, bytes);
            }
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.pos += 1;
            }
            let word = &self.src[start..self.pos];
            return Ok(match word {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "in" => Token::In,
                w => Token::Ident(w.to_string()),
            });
        }

        self.pos += 1;
        let next = self.peek();
        let two = |lexer: &mut Self, token: Token| {
            lexer.pos += 1;
            Ok(token)
        };
        match (c, next) {
            (b'=', Some(b'=')) => two(self, Token::EqEq),
            (b'!', Some(b'=')) => two(self, Token::NotEq),
            (b'<', Some(b'=')) => two(self, Token::Le),
            (b'>', Some(b'=')) => two(self, Token::Ge),
            (b'&', Some(b'&')) => two(self, Token::AndAnd),
            (b'|', Some(b'|')) => two(self, Token::OrOr),
            (b'(', _) => Ok(Token::LParen),
            (b')', _) => Ok(Token::RParen),
            (b'[', _) => Ok(Token::LBracket),
            (b']', _) => Ok(Token::RBracket),
            (b'{', _) => Ok(Token::LBrace),
            (b'}', _) => Ok(Token::RBrace),
            (b'.', _) => Ok(Token::Dot),
            (b',', _) => Ok(Token::Comma),
            (b':', _) => Ok(Token::Colon),
            (b'?', _) => Ok(Token::Question),
            (b'+', _) => Ok(Token::Plus),
            (b'-', _) => Ok(Token::Minus),
            (b'*', _) => Ok(Token::Star),
            (b'/', _) => Ok(Token::Slash),
            (b'%', _) => Ok(Token::Percent),
            (b'!', _) => Ok(Token::Bang),
            (b'<', _) => Ok(Token::Lt),
            (b'>', _) => Ok(Token::Gt),
            _ => {
                let ch = self.src[start..].chars().next().unwrap_or('?');
                Err((start, format!("token recognition error at: '{ch}'")))
            }
        }
    }

    /// Detects `r"`, `b'`, `rb"`, `BR'` style string prefixes.
    fn string_prefix(&self) -> (bool, bool, usize) {
        let mut raw = false;
        let mut bytes = false;
        let mut len = 0;
        while len < 2 {
            match self.peek_at(len) {
                Some(b'r' | b'R') if !raw => raw = true,
                Some(b'b' | b'B') if !bytes => bytes = true,
                Some(b'"' | b'\'') if len > 0 => return (raw, bytes, len),
                _ => return (false, false, 0),
            }
            len += 1;
        }
        if matches!(self.peek_at(len), Some(b'"' | b'\'')) {
            (raw, bytes, len)
        } else {
            (false, false, 0)
        }
    }

    fn number(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = &self.src[digits_start..self.pos];
            let value = u64::from_str_radix(digits, 16)
                .map_err(|_| (start, format!("invalid hex literal: {}", &self.src[start..self.pos])))?;
            return Ok(self.int_suffix(value));
        }

        let mut is_double = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_double = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                ahead = 2;
            }
            if self.peek_at(ahead).is_some_and(|c| c.is_ascii_digit()) {
                is_double = true;
                self.pos += ahead;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text = &self.src[start..self.pos];
        if is_double {
            return text
                .parse::<f64>()
                .map(Token::Double)
                .map_err(|_| (start, format!("invalid double literal: {text}")));
        }
        let value = text
            .parse::<u64>()
            .map_err(|_| (start, format!("integer literal out of range: {text}")))?;
        Ok(self.int_suffix(value))
    }

    fn int_suffix(&mut self, value: u64) -> Token {
        if matches!(self.peek(), Some(b'u' | b'U')) {
            self.pos += 1;
            Token::Uint(value)
        } else {
            Token::Int(value)
        }
    }

    fn string(&mut self, raw: bool, bytes: bool) -> Result<Token, LexError> {
        let start = self.pos;
        let Some(quote) = self.peek() else {
            return Err((start, "unterminated string".to_string()));
        };
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out: Vec<u8> = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                return Err((start, "unterminated string literal".to_string()));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == b'\n' && !triple {
                return Err((start, "unterminated string literal".to_string()));
            }
            if c == b'\\' && !raw {
                self.escape(&mut out, bytes)?;
                continue;
            }
            out.push(c);
            self.pos += 1;
        }

        if bytes {
            return Ok(Token::Bytes(out));
        }
        String::from_utf8(out)
            .map(Token::String)
            .map_err(|_| (start, "invalid UTF-8 in string literal".to_string()))
    }

    fn escape(&mut self, out: &mut Vec<u8>, bytes: bool) -> Result<(), LexError> {
        let start = self.pos;
        self.pos += 1;
        let Some(c) = self.peek() else {
            return Err((start, "invalid escape sequence".to_string()));
        };
        self.pos += 1;
        let simple = match c {
            b'\\' => Some(b'\\'),
            b'\'' => Some(b'\''),
            b'"' => Some(b'"'),
            b'`' => Some(b'`'),
            b'?' => Some(b'?'),
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0c),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0b),
            _ => None,
        };
        if let Some(b) = simple {
            out.push(b);
            return Ok(());
        }

        let (radix, len) = match c {
            b'x' | b'X' => (16, 2),
            b'u' if !bytes => (16, 4),
            b'U' if !bytes => (16, 8),
            b'0'..=b'3' => {
                self.pos -= 1;
                (8, 3)
            }
            _ => return Err((start, format!("invalid escape sequence: \\{}", c as char))),
        };
        let digits = self
            .src
            .get(self.pos..self.pos + len)
            .ok_or_else(|| (start, "truncated escape sequence".to_string()))?;
        let code = u32::from_str_radix(digits, radix)
            .map_err(|_| (start, format!("invalid escape sequence: \\{digits}")))?;
        self.pos += len;

        if bytes {
            let byte = u8::try_from(code).map_err(|_| (start, "byte escape out of range".to_string()))?;
            out.push(byte);
        } else {
            let ch = char::from_u32(code)
                .ok_or_else(|| (start, format!("invalid code point in escape: {code:#x}")))?;
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        Ok(())
    }
}
