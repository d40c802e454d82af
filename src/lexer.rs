// lexer.rs - Lexer for the C subset accepted by the compiler

use std::fmt;

use crate::source::Source;

/// Capacity of the for-update token buffer.
pub const TOKEN_BUFFER_CAP: usize = 64;

// ============================================================================
// TOKEN TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Eof,

    // Literals and names
    Num(i64),
    Ident(String),

    // Keywords (matched case-insensitively)
    Int,
    Return,
    If,
    Else,
    While,
    For,

    // Operators
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    Amp,      // &
    Assign,   // =
    EqEq,     // ==
    NotEq,    // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Tok::Eof => write!(f, "<eof>"),
            Tok::Num(n) => write!(f, "{}", n),
            Tok::Ident(s) => write!(f, "{}", s),
            Tok::Int => write!(f, "int"),
            Tok::Return => write!(f, "return"),
            Tok::If => write!(f, "if"),
            Tok::Else => write!(f, "else"),
            Tok::While => write!(f, "while"),
            Tok::For => write!(f, "for"),
            Tok::Plus => write!(f, "+"),
            Tok::Minus => write!(f, "-"),
            Tok::Star => write!(f, "*"),
            Tok::Slash => write!(f, "/"),
            Tok::Percent => write!(f, "%"),
            Tok::Amp => write!(f, "&"),
            Tok::Assign => write!(f, "="),
            Tok::EqEq => write!(f, "=="),
            Tok::NotEq => write!(f, "!="),
            Tok::Lt => write!(f, "<"),
            Tok::Le => write!(f, "<="),
            Tok::Gt => write!(f, ">"),
            Tok::Ge => write!(f, ">="),
            Tok::LParen => write!(f, "("),
            Tok::RParen => write!(f, ")"),
            Tok::LBrace => write!(f, "{{"),
            Tok::RBrace => write!(f, "}}"),
            Tok::LBracket => write!(f, "["),
            Tok::RBracket => write!(f, "]"),
            Tok::Semi => write!(f, ";"),
            Tok::Comma => write!(f, ","),
        }
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LexError {
    UnexpectedChar(u8),
    UnterminatedComment,
    TokenBufferOverflow,
    UnexpectedEof,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LexError::UnexpectedChar(b) => write!(f, "unexpected character 0x{:02x}", b),
            LexError::UnterminatedComment => write!(f, "unterminated block comment"),
            LexError::TokenBufferOverflow => write!(f, "for-update clause too long"),
            LexError::UnexpectedEof => write!(f, "unexpected end of input"),
        }
    }
}

impl std::error::Error for LexError {}

// ============================================================================
// LEXER
// ============================================================================

enum Feed {
    Stream,
    Replay,
}

/// Tokenizer over the shared byte source. Besides the usual scanning it can
/// capture the tokens of a for-loop update clause and replay them after the
/// body has been compiled.
pub struct Lexer<'a> {
    src: &'a mut Source,
    cur: Tok,
    feed: Feed,
    buffer: Vec<Tok>,
    replay_pos: usize,
    saved: Option<Tok>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a mut Source) -> Result<Self, LexError> {
        let mut lexer = Lexer {
            src,
            cur: Tok::Eof,
            feed: Feed::Stream,
            buffer: Vec::new(),
            replay_pos: 0,
            saved: None,
        };
        lexer.advance()?;
        Ok(lexer)
    }

    /// The current token.
    pub fn cur(&self) -> &Tok {
        &self.cur
    }

    /// Step to the next token.
    pub fn advance(&mut self) -> Result<(), LexError> {
        self.cur = match self.feed {
            Feed::Stream => self.scan()?,
            Feed::Replay => {
                if self.replay_pos < self.buffer.len() {
                    let tok = self.buffer[self.replay_pos].clone();
                    self.replay_pos += 1;
                    tok
                } else {
                    Tok::Eof
                }
            }
        };
        Ok(())
    }

    /// Capture tokens from the current one up to the matching `)` (which is
    /// consumed) and hand them back. Afterwards the current token is the one
    /// following the closing parenthesis. The caller keeps the tokens until
    /// replay time, so nested captures do not disturb each other.
    pub fn capture_update(&mut self) -> Result<Vec<Tok>, LexError> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        loop {
            match &self.cur {
                Tok::RParen if depth == 0 => {
                    self.advance()?;
                    return Ok(tokens);
                }
                Tok::Eof => return Err(LexError::UnexpectedEof),
                tok => {
                    match tok {
                        Tok::LParen => depth += 1,
                        Tok::RParen => depth -= 1,
                        _ => {}
                    }
                    if tokens.len() >= TOKEN_BUFFER_CAP {
                        return Err(LexError::TokenBufferOverflow);
                    }
                    tokens.push(tok.clone());
                }
            }
            self.advance()?;
        }
    }

    /// Start feeding captured tokens. The stream token current at this
    /// point is put aside and restored by `end_replay`.
    pub fn begin_replay(&mut self, tokens: Vec<Tok>) {
        self.saved = Some(std::mem::replace(&mut self.cur, Tok::Eof));
        self.feed = Feed::Replay;
        self.buffer = tokens;
        self.replay_pos = 0;
        if !self.buffer.is_empty() {
            self.cur = self.buffer[0].clone();
            self.replay_pos = 1;
        }
    }

    /// Stop replaying and restore the stream position.
    pub fn end_replay(&mut self) {
        self.feed = Feed::Stream;
        self.buffer.clear();
        self.replay_pos = 0;
        if let Some(saved) = self.saved.take() {
            self.cur = saved;
        }
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    fn scan(&mut self) -> Result<Tok, LexError> {
        loop {
            let b = match self.src.read_byte() {
                Some(b) => b,
                None => return Ok(Tok::Eof),
            };

            if b.is_ascii_whitespace() {
                continue;
            }

            if b == b'/' {
                match self.src.read_byte() {
                    Some(b'/') => {
                        self.skip_line_comment();
                        continue;
                    }
                    Some(b'*') => {
                        self.skip_block_comment()?;
                        continue;
                    }
                    Some(other) => {
                        self.src.unread(other);
                        return Ok(Tok::Slash);
                    }
                    None => return Ok(Tok::Slash),
                }
            }

            if b == b'_' || b.is_ascii_alphabetic() {
                return Ok(self.scan_ident(b));
            }

            if b.is_ascii_digit() {
                return Ok(self.scan_number(b));
            }

            return self.scan_operator(b);
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(b) = self.src.read_byte() {
            if b == b'\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        loop {
            match self.src.read_byte() {
                Some(b'*') => {
                    match self.src.read_byte() {
                        Some(b'/') => return Ok(()),
                        Some(other) => self.src.unread(other),
                        None => return Err(LexError::UnterminatedComment),
                    }
                }
                Some(_) => {}
                None => return Err(LexError::UnterminatedComment),
            }
        }
    }

    fn scan_ident(&mut self, first: u8) -> Tok {
        let mut name = String::new();
        name.push(first as char);
        while let Some(b) = self.src.read_byte() {
            if b == b'_' || b.is_ascii_alphanumeric() {
                name.push(b as char);
            } else {
                self.src.unread(b);
                break;
            }
        }
        // Keywords match case-insensitively; identifiers keep their case.
        match name.to_ascii_lowercase().as_str() {
            "int" => Tok::Int,
            "return" => Tok::Return,
            "if" => Tok::If,
            "else" => Tok::Else,
            "while" => Tok::While,
            "for" => Tok::For,
            _ => Tok::Ident(name),
        }
    }

    fn scan_number(&mut self, first: u8) -> Tok {
        let mut value = (first - b'0') as i64;
        while let Some(b) = self.src.read_byte() {
            if b.is_ascii_digit() {
                value = value.wrapping_mul(10).wrapping_add((b - b'0') as i64);
            } else {
                self.src.unread(b);
                break;
            }
        }
        Tok::Num(value)
    }

    fn scan_operator(&mut self, b: u8) -> Result<Tok, LexError> {
        let tok = match b {
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'*' => Tok::Star,
            b'%' => Tok::Percent,
            b'&' => Tok::Amp,
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'{' => Tok::LBrace,
            b'}' => Tok::RBrace,
            b'[' => Tok::LBracket,
            b']' => Tok::RBracket,
            b';' => Tok::Semi,
            b',' => Tok::Comma,
            b'=' => {
                return Ok(match self.src.read_byte() {
                    Some(b'=') => Tok::EqEq,
                    Some(other) => {
                        self.src.unread(other);
                        Tok::Assign
                    }
                    None => Tok::Assign,
                });
            }
            b'!' => {
                return match self.src.read_byte() {
                    Some(b'=') => Ok(Tok::NotEq),
                    Some(other) => {
                        self.src.unread(other);
                        Err(LexError::UnexpectedChar(b'!'))
                    }
                    None => Err(LexError::UnexpectedChar(b'!')),
                };
            }
            b'<' => {
                return Ok(match self.src.read_byte() {
                    Some(b'=') => Tok::Le,
                    Some(other) => {
                        self.src.unread(other);
                        Tok::Lt
                    }
                    None => Tok::Lt,
                });
            }
            b'>' => {
                return Ok(match self.src.read_byte() {
                    Some(b'=') => Tok::Ge,
                    Some(other) => {
                        self.src.unread(other);
                        Tok::Gt
                    }
                    None => Tok::Gt,
                });
            }
            _ => return Err(LexError::UnexpectedChar(b)),
        };
        Ok(tok)
    }
}
