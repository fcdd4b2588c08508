use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::error::{CodeLoc, EngineError, ExecResult};

/// Lexical category of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum TokenKind {
    /// `[A-Za-z_][A-Za-z0-9_]*`, not matching the keyword table.
    Identifier,
    /// `[0-9]+`
    Integer,
    /// `[0-9]+.[0-9]+`, exactly one dot.
    Decimal,

    // Type keywords.
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Unsigned,
    Float,
    Double,

    Class,
    Const,
    Public,
    Protected,
    Private,

    If,
    Else,
    While,
    For,
    Break,
    Return,

    Semicolon,
    Comma,
    Dot,
    Colon,
    DoubleColon,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Not,
    Eq,
    Neq,
    Less,
    Greater,
    Leq,
    Geq,

    /// End of the token stream.
    End,
}

impl TokenKind {
    /// True for keywords that can start a type name (`unsigned` included).
    #[must_use]
    pub(crate) fn is_type_keyword(self) -> bool {
        matches!(
            self,
            Self::Void
                | Self::Bool
                | Self::Char
                | Self::Short
                | Self::Int
                | Self::Long
                | Self::Unsigned
                | Self::Float
                | Self::Double
        )
    }

    /// True for the compound assignment operators (`+=` `-=` `*=` `/=`).
    #[must_use]
    pub(crate) fn is_compound_assign(self) -> bool {
        matches!(
            self,
            Self::PlusAssign | Self::MinusAssign | Self::StarAssign | Self::SlashAssign
        )
    }
}

/// One lexeme with its 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub row: u32,
    pub col: u32,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, lexeme: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            row,
            col,
        }
    }

    #[must_use]
    pub fn loc(&self) -> CodeLoc {
        CodeLoc::new(self.row, self.col)
    }
}

fn keyword_kind(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "void" => TokenKind::Void,
        "bool" => TokenKind::Bool,
        "char" => TokenKind::Char,
        "short" => TokenKind::Short,
        "int" => TokenKind::Int,
        "long" => TokenKind::Long,
        "unsigned" => TokenKind::Unsigned,
        "float" => TokenKind::Float,
        "double" => TokenKind::Double,
        "class" => TokenKind::Class,
        "const" => TokenKind::Const,
        "public" => TokenKind::Public,
        "protected" => TokenKind::Protected,
        "private" => TokenKind::Private,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "break" => TokenKind::Break,
        "return" => TokenKind::Return,
        _ => return None,
    };
    Some(kind)
}

/// Restartable byte-stream scanner.
///
/// The cursor survives across sections: [`Tokenizer::add_source`] appends
/// bytes and scanning resumes at the first unread byte, so a module can be
/// fed source text incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Tokenizer {
    source: Vec<u8>,
    idx: usize,
    row: u32,
    col: u32,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            source: Vec::new(),
            idx: 0,
            row: 1,
            col: 1,
        }
    }

    pub fn add_source(&mut self, code: &str) {
        self.source.extend_from_slice(code.as_bytes());
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.idx).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.idx + ahead).copied()
    }

    /// Consumes the next byte when it equals `second`.
    fn eat(&mut self, second: u8) -> bool {
        if self.peek() == Some(second) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.idx += 1;
        if byte == b'\n' {
            self.row += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(byte)
    }

    fn skip_trivia(&mut self) {
        while let Some(byte) = self.peek() {
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'/' if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Scans the next token. At end of input returns [`TokenKind::End`];
    /// an unrecognized byte is a `LexError`.
    pub fn next_token(&mut self) -> ExecResult<Token> {
        self.skip_trivia();

        let (row, col) = (self.row, self.col);
        let Some(byte) = self.peek() else {
            return Ok(Token::new(TokenKind::End, "", row, col));
        };

        if byte.is_ascii_alphabetic() || byte == b'_' {
            return Ok(self.scan_identifier(row, col));
        }
        if byte.is_ascii_digit() {
            return Ok(self.scan_number(row, col));
        }

        self.bump();
        // Two-character operators are recognized before their one-character
        // counterparts.
        let (kind, lexeme): (TokenKind, &str) = match byte {
            b';' => (TokenKind::Semicolon, ";"),
            b',' => (TokenKind::Comma, ","),
            b'.' => (TokenKind::Dot, "."),
            b':' => {
                if self.eat(b':') {
                    (TokenKind::DoubleColon, "::")
                } else {
                    (TokenKind::Colon, ":")
                }
            }
            b'(' => (TokenKind::OpenParen, "("),
            b')' => (TokenKind::CloseParen, ")"),
            b'{' => (TokenKind::OpenBrace, "{"),
            b'}' => (TokenKind::CloseBrace, "}"),
            b'[' => (TokenKind::OpenBracket, "["),
            b']' => (TokenKind::CloseBracket, "]"),
            b'=' => {
                if self.eat(b'=') {
                    (TokenKind::Eq, "==")
                } else {
                    (TokenKind::Assign, "=")
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    (TokenKind::Neq, "!=")
                } else {
                    (TokenKind::Not, "!")
                }
            }
            b'<' => {
                if self.eat(b'=') {
                    (TokenKind::Leq, "<=")
                } else {
                    (TokenKind::Less, "<")
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    (TokenKind::Geq, ">=")
                } else {
                    (TokenKind::Greater, ">")
                }
            }
            b'+' => {
                if self.eat(b'=') {
                    (TokenKind::PlusAssign, "+=")
                } else {
                    (TokenKind::Plus, "+")
                }
            }
            b'-' => {
                if self.eat(b'=') {
                    (TokenKind::MinusAssign, "-=")
                } else {
                    (TokenKind::Minus, "-")
                }
            }
            b'*' => {
                if self.eat(b'=') {
                    (TokenKind::StarAssign, "*=")
                } else {
                    (TokenKind::Star, "*")
                }
            }
            b'/' => {
                if self.eat(b'=') {
                    (TokenKind::SlashAssign, "/=")
                } else {
                    (TokenKind::Slash, "/")
                }
            }
            other => {
                return Err(
                    EngineError::lex(format!("unexpected byte 0x{other:02x}")).at(CodeLoc::new(row, col))
                );
            }
        };
        Ok(Token::new(kind, lexeme, row, col))
    }

    fn scan_identifier(&mut self, row: u32, col: u32) -> Token {
        let start = self.idx;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || byte == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        // Identifiers are scanned from ASCII bytes only.
        let lexeme = String::from_utf8_lossy(&self.source[start..self.idx]).into_owned();
        let kind = keyword_kind(&lexeme).unwrap_or(TokenKind::Identifier);
        Token::new(kind, lexeme, row, col)
    }

    fn scan_number(&mut self, row: u32, col: u32) -> Token {
        let start = self.idx;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        let mut kind = TokenKind::Integer;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.bump();
            }
            kind = TokenKind::Decimal;
        }
        let lexeme = String::from_utf8_lossy(&self.source[start..self.idx]).into_owned();
        Token::new(kind, lexeme, row, col)
    }
}
