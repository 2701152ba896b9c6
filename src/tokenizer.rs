use crate::span::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Line structure
    Cr,
    Eof,

    // Literals and identifiers
    Number,
    String,
    Variable,

    // Punctuation and operators
    Comma,
    Semicolon,
    Lt,
    Gt,
    Leq,
    Geq,
    Neq,
    Eq,
    Lparen,
    Rparen,
    Xor,
    And,
    Or,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Hash,

    // Keywords
    Let,
    Print,
    If,
    Then,
    Else,
    For,
    To,
    Next,
    Goto,
    Gosub,
    Return,
    Call,
    Rem,
    Peek,
    Poke,
    End,

    // Lexical failure; the token text carries the diagnostic
    Error,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenKind::Cr => "newline",
            TokenKind::Eof => "end of input",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Variable => "variable",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Leq => "<=",
            TokenKind::Geq => ">=",
            TokenKind::Neq => "!=",
            TokenKind::Eq => "=",
            TokenKind::Lparen => "(",
            TokenKind::Rparen => ")",
            TokenKind::Xor => "^",
            TokenKind::And => "&",
            TokenKind::Or => "|",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Hash => "#",
            TokenKind::Let => "LET",
            TokenKind::Print => "PRINT",
            TokenKind::If => "IF",
            TokenKind::Then => "THEN",
            TokenKind::Else => "ELSE",
            TokenKind::For => "FOR",
            TokenKind::To => "TO",
            TokenKind::Next => "NEXT",
            TokenKind::Goto => "GOTO",
            TokenKind::Gosub => "GOSUB",
            TokenKind::Return => "RETURN",
            TokenKind::Call => "CALL",
            TokenKind::Rem => "REM",
            TokenKind::Peek => "PEEK",
            TokenKind::Poke => "POKE",
            TokenKind::End => "END",
            TokenKind::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub pos: Position,
    pub kind: TokenKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub scan_comments: bool,
}

pub struct Tokenizer<'a> {
    config: Config,
    name: String,
    src: &'a str,

    ch: Option<char>,
    offset: usize,
    rd_offset: usize,
    line: usize,
    column: usize,
}

fn is_letter(ch: char) -> bool {
    ch == '_' || ch.is_alphabetic()
}

fn lookup_ident(ident: &str) -> TokenKind {
    match ident.to_ascii_lowercase().as_str() {
        "let" => TokenKind::Let,
        "print" => TokenKind::Print,
        "if" => TokenKind::If,
        "then" => TokenKind::Then,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "to" => TokenKind::To,
        "next" => TokenKind::Next,
        "goto" => TokenKind::Goto,
        "gosub" => TokenKind::Gosub,
        "return" => TokenKind::Return,
        "call" => TokenKind::Call,
        "rem" => TokenKind::Rem,
        "peek" => TokenKind::Peek,
        "poke" => TokenKind::Poke,
        "end" => TokenKind::End,
        _ => TokenKind::Variable,
    }
}

impl<'a> Tokenizer<'a> {
    pub fn new(name: &str, src: &'a str) -> Self {
        Self::with_config(Config::default(), name, src)
    }

    pub fn with_config(config: Config, name: &str, src: &'a str) -> Self {
        let mut t = Tokenizer {
            config,
            name: name.to_string(),
            src,
            ch: None,
            offset: 0,
            rd_offset: 0,
            line: 1,
            column: 1,
        };
        t.advance();
        t
    }

    fn advance(&mut self) {
        match self.ch {
            Some('\n') => {
                self.line += 1;
                self.column = 1;
            }
            Some(_) => self.column += 1,
            None => {}
        }
        if self.rd_offset < self.src.len() {
            self.offset = self.rd_offset;
            // rd_offset always sits on a char boundary
            let ch = self.src[self.rd_offset..].chars().next().unwrap();
            self.rd_offset += ch.len_utf8();
            self.ch = Some(ch);
        } else {
            self.offset = self.src.len();
            self.ch = None;
        }
    }

    fn position(&self) -> Position {
        Position {
            name: self.name.clone(),
            offset: self.offset,
            line: self.line,
            column: self.column,
        }
    }

    /// Returns the next token. End of input yields `Eof` on every
    /// subsequent call; lexical failures yield `Error` tokens and
    /// scanning continues.
    pub fn token(&mut self) -> Token {
        loop {
            self.skip_whitespace();

            let pos = self.position();
            let (kind, text) = match self.ch {
                Some(ch) if is_letter(ch) => {
                    let mut text = self.ident();
                    let kind = lookup_ident(&text);
                    if kind == TokenKind::Rem {
                        text.push_str(&self.comment());
                        if !self.config.scan_comments {
                            continue;
                        }
                    }
                    (kind, text)
                }
                Some(ch) if ch.is_ascii_digit() => (TokenKind::Number, self.number()),
                Some('"') => self.string(),
                None => (TokenKind::Eof, String::new()),
                Some(ch) => {
                    self.advance();
                    self.operator(ch)
                }
            };
            return Token { pos, kind, text };
        }
    }

    fn operator(&mut self, ch: char) -> (TokenKind, String) {
        let kind = match ch {
            '\n' | '\r' => TokenKind::Cr,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '<' => {
                if self.ch == Some('=') {
                    self.advance();
                    return (TokenKind::Leq, "<=".to_string());
                }
                TokenKind::Lt
            }
            '>' => {
                if self.ch == Some('=') {
                    self.advance();
                    return (TokenKind::Geq, ">=".to_string());
                }
                TokenKind::Gt
            }
            '!' => {
                if self.ch == Some('=') {
                    self.advance();
                    return (TokenKind::Neq, "!=".to_string());
                }
                return (TokenKind::Error, "unexpected character '!'".to_string());
            }
            '=' => TokenKind::Eq,
            '(' => TokenKind::Lparen,
            ')' => TokenKind::Rparen,
            '^' => TokenKind::Xor,
            '&' => TokenKind::And,
            '|' => TokenKind::Or,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '#' => TokenKind::Hash,
            ch => {
                return (
                    TokenKind::Error,
                    format!("unknown character {:?}", ch),
                )
            }
        };
        (kind, ch.to_string())
    }

    fn skip_whitespace(&mut self) {
        while self.ch == Some(' ') || self.ch == Some('\t') {
            self.advance();
        }
    }

    fn ident(&mut self) -> String {
        let offs = self.offset;
        while matches!(self.ch, Some(c) if is_letter(c) || c.is_ascii_digit()) {
            self.advance();
        }
        self.src[offs..self.offset].to_string()
    }

    // Rest of the line after REM, up to but not including the terminator.
    fn comment(&mut self) -> String {
        let offs = self.offset;
        while !matches!(self.ch, None | Some('\n') | Some('\r')) {
            self.advance();
        }
        self.src[offs..self.offset].to_string()
    }

    fn number(&mut self) -> String {
        let offs = self.offset;
        while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        self.src[offs..self.offset].to_string()
    }

    // The returned text keeps its surrounding quotes; the parser unquotes.
    fn string(&mut self) -> (TokenKind, String) {
        let offs = self.offset;
        loop {
            self.advance();
            match self.ch {
                None | Some('\n') | Some('\r') => {
                    return (TokenKind::Error, "unterminated string".to_string())
                }
                Some('"') => break,
                Some(_) => {}
            }
        }
        self.advance();
        (TokenKind::String, self.src[offs..self.offset].to_string())
    }
}
