//! Tokenizer for TypeScript / JavaScript data modules.
//!
//! Covers the token grammar a data module needs: identifiers and keywords,
//! string and numeric literals, template literals (substitutions are
//! tokenized recursively), punctuators, and comments. Regular expression
//! literals are not recognised.

use serde_json::Number;

/// Multi-character punctuators, longest first.
const PUNCTUATORS: &[&str] = &[
    "...", "===", "!==", "=>", "==", "!=", "&&", "||", "??", "?.", "{", "}", "[", "]", "(", ")",
    ",", ";", ":", ".", "?", "!", "=", "<", ">", "|", "&", "+", "-", "*", "/", "%", "@", "~",
    "^", "#",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Num(Number),
    Template(Vec<TemplatePart>),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based source line
    pub line: usize,
    /// A line break separates this token from the previous one
    pub newline_before: bool,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(n) if n == name)
    }

    /// Short rendering used in error messages.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(n) => format!("'{}'", n),
            TokenKind::Str(s) => format!("string {:?}", s),
            TokenKind::Num(n) => format!("number {}", n),
            TokenKind::Template(_) => "template literal".to_string(),
            TokenKind::Punct(p) => format!("'{}'", p),
            TokenKind::Eof => "end of file".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

type LexResult<T> = std::result::Result<T, LexError>;

/// Tokenize a whole module. The returned vector always ends with `Eof`.
pub fn tokenize(source: &str) -> LexResult<Vec<Token>> {
    Lexer::new(source, 1).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    newline_pending: bool,
}

impl Lexer {
    fn new(source: &str, line: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            newline_pending: false,
        }
    }

    fn run(mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();

        // Shebang
        if self.peek() == Some('#') && self.peek_at(1) == Some('!') {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.pos += 1;
            }
        }

        loop {
            self.skip_trivia()?;
            let line = self.line;
            let newline_before = std::mem::take(&mut self.newline_pending);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    newline_before,
                });
                return Ok(tokens);
            };

            let kind = if c == '"' || c == '\'' {
                self.pos += 1;
                TokenKind::Str(self.string(c)?)
            } else if c == '`' {
                self.pos += 1;
                TokenKind::Template(self.template()?)
            } else if c.is_ascii_digit()
                || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                TokenKind::Num(self.number()?)
            } else if is_ident_start(c) {
                TokenKind::Ident(self.ident())
            } else {
                TokenKind::Punct(self.punct()?)
            };

            tokens.push(Token {
                kind,
                line,
                newline_before,
            });
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error<T>(&self, message: impl Into<String>) -> LexResult<T> {
        Err(LexError {
            line: self.line,
            message: message.into(),
        })
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> LexResult<()> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.newline_pending = true;
                    self.bump();
                }
                c if c.is_whitespace() || c == '\u{feff}' => {
                    self.bump();
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    let start = self.line;
                    self.pos += 2;
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.pos += 1;
                                break;
                            }
                            Some('\n') => self.newline_pending = true,
                            Some(_) => {}
                            None => {
                                return Err(LexError {
                                    line: start,
                                    message: "unterminated block comment".to_string(),
                                })
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn punct(&mut self) -> LexResult<&'static str> {
        for p in PUNCTUATORS {
            let len = p.chars().count();
            let matches = p
                .chars()
                .enumerate()
                .all(|(i, pc)| self.peek_at(i) == Some(pc));
            if !matches {
                continue;
            }
            // `a ? .5 : 1` is a conditional, not optional chaining
            if *p == "?." && self.peek_at(2).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            self.pos += len;
            return Ok(*p);
        }
        let c = self.peek().unwrap_or('\0');
        self.error(format!("unexpected character {:?}", c))
    }

    fn number(&mut self) -> LexResult<Number> {
        let radix = match (self.peek(), self.peek_at(1)) {
            (Some('0'), Some('x' | 'X')) => 16,
            (Some('0'), Some('b' | 'B')) => 2,
            (Some('0'), Some('o' | 'O')) => 8,
            _ => 10,
        };

        if radix != 10 {
            self.pos += 2;
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c == '_' {
                    self.pos += 1;
                } else if c.is_digit(radix) {
                    digits.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
            // BigInt suffix
            if self.peek() == Some('n') {
                self.pos += 1;
            }
            return match u64::from_str_radix(&digits, radix) {
                Ok(v) => Ok(Number::from(v)),
                Err(_) => self.error(format!("invalid base-{} literal {:?}", radix, digits)),
            };
        }

        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' if !is_float && !text.contains(['e', 'E']) => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    if let Some(sign @ ('+' | '-')) = self.peek_at(1) {
                        text.push(sign);
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }
        if self.peek() == Some('n') {
            self.pos += 1;
        }
        if self.peek().is_some_and(is_ident_start) {
            return self.error(format!("identifier directly after number {}", text));
        }

        if !is_float {
            if let Ok(v) = text.parse::<u64>() {
                return Ok(Number::from(v));
            }
        }
        let value: f64 = match text.parse() {
            Ok(v) => v,
            Err(_) => return self.error(format!("invalid numeric literal {}", text)),
        };
        match Number::from_f64(value) {
            Some(n) => Ok(n),
            None => self.error(format!("numeric literal {} is not finite", text)),
        }
    }

    fn string(&mut self, quote: char) -> LexResult<String> {
        let mut out = String::new();
        loop {
            if matches!(self.peek(), None | Some('\n')) {
                return self.error("unterminated string literal");
            }
            match self.bump() {
                None => return self.error("unterminated string literal"),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> LexResult<Vec<TemplatePart>> {
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return self.error("unterminated template literal"),
                Some('`') => break,
                Some('\\') => self.escape(&mut text)?,
                Some('$') if self.peek() == Some('{') => {
                    self.pos += 1;
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let line = self.line;
                    let inner = self.substitution_source()?;
                    let mut tokens = Lexer::new(&inner, line).run()?;
                    if let Some(first) = tokens.first_mut() {
                        first.newline_before = false;
                    }
                    parts.push(TemplatePart::Expr(tokens));
                }
                Some(c) => text.push(c),
            }
        }
        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(parts)
    }

    /// Raw source of a `${ ... }` substitution, consuming the closing brace.
    fn substitution_source(&mut self) -> LexResult<String> {
        let mut depth = 0usize;
        let mut out = String::new();
        let mut quote: Option<char> = None;
        loop {
            let Some(c) = self.bump() else {
                return self.error("unterminated template substitution");
            };
            if let Some(q) = quote {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '{' => depth += 1,
                '}' if depth == 0 => return Ok(out),
                '}' => depth -= 1,
                _ => {}
            }
            out.push(c);
        }
    }

    fn escape(&mut self, out: &mut String) -> LexResult<()> {
        let Some(c) = self.bump() else {
            return self.error("unterminated escape sequence");
        };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' if !self.peek().is_some_and(|d| d.is_ascii_digit()) => out.push('\0'),
            '\n' => {}
            '\r' => {
                if self.peek() == Some('\n') {
                    self.bump();
                }
            }
            'x' => {
                let code = self.hex_digits(2)?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'u' => {
                let code = if self.peek() == Some('{') {
                    self.pos += 1;
                    let mut code = 0u32;
                    loop {
                        match self.bump() {
                            Some('}') => break,
                            Some(d) if d.is_ascii_hexdigit() => {
                                code = match code
                                    .checked_mul(16)
                                    .and_then(|c| c.checked_add(d.to_digit(16).unwrap_or(0)))
                                {
                                    Some(c) if c <= 0x10FFFF => c,
                                    _ => return self.error("invalid unicode escape"),
                                };
                            }
                            _ => return self.error("invalid unicode escape"),
                        }
                    }
                    code
                } else {
                    self.hex_digits(4)?
                };
                // Surrogate pair written as two \u escapes
                if (0xD800..0xDC00).contains(&code)
                    && self.peek() == Some('\\')
                    && self.peek_at(1) == Some('u')
                {
                    self.pos += 2;
                    let low = self.hex_digits(4)?;
                    let combined = 0x10000 + ((code - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
                    out.push(char::from_u32(combined).unwrap_or('\u{fffd}'));
                } else {
                    out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                }
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize) -> LexResult<u32> {
        let mut code = 0u32;
        for _ in 0..count {
            match self.bump().and_then(|d| d.to_digit(16)) {
                Some(d) => code = code * 16 + d,
                None => return self.error("invalid hexadecimal escape"),
            }
        }
        Ok(code)
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}
