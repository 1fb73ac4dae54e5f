use std::rc::Rc;

use varia_core::{SourceLocation, Span, VariantError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
    /// Quoted text with escapes already applied. `translated` is set for `~text~`.
    Str { text: String, translated: bool },
    Ident(String),
    Number(String),
    True,
    False,
    Null,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

struct Lexer<'a> {
    chars: Vec<char>,
    i: usize,
    line: usize,
    col: usize,
    file: Option<&'a Rc<str>>,
}

impl Lexer<'_> {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.get(self.i).copied()?;
        self.i += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn here(&self) -> Span {
        Span::point(self.line, self.col)
    }

    fn error(&self, message: impl Into<String>, span: Span) -> VariantError {
        VariantError::Reader {
            message: message.into(),
            location: SourceLocation::new(self.file.cloned(), span),
        }
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars().enumerate().all(|(n, c)| self.peek(n) == Some(c))
    }

    /// Skip whitespace and `#`, `//` and nested `/* */` comments.
    fn skip_trivia(&mut self) -> Result<(), VariantError> {
        loop {
            match self.peek(0) {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => self.skip_line(),
                Some('/') if self.peek(1) == Some('/') => self.skip_line(),
                Some('/') if self.peek(1) == Some('*') => {
                    let start = self.here();
                    self.bump();
                    self.bump();
                    let mut depth = 1;
                    while depth > 0 {
                        if self.starts_with("/*") {
                            depth += 1;
                            self.bump();
                        } else if self.starts_with("*/") {
                            depth -= 1;
                            self.bump();
                        }
                        if self.bump().is_none() {
                            return Err(self.error("unterminated block comment", start));
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    /// `"""text"""`: no escapes, ends at the first closing triple quote.
    fn literal_string(&mut self, start: Span) -> Result<String, VariantError> {
        for _ in 0..3 {
            self.bump();
        }
        let mut text = String::new();
        loop {
            if self.starts_with("\"\"\"") {
                for _ in 0..3 {
                    self.bump();
                }
                return Ok(text);
            }
            match self.bump() {
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated string", start)),
            }
        }
    }

    fn quoted_string(&mut self, delim: char, start: Span) -> Result<String, VariantError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string", start)),
                Some(c) if c == delim => return Ok(text),
                Some('\\') => {
                    let escape_at = self.here();
                    match self.bump() {
                        None => return Err(self.error("unterminated string", start)),
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('b') => text.push('\u{8}'),
                        Some('f') => text.push('\u{c}'),
                        Some('u') => text.push(self.unicode_escape(escape_at)?),
                        Some(other) => text.push(other),
                    }
                }
                Some(c) => text.push(c),
            }
        }
    }

    /// The `XXXX` of a `\uXXXX` escape, combining surrogate pairs.
    fn unicode_escape(&mut self, at: Span) -> Result<char, VariantError> {
        let high = self.hex4(at)?;
        let code = if (0xD800..0xDC00).contains(&high) && self.starts_with("\\u") {
            self.bump();
            self.bump();
            let low = self.hex4(at)?;
            if !(0xDC00..0xE000).contains(&low) {
                return Err(self.error("invalid surrogate pair in \\u escape", at));
            }
            0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
        } else {
            high
        };
        char::from_u32(code).ok_or_else(|| self.error("invalid \\u escape", at))
    }

    fn hex4(&mut self, at: Span) -> Result<u32, VariantError> {
        let mut code = 0;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("expected four hex digits after \\u", at))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    /// `-?digits[.digits][(e|E)[+-]digits]`, returned as written.
    fn number(&mut self, start: Span) -> Result<String, VariantError> {
        let mut text = String::new();
        let mut seen_point = false;
        let mut seen_exponent = false;
        while let Some(c) = self.peek(0) {
            let after_exponent_mark = text.ends_with(['e', 'E']);
            match c {
                '-' if text.is_empty() => {}
                '-' | '+' if after_exponent_mark => {}
                '-' => return Err(self.error("'-' in illegal position in number", self.here())),
                '.' if seen_exponent => {
                    return Err(self.error("decimal point in exponent", self.here()))
                }
                '.' if seen_point => {
                    return Err(self.error("two decimal points in number", self.here()))
                }
                '.' => seen_point = true,
                'e' | 'E' if !seen_exponent && text.chars().any(|c| c.is_ascii_digit()) => {
                    seen_exponent = true;
                }
                c if c.is_ascii_digit() => {}
                _ => break,
            }
            text.push(c);
            self.bump();
        }
        if !text.chars().any(|c| c.is_ascii_digit()) {
            return Err(self.error(format!("malformed number '{text}'"), start));
        }
        if seen_exponent && !text.ends_with(|c: char| c.is_ascii_digit()) {
            return Err(self.error(format!("missing exponent digits in '{text}'"), start));
        }
        Ok(text)
    }
}

pub fn tokenize(input: &str, file: Option<&Rc<str>>) -> Result<Vec<SpannedToken>, VariantError> {
    let mut lx = Lexer {
        chars: input.chars().collect(),
        i: 0,
        line: 1,
        col: 1,
        file,
    };
    let mut tokens = Vec::new();

    loop {
        lx.skip_trivia()?;
        let Some(ch) = lx.peek(0) else { break };
        let start = lx.here();

        let token = match ch {
            '{' | '}' | '[' | ']' | ':' | ',' => {
                lx.bump();
                match ch {
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ':' => Token::Colon,
                    _ => Token::Comma,
                }
            }
            '"' if lx.starts_with("\"\"\"") => Token::Str {
                text: lx.literal_string(start)?,
                translated: false,
            },
            '"' | '\'' | '~' => Token::Str {
                text: lx.quoted_string(ch, start)?,
                translated: ch == '~',
            },
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(c) = lx.peek(0) {
                    if !(c.is_alphanumeric() || c == '_') {
                        break;
                    }
                    word.push(c);
                    lx.bump();
                }
                match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                }
            }
            c if c == '-' || c == '.' || c.is_ascii_digit() => Token::Number(lx.number(start)?),
            other => {
                return Err(lx.error(format!("unexpected character '{other}'"), start));
            }
        };

        // End columns are inclusive of the last character.
        let end = Span::point(lx.line, lx.col.saturating_sub(1).max(1));
        tokens.push(SpannedToken {
            token,
            span: start.to(&end),
        });
    }

    Ok(tokens)
}
