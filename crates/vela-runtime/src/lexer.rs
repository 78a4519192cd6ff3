//! Hand-written scanner turning source bytes into a lazy stream of [`Token`]s.

use crate::span::Span;
use crate::token::{keyword_kind, Token, TokenKind};

/// Scans an immutable source buffer one token at a time.
pub struct Lexer<'src> {
    source: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    /// Scan and return the next token. Returns an `Error`-kind token (never panics)
    /// on malformed input; the compiler is responsible for surfacing it.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();

        if is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b';' => self.make_token(TokenKind::Semicolon),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'!' => {
                let kind = if self.match_char(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.match_char(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.match_char(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.match_char(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn identifier(&mut self) -> Token {
        while is_alpha(self.peek()) || self.peek().is_ascii_digit() {
            self.advance();
        }
        let text = self.lexeme_str();
        let kind = keyword_kind(text).unwrap_or(TokenKind::Identifier);
        self.make_token(kind)
    }

    fn number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn string(&mut self) -> Token {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }
        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }
        self.advance(); // closing quote
        self.make_token(TokenKind::String)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn advance(&mut self) -> u8 {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.source[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() {
            0
        } else {
            self.source[self.current + 1]
        }
    }

    fn match_char(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn lexeme_str(&self) -> &'src str {
        std::str::from_utf8(&self.source[self.start..self.current])
            .expect("lexeme must be valid utf-8, source was validated on entry")
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            self.lexeme_str(),
            self.line,
            Span::new(self.start, self.current),
        )
    }

    fn error_token(&self, message: &str) -> Token {
        Token::new(
            TokenKind::Error,
            message,
            self.line,
            Span::new(self.start, self.current),
        )
    }
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_arithmetic_expression() {
        assert_eq!(
            kinds("1 + 2 * 3;"),
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Star,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_two_char_operators() {
        assert_eq!(
            kinds("a >= b != c <= d"),
            vec![
                TokenKind::Identifier,
                TokenKind::GreaterEqual,
                TokenKind::Identifier,
                TokenKind::BangEqual,
                TokenKind::Identifier,
                TokenKind::LessEqual,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_keywords_not_prefixes() {
        assert_eq!(kinds("class classy"), vec![
            TokenKind::Class,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        assert_eq!(kinds("\"abc"), vec![TokenKind::Error, TokenKind::Eof]);
    }

    #[test]
    fn tracks_line_numbers_across_newlines() {
        let mut lexer = Lexer::new("a\n\nb");
        let first = lexer.next_token();
        assert_eq!(first.line, 1);
        let second = lexer.next_token();
        assert_eq!(second.line, 3);
    }

    #[test]
    fn skips_line_comments() {
        assert_eq!(
            kinds("1 // a comment\n+ 2"),
            vec![TokenKind::Number, TokenKind::Plus, TokenKind::Number, TokenKind::Eof]
        );
    }
}
