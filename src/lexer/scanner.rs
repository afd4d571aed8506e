//! Lexer/Scanner for REAPER source code.

use crate::error::LexerError;
use crate::lexer::token::{StringPart, Token, TokenKind};
use crate::span::Span;

/// The lexer transforms source code into a stream of tokens.
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    /// Absolute offset of `source` inside the enclosing file (interpolation fragments).
    base: usize,
    current_pos: usize,
    line: usize,
    column: usize,
    start_pos: usize,
    start_line: usize,
    start_column: usize,
    /// Whether the previously emitted token allows `-` to start a literal.
    negative_allowed: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::nested(source, 0, 1, 1)
    }

    /// A scanner over a fragment that starts at `base`/`line`/`column` of its file.
    pub fn nested(source: &'a str, base: usize, line: usize, column: usize) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            base,
            current_pos: 0,
            line,
            column,
            start_pos: 0,
            start_line: line,
            start_column: column,
            negative_allowed: true,
        }
    }

    /// Scan all tokens from the source.
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.scan_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    /// Scan the next token.
    pub fn scan_token(&mut self) -> Result<Token, LexerError> {
        let token = self.scan_raw_token()?;
        self.negative_allowed = token.kind.permits_negative_literal();
        Ok(token)
    }

    fn scan_raw_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace_and_comments()?;
        self.mark_start();

        let Some((_, c)) = self.advance() else {
            return Ok(Token::eof(
                self.base + self.current_pos,
                self.line,
                self.column,
            ));
        };

        match c {
            '\n' => Ok(self.make_token(TokenKind::Newline)),

            // Single-character tokens
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            '[' => Ok(self.make_token(TokenKind::LeftBracket)),
            ']' => Ok(self.make_token(TokenKind::RightBracket)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            '.' => Ok(self.make_token(TokenKind::Dot)),
            ':' => Ok(self.make_token(TokenKind::Colon)),
            ';' => Ok(self.make_token(TokenKind::Semicolon)),

            // One- or two-character tokens
            '+' => Ok(self.either('=', TokenKind::PlusEqual, TokenKind::Plus)),
            '*' => Ok(self.either('=', TokenKind::StarEqual, TokenKind::Star)),
            '/' => Ok(self.either('=', TokenKind::SlashEqual, TokenKind::Slash)),
            '%' => Ok(self.either('=', TokenKind::PercentEqual, TokenKind::Percent)),
            '<' => Ok(self.either('=', TokenKind::LessEqual, TokenKind::Less)),
            '>' => Ok(self.either('=', TokenKind::GreaterEqual, TokenKind::Greater)),
            '-' => {
                if self.match_char('>') {
                    Ok(self.make_token(TokenKind::Arrow))
                } else if self.match_char('=') {
                    Ok(self.make_token(TokenKind::MinusEqual))
                } else if self.negative_allowed
                    && self.peek().is_some_and(|d| d.is_ascii_digit())
                {
                    match self.advance() {
                        Some((_, digit)) => self.scan_number(digit, true),
                        None => Ok(self.make_token(TokenKind::Minus)),
                    }
                } else {
                    Ok(self.make_token(TokenKind::Minus))
                }
            }
            '=' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::EqualEqual))
                } else if self.match_char('>') {
                    Ok(self.make_token(TokenKind::FatArrow))
                } else {
                    Ok(self.make_token(TokenKind::Equal))
                }
            }
            '!' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::BangEqual))
                } else {
                    Err(LexerError::unexpected_char(c, self.current_span()))
                }
            }

            // String literals
            'r' if matches!(self.peek(), Some('"' | '\'')) => {
                let quote = self.advance().map(|(_, q)| q).unwrap_or('"');
                self.scan_raw_string(quote)
            }
            '"' | '\'' => self.scan_string(c),

            // Numbers
            c if c.is_ascii_digit() => self.scan_number(c, false),

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(c),

            _ => Err(LexerError::unexpected_char(c, self.current_span())),
        }
    }

    fn either(&mut self, next: char, matched: TokenKind, single: TokenKind) -> Token {
        if self.match_char(next) {
            self.make_token(matched)
        } else {
            self.make_token(single)
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexerError> {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('#') => {
                    if self.peek_next() == Some('#') {
                        // Multi-line comment, closed by the next `##`
                        self.mark_start();
                        self.advance();
                        self.advance();
                        loop {
                            match self.peek() {
                                None => {
                                    return Err(LexerError::UnclosedComment(
                                        self.current_span(),
                                    ))
                                }
                                Some('#') if self.peek_next() == Some('#') => {
                                    self.advance();
                                    self.advance();
                                    break;
                                }
                                _ => {
                                    self.advance();
                                }
                            }
                        }
                    } else {
                        // The newline itself stays significant
                        while self.peek().is_some() && self.peek() != Some('\n') {
                            self.advance();
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn scan_string(&mut self, quote: char) -> Result<Token, LexerError> {
        let mut parts = Vec::new();
        let mut value = String::new();
        let mut interpolated = false;

        loop {
            match self.peek() {
                None => {
                    return Err(LexerError::unterminated_string(self.current_span()));
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let Some((_, escaped)) = self.advance() else {
                        return Err(LexerError::unterminated_string(self.current_span()));
                    };
                    let decoded = match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        'u' => self.scan_unicode_escape()?,
                        // `\"`, `\'`, `\\` and unknown escapes yield the character itself
                        other => other,
                    };
                    value.push(decoded);
                }
                Some('#') if self.peek_next() == Some('{') => {
                    interpolated = true;
                    if !value.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut value)));
                    }
                    self.advance();
                    self.advance();
                    parts.push(StringPart::Expr(self.scan_interpolation()?));
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        if interpolated {
            if !value.is_empty() {
                parts.push(StringPart::Literal(value));
            }
            Ok(self.make_token(TokenKind::InterpolatedString(parts)))
        } else {
            Ok(self.make_token(TokenKind::StringLiteral(value)))
        }
    }

    fn scan_unicode_escape(&mut self) -> Result<char, LexerError> {
        let mut code = 0u32;
        for _ in 0..4 {
            match self.peek().and_then(|c| c.to_digit(16)) {
                Some(digit) => {
                    self.advance();
                    code = code * 16 + digit;
                }
                None => return Err(LexerError::InvalidUnicodeEscape(self.current_span())),
            }
        }
        char::from_u32(code).ok_or_else(|| LexerError::InvalidUnicodeEscape(self.current_span()))
    }

    /// Scan the body of `#{...}` (opening brace already consumed) by
    /// re-entering a scanner over the embedded text.
    fn scan_interpolation(&mut self) -> Result<Vec<Token>, LexerError> {
        let fragment_start = self.current_pos;
        let (line, column) = (self.line, self.column);
        let mut depth = 1usize;

        let fragment_end = loop {
            match self.peek() {
                None => return Err(LexerError::UnclosedInterpolation(self.current_span())),
                Some('{') => {
                    depth += 1;
                    self.advance();
                }
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        let end = self.current_pos;
                        self.advance();
                        break end;
                    }
                    self.advance();
                }
                Some(q @ ('"' | '\'')) => {
                    self.advance();
                    loop {
                        match self.advance() {
                            None => {
                                return Err(LexerError::UnclosedInterpolation(
                                    self.current_span(),
                                ))
                            }
                            Some((_, '\\')) => {
                                self.advance();
                            }
                            Some((_, c)) if c == q => break,
                            Some(_) => {}
                        }
                    }
                }
                Some(_) => {
                    self.advance();
                }
            }
        };

        let fragment = &self.source[fragment_start..fragment_end];
        let mut inner = Scanner::nested(fragment, self.base + fragment_start, line, column);
        let tokens = inner.scan_tokens()?;
        Ok(tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Newline)
            .collect())
    }

    fn scan_raw_string(&mut self, quote: char) -> Result<Token, LexerError> {
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(LexerError::unterminated_string(self.current_span())),
                Some((_, c)) if c == quote => break,
                Some((_, c)) => value.push(c),
            }
        }
        Ok(self.make_token(TokenKind::StringLiteral(value)))
    }

    fn scan_number(&mut self, first: char, negative: bool) -> Result<Token, LexerError> {
        let sign = if negative { "-" } else { "" };

        if first == '0' {
            let radix = match self.peek() {
                Some('x' | 'X') => Some(16),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                let mut digits = String::new();
                while let Some(c) = self.peek().filter(|c| c.is_digit(radix)) {
                    digits.push(c);
                    self.advance();
                }
                let text = &self.source[self.start_pos..self.current_pos];
                if digits.is_empty() {
                    return Err(LexerError::invalid_number(text, self.current_span()));
                }
                let n = i64::from_str_radix(&format!("{}{}", sign, digits), radix)
                    .map_err(|_| LexerError::invalid_number(text, self.current_span()))?;
                let kind = if radix == 16 {
                    TokenKind::HexLiteral(n)
                } else {
                    TokenKind::BinaryLiteral(n)
                };
                return Ok(self.make_token(kind));
            }
        }

        let mut value = format!("{}{}", sign, first);
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                value.push(c);
                self.advance();
            } else if c == '.' && !is_float && self.peek_next().is_some_and(|n| n.is_ascii_digit())
            {
                is_float = true;
                value.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if is_float {
            let n: f64 = value
                .parse()
                .map_err(|_| LexerError::invalid_number(value.clone(), self.current_span()))?;
            Ok(self.make_token(TokenKind::FloatLiteral(n)))
        } else {
            let n: i64 = value
                .parse()
                .map_err(|_| LexerError::invalid_number(value.clone(), self.current_span()))?;
            Ok(self.make_token(TokenKind::IntLiteral(n)))
        }
    }

    fn scan_identifier(&mut self, first: char) -> Result<Token, LexerError> {
        let mut value = String::from(first);

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                value.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let kind = TokenKind::keyword(&value).unwrap_or(TokenKind::Identifier(value));
        Ok(self.make_token(kind))
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let (pos, c) = self.chars.next()?;
        self.current_pos = pos + c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some((pos, c))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.source[self.current_pos..].chars();
        iter.next();
        iter.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn mark_start(&mut self) {
        self.start_pos = self.current_pos;
        self.start_line = self.line;
        self.start_column = self.column;
    }

    fn current_span(&self) -> Span {
        Span::new(
            self.base + self.start_pos,
            self.base + self.current_pos,
            self.start_line,
            self.start_column,
        )
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.current_span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scan(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn scan_err(source: &str) -> LexerError {
        Scanner::new(source).scan_tokens().unwrap_err()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            scan("(){}[];"),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            scan("42 3.14 0xFF 0b101"),
            vec![
                TokenKind::IntLiteral(42),
                TokenKind::FloatLiteral(3.14),
                TokenKind::HexLiteral(255),
                TokenKind::BinaryLiteral(5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_followed_by_dot_is_not_float() {
        assert_eq!(
            scan("1.x"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::Dot,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_negative_literal_folding() {
        assert_eq!(
            scan("-5 x = -2 a - 1 (-0x10)"),
            vec![
                TokenKind::IntLiteral(-5),
                TokenKind::Identifier("x".to_string()),
                TokenKind::Equal,
                TokenKind::IntLiteral(-2),
                TokenKind::Identifier("a".to_string()),
                TokenKind::Minus,
                TokenKind::IntLiteral(1),
                TokenKind::LeftParen,
                TokenKind::HexLiteral(-16),
                TokenKind::RightParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dead_and_risen_are_numbers() {
        assert_eq!(
            scan("DEAD RISEN"),
            vec![
                TokenKind::IntLiteral(0),
                TokenKind::IntLiteral(1),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(matches!(scan_err("0x"), LexerError::InvalidNumber(..)));
        assert!(matches!(
            scan_err("99999999999999999999"),
            LexerError::InvalidNumber(..)
        ));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            scan(r#""a\tb\n\"q\" \u0041 \z""#),
            vec![
                TokenKind::StringLiteral("a\tb\n\"q\" A z".to_string()),
                TokenKind::Eof
            ]
        );
        assert_eq!(
            scan("'single \"ok\"'"),
            vec![
                TokenKind::StringLiteral("single \"ok\"".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_invalid_unicode_escape() {
        assert!(matches!(
            scan_err(r#""\u00G1""#),
            LexerError::InvalidUnicodeEscape(_)
        ));
    }

    #[test]
    fn test_raw_string() {
        assert_eq!(
            scan(r#"r"C:\new#{x}""#),
            vec![
                TokenKind::StringLiteral(r"C:\new#{x}".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unclosed_string() {
        assert!(matches!(
            scan_err("\"never ends"),
            LexerError::UnterminatedString(_)
        ));
    }

    #[test]
    fn test_interpolated_string() {
        let kinds = scan(r#""sum: #{a + 1}!""#);
        let TokenKind::InterpolatedString(parts) = &kinds[0] else {
            panic!("Expected interpolated string, got {:?}", kinds[0]);
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], StringPart::Literal("sum: ".to_string()));
        let StringPart::Expr(tokens) = &parts[1] else {
            panic!("Expected expression part");
        };
        let inner: Vec<TokenKind> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            inner,
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Plus,
                TokenKind::IntLiteral(1),
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[0].span.start, 8);
        assert_eq!(parts[2], StringPart::Literal("!".to_string()));
    }

    #[test]
    fn test_interpolation_tracks_nested_braces() {
        let kinds = scan(r##""#{ {"k": "}"} }""##);
        assert!(matches!(kinds[0], TokenKind::InterpolatedString(_)));
        assert!(matches!(
            scan_err(r##""#{ never closed""##),
            LexerError::UnclosedInterpolation(_)
        ));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            scan("corpse infect shamble decay soulless otherwise"),
            vec![
                TokenKind::Corpse,
                TokenKind::Infect,
                TokenKind::Shamble,
                TokenKind::Decay,
                TokenKind::Soulless,
                TokenKind::Otherwise,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            scan("== != <= >= += -= *= /= %= -> =>"),
            vec![
                TokenKind::EqualEqual,
                TokenKind::BangEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::PlusEqual,
                TokenKind::MinusEqual,
                TokenKind::StarEqual,
                TokenKind::SlashEqual,
                TokenKind::PercentEqual,
                TokenKind::Arrow,
                TokenKind::FatArrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_newlines() {
        assert_eq!(
            scan("a # trailing\n## block\nstill ## b"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Newline,
                TokenKind::Identifier("b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unclosed_comment() {
        assert!(matches!(
            scan_err("## open forever"),
            LexerError::UnclosedComment(_)
        ));
    }

    #[test]
    fn test_line_tracking() {
        let tokens = Scanner::new("a\n  b").scan_tokens().unwrap();
        assert_eq!(tokens[2].span.line, 2);
        assert_eq!(tokens[2].span.column, 3);
    }
}
