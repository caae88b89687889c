use crate::error::{BqlError, BqlResult};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Identifiers and literals
    Identifier(String),
    Database(String), // @name
    Path(String),     // /a/b.json
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,

    // Operators
    Assign,      // =
    Equal,       // ==
    NotEqual,    // !=
    LessThan,    // <
    LessThanEq,  // <=
    GreaterThan, // >
    GreaterThanEq,
    SendTo,      // >>
    Argument,    // --
    PlusAssign,  // +=
    MinusAssign, // -=

    // Delimiters
    Semicolon,
    Dot,
    Colon,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,

    // Special
    Eof,
}

impl Token {
    /// Short category name used in parser diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Token::Identifier(_) => "identifier",
            Token::Database(_) => "database",
            Token::Path(_) => "path",
            Token::String(_) => "string",
            Token::Integer(_) | Token::Float(_) => "number",
            Token::Bool(_) => "bool",
            Token::Null => "null",
            Token::Assign => "'='",
            Token::Equal => "'=='",
            Token::NotEqual => "'!='",
            Token::LessThan => "'<'",
            Token::LessThanEq => "'<='",
            Token::GreaterThan => "'>'",
            Token::GreaterThanEq => "'>='",
            Token::SendTo => "'>>'",
            Token::Argument => "'--'",
            Token::PlusAssign => "'+='",
            Token::MinusAssign => "'-='",
            Token::Semicolon => "';'",
            Token::Dot => "'.'",
            Token::Colon => "':'",
            Token::Comma => "','",
            Token::LeftParen => "'('",
            Token::RightParen => "')'",
            Token::LeftBracket => "'['",
            Token::RightBracket => "']'",
            Token::LeftBrace => "'{'",
            Token::RightBrace => "'}'",
            Token::Eof => "EOF",
        }
    }

    /// Case-insensitive keyword test for identifier tokens.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Identifier(ident) if ident.eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{}'", s),
            Token::Database(s) => write!(f, "database '@{}'", s),
            Token::Path(s) => write!(f, "path '{}'", s),
            Token::String(s) => write!(f, "string \"{}\"", s),
            Token::Integer(n) => write!(f, "number {}", n),
            Token::Float(n) => write!(f, "number {}", n),
            Token::Bool(b) => write!(f, "bool {}", b),
            other => f.write_str(other.kind()),
        }
    }
}

/// A token together with the 1-based line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
    line: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
            line: 1,
        }
    }

    /// Line of the character under the cursor.
    pub fn line(&self) -> usize {
        self.line
    }

    fn advance(&mut self) {
        if self.current_char == Some('\n') {
            self.line += 1;
        }
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn error(&self, message: impl Into<String>) -> BqlError {
        BqlError::Lex {
            line: self.line,
            message: message.into(),
        }
    }

    /// Skips whitespace and `/* ... */` comments.
    fn skip_ignored(&mut self) -> BqlResult<()> {
        loop {
            match self.current_char {
                Some(ch) if ch.is_whitespace() => self.advance(),
                Some('/') if self.peek_char() == Some('*') => {
                    let start_line = self.line;
                    self.advance();
                    self.advance();
                    loop {
                        match self.current_char {
                            None => {
                                return Err(BqlError::Lex {
                                    line: start_line,
                                    message: "unclosed comment".to_string(),
                                })
                            }
                            Some('*') if self.peek_char() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(ch) = self.current_char {
            if !accept(ch) {
                break;
            }
            out.push(ch);
            self.advance();
        }
        out
    }

    fn read_number(&mut self) -> BqlResult<Token> {
        let mut text = String::new();
        let mut negative = false;
        if let Some(sign @ ('+' | '-')) = self.current_char {
            negative = sign == '-';
            text.push(sign);
            self.advance();
        }

        if self.current_char == Some('0') && matches!(self.peek_char(), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let digits = self.read_while(|c| c.is_ascii_hexdigit());
            text.push_str("0x");
            text.push_str(&digits);
            self.check_number_end(&text)?;
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| self.error(format!("bad number syntax: {}", text)))?;
            return Ok(Token::Integer(if negative { -value } else { value }));
        }

        let integral = self.read_while(|c| c.is_ascii_digit());
        text.push_str(&integral);
        let mut is_float = false;
        let mut fraction = String::new();

        if self.current_char == Some('.') {
            is_float = true;
            text.push('.');
            self.advance();
            fraction = self.read_while(|c| c.is_ascii_digit());
            text.push_str(&fraction);
        }

        if integral.is_empty() && fraction.is_empty() {
            let trailing = self.current_char.map(String::from).unwrap_or_default();
            return Err(self.error(format!("bad number syntax: {}{}", text, trailing)));
        }

        if matches!(self.current_char, Some('e') | Some('E')) {
            is_float = true;
            text.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.current_char {
                text.push(sign);
                self.advance();
            }
            let exponent = self.read_while(|c| c.is_ascii_digit());
            if exponent.is_empty() {
                return Err(self.error(format!("bad number syntax: {}", text)));
            }
            text.push_str(&exponent);
        }

        self.check_number_end(&text)?;

        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(format!("bad number syntax: {}", text)))
        } else {
            match text.parse::<i64>() {
                Ok(n) => Ok(Token::Integer(n)),
                // Out of i64 range, keep it as a float like any JSON number
                Err(_) => text
                    .parse::<f64>()
                    .map(Token::Float)
                    .map_err(|_| self.error(format!("bad number syntax: {}", text))),
            }
        }
    }

    fn check_number_end(&self, text: &str) -> BqlResult<()> {
        match self.current_char {
            Some(ch) if ch.is_alphanumeric() => {
                Err(self.error(format!("bad number syntax: {}{}", text, ch)))
            }
            _ => Ok(()),
        }
    }

    fn read_string(&mut self) -> BqlResult<Token> {
        let quote = self.current_char.unwrap_or('"');
        self.advance(); // Skip opening quote

        let mut string = String::new();

        loop {
            match self.current_char {
                None | Some('\n') => return Err(self.error("unterminated quoted string")),
                Some(ch) if ch == quote => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\\') => {
                    self.advance();
                    match self.current_char {
                        None | Some('\n') => {
                            return Err(self.error("unterminated quoted string"))
                        }
                        Some('u') => {
                            self.advance();
                            self.read_unicode_escape(&mut string);
                            continue;
                        }
                        Some(escaped) => {
                            match escaped {
                                'n' => string.push('\n'),
                                't' => string.push('\t'),
                                'r' => string.push('\r'),
                                'b' => string.push('\u{8}'),
                                'f' => string.push('\u{c}'),
                                'v' => string.push('\u{b}'),
                                'a' => string.push('\u{7}'),
                                '0' => string.push('\0'),
                                '\\' | '"' | '\'' | '/' => string.push(escaped),
                                // Unknown escapes are kept as written so regex classes survive
                                other => {
                                    string.push('\\');
                                    string.push(other);
                                }
                            }
                            self.advance();
                        }
                    }
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_unicode_escape(&mut self, out: &mut String) {
        let mut digits = String::new();
        while digits.len() < 4 {
            match self.current_char {
                Some(c) if c.is_ascii_hexdigit() => {
                    digits.push(c);
                    self.advance();
                }
                _ => break,
            }
        }
        match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
            Some(ch) if digits.len() == 4 => out.push(ch),
            _ => {
                out.push_str("\\u");
                out.push_str(&digits);
            }
        }
    }

    fn read_path(&mut self) -> Token {
        let path = self.read_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'));
        Token::Path(path)
    }

    fn read_database(&mut self) -> BqlResult<Token> {
        self.advance(); // Skip '@'
        match self.current_char {
            Some(ch) if ch.is_alphabetic() => {}
            _ => return Err(self.error("database name must start with a letter")),
        }
        let name = self.read_while(|c| c.is_alphanumeric() || c == '_');
        Ok(Token::Database(name))
    }

    fn read_identifier(&mut self) -> Token {
        let ident = self.read_while(|c| c.is_alphanumeric() || c == '_');

        match ident.to_lowercase().as_str() {
            "null" => Token::Null,
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            _ => Token::Identifier(ident),
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    pub fn next_token(&mut self) -> BqlResult<Spanned> {
        self.skip_ignored()?;
        let line = self.line;

        let token = match self.current_char {
            None => Token::Eof,
            Some('@') => self.read_database()?,
            Some('/') => self.read_path(),
            Some('"') | Some('\'') => self.read_string()?,
            Some('<') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(Token::LessThanEq)
                } else {
                    Token::LessThan
                }
            }
            Some('>') => {
                self.advance();
                match self.current_char {
                    Some('=') => self.single(Token::GreaterThanEq),
                    Some('>') => self.single(Token::SendTo),
                    _ => Token::GreaterThan,
                }
            }
            Some('!') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(Token::NotEqual)
                } else {
                    return Err(self.error("expected !="));
                }
            }
            Some('=') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(Token::Equal)
                } else {
                    Token::Assign
                }
            }
            Some('+') if self.peek_char() == Some('=') => {
                self.advance();
                self.single(Token::PlusAssign)
            }
            Some('-') if self.peek_char() == Some('=') => {
                self.advance();
                self.single(Token::MinusAssign)
            }
            Some('-') if self.peek_char() == Some('-') => {
                self.advance();
                self.single(Token::Argument)
            }
            Some('+') | Some('-') => self.read_number()?,
            Some(ch) if ch.is_ascii_digit() => self.read_number()?,
            Some(ch) if ch.is_alphabetic() || ch == '_' => self.read_identifier(),
            Some(';') => self.single(Token::Semicolon),
            Some('.') => self.single(Token::Dot),
            Some(':') => self.single(Token::Colon),
            Some(',') => self.single(Token::Comma),
            Some('(') => self.single(Token::LeftParen),
            Some(')') => self.single(Token::RightParen),
            Some('[') => self.single(Token::LeftBracket),
            Some(']') => self.single(Token::RightBracket),
            Some('{') => self.single(Token::LeftBrace),
            Some('}') => self.single(Token::RightBrace),
            Some(ch) => return Err(self.error(format!("unrecognized character '{}'", ch))),
        };

        Ok(Spanned { token, line })
    }

    pub fn tokenize(&mut self) -> BqlResult<Vec<Spanned>> {
        let mut tokens = Vec::new();

        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                break;
            }
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    fn lex_error(input: &str) -> BqlError {
        Lexer::new(input).tokenize().unwrap_err()
    }

    #[test]
    fn test_command_prefix() {
        let tokens = tokenize("server.listdb;");
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("server".to_string()),
                Token::Dot,
                Token::Identifier("listdb".to_string()),
                Token::Semicolon,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_database_marker() {
        let tokens = tokenize("@test_db1.newdir /a");
        assert_eq!(tokens[0], Token::Database("test_db1".to_string()));
        assert_eq!(tokens[1], Token::Dot);
        assert_eq!(tokens[3], Token::Path("/a".to_string()));
    }

    #[test]
    fn test_bad_database_marker() {
        assert!(matches!(lex_error("@1db.ls /"), BqlError::Lex { .. }));
    }

    #[test]
    fn test_paths() {
        assert_eq!(tokenize("/")[0], Token::Path("/".to_string()));
        assert_eq!(
            tokenize("/var/www/index-v2.html")[0],
            Token::Path("/var/www/index-v2.html".to_string())
        );
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = tokenize("/* create */ @db.mkdir /* the dir */ /a");
        assert_eq!(tokens[0], Token::Database("db".to_string()));
        assert_eq!(tokens[3], Token::Path("/a".to_string()));
    }

    #[test]
    fn test_unclosed_comment() {
        let err = lex_error("@db.ls / /* never closed");
        assert_eq!(err.to_string(), "line[1]: Parsing error: unclosed comment");
    }

    #[test]
    fn test_comparison_operators() {
        let tokens = tokenize("== != < <= > >= >> =");
        assert_eq!(
            tokens[..8],
            [
                Token::Equal,
                Token::NotEqual,
                Token::LessThan,
                Token::LessThanEq,
                Token::GreaterThan,
                Token::GreaterThanEq,
                Token::SendTo,
                Token::Assign,
            ]
        );
    }

    #[test]
    fn test_bang_requires_equal() {
        let err = lex_error("\"a\" ! \"b\"");
        assert!(err.to_string().contains("expected !="));
    }

    #[test]
    fn test_plus_minus_forms() {
        let tokens = tokenize("+= -= --regex -5 +3");
        assert_eq!(tokens[0], Token::PlusAssign);
        assert_eq!(tokens[1], Token::MinusAssign);
        assert_eq!(tokens[2], Token::Argument);
        assert_eq!(tokens[3], Token::Identifier("regex".to_string()));
        assert_eq!(tokens[4], Token::Integer(-5));
        assert_eq!(tokens[5], Token::Integer(3));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokenize("42")[0], Token::Integer(42));
        assert_eq!(tokenize("0x1F")[0], Token::Integer(31));
        assert_eq!(tokenize("3.25")[0], Token::Float(3.25));
        assert_eq!(tokenize("1e3")[0], Token::Float(1000.0));
        assert_eq!(tokenize("-2.5E-1")[0], Token::Float(-0.25));
    }

    #[test]
    fn test_bad_number() {
        let err = lex_error("12abc");
        assert!(err.to_string().contains("bad number syntax"));
        assert!(lex_error("- 4").to_string().contains("bad number syntax"));
    }

    #[test]
    fn test_strings() {
        assert_eq!(tokenize("\"hello\"")[0], Token::String("hello".to_string()));
        assert_eq!(tokenize("'hello'")[0], Token::String("hello".to_string()));
        assert_eq!(
            tokenize(r#""say \"hi\"\n""#)[0],
            Token::String("say \"hi\"\n".to_string())
        );
        assert_eq!(tokenize(r#""^\w""#)[0], Token::String("^\\w".to_string()));
        assert_eq!(tokenize(r#""é""#)[0], Token::String("é".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(lex_error("\"abc").to_string().contains("unterminated quoted string"));
        assert!(lex_error("\"abc\ndef\"")
            .to_string()
            .contains("unterminated quoted string"));
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(tokenize("TRUE")[0], Token::Bool(true));
        assert_eq!(tokenize("False")[0], Token::Bool(false));
        assert_eq!(tokenize("NULL")[0], Token::Null);
        assert_eq!(tokenize("Where")[0], Token::Identifier("Where".to_string()));
        assert!(tokenize("Where")[0].is_keyword("where"));
    }

    #[test]
    fn test_unrecognized_character() {
        let err = lex_error("@db.ls / #");
        assert!(err.to_string().contains("unrecognized character '#'"));
    }

    #[test]
    fn test_line_numbers() {
        let spans = Lexer::new("server.init;\n\n@db.ls /").tokenize().unwrap();
        assert_eq!(spans[0].line, 1);
        assert_eq!(spans[4].token, Token::Database("db".to_string()));
        assert_eq!(spans[4].line, 3);
    }

    #[test]
    fn test_delimiters() {
        let tokens = tokenize("( ) [ ] { } , : ;");
        assert_eq!(
            tokens[..9],
            [
                Token::LeftParen,
                Token::RightParen,
                Token::LeftBracket,
                Token::RightBracket,
                Token::LeftBrace,
                Token::RightBrace,
                Token::Comma,
                Token::Colon,
                Token::Semicolon,
            ]
        );
    }
}
