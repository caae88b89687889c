//! Literal values: strings, numbers, booleans, null, arrays and JSON objects.

use super::Parser;
use crate::error::BqlResult;
use crate::lexer::Token;
use serde_json::{Map, Number, Value};

impl Parser {
    /// Numbers are always stored as JSON floats.
    pub(crate) fn number_value(&self, number: f64, ctx: &str) -> BqlResult<Value> {
        Number::from_f64(number)
            .map(Value::Number)
            .ok_or_else(|| self.error(format!("Invalid numerical value in {}", ctx)))
    }

    /// Any literal accepted on the right-hand side of an assignment or comparison.
    pub(crate) fn parse_value(&mut self, ctx: &str) -> BqlResult<Value> {
        match self.peek()?.clone() {
            Token::String(s) => {
                self.advance()?;
                Ok(Value::String(s))
            }
            Token::Bool(b) => {
                self.advance()?;
                Ok(Value::Bool(b))
            }
            Token::Null => {
                self.advance()?;
                Ok(Value::Null)
            }
            Token::Integer(n) => {
                self.advance()?;
                Ok(Value::from(n))
            }
            Token::Float(f) => {
                self.advance()?;
                self.number_value(f, ctx)
            }
            Token::LeftBracket => self.parse_array(ctx).map(Value::Array),
            Token::LeftBrace => self.parse_json(ctx).map(Value::Object),
            _ => Err(self.error(format!("Invalid field value for {}", ctx))),
        }
    }

    /// `[v, v, ...]`, nested arrays and objects allowed; a trailing comma is rejected.
    pub(crate) fn parse_array(&mut self, ctx: &str) -> BqlResult<Vec<Value>> {
        self.expect(Token::LeftBracket, ctx)?;
        let mut items = Vec::new();

        loop {
            match self.peek()?.clone() {
                Token::String(_)
                | Token::Bool(_)
                | Token::Null
                | Token::Integer(_)
                | Token::Float(_)
                | Token::LeftBracket
                | Token::LeftBrace => items.push(self.parse_value(ctx)?),
                Token::Comma => {
                    self.advance()?;
                    if *self.peek()? == Token::RightBracket {
                        return Err(self.error(format!("Trailing comma ',' in {}", ctx)));
                    }
                }
                Token::RightBracket => {
                    self.advance()?;
                    break;
                }
                other => {
                    return Err(self.error(format!("Invalid value: {} in {}", other, ctx)));
                }
            }
        }

        Ok(items)
    }

    /// Accumulates the brace-balanced token run and validates it as a JSON object.
    pub(crate) fn parse_json(&mut self, ctx: &str) -> BqlResult<Map<String, Value>> {
        let mut depth = 0usize;
        let mut text = String::new();

        loop {
            let token = self.advance()?;
            match token {
                Token::LeftBrace => {
                    depth += 1;
                    text.push('{');
                }
                Token::RightBrace => {
                    depth = depth.saturating_sub(1);
                    text.push('}');
                    if depth == 0 {
                        break;
                    }
                }
                Token::Eof | Token::Semicolon => {
                    return Err(self.error(format!("Invalid json object in {}", ctx)));
                }
                other => text.push_str(&json_text(&other)),
            }
        }

        serde_json::from_str::<Map<String, Value>>(&text)
            .map_err(|_| self.error(format!("Invalid json object in {}", ctx)))
    }
}

/// Source text of a token as it should appear inside a JSON document.
fn json_text(token: &Token) -> String {
    match token {
        Token::String(s) => Value::String(s.clone()).to_string(),
        Token::Integer(n) => n.to_string(),
        Token::Float(f) => f.to_string(),
        Token::Bool(b) => b.to_string(),
        Token::Null => "null".to_string(),
        Token::Colon => ":".to_string(),
        Token::Comma => ",".to_string(),
        Token::LeftBracket => "[".to_string(),
        Token::RightBracket => "]".to_string(),
        Token::Identifier(s) | Token::Path(s) => s.clone(),
        // Anything else cannot appear in JSON and fails validation
        other => format!(" {} ", other.kind()),
    }
}
