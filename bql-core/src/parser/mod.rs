//! BQL parser module
//!
//! Recursive-descent parser that turns a script into an ordered list of
//! [`Command`]s. Tokens are pulled lazily from the [`Lexer`] through a
//! two-token lookahead buffer; the first error stops parsing and no partial
//! command list is returned.
//!
//! - `registry.rs`: `(prefix, keyword)` → parse function table with aliases
//! - `commands.rs`: server, user and filesystem command parsers
//! - `query.rs`: `select`, `set`, `unset` and the `where` clause
//! - `values.rs`: literal values, arrays and JSON objects

mod commands;
mod query;
mod registry;
mod values;

#[cfg(test)]
mod tests;

pub use registry::{ParseEntry, ParseFn, ParseRegistry, Prefix};

use crate::command::Command;
use crate::error::{BqlError, BqlResult};
use crate::lexer::{Lexer, Spanned, Token};
use std::collections::{BTreeMap, VecDeque};

/// Per-command scratch state handed to every parse function.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Canonical command name, also used as the context in error messages.
    pub name: String,
    pub database: String,
    pub options: BTreeMap<String, String>,
}

pub struct Parser {
    lexer: Lexer,
    lookahead: VecDeque<Spanned>,
    last_line: usize,
    registry: ParseRegistry,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        Self::with_registry(input, ParseRegistry::standard())
    }

    pub fn with_registry(input: &str, registry: ParseRegistry) -> Self {
        Self {
            lexer: Lexer::new(input),
            lookahead: VecDeque::with_capacity(2),
            last_line: 1,
            registry,
        }
    }

    /// Parse a complete script.
    pub fn parse(input: &str) -> BqlResult<Vec<Command>> {
        Parser::new(input).parse_script()
    }

    fn fill(&mut self, count: usize) -> BqlResult<()> {
        while self.lookahead.len() < count {
            let spanned = self.lexer.next_token()?;
            self.lookahead.push_back(spanned);
        }
        Ok(())
    }

    pub(crate) fn peek(&mut self) -> BqlResult<&Token> {
        self.fill(1)?;
        Ok(&self.lookahead[0].token)
    }

    pub(crate) fn peek_second(&mut self) -> BqlResult<&Token> {
        self.fill(2)?;
        Ok(&self.lookahead[1].token)
    }

    pub(crate) fn advance(&mut self) -> BqlResult<Token> {
        self.fill(1)?;
        match self.lookahead.pop_front() {
            Some(spanned) => {
                self.last_line = spanned.line;
                Ok(spanned.token)
            }
            None => Ok(Token::Eof),
        }
    }

    fn line(&self) -> usize {
        self.lookahead
            .front()
            .map(|s| s.line)
            .unwrap_or(self.last_line)
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> BqlError {
        BqlError::Parse {
            line: self.line(),
            message: message.into(),
        }
    }

    pub(crate) fn expect(&mut self, expected: Token, ctx: &str) -> BqlResult<()> {
        let token = self.advance()?;
        if token != expected {
            return Err(self.error(format!(
                "expected {} in {}; got {}",
                expected.kind(),
                ctx,
                token
            )));
        }
        Ok(())
    }

    pub(crate) fn expect_string(&mut self, ctx: &str) -> BqlResult<String> {
        match self.advance()? {
            Token::String(s) => Ok(s),
            other => Err(self.error(format!("expected string in {}; got {}", ctx, other))),
        }
    }

    pub(crate) fn expect_path(&mut self, ctx: &str) -> BqlResult<String> {
        match self.advance()? {
            Token::Path(p) => Ok(p),
            other => Err(self.error(format!("expected path in {}; got {}", ctx, other))),
        }
    }

    pub(crate) fn expect_identifier(&mut self, ctx: &str) -> BqlResult<String> {
        match self.advance()? {
            Token::Identifier(s) => Ok(s),
            other => Err(self.error(format!(
                "expected identifier in {}; got {}",
                ctx, other
            ))),
        }
    }

    pub(crate) fn expect_integer(&mut self, ctx: &str) -> BqlResult<i64> {
        match self.advance()? {
            Token::Integer(n) => Ok(n),
            Token::Float(_) => Err(self.error(format!("{} requires an integer value", ctx))),
            other => Err(self.error(format!("expected number in {}; got {}", ctx, other))),
        }
    }

    /// Consumes the `in` keyword that separates fields from paths.
    pub(crate) fn expect_in(&mut self, ctx: &str) -> BqlResult<()> {
        let word = self.expect_identifier(ctx)?;
        if !word.eq_ignore_ascii_case("in") {
            return Err(self.error(format!("Invalid {}, expecting 'In statement'.", ctx)));
        }
        Ok(())
    }

    /// Reads zero or more consecutive path tokens.
    pub(crate) fn parse_paths(&mut self) -> BqlResult<Vec<String>> {
        let mut paths = Vec::new();
        while matches!(self.peek()?, Token::Path(_)) {
            if let Token::Path(p) = self.advance()? {
                paths.push(p);
            }
        }
        Ok(paths)
    }

    /// `--name[=value]`
    pub(crate) fn parse_option(&mut self, ctx: &str) -> BqlResult<(String, String)> {
        self.expect(Token::Argument, ctx)?;
        let name = self.expect_identifier(ctx)?;
        let mut value = String::new();
        if *self.peek()? == Token::Assign {
            self.advance()?;
            value = match self.advance()? {
                Token::String(s) => s,
                Token::Integer(n) => n.to_string(),
                Token::Float(f) => f.to_string(),
                other => {
                    return Err(self.error(format!(
                        "expected string or number in {}; got {}",
                        ctx, other
                    )))
                }
            };
        }
        Ok((name, value))
    }

    /// Optional `--regex="..."`, the only option accepted by listing commands.
    pub(crate) fn parse_regex_option(
        &mut self,
        ctx: &mut CommandContext,
    ) -> BqlResult<Option<String>> {
        if *self.peek()? != Token::Argument {
            return Ok(None);
        }
        let (name, value) = self.parse_option(&ctx.name)?;
        if name != "regex" || value.is_empty() {
            return Err(self.error(format!("Invalid option {} in {}", name, ctx.name)));
        }
        ctx.options.insert(name, value.clone());
        Ok(Some(value))
    }

    /// Optional integer option such as `--duration=30`.
    pub(crate) fn parse_int_option(
        &mut self,
        ctx: &mut CommandContext,
        expected: &str,
    ) -> BqlResult<Option<i64>> {
        if *self.peek()? != Token::Argument {
            return Ok(None);
        }
        let (name, value) = self.parse_option(&ctx.name)?;
        if name != expected {
            return Err(self.error(format!("Invalid option {} in {}", name, ctx.name)));
        }
        let number = value.parse::<i64>().map_err(|_| {
            self.error(format!(
                "Invalid integer value for argument {} in {}",
                name, ctx.name
            ))
        })?;
        ctx.options.insert(name, value);
        Ok(Some(number))
    }

    /// Optional `>> filter` followed by `;` or end of input.
    fn parse_end_of_command(&mut self, ctx: &str) -> BqlResult<Option<String>> {
        let mut filter = None;
        if *self.peek()? == Token::SendTo {
            self.advance()?;
            filter = Some(self.expect_identifier("Result assignment")?);
        }
        match self.peek()?.clone() {
            Token::Eof => Ok(filter),
            Token::Semicolon => {
                self.advance()?;
                Ok(filter)
            }
            other => Err(self.error(format!(
                "expected ';' or EOF in {}; got {}",
                ctx, other
            ))),
        }
    }

    fn dispatch(&mut self, prefix: Prefix, keyword: &str, database: String) -> BqlResult<Command> {
        let entry = match self.registry.lookup(prefix, keyword) {
            Some(entry) => entry,
            None => {
                return Err(match prefix {
                    Prefix::Database => self.error(format!(
                        "Invalid command database command '{}'",
                        keyword
                    )),
                    _ => self.error(format!(
                        "{}.{} parse function not found",
                        prefix.as_str(),
                        keyword
                    )),
                })
            }
        };

        let mut ctx = CommandContext {
            name: entry.name.to_string(),
            database,
            options: BTreeMap::new(),
        };
        let action = (entry.parse)(self, &mut ctx)?;
        let filter = self.parse_end_of_command(&ctx.name)?;

        Ok(Command {
            name: ctx.name,
            database: ctx.database,
            action,
            options: ctx.options,
            filter,
            is_admin: entry.admin,
        })
    }

    /// Parse every statement until end of input.
    pub fn parse_script(&mut self) -> BqlResult<Vec<Command>> {
        let mut commands = Vec::new();

        loop {
            match self.peek()?.clone() {
                Token::Eof => break,
                Token::Identifier(word) => {
                    let prefix_word = word.to_lowercase();
                    match prefix_word.as_str() {
                        "server" | "user" => {
                            self.advance()?;
                            self.expect(Token::Dot, &prefix_word)?;
                            let keyword = self.expect_identifier(&prefix_word)?.to_lowercase();
                            let prefix = if prefix_word == "server" {
                                Prefix::Server
                            } else {
                                Prefix::User
                            };
                            commands.push(self.dispatch(prefix, &keyword, String::new())?);
                        }
                        "login" | "whoami" => {
                            self.advance()?;
                            commands.push(self.dispatch(Prefix::Bare, &prefix_word, String::new())?);
                        }
                        _ => {
                            return Err(
                                self.error(format!("Invalid command prefix '{}'", prefix_word))
                            )
                        }
                    }
                }
                Token::Database(database) => {
                    self.advance()?;
                    self.expect(Token::Dot, "database")?;
                    let keyword = self.expect_identifier("database")?.to_lowercase();
                    commands.push(self.dispatch(Prefix::Database, &keyword, database)?);
                }
                _ => {
                    // Stray tokens between statements (e.g. repeated ';') are skipped
                    self.advance()?;
                }
            }
        }

        Ok(commands)
    }
}

/// Parse a BQL script into commands.
pub fn parse(input: &str) -> BqlResult<Vec<Command>> {
    Parser::parse(input)
}
