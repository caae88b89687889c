//! Server, user and filesystem command parsers.

use super::{CommandContext, Parser};
use crate::command::{Action, CounterAction};
use crate::error::BqlResult;
use crate::lexer::Token;

impl Parser {
    fn parse_grant(&mut self, ctx: &str) -> BqlResult<bool> {
        let word = self.expect_identifier(ctx)?;
        match word.as_str() {
            "grant" => Ok(true),
            "deny" => Ok(false),
            _ => Err(self.error(format!("Invalid identifier {} in {}", word, ctx))),
        }
    }

    pub(crate) fn parse_login(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let username = self.expect_string(&ctx.name)?;
        let password = self.expect_string(&ctx.name)?;
        let duration = self.parse_int_option(ctx, "duration")?;
        Ok(Action::Login {
            username,
            password,
            duration,
        })
    }

    pub(crate) fn parse_whoami(&mut self, _ctx: &mut CommandContext) -> BqlResult<Action> {
        Ok(Action::Whoami)
    }

    pub(crate) fn parse_list_databases(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let regex = self.parse_regex_option(ctx)?;
        Ok(Action::ListDatabases { regex })
    }

    pub(crate) fn parse_new_database(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let database = self.expect_string(&ctx.name)?;
        Ok(Action::NewDatabase { database })
    }

    pub(crate) fn parse_server_init(&mut self, _ctx: &mut CommandContext) -> BqlResult<Action> {
        Ok(Action::InitServer)
    }

    pub(crate) fn parse_drop_database(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let database = self.expect_string(&ctx.name)?;
        Ok(Action::DropDatabase { database })
    }

    pub(crate) fn parse_new_user(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let username = self.expect_string(&ctx.name)?;
        let password = self.expect_string(&ctx.name)?;
        Ok(Action::NewUser { username, password })
    }

    pub(crate) fn parse_list_users(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let regex = self.parse_regex_option(ctx)?;
        Ok(Action::ListUsers { regex })
    }

    pub(crate) fn parse_user_info(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let username = self.expect_string(&ctx.name)?;
        Ok(Action::UserInfo { username })
    }

    pub(crate) fn parse_delete_user(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let username = self.expect_string(&ctx.name)?;
        Ok(Action::DeleteUser { username })
    }

    pub(crate) fn parse_change_password(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let username = self.expect_string(&ctx.name)?;
        let password = self.expect_string(&ctx.name)?;
        Ok(Action::ChangePassword { username, password })
    }

    pub(crate) fn parse_user_access(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let username = self.expect_string(&ctx.name)?;
        let grant = self.parse_grant(&ctx.name)?;
        Ok(Action::UserAccess { username, grant })
    }

    pub(crate) fn parse_user_database_access(
        &mut self,
        ctx: &mut CommandContext,
    ) -> BqlResult<Action> {
        let username = self.expect_string(&ctx.name)?;
        let database = self.expect_string(&ctx.name)?;
        let grant = self.parse_grant(&ctx.name)?;
        Ok(Action::UserDatabaseAccess {
            username,
            database,
            grant,
        })
    }

    pub(crate) fn parse_new_directory(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        Ok(Action::NewDir { path })
    }

    pub(crate) fn parse_new_file(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        if *self.peek()? != Token::LeftBrace {
            return Err(self.error(format!("Expecting a JSON object in {}", ctx.name)));
        }
        let content = self.parse_json(&ctx.name)?;
        Ok(Action::NewFile { path, content })
    }

    pub(crate) fn parse_list_directory(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        let regex = self.parse_regex_option(ctx)?;
        Ok(Action::ListDir { path, regex })
    }

    pub(crate) fn parse_rename(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        let name = self.expect_string(&ctx.name)?;
        Ok(Action::Rename { path, name })
    }

    fn parse_transfer(&mut self, ctx: &CommandContext) -> BqlResult<(String, String, Option<String>)> {
        let path = self.expect_path(&ctx.name)?;
        let to = self.expect_path(&ctx.name)?;
        let rename = if matches!(self.peek()?, Token::String(_)) {
            Some(self.expect_string(&ctx.name)?)
        } else {
            None
        };
        Ok((path, to, rename))
    }

    pub(crate) fn parse_move(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let (path, to, rename) = self.parse_transfer(ctx)?;
        Ok(Action::Move { path, to, rename })
    }

    pub(crate) fn parse_copy(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let (path, to, rename) = self.parse_transfer(ctx)?;
        Ok(Action::Copy { path, to, rename })
    }

    pub(crate) fn parse_delete(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        Ok(Action::Delete { path })
    }

    pub(crate) fn parse_info(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        Ok(Action::Info { path })
    }

    pub(crate) fn parse_make_public(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        Ok(Action::MakePublic { path })
    }

    pub(crate) fn parse_make_private(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        Ok(Action::MakePrivate { path })
    }

    /// `readfile /p ["f1", "f2"]`
    pub(crate) fn parse_read_file(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        let mut fields = Vec::new();
        if *self.peek()? == Token::LeftBracket {
            self.advance()?;
            loop {
                match self.advance()? {
                    Token::String(field) => fields.push(field),
                    Token::Comma => {
                        if *self.peek()? == Token::RightBracket {
                            return Err(self.error(format!(
                                "Trailing comma ',' in {} Array definition.",
                                ctx.name
                            )));
                        }
                    }
                    Token::RightBracket => break,
                    other => {
                        return Err(self.error(format!(
                            "Invalid value: {} in {} Array definition.",
                            other, ctx.name
                        )))
                    }
                }
            }
        }
        Ok(Action::ReadFile { path, fields })
    }

    pub(crate) fn parse_update_file(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        if *self.peek()? != Token::LeftBrace {
            return Err(self.error(format!("Expecting a JSON object in {}", ctx.name)));
        }
        let content = self.parse_json(&ctx.name)?;
        Ok(Action::UpdateFile { path, content })
    }

    pub(crate) fn parse_delete_bytes(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        Ok(Action::DeleteBytes { path })
    }

    /// `uploadticket /p [--duration=N]`
    pub(crate) fn parse_upload_ticket(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let path = self.expect_path(&ctx.name)?;
        let duration = self.parse_int_option(ctx, "duration")?;
        Ok(Action::UploadTicket { path, duration })
    }

    /// `counter "name" incr|decr|reset N` or `counter list [--regex=".."]`
    pub(crate) fn parse_counter(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let name = match self.advance()? {
            Token::Identifier(word) if word == "list" => {
                let regex = self.parse_regex_option(ctx)?;
                return Ok(Action::ListCounters { regex });
            }
            Token::Identifier(word) => {
                return Err(self.error(format!("Invalid identifier {} in {}", word, ctx.name)))
            }
            Token::String(name) => name,
            other => {
                return Err(self.error(format!(
                    "expected string or identifier in {}; got {}",
                    ctx.name, other
                )))
            }
        };

        let word = self.expect_identifier(&ctx.name)?;
        let action = CounterAction::from_keyword(&word).ok_or_else(|| {
            self.error(format!("Invalid identifier {} in {}", word, ctx.name))
        })?;
        let value = self.expect_integer(&ctx.name)?;

        Ok(Action::Counter {
            name,
            action,
            value,
        })
    }
}
