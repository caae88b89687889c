//! `select`, `set` and `unset` statements and the `where` clause.

use super::{CommandContext, Parser};
use crate::command::{
    meta_field, Action, CompareOp, Condition, Predicate, SelectQuery, SetQuery, UnsetQuery,
    ValueType, WhereClause, FIELD_PREFIX,
};
use crate::error::BqlResult;
use crate::lexer::Token;
use serde_json::Value;

/// Where-clause accumulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    And,
    Or,
}

impl Parser {
    /// Consecutive string tokens, each prefixed with `content.`.
    fn parse_field_list(&mut self) -> BqlResult<Vec<String>> {
        let mut fields = Vec::new();
        while matches!(self.peek()?, Token::String(_)) {
            if let Token::String(field) = self.advance()? {
                fields.push(format!("{}{}", FIELD_PREFIX, field));
            }
        }
        Ok(fields)
    }

    /// `select "f"* in /path+ [where ...] [sort ...] [limit N] [distinct "f"] [count]`
    pub(crate) fn parse_select(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let mut query = SelectQuery {
            fields: self.parse_field_list()?,
            ..Default::default()
        };
        self.expect_in(&ctx.name)?;
        query.paths = self.parse_paths()?;

        loop {
            match self.peek()?.clone() {
                Token::Identifier(word) => {
                    self.advance()?;
                    match word.to_lowercase().as_str() {
                        "where" => query.filter = Some(self.parse_where()?),
                        "sort" => query.sort = Some(self.parse_sort()?),
                        "limit" => query.limit = Some(self.parse_limit()?),
                        "distinct" => query.distinct = Some(self.parse_distinct()?),
                        "count" => query.count = true,
                        _ => {
                            return Err(
                                self.error(format!("Invalid identifier {} in {}", word, ctx.name))
                            )
                        }
                    }
                }
                Token::SendTo | Token::Semicolon | Token::Eof => break,
                other => {
                    return Err(self.error(format!("Invalid token {} in {}", other, ctx.name)));
                }
            }
        }

        self.validate_select(&query, &ctx.name)?;
        Ok(Action::Select(query))
    }

    /// `limit` and `sort` combine with each other only; `count` and `distinct`
    /// exclude every other modifier.
    fn validate_select(&self, query: &SelectQuery, ctx: &str) -> BqlResult<()> {
        let has_limit = query.limit.is_some();
        let has_sort = query.sort.is_some();
        let has_distinct = query.distinct.is_some();
        let has_count = query.count;

        if has_limit || has_sort {
            if has_count {
                return Err(self.error(format!(
                    "'Count' cannot be used with 'Limit' or 'Sort' in {}",
                    ctx
                )));
            }
            if has_distinct {
                return Err(self.error(format!(
                    "'Distinct' cannot be used with 'Limit' or 'Sort' in {}",
                    ctx
                )));
            }
        } else if has_distinct && has_count {
            return Err(self.error(format!(
                "'Count' cannot be used with 'Distinct' in {}",
                ctx
            )));
        }
        Ok(())
    }

    fn parse_sort(&mut self) -> BqlResult<Vec<String>> {
        let context = "Select Sort Statement";
        let order = self.expect_identifier(context)?;
        let prefix = match order.to_lowercase().as_str() {
            "asc" => "",
            "desc" => "-",
            _ => {
                return Err(self.error(format!(
                    "{} error: Expected 'Asc' or 'Desc'.",
                    context
                )))
            }
        };
        let keys = self
            .parse_field_list()?
            .into_iter()
            .map(|field| format!("{}{}", prefix, field))
            .collect();
        Ok(keys)
    }

    fn parse_limit(&mut self) -> BqlResult<i64> {
        let context = "Select Limit Statement";
        match self.advance()? {
            Token::Integer(n) => Ok(n),
            Token::Float(_) => Err(self.error(format!(
                "{} error: Limit requires an integer value.",
                context
            ))),
            other => Err(self.error(format!(
                "expected number in {}; got {}",
                context, other
            ))),
        }
    }

    fn parse_distinct(&mut self) -> BqlResult<String> {
        let field = self.expect_string("Select Distinct Statement")?;
        Ok(format!("{}{}", FIELD_PREFIX, field))
    }

    /// Trailing `where` clause shared by `set` and `unset`.
    fn parse_optional_where(&mut self, ctx: &str) -> BqlResult<Option<WhereClause>> {
        let mut filter = None;
        loop {
            match self.peek()?.clone() {
                Token::Identifier(word) if word.eq_ignore_ascii_case("where") => {
                    self.advance()?;
                    filter = Some(self.parse_where()?);
                }
                Token::SendTo | Token::Semicolon | Token::Eof => break,
                other => {
                    return Err(self.error(format!("Invalid token {} in {}", other, ctx)));
                }
            }
        }
        Ok(filter)
    }

    /// `set "f" = v | "f" += n | "f" -= n ... in /path+ [where ...]`
    pub(crate) fn parse_set(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let mut query = SetQuery::default();

        while matches!(self.peek()?, Token::String(_)) {
            match self.peek_second()?.clone() {
                Token::Assign => {
                    let (field, value) = self.parse_value_assignment()?;
                    query.assignments.insert(field, value);
                }
                Token::PlusAssign | Token::MinusAssign => {
                    let (field, value) = self.parse_incr_decr()?;
                    query.increments.insert(field, value);
                }
                _ => {
                    return Err(
                        self.error(format!("Invalid assignment operator in {}", ctx.name))
                    )
                }
            }
        }

        if query.assignments.is_empty() && query.increments.is_empty() {
            return Err(self.error(format!(
                "Invalid {}: no field assignments found",
                ctx.name
            )));
        }

        self.expect_in(&ctx.name)?;
        query.paths = self.parse_paths()?;
        query.filter = self.parse_optional_where(&ctx.name)?;
        Ok(Action::Set(query))
    }

    fn parse_value_assignment(&mut self) -> BqlResult<(String, Value)> {
        let context = "Assignment Statement";
        let field = format!("{}{}", FIELD_PREFIX, self.expect_string(context)?);
        self.expect(Token::Assign, context)?;
        let value = self.parse_value(context)?;
        Ok((field, value))
    }

    /// The magnitude of `n` is kept and the operator supplies the sign.
    fn parse_incr_decr(&mut self) -> BqlResult<(String, Value)> {
        let context = "Increment/Decrement Statement";
        let field = format!("{}{}", FIELD_PREFIX, self.expect_string(context)?);
        let increment = match self.advance()? {
            Token::PlusAssign => true,
            Token::MinusAssign => false,
            other => {
                return Err(self.error(format!(
                    "expected '+=' or '-=' in {}; got {}",
                    context, other
                )))
            }
        };
        let delta = match self.advance()? {
            Token::Integer(n) => {
                let magnitude = n.saturating_abs();
                Value::from(if increment { magnitude } else { -magnitude })
            }
            Token::Float(f) => {
                let magnitude = f.abs();
                self.number_value(if increment { magnitude } else { -magnitude }, context)?
            }
            _ => return Err(self.error(format!("Invalid field value for {}", context))),
        };
        Ok((field, delta))
    }

    /// `unset "f"+ in /path+ [where ...]`
    pub(crate) fn parse_unset(&mut self, ctx: &mut CommandContext) -> BqlResult<Action> {
        let fields = self.parse_field_list()?;
        if fields.is_empty() {
            return Err(self.error(format!("Invalid {}: no fields found", ctx.name)));
        }
        self.expect_in(&ctx.name)?;
        let paths = self.parse_paths()?;
        let filter = self.parse_optional_where(&ctx.name)?;
        Ok(Action::Unset(UnsetQuery {
            fields,
            paths,
            filter,
        }))
    }

    /// Two-bucket `where` accumulator.
    ///
    /// A condition followed by `or` goes to the OR bucket and switches the mode
    /// to OR for the next condition as well. Any other condition goes to the
    /// bucket of the current mode, then the mode resets to AND.
    pub(crate) fn parse_where(&mut self) -> BqlResult<WhereClause> {
        let context = "Where Statement";
        let mut clause = WhereClause::default();
        let mut mode = Mode::And;

        loop {
            let condition = match self.peek()?.clone() {
                Token::String(_) => self.parse_simple_condition()?,
                Token::Identifier(word) => match word.to_lowercase().as_str() {
                    "file_name" | "file_mime" | "file_size" | "file_ispublic" => {
                        self.parse_simple_condition()?
                    }
                    "typeof" => self.parse_typeof_condition()?,
                    "exists" => self.parse_exists_condition()?,
                    "regex" => self.parse_regex_condition()?,
                    _ => break,
                },
                _ => break,
            };

            if self.peek()?.is_keyword("or") {
                self.advance()?;
                mode = Mode::Or;
                clause.or.push(condition);
            } else {
                match mode {
                    Mode::Or => clause.or.push(condition),
                    Mode::And => clause.and.push(condition),
                }
                mode = Mode::And;
            }
        }

        if clause.is_empty() {
            return Err(self.error(format!("Invalid syntax for {}", context)));
        }
        Ok(clause)
    }

    /// A quoted content field or a `file_*` meta identifier.
    fn parse_condition_field(&mut self, context: &str) -> BqlResult<String> {
        match self.advance()? {
            Token::String(field) => Ok(format!("{}{}", FIELD_PREFIX, field)),
            Token::Identifier(word) => meta_field(&word).ok_or_else(|| {
                self.error(format!("Unknown meta field {} in {}", word, context))
            }),
            other => Err(self.error(format!(
                "expected string or identifier in {}; got {}",
                context, other
            ))),
        }
    }

    fn parse_simple_condition(&mut self) -> BqlResult<Condition> {
        let context = "Where Condition Statement";
        let field = self.parse_condition_field(context)?;

        let op = match self.advance()? {
            Token::Equal => CompareOp::Eq,
            Token::NotEqual => CompareOp::Ne,
            Token::LessThan => CompareOp::Lt,
            Token::LessThanEq => CompareOp::Lte,
            Token::GreaterThan => CompareOp::Gt,
            Token::GreaterThanEq => CompareOp::Gte,
            Token::Identifier(word) => {
                let predicate = match word.to_lowercase().as_str() {
                    "in" => Predicate::In(self.parse_array(context)?),
                    "nin" => Predicate::NotIn(self.parse_array(context)?),
                    _ => return Err(self.error(format!("Invalid operator for {}", context))),
                };
                return Ok(Condition { field, predicate });
            }
            _ => return Err(self.error(format!("Invalid operator for {}", context))),
        };

        let value = self.parse_value(context)?;
        Ok(Condition {
            field,
            predicate: Predicate::Compare(op, value),
        })
    }

    /// `keyword("field")`
    fn parse_function_field(&mut self, context: &str) -> BqlResult<String> {
        self.advance()?; // function keyword
        self.expect(Token::LeftParen, context)?;
        let field = self.expect_string(context)?;
        self.expect(Token::RightParen, context)?;
        Ok(format!("{}{}", FIELD_PREFIX, field))
    }

    /// `==` yields true, `!=` yields false.
    fn parse_equality(&mut self, context: &str) -> BqlResult<bool> {
        match self.advance()? {
            Token::Equal => Ok(true),
            Token::NotEqual => Ok(false),
            other => Err(self.error(format!(
                "expected '==' or '!=' in {}; got {}",
                context, other
            ))),
        }
    }

    fn parse_typeof_condition(&mut self) -> BqlResult<Condition> {
        let context = "Where Typeof Condition Statement";
        let field = self.parse_function_field(context)?;
        let equal = self.parse_equality(context)?;
        let type_name = self.expect_string(context)?;
        Ok(Condition {
            field,
            predicate: Predicate::TypeOf {
                value_type: ValueType::from_name(&type_name),
                negate: !equal,
            },
        })
    }

    fn parse_exists_condition(&mut self) -> BqlResult<Condition> {
        let context = "Where Exists Condition Statement";
        let field = self.parse_function_field(context)?;
        let equal = self.parse_equality(context)?;
        let expected = match self.advance()? {
            Token::Bool(b) => b,
            other => {
                return Err(self.error(format!(
                    "expected bool in {}; got {}",
                    context, other
                )))
            }
        };
        Ok(Condition {
            field,
            predicate: Predicate::Exists(expected == equal),
        })
    }

    /// `regex(field, "options") == "pattern"`
    fn parse_regex_condition(&mut self) -> BqlResult<Condition> {
        let context = "Where Regex Condition Statement";
        self.advance()?; // regex
        self.expect(Token::LeftParen, context)?;
        let field = self.parse_condition_field(context)?;
        self.expect(Token::Comma, context)?;
        let options = self.expect_string(context)?;
        self.expect(Token::RightParen, context)?;
        self.expect(Token::Equal, context)?;
        let pattern = self.expect_string(context)?;
        Ok(Condition {
            field,
            predicate: Predicate::Regex { pattern, options },
        })
    }
}
