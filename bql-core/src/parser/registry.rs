use super::{CommandContext, Parser};
use crate::command::Action;
use crate::error::BqlResult;
use std::collections::HashMap;

/// Parses the operands of one command; the envelope is handled by the caller.
pub type ParseFn = fn(&mut Parser, &mut CommandContext) -> BqlResult<Action>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    Server,
    User,
    /// `@db.` commands
    Database,
    /// Commands without a prefix (`login`, `whoami`)
    Bare,
}

impl Prefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prefix::Server => "server",
            Prefix::User => "user",
            Prefix::Database => "database",
            Prefix::Bare => "",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseEntry {
    /// Canonical command name handed to the router.
    pub name: &'static str,
    pub admin: bool,
    pub parse: ParseFn,
}

/// Keyword lookup table. Built per parser, never global.
#[derive(Debug, Clone, Default)]
pub struct ParseRegistry {
    entries: HashMap<(Prefix, String), ParseEntry>,
}

impl ParseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `keyword` and, when given, an alias resolving to the same entry.
    pub fn register(&mut self, prefix: Prefix, keyword: &str, alias: Option<&str>, entry: ParseEntry) {
        self.entries.insert((prefix, keyword.to_string()), entry);
        if let Some(alias) = alias {
            self.entries.insert((prefix, alias.to_string()), entry);
        }
    }

    pub fn lookup(&self, prefix: Prefix, keyword: &str) -> Option<ParseEntry> {
        self.entries.get(&(prefix, keyword.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full BQL command set.
    pub fn standard() -> Self {
        let mut registry = Self::new();

        let mut server = |keyword: &str, alias: Option<&str>, name: &'static str, parse: ParseFn| {
            registry.register(Prefix::Server, keyword, alias, ParseEntry { name, admin: true, parse });
        };
        server("listdb", Some("dbs"), "server.listdb", Parser::parse_list_databases);
        server("newdb", None, "server.newdb", Parser::parse_new_database);
        server("init", None, "server.init", Parser::parse_server_init);
        server("dropdb", None, "server.dropdb", Parser::parse_drop_database);

        let mut user = |keyword: &str, alias: Option<&str>, name: &'static str, parse: ParseFn| {
            registry.register(Prefix::User, keyword, alias, ParseEntry { name, admin: true, parse });
        };
        user("new", None, "user.new", Parser::parse_new_user);
        user("all", None, "user.all", Parser::parse_list_users);
        user("about", None, "user.about", Parser::parse_user_info);
        user("delete", Some("rm"), "user.delete", Parser::parse_delete_user);
        user("passw", None, "user.passw", Parser::parse_change_password);
        user("access", None, "user.access", Parser::parse_user_access);
        user("db", None, "user.db", Parser::parse_user_database_access);

        let whoami = ParseEntry {
            name: "user.whoami",
            admin: false,
            parse: Parser::parse_whoami,
        };
        registry.register(Prefix::User, "whoami", None, whoami);
        registry.register(Prefix::Bare, "whoami", None, whoami);
        registry.register(
            Prefix::Bare,
            "login",
            None,
            ParseEntry {
                name: "login",
                admin: false,
                parse: Parser::parse_login,
            },
        );

        let mut database = |keyword: &str, alias: Option<&str>, name: &'static str, parse: ParseFn| {
            registry.register(Prefix::Database, keyword, alias, ParseEntry { name, admin: false, parse });
        };
        database("newdir", Some("mkdir"), "database.newdir", Parser::parse_new_directory);
        database("newfile", Some("write"), "database.newfile", Parser::parse_new_file);
        database("listdir", Some("ls"), "database.listdir", Parser::parse_list_directory);
        database("rename", None, "database.rename", Parser::parse_rename);
        database("move", Some("mv"), "database.move", Parser::parse_move);
        database("copy", Some("cp"), "database.copy", Parser::parse_copy);
        database("delete", Some("rm"), "database.delete", Parser::parse_delete);
        database("info", None, "database.info", Parser::parse_info);
        database("makepublic", Some("public"), "database.makepublic", Parser::parse_make_public);
        database("makeprivate", Some("private"), "database.makeprivate", Parser::parse_make_private);
        database("readfile", Some("read"), "database.readfile", Parser::parse_read_file);
        database("updatefile", Some("update"), "database.updatefile", Parser::parse_update_file);
        database("modfile", None, "database.updatefile", Parser::parse_update_file);
        database("deletebytes", None, "database.deletebytes", Parser::parse_delete_bytes);
        database("counter", None, "database.counter", Parser::parse_counter);
        database("select", None, "database.select", Parser::parse_select);
        database("set", None, "database.set", Parser::parse_set);
        database("unset", None, "database.unset", Parser::parse_unset);
        database("uploadticket", None, "uploadticket", Parser::parse_upload_ticket);

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve_to_canonical_name() {
        let registry = ParseRegistry::standard();
        let mkdir = registry.lookup(Prefix::Database, "mkdir").unwrap();
        let newdir = registry.lookup(Prefix::Database, "newdir").unwrap();
        assert_eq!(mkdir.name, "database.newdir");
        assert_eq!(newdir.name, "database.newdir");
        assert_eq!(registry.lookup(Prefix::Server, "dbs").unwrap().name, "server.listdb");
        assert_eq!(registry.lookup(Prefix::User, "rm").unwrap().name, "user.delete");
    }

    #[test]
    fn test_admin_flags() {
        let registry = ParseRegistry::standard();
        assert!(registry.lookup(Prefix::Server, "init").unwrap().admin);
        assert!(registry.lookup(Prefix::User, "new").unwrap().admin);
        assert!(!registry.lookup(Prefix::User, "whoami").unwrap().admin);
        assert!(!registry.lookup(Prefix::Database, "select").unwrap().admin);
    }

    #[test]
    fn test_unknown_keyword() {
        let registry = ParseRegistry::standard();
        assert!(registry.lookup(Prefix::Database, "format").is_none());
        assert!(registry.lookup(Prefix::Server, "newdir").is_none());
        assert!(ParseRegistry::new().is_empty());
    }
}
