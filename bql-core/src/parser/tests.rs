//! Unit tests for the BQL parser.

use super::*;
use crate::command::{
    Action, CompareOp, Condition, CounterAction, Predicate, ValueType, WhereClause,
};
use serde_json::json;

fn single(script: &str) -> Command {
    let mut commands = parse(script).unwrap();
    assert_eq!(commands.len(), 1, "expected one command for {}", script);
    commands.remove(0)
}

fn parse_err(script: &str) -> BqlError {
    parse(script).unwrap_err()
}

fn select_of(script: &str) -> crate::command::SelectQuery {
    match single(script).action {
        Action::Select(query) => query,
        other => panic!("expected select, got {:?}", other),
    }
}

fn cond(field: &str, op: CompareOp, value: serde_json::Value) -> Condition {
    Condition {
        field: field.to_string(),
        predicate: Predicate::Compare(op, value),
    }
}

#[test]
fn test_parse_listdb_with_regex() {
    let cmd = single(r#"server.listdb --regex="^\w""#);
    assert_eq!(cmd.name, "server.listdb");
    assert!(cmd.is_admin);
    assert_eq!(cmd.database, "");
    assert_eq!(cmd.option("regex"), Some("^\\w"));
    assert_eq!(
        cmd.action,
        Action::ListDatabases {
            regex: Some("^\\w".to_string())
        }
    );
}

#[test]
fn test_parse_listdb_rejects_other_options() {
    let err = parse_err(r#"server.listdb --pattern="x""#);
    assert!(err.to_string().contains("Invalid option pattern in server.listdb"));
    let err = parse_err(r#"server.listdb --regex="""#);
    assert!(err.to_string().contains("Invalid option regex"));
}

#[test]
fn test_statement_count_and_order() {
    let script = r#"
        server.newdb "blog";
        @blog.newdir /posts;
        @blog.newfile /posts/first {"title": "hello"};
        @blog.listdir /posts
    "#;
    let commands = parse(script).unwrap();
    let names: Vec<&str> = commands.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "server.newdb",
            "database.newdir",
            "database.newfile",
            "database.listdir"
        ]
    );
    assert_eq!(commands[1].database, "blog");
}

#[test]
fn test_error_reports_line_without_partial_result() {
    let script = "@db.newdir /a;\n@db.newdir /b;\n@db.newdir 42;\n@db.newdir /c";
    let err = parse_err(script);
    assert_eq!(err.line(), 3);
    assert!(err.to_string().starts_with("line[3]: expected path in database.newdir"));
}

#[test]
fn test_lex_error_is_reported_with_line() {
    let err = parse_err("@db.newdir /a;\n@db.newfile /b {\"a\": \"open}");
    assert!(matches!(err, BqlError::Lex { line: 2, .. }));
}

#[test]
fn test_empty_script_yields_no_commands() {
    assert!(parse("").unwrap().is_empty());
    assert!(parse("  ;; /* nothing */ ").unwrap().is_empty());
}

#[test]
fn test_unknown_prefix_and_command() {
    assert!(parse_err("format.disk")
        .to_string()
        .contains("Invalid command prefix 'format'"));
    assert!(parse_err("server.reboot")
        .to_string()
        .contains("server.reboot parse function not found"));
    assert!(parse_err("@db.explode /a")
        .to_string()
        .contains("Invalid command database command 'explode'"));
}

#[test]
fn test_aliases_and_case_insensitive_keywords() {
    assert_eq!(single("@db.MKDIR /a").name, "database.newdir");
    assert_eq!(single("@db.ls /").name, "database.listdir");
    assert_eq!(single("@db.rm /a").name, "database.delete");
    assert_eq!(single("@db.modfile /a {}").name, "database.updatefile");
    assert_eq!(single("SERVER.dbs").name, "server.listdb");
    assert_eq!(single(r#"user.rm "bob""#).name, "user.delete");
}

#[test]
fn test_filter_redirection() {
    let cmd = single("@db.info /a >> pretty;");
    assert_eq!(cmd.filter.as_deref(), Some("pretty"));
    assert_eq!(single("@db.info /a").filter, None);
    assert!(parse_err("@db.info /a >> ;").to_string().contains("Result assignment"));
}

#[test]
fn test_missing_terminator() {
    let err = parse_err("@db.info /a /b");
    assert!(err.to_string().contains("expected ';' or EOF in database.info"));
}

#[test]
fn test_login_and_whoami() {
    let cmd = single(r#"login "admin" "password1" --duration=30"#);
    assert_eq!(cmd.name, "login");
    assert!(!cmd.is_admin);
    assert_eq!(
        cmd.action,
        Action::Login {
            username: "admin".to_string(),
            password: "password1".to_string(),
            duration: Some(30),
        }
    );
    assert_eq!(single("whoami").name, "user.whoami");
    let cmd = single("user.whoami");
    assert_eq!(cmd.action, Action::Whoami);
    assert!(!cmd.is_admin);
}

#[test]
fn test_user_commands() {
    let cmd = single(r#"user.new "alice" "s3cretpass""#);
    assert!(cmd.is_admin);
    assert_eq!(
        cmd.action,
        Action::NewUser {
            username: "alice".to_string(),
            password: "s3cretpass".to_string()
        }
    );
    assert_eq!(
        single(r#"user.access "alice" deny"#).action,
        Action::UserAccess {
            username: "alice".to_string(),
            grant: false
        }
    );
    assert_eq!(
        single(r#"user.db "alice" "blog" grant"#).action,
        Action::UserDatabaseAccess {
            username: "alice".to_string(),
            database: "blog".to_string(),
            grant: true
        }
    );
    assert!(parse_err(r#"user.access "alice" maybe"#)
        .to_string()
        .contains("Invalid identifier maybe"));
}

#[test]
fn test_newfile_requires_json_object() {
    let cmd = single(r#"@db.newfile /a.json {"name": 'x', "tags": ["a", "b"], "n": -2.5, "ok": true, "none": null, "inner": {"k": 1}}"#);
    match cmd.action {
        Action::NewFile { path, content } => {
            assert_eq!(path, "/a.json");
            assert_eq!(
                serde_json::Value::Object(content),
                json!({"name": "x", "tags": ["a", "b"], "n": -2.5, "ok": true, "none": null, "inner": {"k": 1}})
            );
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(parse_err("@db.newfile /a")
        .to_string()
        .contains("Expecting a JSON object in database.newfile"));
    assert!(parse_err("@db.newfile /a {\"a\": }")
        .to_string()
        .contains("Invalid json object"));
    assert!(parse_err("@db.newfile /a {\"a\": 1")
        .to_string()
        .contains("Invalid json object"));
}

#[test]
fn test_move_copy_rename() {
    assert_eq!(
        single("@db.mv /a /b").action,
        Action::Move {
            path: "/a".to_string(),
            to: "/b".to_string(),
            rename: None
        }
    );
    assert_eq!(
        single(r#"@db.cp /a /b "c""#).action,
        Action::Copy {
            path: "/a".to_string(),
            to: "/b".to_string(),
            rename: Some("c".to_string())
        }
    );
    assert_eq!(
        single(r#"@db.rename /a "z""#).action,
        Action::Rename {
            path: "/a".to_string(),
            name: "z".to_string()
        }
    );
}

#[test]
fn test_readfile_field_list() {
    assert_eq!(
        single(r#"@db.read /a ["title", "body"]"#).action,
        Action::ReadFile {
            path: "/a".to_string(),
            fields: vec!["title".to_string(), "body".to_string()]
        }
    );
    assert!(parse_err(r#"@db.read /a ["title",]"#)
        .to_string()
        .contains("Trailing comma"));
}

#[test]
fn test_counter_commands() {
    assert_eq!(
        single(r#"@db.counter "visits" incr 5"#).action,
        Action::Counter {
            name: "visits".to_string(),
            action: CounterAction::Incr,
            value: 5
        }
    );
    assert_eq!(
        single(r#"@db.counter list --regex="^v""#).action,
        Action::ListCounters {
            regex: Some("^v".to_string())
        }
    );
    assert_eq!(
        single("@db.counter list").action,
        Action::ListCounters { regex: None }
    );
    assert!(parse_err(r#"@db.counter "visits" double 5"#)
        .to_string()
        .contains("Invalid identifier double"));
    assert!(parse_err(r#"@db.counter "visits" incr 1.5"#)
        .to_string()
        .contains("requires an integer value"));
}

#[test]
fn test_select_full() {
    let query = select_of(
        r#"@db.select "name" "age" in /users /staff where "age" > 18 sort desc "age" limit 10"#,
    );
    assert_eq!(query.fields, vec!["content.name", "content.age"]);
    assert_eq!(query.paths, vec!["/users", "/staff"]);
    assert_eq!(query.sort, Some(vec!["-content.age".to_string()]));
    assert_eq!(query.limit, Some(10));
    assert_eq!(
        query.filter,
        Some(WhereClause {
            and: vec![cond("content.age", CompareOp::Gt, json!(18))],
            or: vec![],
        })
    );
}

#[test]
fn test_select_modifier_exclusivity() {
    assert!(parse_err(r#"@db.select in /a count limit 3"#)
        .to_string()
        .contains("'Count' cannot be used with 'Limit' or 'Sort'"));
    assert!(parse_err(r#"@db.select in /a sort asc "x" distinct "y""#)
        .to_string()
        .contains("'Distinct' cannot be used with 'Limit' or 'Sort'"));
    assert!(parse_err(r#"@db.select in /a distinct "y" count"#)
        .to_string()
        .contains("'Count' cannot be used with 'Distinct'"));

    let query = select_of(r#"@db.select in /a limit 2 sort asc "x""#);
    assert_eq!(query.limit, Some(2));
    assert_eq!(query.sort, Some(vec!["content.x".to_string()]));
    assert!(select_of("@db.select in /a count").count);
    assert_eq!(
        select_of(r#"@db.select in /a distinct "tag""#).distinct,
        Some("content.tag".to_string())
    );
}

#[test]
fn test_select_requires_in() {
    assert!(parse_err(r#"@db.select "a" from /x"#)
        .to_string()
        .contains("expecting 'In statement'"));
    assert!(parse_err(r#"@db.select in /a limit 2.5"#)
        .to_string()
        .contains("Limit requires an integer value"));
}

#[test]
fn test_where_two_bucket_accumulation() {
    // a or b c  =>  or: [a, b], and: [c]
    let query = select_of(r#"@db.select in /p where "a" == 1 or "b" == 2 "c" == 3"#);
    let clause = query.filter.unwrap();
    assert_eq!(
        clause.or,
        vec![
            cond("content.a", CompareOp::Eq, json!(1)),
            cond("content.b", CompareOp::Eq, json!(2)),
        ]
    );
    assert_eq!(clause.and, vec![cond("content.c", CompareOp::Eq, json!(3))]);

    // a b or c  =>  and: [a], or: [b, c]
    let clause = select_of(r#"@db.select in /p where "a" == 1 "b" == 2 OR "c" == 3"#)
        .filter
        .unwrap();
    assert_eq!(clause.and, vec![cond("content.a", CompareOp::Eq, json!(1))]);
    assert_eq!(clause.or.len(), 2);
}

#[test]
fn test_where_predicates() {
    let clause = select_of(
        r#"@db.select in /p where "tag" in ["a", "b"] "n" nin [1, 2] typeof("s") == "string" typeof("i") != "int" exists("x") != false regex(file_name, "i") == "^re" file_size <= 1024"#,
    )
    .filter
    .unwrap();
    assert!(clause.or.is_empty());
    let predicates: Vec<&Predicate> = clause.and.iter().map(|c| &c.predicate).collect();
    assert_eq!(predicates[0], &Predicate::In(vec![json!("a"), json!("b")]));
    assert_eq!(predicates[1], &Predicate::NotIn(vec![json!(1), json!(2)]));
    assert_eq!(
        predicates[2],
        &Predicate::TypeOf {
            value_type: ValueType::String,
            negate: false
        }
    );
    assert_eq!(
        predicates[3],
        &Predicate::TypeOf {
            value_type: ValueType::Int,
            negate: true
        }
    );
    assert_eq!(predicates[4], &Predicate::Exists(true));
    assert_eq!(
        clause.and[5],
        Condition {
            field: "__header__.name".to_string(),
            predicate: Predicate::Regex {
                pattern: "^re".to_string(),
                options: "i".to_string()
            }
        }
    );
    assert_eq!(
        clause.and[6],
        cond("__bytes__.size", CompareOp::Lte, json!(1024))
    );
}

#[test]
fn test_where_errors() {
    assert!(parse_err(r#"@db.select in /p where"#)
        .to_string()
        .contains("Invalid syntax for Where Statement"));
    assert!(parse_err(r#"@db.select in /p where "a" ~ 1"#).to_string().contains("line[1]"));
    assert!(parse_err(r#"@db.select in /p where "a" like 1"#)
        .to_string()
        .contains("Invalid operator"));
    assert!(parse_err(r#"@db.select in /p where "a" in [1, 2,]"#)
        .to_string()
        .contains("Trailing comma"));
}

#[test]
fn test_integer_literals_stay_exact() {
    let cmd = single(r#"@db.set "id" = 9007199254740993 "hits" += 9007199254740993 in /p"#);
    match cmd.action {
        Action::Set(query) => {
            let id = query.assignments.get("content.id").unwrap();
            assert_eq!(id.as_i64(), Some(9_007_199_254_740_993));
            let hits = query.increments.get("content.hits").unwrap();
            assert_eq!(hits.as_i64(), Some(9_007_199_254_740_993));
        }
        other => panic!("unexpected {:?}", other),
    }

    match single(r#"@db.newfile /f {"id": 9007199254740993}"#).action {
        Action::NewFile { content, .. } => {
            assert_eq!(content["id"].as_i64(), Some(9_007_199_254_740_993));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_set_assignments_and_increments() {
    let cmd = single(r#"@db.set "title" = "new" "views" += 2 "stock" -= -3 in /posts where exists("title") == true"#);
    match cmd.action {
        Action::Set(query) => {
            assert_eq!(query.assignments.get("content.title"), Some(&json!("new")));
            assert_eq!(query.increments.get("content.views"), Some(&json!(2)));
            assert_eq!(query.increments.get("content.stock"), Some(&json!(-3)));
            assert_eq!(query.paths, vec!["/posts"]);
            assert_eq!(query.filter.unwrap().and.len(), 1);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(parse_err(r#"@db.set in /posts"#)
        .to_string()
        .contains("no field assignments found"));
    assert!(parse_err(r#"@db.set "a" == 1 in /posts"#)
        .to_string()
        .contains("Invalid assignment operator"));
}

#[test]
fn test_unset() {
    let cmd = single(r#"@db.unset "draft" "tmp" in /posts >> pretty"#);
    assert_eq!(cmd.filter.as_deref(), Some("pretty"));
    match cmd.action {
        Action::Unset(query) => {
            assert_eq!(query.fields, vec!["content.draft", "content.tmp"]);
            assert!(query.filter.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(parse_err("@db.unset in /posts")
        .to_string()
        .contains("no fields found"));
}

#[test]
fn test_custom_registry() {
    let mut registry = ParseRegistry::new();
    registry.register(
        Prefix::Database,
        "info",
        Some("i"),
        ParseEntry {
            name: "database.info",
            admin: false,
            parse: Parser::parse_info,
        },
    );
    let commands = Parser::with_registry("@db.i /a", registry).parse_script().unwrap();
    assert_eq!(commands[0].name, "database.info");
    let err = Parser::with_registry("@db.ls /a", ParseRegistry::new())
        .parse_script()
        .unwrap_err();
    assert!(err.to_string().contains("Invalid command database command 'ls'"));
}

#[test]
fn test_upload_ticket() {
    let cmd = single("@media.uploadticket /img/logo.png --duration=10");
    assert_eq!(cmd.name, "uploadticket");
    assert_eq!(cmd.database, "media");
    assert_eq!(
        cmd.action,
        Action::UploadTicket {
            path: "/img/logo.png".to_string(),
            duration: Some(10)
        }
    );
    assert!(parse_err(r#"@media.uploadticket /a --duration="soon""#)
        .to_string()
        .contains("Invalid integer value for argument duration"));
}
