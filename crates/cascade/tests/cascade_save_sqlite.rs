use std::sync::Arc;

use cascade::prelude::*;
use cascade::{resolve_relation_keys, save_graph};

const SCHEMA: &str = "
CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE profile (id INTEGER PRIMARY KEY, bio TEXT, user_id INTEGER REFERENCES user(id));
CREATE TABLE post (id INTEGER PRIMARY KEY, title TEXT NOT NULL, author_id INTEGER REFERENCES user(id));
CREATE TABLE comment (id INTEGER PRIMARY KEY, body TEXT NOT NULL, post_id INTEGER REFERENCES post(id));
CREATE TABLE account (region TEXT NOT NULL, number INTEGER NOT NULL, owner TEXT, PRIMARY KEY (region, number), UNIQUE (number, region));
CREATE TABLE invoice (
    id INTEGER PRIMARY KEY,
    acct_number INTEGER,
    acct_region TEXT,
    total INTEGER,
    FOREIGN KEY (acct_number, acct_region) REFERENCES account(number, region)
);
CREATE TABLE company (id INTEGER PRIMARY KEY, name TEXT NOT NULL, owner_id INTEGER REFERENCES member(id));
CREATE TABLE member (id INTEGER PRIMARY KEY, name TEXT NOT NULL, company_id INTEGER REFERENCES company(id));
";

struct Models {
    user: Arc<ModelDef>,
    post: Arc<ModelDef>,
    comment: Arc<ModelDef>,
    account: Arc<ModelDef>,
    invoice: Arc<ModelDef>,
    member: Arc<ModelDef>,
    company: Arc<ModelDef>,
}

fn models() -> Models {
    Models {
        user: ModelDef::new("User", "user")
            .relation(RelationDescriptor::has_one("profile", "profile", "user_id"))
            .relation(RelationDescriptor::has_many("posts", "post", "author_id"))
            .validator(RuleValidator::new().rule("name", Rule::Required))
            .build(),
        post: ModelDef::new("Post", "post")
            .relation(RelationDescriptor::belongs_to("author", "user", "author_id"))
            .relation(RelationDescriptor::has_many("comments", "comment", "post_id"))
            .validator(RuleValidator::new().rule("title", Rule::Required))
            .build(),
        comment: ModelDef::new("Comment", "comment")
            .relation(RelationDescriptor::belongs_to("post", "post", "post_id"))
            .validator(
                RuleValidator::new()
                    .rule("body", Rule::Required)
                    .rule("body", Rule::MinLength(3)),
            )
            .build(),
        account: ModelDef::new("Account", "account").build(),
        // column order differs from the account key order on purpose
        invoice: ModelDef::new("Invoice", "invoice")
            .relation(RelationDescriptor::belongs_to(
                "account",
                "account",
                "acct_number, acct_region",
            ))
            .build(),
        member: ModelDef::new("Member", "member")
            .relation(RelationDescriptor::belongs_to("company", "company", "company_id"))
            .build(),
        company: ModelDef::new("Company", "company")
            .relation(RelationDescriptor::belongs_to("owner", "member", "owner_id"))
            .build(),
    }
}

fn open() -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    conn.execute_raw(SCHEMA).expect("create schema");
    conn
}

fn ints(conn: &SqliteConnection, sql: &str) -> Vec<Vec<i64>> {
    conn.query(sql, &[])
        .expect("query")
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| row.get(i).and_then(Value::as_i64).unwrap_or(-1))
                .collect()
        })
        .collect()
}

fn count(conn: &SqliteConnection, table: &str) -> i64 {
    ints(conn, &format!("SELECT COUNT(*) FROM {}", table))[0][0]
}

fn id_of(graph: &RecordGraph, record: RecordId) -> i64 {
    graph
        .attribute(record, "id")
        .and_then(Value::as_i64)
        .expect("record has an id")
}

#[test]
fn sqlite_belongs_to_is_written_before_owner() {
    let conn = open();
    let schema = IntrospectedSchema::new(&conn);
    let cascade = Cascade::new(&conn, &schema);
    let m = models();

    let mut graph = RecordGraph::new();
    let post = graph.create(&m.post, [("title", "Hello")]);
    let author = graph.create(&m.user, [("name", "Ann")]);
    graph.set_related_one(post, "author", Some(author)).unwrap();

    let saved = cascade
        .save_with(&mut graph, post, &SaveOptions::new().with("author"))
        .unwrap();
    assert!(saved);

    let author_id = id_of(&graph, author);
    assert_eq!(ints(&conn, "SELECT author_id FROM post"), [[author_id]]);
    assert!(!graph[post].is_new());
    assert!(!graph[author].is_new());
    assert!(!conn.in_transaction());
}

#[test]
fn sqlite_back_references_are_saved_once() {
    let conn = open();
    let schema = IntrospectedSchema::new(&conn);
    let m = models();

    let mut graph = RecordGraph::new();
    let user = graph.create(&m.user, [("name", "Ann")]);
    let first = graph.create(&m.post, [("title", "one")]);
    let second = graph.create(&m.post, [("title", "two")]);
    graph.set_related_many(user, "posts", vec![first, second]).unwrap();
    graph.set_related_one(first, "author", Some(user)).unwrap();
    graph.set_related_one(second, "author", Some(user)).unwrap();

    let tree = relation_tree(["posts.author"]);
    let stats = save_graph(&conn, &schema, &mut graph, user, &tree).unwrap();

    assert_eq!(stats.inserted, 3);
    assert_eq!(stats.updated, 0);
    assert_eq!(count(&conn, "user"), 1);
    let user_id = id_of(&graph, user);
    assert_eq!(
        ints(&conn, "SELECT author_id FROM post ORDER BY id"),
        [[user_id], [user_id]]
    );
}

#[test]
fn sqlite_has_many_deletes_removed_rows() {
    let conn = open();
    conn.execute_raw(
        "INSERT INTO post (id, title) VALUES (1, 'First');
         INSERT INTO comment (id, body, post_id) VALUES (1, 'keep me', 1), (2, 'drop me', 1);
         INSERT INTO post (id, title) VALUES (2, 'Other');
         INSERT INTO comment (id, body, post_id) VALUES (3, 'elsewhere', 2);",
    )
    .unwrap();
    let schema = IntrospectedSchema::new(&conn);
    let cascade = Cascade::new(&conn, &schema);
    let m = models();

    let mut graph = RecordGraph::new();
    let post = graph.load(&m.post, [("id", Value::from(1_i64)), ("title", Value::from("First"))]);
    let kept = graph.load(
        &m.comment,
        [("id", Value::from(1_i64)), ("body", Value::from("kept"))],
    );
    let added = graph.create(&m.comment, [("body", "a new one")]);
    graph.set_related_many(post, "comments", vec![kept, added]).unwrap();

    assert!(
        cascade
            .save_with(&mut graph, post, &SaveOptions::new().with("comments"))
            .unwrap()
    );

    let added_id = id_of(&graph, added);
    assert_eq!(
        ints(&conn, "SELECT id, post_id FROM comment ORDER BY id"),
        [vec![1, 1], vec![3, 2], vec![added_id, 1]]
    );
    let body = conn
        .query_one("SELECT body FROM comment WHERE id = 1", &[])
        .unwrap()
        .unwrap();
    assert_eq!(body.get_named::<String>("body").unwrap(), "kept");
}

#[test]
fn sqlite_has_one_receives_owner_key() {
    let conn = open();
    let schema = IntrospectedSchema::new(&conn);
    let cascade = Cascade::new(&conn, &schema);
    let m = models();
    let profile_model = ModelDef::new("Profile", "profile").build();

    let mut graph = RecordGraph::new();
    let user = graph.create(&m.user, [("name", "Ann")]);
    let profile = graph.create(&profile_model, [("bio", "hi")]);
    graph.set_related_one(user, "profile", Some(profile)).unwrap();
    graph.add_processed_relation(user, "profile");

    assert!(cascade.save(&mut graph, user).unwrap());
    assert_eq!(
        ints(&conn, "SELECT user_id FROM profile"),
        [[id_of(&graph, user)]]
    );
}

#[test]
fn sqlite_declared_constraint_beats_key_position() {
    let conn = open();
    let schema = IntrospectedSchema::new(&conn);
    let m = models();

    let invoice_table = schema.table("invoice").unwrap();
    let account_table = schema.table("account").unwrap();
    assert_eq!(account_table.primary_key, ["region", "number"]);

    let relation = m.invoice.find_relation("account").unwrap();
    let keys = resolve_relation_keys(relation, &invoice_table, &account_table).unwrap();
    let pairs: Vec<(&str, &str)> = keys
        .pairs()
        .iter()
        .map(|p| (p.foreign.as_str(), p.referenced.as_str()))
        .collect();
    assert_eq!(
        pairs,
        [("acct_number", "number"), ("acct_region", "region")]
    );

    let cascade = Cascade::new(&conn, &schema);
    let mut graph = RecordGraph::new();
    let invoice = graph.create(&m.invoice, [("total", 40_i64)]);
    let account = graph.create(
        &m.account,
        [
            ("region", Value::from("eu")),
            ("number", Value::from(7_i64)),
            ("owner", Value::from("Ann")),
        ],
    );
    graph.set_related_one(invoice, "account", Some(account)).unwrap();

    assert!(
        cascade
            .save_with(&mut graph, invoice, &SaveOptions::new().with("account"))
            .unwrap()
    );
    let row = conn
        .query_one("SELECT acct_number, acct_region FROM invoice", &[])
        .unwrap()
        .unwrap();
    assert_eq!(row.get_named::<i64>("acct_number").unwrap(), 7);
    assert_eq!(row.get_named::<String>("acct_region").unwrap(), "eu");
    // composite keys are not assigned by the database
    assert_eq!(graph.attribute(account, "region"), Some(&Value::from("eu")));
}

#[test]
fn sqlite_composite_key_record_is_updated_by_full_key() {
    let conn = open();
    conn.execute_raw(
        "INSERT INTO account (region, number, owner) VALUES ('eu', 7, 'Ann'), ('us', 7, 'Bob');",
    )
    .unwrap();
    let schema = IntrospectedSchema::new(&conn);
    let cascade = Cascade::new(&conn, &schema);
    let m = models();

    let mut graph = RecordGraph::new();
    let account = graph.load(
        &m.account,
        [
            ("region", Value::from("us")),
            ("number", Value::from(7_i64)),
            ("owner", Value::from("Bea")),
        ],
    );
    assert!(cascade.save(&mut graph, account).unwrap());

    let owners = conn
        .query("SELECT owner FROM account ORDER BY region", &[])
        .unwrap();
    let owners: Vec<String> = owners
        .iter()
        .map(|row| row.get_named::<String>("owner").unwrap())
        .collect();
    assert_eq!(owners, ["Ann", "Bea"]);
}

#[test]
fn sqlite_storage_failure_rolls_back_everything() {
    let conn = open();
    let schema = IntrospectedSchema::new(&conn);
    let cascade = Cascade::new(&conn, &schema);
    let m = models();

    let mut graph = RecordGraph::new();
    let post = graph.create(&m.post, [("title", "Hello")]);
    let good = graph.create(&m.comment, [("body", "fine")]);
    // violates NOT NULL on comment.body
    let bad = graph.create(&m.comment, [("body", Value::Null)]);
    graph.set_related_many(post, "comments", vec![good, bad]).unwrap();

    let options = SaveOptions::new().with("comments").run_validation(false);
    let err = cascade.save_with(&mut graph, post, &options).unwrap_err();
    assert!(err.is_storage_error(), "unexpected error: {err}");

    assert_eq!(count(&conn, "post"), 0);
    assert_eq!(count(&conn, "comment"), 0);
    assert!(!conn.in_transaction());
    // the graph is back to its state before the call
    assert!(graph[post].is_new());
    assert!(graph.attribute(post, "id").is_none());
    assert!(graph.attribute(good, "post_id").is_none());
}

#[test]
fn sqlite_open_transaction_is_reused() {
    let conn = open();
    let schema = IntrospectedSchema::new(&conn);
    let cascade = Cascade::new(&conn, &schema);
    let m = models();

    conn.begin().unwrap();
    let mut graph = RecordGraph::new();
    let user = graph.create(&m.user, [("name", "Ann")]);
    assert!(cascade.save(&mut graph, user).unwrap());

    // the caller owns the transaction
    assert!(conn.in_transaction());
    assert_eq!(count(&conn, "user"), 1);
    conn.rollback().unwrap();
    assert_eq!(count(&conn, "user"), 0);
}

#[test]
fn sqlite_invalid_graph_writes_nothing() {
    let conn = open();
    let schema = IntrospectedSchema::new(&conn);
    let cascade = Cascade::new(&conn, &schema);
    let m = models();

    let mut graph = RecordGraph::new();
    let user = graph.create(&m.user, [("name", "Ann")]);
    let post = graph.create(&m.post, [("title", "ok")]);
    let comment = graph.create(&m.comment, [("body", "no")]);
    graph.set_related_many(user, "posts", vec![post]).unwrap();
    graph.set_related_many(post, "comments", vec![comment]).unwrap();

    let options = SaveOptions::new().with("posts.comments");
    assert!(!cascade.save_with(&mut graph, user, &options).unwrap());

    for table in ["user", "post", "comment"] {
        assert_eq!(count(&conn, table), 0, "{table} was written");
    }
    let nested = graph[user]
        .errors()
        .related_at("posts", 0)
        .and_then(|post| post.related_at("comments", 0))
        .expect("nested comment errors");
    assert_eq!(
        nested.field("body"),
        ["body is too short (minimum is 3 characters)."]
    );
}

#[test]
fn sqlite_mutual_belongs_to_is_stored_both_ways() {
    let conn = open();
    let schema = IntrospectedSchema::new(&conn);
    let cascade = Cascade::new(&conn, &schema);
    let m = models();

    let mut graph = RecordGraph::new();
    let member = graph.create(&m.member, [("name", "Ann")]);
    let company = graph.create(&m.company, [("name", "Acme")]);
    graph.set_related_one(member, "company", Some(company)).unwrap();
    graph.set_related_one(company, "owner", Some(member)).unwrap();
    graph.add_processed_relation(member, "company");
    graph.add_processed_relation(company, "owner");

    assert!(cascade.save(&mut graph, member).unwrap());

    let member_id = graph.attribute(member, "id").and_then(Value::as_i64).unwrap();
    let company_id = graph.attribute(company, "id").and_then(Value::as_i64).unwrap();
    assert_eq!(ints(&conn, "SELECT company_id FROM member"), [[company_id]]);
    assert_eq!(ints(&conn, "SELECT owner_id FROM company"), [[member_id]]);
    assert_eq!(
        graph.attribute(company, "owner_id").and_then(Value::as_i64),
        Some(member_id)
    );

    // saving again from the other side changes nothing
    assert!(cascade.save(&mut graph, company).unwrap());
    assert_eq!(count(&conn, "member"), 1);
    assert_eq!(count(&conn, "company"), 1);
}
