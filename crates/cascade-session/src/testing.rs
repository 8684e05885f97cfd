//! In-memory connection for unit tests.

use std::sync::{Arc, Mutex};

use cascade_core::{
    Connection, Error, IsolationLevel, ModelDef, QueryError, QueryErrorKind, RelationDescriptor,
    Result, Row, Rule, RuleValidator, SchemaProvider, TableSchema, TransactionError,
    TransactionErrorKind, Value,
};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Every write statement with its parameters.
    pub executed: Vec<(String, Vec<Value>)>,
    /// Every query with its parameters.
    pub queried: Vec<(String, Vec<Value>)>,
    /// Rows returned for queries whose SQL starts with the prefix.
    pub responses: Vec<(String, Vec<Row>)>,
    /// Writes whose SQL contains this text fail with a constraint error.
    pub fail_on: Option<String>,
    pub next_id: i64,
    pub in_transaction: bool,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        let conn = Self::default();
        conn.state.lock().unwrap().next_id = 1;
        conn
    }

    pub fn respond(&self, sql_prefix: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((sql_prefix.to_string(), rows));
    }

    pub fn fail_on(&self, fragment: &str) {
        self.state.lock().unwrap().fail_on = Some(fragment.to_string());
    }

    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed().into_iter().map(|(sql, _)| sql).collect()
    }

    pub fn queried_sql(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .queried
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    fn write(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_on.as_deref().is_some_and(|f| sql.contains(f)) {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                sql: Some(sql.to_string()),
                message: "constraint failed".to_string(),
                source: None,
            }));
        }
        state.executed.push((sql.to_string(), params.to_vec()));
        Ok(())
    }
}

impl Connection for MockConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state.lock().unwrap();
        state.queried.push((sql.to_string(), params.to_vec()));
        Ok(state
            .responses
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.write(sql, params)?;
        Ok(1)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.write(sql, params)?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        Ok(id)
    }

    fn begin_with(&self, _isolation: IsolationLevel) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                message: "transaction already active".to_string(),
            }));
        }
        state.in_transaction = true;
        state.begins += 1;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.in_transaction = false;
        state.commits += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.in_transaction = false;
        state.rollbacks += 1;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().unwrap().in_transaction
    }
}

/// Tables keyed by name.
#[derive(Debug, Default)]
pub(crate) struct TestSchema(pub Vec<Arc<TableSchema>>);

impl TestSchema {
    pub fn new<I: IntoIterator<Item = TableSchema>>(tables: I) -> Self {
        Self(tables.into_iter().map(Arc::new).collect())
    }
}

impl SchemaProvider for TestSchema {
    fn table(&self, name: &str) -> Result<Arc<TableSchema>> {
        self.0
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| Error::table_not_found(name))
    }
}

/// A single result row.
pub(crate) fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs.iter().map(|(name, _)| (*name).to_string()).collect(),
        pairs.iter().map(|(_, value)| value.clone()).collect(),
    )
}

/// Blog schema shared by the unit tests:
/// user, post (belongs to user), comment (belongs to post),
/// profile (has one per user), tag, post_tag junction with a weight.
pub(crate) fn blog_schema() -> TestSchema {
    TestSchema::new([
        TableSchema::new("user")
            .primary_key_column("id")
            .column("name"),
        TableSchema::new("profile")
            .primary_key_column("id")
            .column("bio")
            .foreign_key("user_id", "user", "id"),
        TableSchema::new("post")
            .primary_key_column("id")
            .column("title")
            .foreign_key("author_id", "user", "id"),
        TableSchema::new("comment")
            .primary_key_column("id")
            .column("body")
            .foreign_key("post_id", "post", "id"),
        TableSchema::new("tag")
            .primary_key_column("id")
            .column("name"),
        TableSchema::new("post_tag")
            .foreign_key("post_id", "post", "id")
            .foreign_key("tag_id", "tag", "id")
            .column("weight"),
    ])
}

pub(crate) struct Blog {
    pub user: Arc<ModelDef>,
    pub profile: Arc<ModelDef>,
    pub post: Arc<ModelDef>,
    pub comment: Arc<ModelDef>,
    pub tag: Arc<ModelDef>,
}

/// Record types over [`blog_schema`].
pub(crate) fn blog() -> Blog {
    Blog {
        user: ModelDef::new("User", "user")
            .relation(RelationDescriptor::has_one("profile", "profile", "user_id"))
            .relation(RelationDescriptor::has_many("posts", "post", "author_id"))
            .validator(RuleValidator::new().rule("name", Rule::Required))
            .build(),
        profile: ModelDef::new("Profile", "profile")
            .relation(RelationDescriptor::belongs_to("user", "user", "user_id"))
            .build(),
        post: ModelDef::new("Post", "post")
            .relation(RelationDescriptor::belongs_to("author", "user", "author_id"))
            .relation(RelationDescriptor::has_many("comments", "comment", "post_id"))
            .relation(RelationDescriptor::many_many(
                "tags",
                "tag",
                "post_tag(post_id, tag_id)",
            ))
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
        tag: ModelDef::new("Tag", "tag")
            .validator(RuleValidator::new().rule("name", Rule::Required))
            .build(),
    }
}
