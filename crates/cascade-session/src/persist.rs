//! Cascading save of a record graph.
//!
//! # Order of writes
//!
//! For one record reached with a subtree:
//!
//! 1. every BelongsTo relation in the subtree: save the related record, then
//!    copy its key into the owner's foreign key columns (NULL when the
//!    relation is empty);
//! 2. the owner itself (INSERT when new, UPDATE by primary key otherwise),
//!    unless a cycle already wrote it;
//! 3. the remaining relations in tree order: HasOne and HasMany copy the
//!    owner's key into each related record and save it (HasMany first deletes
//!    stored rows no longer in the collection), ManyMany saves each related
//!    record and then rewrites the junction rows.
//!
//! A record is written at most once per save call. A record is never entered
//! again while it is still being saved: when a BelongsTo target is such an
//! ancestor, the owner's foreign key is filled in once the target is written.
//! Foreign keys assigned to a record after it was written are stored with an
//! UPDATE of just those columns. Relations that were never loaded on a record
//! are left alone.
//!
//! # Transactions
//!
//! [`save_graph`] runs inside the connection's open transaction when there is
//! one. Otherwise it opens its own, commits when the whole graph is written
//! and rolls back on the first error, restoring the in-memory graph to its
//! state before the call.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use cascade_core::{
    Connection, DefaultRelationTreeProvider, Error, RecordGraph, RecordId, Related,
    RelationDescriptor, RelationKind, RelationTree, Result, SchemaProvider, TableSchema,
    UsageError, Value, compare_keys, key_is_complete,
};

use crate::junction::{self, JunctionMap};
use crate::resolver::{KeyMap, resolve_relation_keys};
use crate::sql;
use crate::transaction::atomically;

/// Counts of the statements issued by one save.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveStats {
    /// Records inserted.
    pub inserted: usize,
    /// Records updated.
    pub updated: usize,
    /// HasMany rows deleted because they left their collection.
    pub deleted: usize,
    /// Junction rows written.
    pub junction_rows: usize,
}

/// Records already written by the current save call.
#[derive(Debug, Default)]
pub struct SaveSession {
    saved: HashSet<RecordId>,
    visiting: HashSet<RecordId>,
    pending: Vec<PendingKey>,
    stats: SaveStats,
}

/// A BelongsTo key of `owner` waiting for `target` to be written.
#[derive(Debug)]
struct PendingKey {
    owner: RecordId,
    target: RecordId,
    keys: KeyMap,
}

impl SaveSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_saved(&self, record: RecordId) -> bool {
        self.saved.contains(&record)
    }

    pub fn mark_saved(&mut self, record: RecordId) {
        self.saved.insert(record);
    }

    /// Whether `record` is being saved further up the current walk.
    pub fn is_visiting(&self, record: RecordId) -> bool {
        self.visiting.contains(&record)
    }

    /// Number of records written so far.
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    pub fn stats(&self) -> SaveStats {
        self.stats
    }
}

/// Save `record` and everything `tree` reaches from it, atomically.
///
/// `tree` is merged into the record's default processed tree. Validation is
/// not run here; see `Cascade::save`.
#[tracing::instrument(level = "debug", skip(conn, schema, graph, tree))]
pub fn save_graph<C, S>(
    conn: &C,
    schema: &S,
    graph: &mut RecordGraph,
    record: RecordId,
    tree: &RelationTree,
) -> Result<SaveStats>
where
    C: Connection + ?Sized,
    S: SchemaProvider + ?Sized,
{
    let start = Instant::now();
    let tree = graph.default_relation_tree(record).merged(tree);

    let mut persister = Persister::new(conn, schema);
    atomically(conn, graph, |graph| {
        persister.save_record(graph, record, &tree, &[])
    })?;

    let stats = persister.session.stats();
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis(),
        records = persister.session.len(),
        inserted = stats.inserted,
        updated = stats.updated,
        deleted = stats.deleted,
        junction_rows = stats.junction_rows,
        "Saved record graph"
    );
    Ok(stats)
}

/// Walks the graph for one save call.
struct Persister<'a, C: ?Sized, S: ?Sized> {
    conn: &'a C,
    schema: &'a S,
    session: SaveSession,
}

impl<'a, C, S> Persister<'a, C, S>
where
    C: Connection + ?Sized,
    S: SchemaProvider + ?Sized,
{
    fn new(conn: &'a C, schema: &'a S) -> Self {
        Self {
            conn,
            schema,
            session: SaveSession::new(),
        }
    }

    /// `forced` names foreign key columns the caller just set; they are
    /// written even when the tree restricts the record's attributes.
    fn save_record(
        &mut self,
        graph: &mut RecordGraph,
        record: RecordId,
        tree: &RelationTree,
        forced: &[String],
    ) -> Result<()> {
        if self.session.is_saved(record) || self.session.is_visiting(record) {
            return Ok(());
        }
        self.session.visiting.insert(record);

        let model = Arc::clone(graph.record(record)?.model());
        let partition = tree.partition(|name| model.has_relation(name));
        let attributes: Vec<String> = partition
            .attributes
            .iter()
            .map(|name| (*name).to_string())
            .collect();
        let relations: Vec<(RelationDescriptor, RelationTree)> = partition
            .relations
            .iter()
            .filter_map(|(name, subtree)| {
                model
                    .find_relation(name)
                    .map(|descriptor| (descriptor.clone(), (*subtree).clone()))
            })
            .collect();
        let table = self.schema.table(model.table())?;

        let mut forced = forced.to_vec();
        for (descriptor, subtree) in &relations {
            if descriptor.kind == RelationKind::BelongsTo {
                forced.extend(self.belongs_to(graph, record, &table, descriptor, subtree)?);
            }
        }

        self.write(graph, record, &table, &attributes, &forced)?;
        self.session.mark_saved(record);
        self.complete_pending(graph, record)?;

        for (descriptor, subtree) in &relations {
            match descriptor.kind {
                RelationKind::BelongsTo => {}
                RelationKind::HasOne => self.has_one(graph, record, &table, descriptor, subtree)?,
                RelationKind::HasMany => {
                    self.has_many(graph, record, &table, descriptor, subtree)?;
                }
                RelationKind::ManyMany => {
                    self.many_many(graph, record, &table, descriptor, subtree)?;
                }
            }
        }
        self.session.visiting.remove(&record);
        Ok(())
    }

    /// Recurse into a related record with its default tree merged in.
    fn save_related(
        &mut self,
        graph: &mut RecordGraph,
        related: RecordId,
        subtree: &RelationTree,
        forced: &[String],
    ) -> Result<()> {
        let tree = graph.default_relation_tree(related).merged(subtree);
        self.save_record(graph, related, &tree, forced)
    }

    /// Returns the owner's foreign key columns it set.
    fn belongs_to(
        &mut self,
        graph: &mut RecordGraph,
        record: RecordId,
        table: &TableSchema,
        descriptor: &RelationDescriptor,
        subtree: &RelationTree,
    ) -> Result<Vec<String>> {
        let related = match graph.related(record, &descriptor.name) {
            None => return Ok(Vec::new()),
            Some(Related::One(related)) => *related,
            Some(Related::Many(_)) => return Err(shape_mismatch(descriptor)),
        };
        let related_table = self.schema.table(&descriptor.related_table)?;
        let keys = resolve_relation_keys(descriptor, table, &related_table)?;

        let values = match related {
            Some(related) => {
                if self.session.is_visiting(related) && !self.session.is_saved(related) {
                    self.session.pending.push(PendingKey {
                        owner: record,
                        target: related,
                        keys: keys.clone(),
                    });
                } else {
                    self.save_related(graph, related, subtree, &[])?;
                }
                referenced_values(&keys, graph, related)?
            }
            None => vec![Value::Null; keys.len()],
        };
        tracing::debug!(
            relation = %descriptor.name,
            record = %record,
            key = ?values,
            "Setting belongs_to foreign key"
        );
        self.assign_foreign(graph, record, &keys, values)?;
        Ok(owned_columns(&keys))
    }

    fn has_one(
        &mut self,
        graph: &mut RecordGraph,
        record: RecordId,
        table: &TableSchema,
        descriptor: &RelationDescriptor,
        subtree: &RelationTree,
    ) -> Result<()> {
        let related = match graph.related(record, &descriptor.name) {
            None | Some(Related::One(None)) => return Ok(()),
            Some(Related::One(Some(related))) => *related,
            Some(Related::Many(_)) => return Err(shape_mismatch(descriptor)),
        };
        let related_table = self.schema.table(&descriptor.related_table)?;
        let keys = resolve_relation_keys(descriptor, table, &related_table)?;

        let values = referenced_values(&keys, graph, record)?;
        self.assign_foreign(graph, related, &keys, values)?;
        self.save_related(graph, related, subtree, &owned_columns(&keys))
    }

    fn has_many(
        &mut self,
        graph: &mut RecordGraph,
        record: RecordId,
        table: &TableSchema,
        descriptor: &RelationDescriptor,
        subtree: &RelationTree,
    ) -> Result<()> {
        let members = match graph.related(record, &descriptor.name) {
            None => return Ok(()),
            Some(Related::Many(members)) => members.clone(),
            Some(Related::One(_)) => return Err(shape_mismatch(descriptor)),
        };
        let related_table = self.schema.table(&descriptor.related_table)?;
        let keys = resolve_relation_keys(descriptor, table, &related_table)?;
        let owner_key = referenced_values(&keys, graph, record)?;

        if key_is_complete(&owner_key) {
            self.delete_orphans(graph, descriptor, &related_table, &keys, &owner_key, &members)?;
        }

        let forced = owned_columns(&keys);
        for member in members {
            self.assign_foreign(graph, member, &keys, owner_key.clone())?;
            self.save_related(graph, member, subtree, &forced)?;
        }
        Ok(())
    }

    /// Delete stored rows of the owner that are not among the persisted
    /// members of the collection.
    fn delete_orphans(
        &mut self,
        graph: &RecordGraph,
        descriptor: &RelationDescriptor,
        related_table: &TableSchema,
        keys: &KeyMap,
        owner_key: &[Value],
        members: &[RecordId],
    ) -> Result<()> {
        let primary_key = &related_table.primary_key;
        if primary_key.is_empty() {
            return Err(Error::relation_config(
                &descriptor.name,
                format!(
                    "has_many target '{}' needs a primary key to detect removed rows",
                    related_table.name
                ),
            ));
        }

        let mut current = Vec::new();
        for &member in members {
            let record = graph.record(member)?;
            if record.is_new() {
                continue;
            }
            let key: Vec<Value> = primary_key
                .iter()
                .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
                .collect();
            if key_is_complete(&key) {
                current.push(key);
            }
        }

        let select = sql::select(
            &related_table.name,
            primary_key,
            &keys.foreign_columns(),
            None,
        );
        tracing::trace!(sql = %select, "Loading stored has_many keys");
        let stored = self.conn.query(&select, owner_key)?;

        let delete = sql::delete(&related_table.name, primary_key);
        for row in stored {
            let key: Vec<Value> = primary_key
                .iter()
                .map(|column| row.get_by_name(column).cloned().unwrap_or(Value::Null))
                .collect();
            if current
                .iter()
                .any(|kept| compare_keys(kept, &key) == Ordering::Equal)
            {
                continue;
            }
            tracing::debug!(
                relation = %descriptor.name,
                table = %related_table.name,
                key = ?key,
                "Deleting row removed from has_many relation"
            );
            tracing::trace!(sql = %delete, "Executing DELETE");
            self.conn.execute(&delete, &key)?;
            self.session.stats.deleted += 1;
        }
        Ok(())
    }

    fn many_many(
        &mut self,
        graph: &mut RecordGraph,
        record: RecordId,
        table: &TableSchema,
        descriptor: &RelationDescriptor,
        subtree: &RelationTree,
    ) -> Result<()> {
        let members = match graph.related(record, &descriptor.name) {
            None => return Ok(()),
            Some(Related::Many(members)) => members.clone(),
            Some(Related::One(_)) => return Err(shape_mismatch(descriptor)),
        };
        let related_table = self.schema.table(&descriptor.related_table)?;
        let map = JunctionMap::resolve(descriptor, table, &related_table, self.schema)?;

        for &member in &members {
            self.save_related(graph, member, subtree, &[])?;
        }
        let rows = junction::reconcile(self.conn, graph, record, &descriptor.name, &map, &members)?;
        self.session.stats.junction_rows += rows;
        Ok(())
    }

    /// Fill in the keys that waited for `target` to be written.
    fn complete_pending(&mut self, graph: &mut RecordGraph, target: RecordId) -> Result<()> {
        let (ready, waiting): (Vec<PendingKey>, Vec<PendingKey>) =
            std::mem::take(&mut self.session.pending)
                .into_iter()
                .partition(|pending| pending.target == target);
        self.session.pending = waiting;

        for pending in ready {
            let values = referenced_values(&pending.keys, graph, target)?;
            tracing::debug!(
                record = %pending.owner,
                target = %target,
                key = ?values,
                "Completing deferred belongs_to foreign key"
            );
            self.assign_foreign(graph, pending.owner, &pending.keys, values)?;
        }
        Ok(())
    }

    /// Set foreign key columns on `record`. When the record was already
    /// written by this save, the columns that changed are updated in storage.
    fn assign_foreign(
        &mut self,
        graph: &mut RecordGraph,
        record: RecordId,
        keys: &KeyMap,
        values: Vec<Value>,
    ) -> Result<()> {
        let current = graph.record(record)?;
        let changed: Vec<String> = keys
            .pairs()
            .iter()
            .zip(&values)
            .filter(|(pair, value)| {
                current
                    .get(&pair.foreign)
                    .is_none_or(|old| old.key_cmp(value) != Ordering::Equal)
            })
            .map(|(pair, _)| pair.foreign.clone())
            .collect();
        set_foreign(graph, record, keys, values)?;

        if self.session.is_saved(record) && !changed.is_empty() {
            self.update_columns(graph, record, &changed)?;
        }
        Ok(())
    }

    /// UPDATE just `columns` of a stored record.
    fn update_columns(
        &mut self,
        graph: &RecordGraph,
        record: RecordId,
        columns: &[String],
    ) -> Result<()> {
        let current = graph.record(record)?;
        let table = self.schema.table(current.table())?;
        let key = stored_key(&table, graph, record)?;

        let mut values: Vec<Value> = columns
            .iter()
            .map(|column| current.get(column).cloned().unwrap_or(Value::Null))
            .collect();
        let update = sql::update(&table.name, columns, &table.primary_key);
        tracing::debug!(
            table = %table.name,
            record = %record,
            columns = ?columns,
            "Updating foreign key of a written record"
        );
        tracing::trace!(sql = %update, "Executing UPDATE");
        values.extend(key);
        self.conn.execute(&update, &values)?;
        self.session.stats.updated += 1;
        Ok(())
    }

    /// INSERT or UPDATE one record.
    ///
    /// Only table columns the record has a value for are written; a non-empty
    /// `attributes` list restricts them further (plus `forced`).
    fn write(
        &mut self,
        graph: &mut RecordGraph,
        record: RecordId,
        table: &TableSchema,
        attributes: &[String],
        forced: &[String],
    ) -> Result<()> {
        let current = graph.record(record)?;
        let restricted = !attributes.is_empty();
        let selected: Vec<(&String, &Value)> = table
            .columns
            .iter()
            .filter(|column| !restricted || attributes.contains(column) || forced.contains(column))
            .filter_map(|column| current.get(column).map(|value| (column, value)))
            .collect();

        if current.is_new() {
            let (columns, values): (Vec<&String>, Vec<Value>) = selected
                .into_iter()
                .filter(|(column, value)| !(value.is_null() && table.is_primary_key(column)))
                .map(|(column, value)| (column, value.clone()))
                .unzip();
            let insert = sql::insert(&table.name, &columns);
            tracing::debug!(table = %table.name, record = %record, columns = ?columns, "Inserting record");
            tracing::trace!(sql = %insert, "Executing INSERT");
            let id = self.conn.insert(&insert, &values)?;
            self.session.stats.inserted += 1;

            let current = graph.record_mut(record)?;
            if let [key] = table.primary_key.as_slice() {
                if current.get(key).is_none_or(Value::is_null) {
                    current.set(key.clone(), Value::BigInt(id));
                }
            }
            current.set_new(false);
            return Ok(());
        }

        let key = stored_key(table, graph, record)?;
        let (columns, mut values): (Vec<&String>, Vec<Value>) = selected
            .into_iter()
            .filter(|(column, _)| !table.is_primary_key(column))
            .map(|(column, value)| (column, value.clone()))
            .unzip();
        if columns.is_empty() {
            tracing::debug!(table = %table.name, record = %record, "Nothing to update");
            return Ok(());
        }
        let update = sql::update(&table.name, &columns, &table.primary_key);
        tracing::debug!(table = %table.name, record = %record, columns = ?columns, "Updating record");
        tracing::trace!(sql = %update, "Executing UPDATE");
        values.extend(key);
        self.conn.execute(&update, &values)?;
        self.session.stats.updated += 1;
        Ok(())
    }
}

/// Primary key of a stored record, for an UPDATE.
fn stored_key(table: &TableSchema, graph: &RecordGraph, record: RecordId) -> Result<Vec<Value>> {
    if table.primary_key.is_empty() {
        return Err(Error::config(format!(
            "table '{}' has no primary key; stored records cannot be updated",
            table.name
        )));
    }
    let current = graph.record(record)?;
    let key: Vec<Value> = table
        .primary_key
        .iter()
        .map(|column| current.get(column).cloned().unwrap_or(Value::Null))
        .collect();
    if !key_is_complete(&key) {
        return Err(Error::Usage(UsageError {
            message: format!(
                "stored record {} of '{}' has an incomplete primary key",
                record, table.name
            ),
            relation: None,
        }));
    }
    Ok(key)
}

/// Values of the key map's referenced columns on `record`.
fn referenced_values(keys: &KeyMap, graph: &RecordGraph, record: RecordId) -> Result<Vec<Value>> {
    let attributes = graph.record(record)?.attributes();
    Ok(keys
        .pairs()
        .iter()
        .map(|pair| {
            attributes
                .get(&pair.referenced)
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect())
}

/// Write `values` into the key map's foreign columns on `record`.
fn set_foreign(
    graph: &mut RecordGraph,
    record: RecordId,
    keys: &KeyMap,
    values: Vec<Value>,
) -> Result<()> {
    let target = graph.record_mut(record)?;
    for (pair, value) in keys.pairs().iter().zip(values) {
        target.set(pair.foreign.clone(), value);
    }
    Ok(())
}

fn owned_columns(keys: &KeyMap) -> Vec<String> {
    keys.foreign_columns()
        .into_iter()
        .map(String::from)
        .collect()
}

fn shape_mismatch(descriptor: &RelationDescriptor) -> Error {
    let expected = if descriptor.kind.is_collection() {
        "a collection"
    } else {
        "a single record"
    };
    Error::usage(
        &descriptor.name,
        format!("{} relation must hold {}", descriptor.kind, expected),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, TestSchema, blog, blog_schema, row};
    use cascade_core::{ModelDef, TableSchema};
    use serde_json::json;

    /// member belongs to a company, company belongs to its owning member.
    fn membership() -> (TestSchema, Arc<ModelDef>, Arc<ModelDef>) {
        let schema = TestSchema::new([
            TableSchema::new("member")
                .primary_key_column("id")
                .column("name")
                .foreign_key("company_id", "company", "id"),
            TableSchema::new("company")
                .primary_key_column("id")
                .column("name")
                .foreign_key("owner_id", "member", "id"),
        ]);
        let member = ModelDef::new("Member", "member")
            .relation(RelationDescriptor::belongs_to("company", "company", "company_id"))
            .build();
        let company = ModelDef::new("Company", "company")
            .relation(RelationDescriptor::belongs_to("owner", "member", "owner_id"))
            .build();
        (schema, member, company)
    }

    #[test]
    fn belongs_to_is_written_before_the_owner() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "p")]);
        let user = graph.create(&models.user, [("name", "u")]);
        graph.set_related_one(post, "author", Some(user)).unwrap();

        let tree = RelationTree::from_names(["author"]);
        let stats = save_graph(&conn, &schema, &mut graph, post, &tree).unwrap();

        let executed = conn.executed();
        assert_eq!(executed[0].0, "INSERT INTO \"user\" (\"name\") VALUES (?)");
        assert_eq!(
            executed[1].0,
            "INSERT INTO \"post\" (\"title\", \"author_id\") VALUES (?, ?)"
        );
        assert_eq!(executed[1].1, [Value::from("p"), Value::BigInt(1)]);
        assert_eq!(graph.attribute(user, "id"), Some(&Value::BigInt(1)));
        assert_eq!(graph.attribute(post, "id"), Some(&Value::BigInt(2)));
        assert!(!graph[post].is_new());
        assert_eq!(stats.inserted, 2);

        let state = conn.state.lock().unwrap();
        assert_eq!((state.begins, state.commits, state.rollbacks), (1, 1, 0));
    }

    #[test]
    fn empty_belongs_to_nulls_the_key_and_unloaded_is_untouched() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let kept = graph.load(
            &models.post,
            [("id", Value::BigInt(1)), ("title", "a".into()), ("author_id", Value::BigInt(4))],
        );
        let cleared = graph.load(
            &models.post,
            [("id", Value::BigInt(2)), ("title", "b".into()), ("author_id", Value::BigInt(4))],
        );
        graph.set_related_one(cleared, "author", None).unwrap();

        let tree = RelationTree::from_names(["author"]);
        save_graph(&conn, &schema, &mut graph, kept, &tree).unwrap();
        save_graph(&conn, &schema, &mut graph, cleared, &tree).unwrap();

        let executed = conn.executed();
        assert_eq!(executed[0].1[1], Value::BigInt(4));
        assert_eq!(executed[1].1[1], Value::Null);
    }

    #[test]
    fn has_many_deletes_removed_rows_and_sets_keys() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();
        conn.respond(
            "SELECT \"id\" FROM \"comment\"",
            vec![row(&[("id", Value::BigInt(10))]), row(&[("id", Value::BigInt(11))])],
        );

        let mut graph = RecordGraph::new();
        let post = graph.load(&models.post, [("id", Value::BigInt(1)), ("title", "p".into())]);
        let kept = graph.load(&models.comment, [("id", Value::BigInt(10)), ("body", "old".into())]);
        let added = graph.create(&models.comment, [("body", "new")]);
        graph.set_related_many(post, "comments", vec![kept, added]).unwrap();

        let tree = RelationTree::from_names(["comments"]);
        let stats = save_graph(&conn, &schema, &mut graph, post, &tree).unwrap();

        assert_eq!(
            conn.executed_sql(),
            [
                "UPDATE \"post\" SET \"title\" = ? WHERE \"id\" = ?",
                "DELETE FROM \"comment\" WHERE \"id\" = ?",
                "UPDATE \"comment\" SET \"body\" = ?, \"post_id\" = ? WHERE \"id\" = ?",
                "INSERT INTO \"comment\" (\"body\", \"post_id\") VALUES (?, ?)",
            ]
        );
        assert_eq!(conn.executed()[1].1, [Value::BigInt(11)]);
        assert_eq!(graph.attribute(added, "post_id"), Some(&Value::BigInt(1)));
        assert_eq!(
            stats,
            SaveStats {
                inserted: 1,
                updated: 2,
                deleted: 1,
                junction_rows: 0
            }
        );
    }

    #[test]
    fn has_one_copies_owner_key() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let user = graph.create(&models.user, [("name", "u")]);
        let profile = graph.create(&models.profile, [("bio", "hi")]);
        graph.set_related_one(user, "profile", Some(profile)).unwrap();

        save_graph(&conn, &schema, &mut graph, user, &RelationTree::from_names(["profile"]))
            .unwrap();
        assert_eq!(graph.attribute(profile, "user_id"), Some(&Value::BigInt(1)));
        assert_eq!(
            conn.executed_sql()[1],
            "INSERT INTO \"profile\" (\"bio\", \"user_id\") VALUES (?, ?)"
        );
    }

    #[test]
    fn cycles_write_each_record_once() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "p")]);
        let comment = graph.create(&models.comment, [("body", "c")]);
        graph.push_related(post, "comments", comment).unwrap();
        graph.set_related_one(comment, "post", Some(post)).unwrap();

        let tree = RelationTree::from_json(&json!({"comments": {"post": {"comments": {}}}})).unwrap();
        save_graph(&conn, &schema, &mut graph, post, &tree).unwrap();
        assert_eq!(
            conn.executed_sql(),
            [
                "INSERT INTO \"post\" (\"title\") VALUES (?)",
                "INSERT INTO \"comment\" (\"body\", \"post_id\") VALUES (?, ?)",
            ]
        );
    }

    #[test]
    fn mutual_belongs_to_through_default_trees() {
        let (schema, member_model, company_model) = membership();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let member = graph.create(&member_model, [("name", "m")]);
        let company = graph.create(&company_model, [("name", "c")]);
        graph.set_related_one(member, "company", Some(company)).unwrap();
        graph.set_related_one(company, "owner", Some(member)).unwrap();
        graph.add_processed_relation(member, "company");
        graph.add_processed_relation(company, "owner");

        let stats = save_graph(&conn, &schema, &mut graph, member, &RelationTree::new()).unwrap();
        assert_eq!(
            conn.executed_sql(),
            [
                "INSERT INTO \"company\" (\"name\", \"owner_id\") VALUES (?, ?)",
                "INSERT INTO \"member\" (\"name\", \"company_id\") VALUES (?, ?)",
                "UPDATE \"company\" SET \"owner_id\" = ? WHERE \"id\" = ?",
            ]
        );
        assert_eq!(conn.executed()[0].1, [Value::from("c"), Value::Null]);
        assert_eq!(conn.executed()[2].1, [Value::BigInt(2), Value::BigInt(1)]);
        assert_eq!(graph.attribute(company, "owner_id"), Some(&Value::BigInt(2)));
        assert_eq!(graph.attribute(member, "company_id"), Some(&Value::BigInt(1)));
        assert_eq!((stats.inserted, stats.updated), (2, 1));
    }

    #[test]
    fn foreign_key_of_written_record_is_updated() {
        let (schema, member_model, company_model) = membership();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let member = graph.create(&member_model, [("name", "m")]);
        let company = graph.create(&company_model, [("name", "c")]);
        graph.set_related_one(member, "company", Some(company)).unwrap();
        graph.set_related_one(company, "owner", Some(member)).unwrap();

        let tree = RelationTree::from_json(&json!({"company": {"owner": {}}})).unwrap();
        save_graph(&conn, &schema, &mut graph, member, &tree).unwrap();
        assert_eq!(conn.executed_sql().len(), 3);
        assert_eq!(graph.attribute(company, "owner_id"), Some(&Value::BigInt(2)));
    }

    #[test]
    fn has_many_member_written_earlier_is_moved() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let user = graph.create(&models.user, [("name", "u")]);
        let first = graph.create(&models.post, [("title", "first")]);
        let second = graph.create(&models.post, [("title", "second")]);
        let comment = graph.create(&models.comment, [("body", "moved")]);
        graph.set_related_many(user, "posts", vec![first, second]).unwrap();
        graph.push_related(first, "comments", comment).unwrap();
        graph.push_related(second, "comments", comment).unwrap();

        let tree = RelationTree::from_json(&json!({"posts": {"comments": {}}})).unwrap();
        save_graph(&conn, &schema, &mut graph, user, &tree).unwrap();

        // user 1, first 2, comment 3, second 4
        let executed = conn.executed();
        assert_eq!(executed.len(), 5);
        assert_eq!(
            executed[4].0,
            "UPDATE \"comment\" SET \"post_id\" = ? WHERE \"id\" = ?"
        );
        assert_eq!(executed[4].1, [Value::BigInt(4), Value::BigInt(3)]);
        assert_eq!(graph.attribute(comment, "post_id"), Some(&Value::BigInt(4)));
    }

    #[test]
    fn many_many_saves_members_then_rewrites_junction() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let post = graph.load(&models.post, [("id", Value::BigInt(3)), ("title", "p".into())]);
        let stored = graph.load(&models.tag, [("id", Value::BigInt(5)), ("name", "rust".into())]);
        let fresh = graph.create(&models.tag, [("name", "orm")]);
        graph.set_related_many(post, "tags", vec![stored, fresh]).unwrap();

        let stats =
            save_graph(&conn, &schema, &mut graph, post, &RelationTree::from_names(["tags"]))
                .unwrap();
        assert_eq!(
            conn.executed_sql(),
            [
                "UPDATE \"post\" SET \"title\" = ? WHERE \"id\" = ?",
                "UPDATE \"tag\" SET \"name\" = ? WHERE \"id\" = ?",
                "INSERT INTO \"tag\" (\"name\") VALUES (?)",
                "DELETE FROM \"post_tag\" WHERE \"post_id\" = ?",
                "INSERT INTO \"post_tag\" (\"post_id\", \"tag_id\") VALUES (?, ?)",
                "INSERT INTO \"post_tag\" (\"post_id\", \"tag_id\") VALUES (?, ?)",
            ]
        );
        assert_eq!(conn.executed()[5].1, [Value::BigInt(3), Value::BigInt(1)]);
        assert_eq!(stats.junction_rows, 2);
    }

    #[test]
    fn attribute_names_restrict_written_columns() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let post = graph.load(
            &models.post,
            [("id", Value::BigInt(1)), ("title", "t".into()), ("author_id", Value::BigInt(2))],
        );
        let user = graph.load(&models.user, [("id", Value::BigInt(9)), ("name", "n".into())]);
        graph.set_related_one(post, "author", Some(user)).unwrap();

        let tree = RelationTree::from_json(&json!({"title": {}, "author": ["id"]})).unwrap();
        save_graph(&conn, &schema, &mut graph, post, &tree).unwrap();

        // the author only has its key selected, which is never SET
        assert_eq!(
            conn.executed_sql(),
            ["UPDATE \"post\" SET \"title\" = ?, \"author_id\" = ? WHERE \"id\" = ?"]
        );
        assert_eq!(
            conn.executed()[0].1,
            [Value::from("t"), Value::BigInt(9), Value::BigInt(1)]
        );
    }

    #[test]
    fn default_tree_of_related_records_is_merged() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();

        let mut graph = RecordGraph::new();
        let user = graph.create(&models.user, [("name", "u")]);
        let post = graph.create(&models.post, [("title", "p")]);
        let comment = graph.create(&models.comment, [("body", "c")]);
        graph.push_related(user, "posts", post).unwrap();
        graph.push_related(post, "comments", comment).unwrap();
        graph.add_processed_relation(post, "comments");

        save_graph(&conn, &schema, &mut graph, user, &RelationTree::from_names(["posts"]))
            .unwrap();
        assert_eq!(conn.executed_sql().len(), 3);
        assert_eq!(graph.attribute(comment, "post_id"), Some(&Value::BigInt(2)));
    }

    #[test]
    fn failure_rolls_back_and_restores_the_graph() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();
        conn.fail_on("INSERT INTO \"comment\"");

        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "p")]);
        let comment = graph.create(&models.comment, [("body", "c")]);
        graph.push_related(post, "comments", comment).unwrap();

        let err = save_graph(&conn, &schema, &mut graph, post, &RelationTree::from_names(["comments"]))
            .unwrap_err();
        assert!(err.is_storage_error());
        assert!(graph[post].is_new());
        assert!(graph.attribute(post, "id").is_none());

        let state = conn.state.lock().unwrap();
        assert_eq!((state.begins, state.commits, state.rollbacks), (1, 0, 1));
    }

    #[test]
    fn open_transaction_is_reused() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();
        conn.begin().unwrap();

        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "p")]);
        save_graph(&conn, &schema, &mut graph, post, &RelationTree::new()).unwrap();

        assert!(conn.in_transaction());
        let state = conn.state.lock().unwrap();
        assert_eq!((state.begins, state.commits, state.rollbacks), (1, 0, 0));
    }

    #[test]
    fn configuration_errors_abort_the_save() {
        let models = blog();
        let schema = blog_schema();
        let conn = MockConnection::new();
        let broken = cascade_core::ModelDef::new("Post", "post")
            .relation(RelationDescriptor::many_many("tags", "tag", "post_tag"))
            .build();

        let mut graph = RecordGraph::new();
        let post = graph.create(&broken, [("title", "p")]);
        let tag = graph.create(&models.tag, [("name", "t")]);
        graph.push_related(post, "tags", tag).unwrap();

        let err = save_graph(&conn, &schema, &mut graph, post, &RelationTree::from_names(["tags"]))
            .unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(conn.state.lock().unwrap().rollbacks, 1);
    }
}
