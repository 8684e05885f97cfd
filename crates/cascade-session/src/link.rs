//! Linking and unlinking one related record without a cascading save.
//!
//! Both operations touch only the rows that carry the relationship: the
//! junction row for ManyMany, the owner row for BelongsTo and the related
//! row(s) for HasOne and HasMany. The records involved must already be
//! stored. The in-memory relation is updated to match.

use cascade_core::{
    Connection, Error, RecordGraph, RecordId, RelationDescriptor, RelationKind, Result,
    SchemaProvider, TableSchema, Value, key_is_complete,
};

use crate::junction::JunctionMap;
use crate::resolver::{KeyMap, resolve_relation_keys};
use crate::sql;
use crate::transaction::atomically;

/// Add `related` to `owner`'s relation `relation`.
#[tracing::instrument(level = "debug", skip(conn, schema, graph))]
pub fn link<C, S>(
    conn: &C,
    schema: &S,
    graph: &mut RecordGraph,
    owner: RecordId,
    relation: &str,
    related: RecordId,
) -> Result<()>
where
    C: Connection + ?Sized,
    S: SchemaProvider + ?Sized,
{
    let descriptor = declared(graph, owner, relation)?;
    graph.record(related)?;
    let owner_table = schema.table(graph.record(owner)?.table())?;
    let related_table = schema.table(&descriptor.related_table)?;

    atomically(conn, graph, |graph| match descriptor.kind {
        RelationKind::ManyMany => {
            let map = JunctionMap::resolve(&descriptor, &owner_table, &related_table, schema)?;
            let owner_key = map.owner_key(graph.record(owner)?.attributes());
            let related_key = map.related_key(graph.record(related)?.attributes());
            if !key_is_complete(&owner_key) || !key_is_complete(&related_key) {
                return Err(Error::usage(
                    relation,
                    "both records need a key before they can be linked",
                ));
            }
            let mut row = graph
                .record(owner)?
                .overlay(relation, related)
                .cloned()
                .unwrap_or_default();
            for (pair, value) in map.owner_columns.iter().zip(owner_key) {
                row.insert(pair.foreign.clone(), value);
            }
            for (pair, value) in map.related_columns.iter().zip(related_key) {
                row.insert(pair.foreign.clone(), value);
            }
            let columns: Vec<&String> = row.keys().collect();
            let values: Vec<Value> = row.values().cloned().collect();
            let insert = sql::insert(&map.table, &columns);
            tracing::trace!(sql = %insert, "Executing junction INSERT");
            conn.execute(&insert, &values)?;
            graph.push_related(owner, relation, related)
        }
        RelationKind::BelongsTo => {
            let keys = resolve_relation_keys(&descriptor, &owner_table, &related_table)?;
            let values = stored_key(graph, related, &keys, relation)?;
            assign(conn, graph, &owner_table, owner, &keys, values)?;
            graph.set_related_one(owner, relation, Some(related))
        }
        RelationKind::HasOne | RelationKind::HasMany => {
            let keys = resolve_relation_keys(&descriptor, &owner_table, &related_table)?;
            let values = stored_key(graph, owner, &keys, relation)?;
            assign(conn, graph, &related_table, related, &keys, values)?;
            if descriptor.kind == RelationKind::HasOne {
                graph.set_related_one(owner, relation, Some(related))
            } else {
                graph.push_related(owner, relation, related)
            }
        }
    })
}

/// Remove `related` (or every related record, when `None`) from `owner`'s
/// relation `relation`.
#[tracing::instrument(level = "debug", skip(conn, schema, graph))]
pub fn unlink<C, S>(
    conn: &C,
    schema: &S,
    graph: &mut RecordGraph,
    owner: RecordId,
    relation: &str,
    related: Option<RecordId>,
) -> Result<()>
where
    C: Connection + ?Sized,
    S: SchemaProvider + ?Sized,
{
    let descriptor = declared(graph, owner, relation)?;
    if let Some(related) = related {
        graph.record(related)?;
        if graph
            .related(owner, relation)
            .is_some_and(|loaded| !loaded.contains(related))
        {
            return Err(Error::usage(
                relation,
                format!("record {} is not in the loaded relation of {}", related, owner),
            ));
        }
    }
    let owner_table = schema.table(graph.record(owner)?.table())?;
    let related_table = schema.table(&descriptor.related_table)?;

    atomically(conn, graph, |graph| match descriptor.kind {
        RelationKind::ManyMany => {
            let map = JunctionMap::resolve(&descriptor, &owner_table, &related_table, schema)?;
            let mut key = map.owner_key(graph.record(owner)?.attributes());
            let mut columns = map.owner_junction_columns();
            if let Some(related) = related {
                key.extend(map.related_key(graph.record(related)?.attributes()));
                columns.extend(map.related_junction_columns());
            }
            if !key_is_complete(&key) {
                return Err(Error::usage(
                    relation,
                    "records need a key before they can be unlinked",
                ));
            }
            let delete = sql::delete(&map.table, &columns);
            tracing::trace!(sql = %delete, "Executing junction DELETE");
            conn.execute(&delete, &key)?;
            match related {
                Some(related) => {
                    graph.remove_related(owner, relation, related);
                    Ok(())
                }
                None => graph.set_related_many(owner, relation, Vec::new()),
            }
        }
        RelationKind::BelongsTo => {
            let keys = resolve_relation_keys(&descriptor, &owner_table, &related_table)?;
            let nulls = vec![Value::Null; keys.len()];
            assign(conn, graph, &owner_table, owner, &keys, nulls)?;
            graph.set_related_one(owner, relation, None)
        }
        RelationKind::HasOne | RelationKind::HasMany => {
            let keys = resolve_relation_keys(&descriptor, &owner_table, &related_table)?;
            let targets = match related {
                Some(related) => vec![related],
                None => graph
                    .related(owner, relation)
                    .map(|loaded| loaded.ids())
                    .unwrap_or_default(),
            };
            for target in &targets {
                let nulls = vec![Value::Null; keys.len()];
                assign(conn, graph, &related_table, *target, &keys, nulls)?;
                graph.remove_related(owner, relation, *target);
            }
            Ok(())
        }
    })
}

fn declared(graph: &RecordGraph, owner: RecordId, relation: &str) -> Result<RelationDescriptor> {
    let record = graph.record(owner)?;
    record
        .model()
        .find_relation(relation)
        .cloned()
        .ok_or_else(|| {
            Error::usage(
                relation,
                format!("'{}' declares no such relation", record.model().name()),
            )
        })
}

/// Values of the referenced columns of a stored record.
fn stored_key(
    graph: &RecordGraph,
    record: RecordId,
    keys: &KeyMap,
    relation: &str,
) -> Result<Vec<Value>> {
    let source = graph.record(record)?;
    let values: Vec<Value> = keys
        .pairs()
        .iter()
        .map(|pair| source.get(&pair.referenced).cloned().unwrap_or(Value::Null))
        .collect();
    if source.is_new() || !key_is_complete(&values) {
        return Err(Error::usage(
            relation,
            format!("record {} must be stored before it can be linked", record),
        ));
    }
    Ok(values)
}

/// Set the key map's foreign columns on a stored record and UPDATE them.
fn assign<C: Connection + ?Sized>(
    conn: &C,
    graph: &mut RecordGraph,
    table: &TableSchema,
    record: RecordId,
    keys: &KeyMap,
    values: Vec<Value>,
) -> Result<()> {
    let target = graph.record_mut(record)?;
    let primary_key: Vec<Value> = table
        .primary_key
        .iter()
        .map(|column| target.get(column).cloned().unwrap_or(Value::Null))
        .collect();
    if target.is_new() || !key_is_complete(&primary_key) {
        return Err(Error::Usage(cascade_core::UsageError {
            message: format!(
                "record {} of '{}' must be stored before its foreign key can be updated",
                record, table.name
            ),
            relation: None,
        }));
    }

    for (pair, value) in keys.pairs().iter().zip(&values) {
        target.set(pair.foreign.clone(), value.clone());
    }
    let mut params = values;
    params.extend(primary_key);
    let update = sql::update(&table.name, &keys.foreign_columns(), &table.primary_key);
    tracing::trace!(sql = %update, "Executing UPDATE");
    conn.execute(&update, &params)?;
    Ok(())
}
