//! Extra junction-row attributes of ManyMany relations.
//!
//! Besides the key columns a junction row may carry data of its own (a tag's
//! weight on a post). The overlay holds those values per owner, relation and
//! related record. It is seeded the first time it is touched: from the stored
//! junction row when both keys are known and the row exists, otherwise with
//! NULL for every junction column. Key columns never appear in an overlay;
//! reconciliation fills them in.

use cascade_core::{
    Attributes, Connection, Error, RecordGraph, RecordId, RelationDescriptor, RelationKind, Result,
    SchemaProvider, Value, key_is_complete,
};

use crate::junction::JunctionMap;
use crate::sql;

/// The ManyMany relation `relation` of `owner`, provided `related` is loaded
/// in it.
fn many_many(
    graph: &RecordGraph,
    owner: RecordId,
    relation: &str,
    related: RecordId,
) -> Result<RelationDescriptor> {
    let record = graph.record(owner)?;
    let descriptor = record.model().find_relation(relation).ok_or_else(|| {
        Error::usage(
            relation,
            format!("'{}' declares no such relation", record.model().name()),
        )
    })?;
    if descriptor.kind != RelationKind::ManyMany {
        return Err(Error::usage(
            relation,
            format!(
                "junction attributes exist only on many_many relations, not {}",
                descriptor.kind
            ),
        ));
    }
    if !record.related(relation).is_some_and(|r| r.contains(related)) {
        return Err(Error::usage(
            relation,
            format!(
                "record {} is not in the loaded relation of {}",
                related, owner
            ),
        ));
    }
    Ok(descriptor.clone())
}

/// Seed the overlay if it does not exist yet; returns the junction map.
fn ensure<C, S>(
    conn: &C,
    schema: &S,
    graph: &mut RecordGraph,
    owner: RecordId,
    relation: &str,
    related: RecordId,
) -> Result<JunctionMap>
where
    C: Connection + ?Sized,
    S: SchemaProvider + ?Sized,
{
    let descriptor = many_many(graph, owner, relation, related)?;
    let owner_record = graph.record(owner)?;
    let map = JunctionMap::for_relation(schema, owner_record.table(), &descriptor)?;
    if owner_record.overlay(relation, related).is_some() {
        return Ok(map);
    }

    let owner_key = map.owner_key(owner_record.attributes());
    let related_key = map.related_key(graph.record(related)?.attributes());
    let stored = if key_is_complete(&owner_key) && key_is_complete(&related_key) {
        let mut key_columns = map.owner_junction_columns();
        key_columns.extend(map.related_junction_columns());
        let select = sql::select::<&str, _>(&map.table, &[], &key_columns, Some(1));
        let params: Vec<Value> = owner_key.into_iter().chain(related_key).collect();
        tracing::trace!(sql = %select, "Loading junction row");
        conn.query_one(&select, &params)?
    } else {
        None
    };

    let mut attributes: Attributes = match &stored {
        Some(row) => row
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
        None => schema
            .table(&map.table)?
            .columns
            .iter()
            .map(|column| (column.clone(), Value::Null))
            .collect(),
    };
    attributes.retain(|column, _| !map.is_key_column(column));

    tracing::debug!(
        relation,
        owner = %owner,
        related = %related,
        from_storage = stored.is_some(),
        "Initialized junction attributes"
    );
    graph
        .record_mut(owner)?
        .set_overlay(relation, related, attributes);
    Ok(map)
}

/// Junction attributes of `related` within `owner`'s ManyMany `relation`.
pub fn many_many_attributes<C, S>(
    conn: &C,
    schema: &S,
    graph: &mut RecordGraph,
    owner: RecordId,
    relation: &str,
    related: RecordId,
) -> Result<Attributes>
where
    C: Connection + ?Sized,
    S: SchemaProvider + ?Sized,
{
    ensure(conn, schema, graph, owner, relation, related)?;
    Ok(graph
        .record(owner)?
        .overlay(relation, related)
        .cloned()
        .unwrap_or_default())
}

/// Merge `values` into the junction attributes of `related`. Key columns are
/// ignored.
pub fn set_many_many_attributes<C, S>(
    conn: &C,
    schema: &S,
    graph: &mut RecordGraph,
    owner: RecordId,
    relation: &str,
    related: RecordId,
    values: Attributes,
) -> Result<()>
where
    C: Connection + ?Sized,
    S: SchemaProvider + ?Sized,
{
    let map = ensure(conn, schema, graph, owner, relation, related)?;
    let record = graph.record_mut(owner)?;
    let mut attributes = record
        .overlay(relation, related)
        .cloned()
        .unwrap_or_default();
    for (column, value) in values {
        if map.is_key_column(&column) {
            tracing::debug!(relation, column = %column, "Ignoring junction key column");
            continue;
        }
        attributes.insert(column, value);
    }
    record.set_overlay(relation, related, attributes);
    Ok(())
}
