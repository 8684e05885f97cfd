//! Records and the arena that owns them.
//!
//! Records reference each other through relations, and graphs may be cyclic
//! (a post has many comments, each comment belongs to the post). All records
//! of one graph therefore live in a [`RecordGraph`] arena and are addressed by
//! a copyable [`RecordId`]. Identity is the id, not the primary key: a new
//! record has no key yet.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use crate::error::{Error, Result, UsageError};
use crate::model::ModelDef;
use crate::row::Row;
use crate::tree::RelationTree;
use crate::validate::ValidationErrorTree;
use crate::value::Value;

/// Attribute name to value.
pub type Attributes = BTreeMap<String, Value>;

/// Identity of a record inside its [`RecordGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(usize);

impl RecordId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The loaded value of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Related {
    /// BelongsTo / HasOne: at most one record.
    One(Option<RecordId>),
    /// HasMany / ManyMany: an ordered collection.
    Many(Vec<RecordId>),
}

impl Related {
    /// Every record in the relation, in order.
    pub fn ids(&self) -> Vec<RecordId> {
        match self {
            Related::One(one) => one.iter().copied().collect(),
            Related::Many(many) => many.clone(),
        }
    }

    /// Whether `id` is part of the relation.
    pub fn contains(&self, id: RecordId) -> bool {
        match self {
            Related::One(one) => *one == Some(id),
            Related::Many(many) => many.contains(&id),
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Related::Many(_))
    }
}

/// One entity instance.
#[derive(Debug, Clone)]
pub struct Record {
    model: Arc<ModelDef>,
    attributes: Attributes,
    relations: HashMap<String, Related>,
    is_new: bool,
    errors: ValidationErrorTree,
    processed: RelationTree,
    overlays: HashMap<String, HashMap<RecordId, Attributes>>,
}

impl Record {
    fn new(model: Arc<ModelDef>, attributes: Attributes, is_new: bool) -> Self {
        Self {
            model,
            attributes,
            relations: HashMap::new(),
            is_new,
            errors: ValidationErrorTree::new(),
            processed: RelationTree::new(),
            overlays: HashMap::new(),
        }
    }

    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    /// Table of the record's type.
    pub fn table(&self) -> &str {
        self.model.table()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Whether the next save inserts (true) or updates (false).
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn set_new(&mut self, is_new: bool) {
        self.is_new = is_new;
    }

    /// Loaded value of a relation, `None` when not loaded.
    pub fn related(&self, relation: &str) -> Option<&Related> {
        self.relations.get(relation)
    }

    /// Errors stored by the last validation.
    pub fn errors(&self) -> &ValidationErrorTree {
        &self.errors
    }

    pub fn set_errors(&mut self, errors: ValidationErrorTree) {
        self.errors = errors;
    }

    /// Default processed relation tree, merged into every call.
    pub fn processed_relations(&self) -> &RelationTree {
        &self.processed
    }

    pub fn processed_relations_mut(&mut self) -> &mut RelationTree {
        &mut self.processed
    }

    /// Junction overlay for a related record, if one was initialized.
    pub fn overlay(&self, relation: &str, related: RecordId) -> Option<&Attributes> {
        self.overlays.get(relation).and_then(|m| m.get(&related))
    }

    /// Store the junction overlay for a related record.
    pub fn set_overlay(&mut self, relation: &str, related: RecordId, attributes: Attributes) {
        self.overlays
            .entry(relation.to_string())
            .or_default()
            .insert(related, attributes);
    }
}

/// Arena owning every record of one object graph.
///
/// Indexing with a [`RecordId`] from another graph panics; use
/// [`RecordGraph::record`] for a fallible lookup.
#[derive(Debug, Clone, Default)]
pub struct RecordGraph {
    records: Vec<Record>,
}

impl RecordGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a new (not yet stored) record.
    pub fn create<I, K, V>(&mut self, model: &Arc<ModelDef>, attributes: I) -> RecordId
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.push(Record::new(
            Arc::clone(model),
            collect_attributes(attributes),
            true,
        ))
    }

    /// Add a record that already exists in storage.
    pub fn load<I, K, V>(&mut self, model: &Arc<ModelDef>, attributes: I) -> RecordId
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.push(Record::new(
            Arc::clone(model),
            collect_attributes(attributes),
            false,
        ))
    }

    /// Add a stored record from a result row.
    pub fn load_row(&mut self, model: &Arc<ModelDef>, row: &Row) -> RecordId {
        let attributes = row
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        self.push(Record::new(Arc::clone(model), attributes, false))
    }

    fn push(&mut self, record: Record) -> RecordId {
        let id = RecordId(self.records.len());
        self.records.push(record);
        id
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id.0)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(id.0)
    }

    /// Fallible lookup.
    pub fn record(&self, id: RecordId) -> Result<&Record> {
        self.records.get(id.0).ok_or_else(|| unknown_record(id))
    }

    /// Fallible mutable lookup.
    pub fn record_mut(&mut self, id: RecordId) -> Result<&mut Record> {
        self.records.get_mut(id.0).ok_or_else(|| unknown_record(id))
    }

    /// Every record id, in creation order.
    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        (0..self.records.len()).map(RecordId)
    }

    /// Get an attribute of a record.
    pub fn attribute(&self, id: RecordId, name: &str) -> Option<&Value> {
        self.get(id).and_then(|r| r.get(name))
    }

    /// Set an attribute of a record.
    pub fn set_attribute(
        &mut self,
        id: RecordId,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.record_mut(id)?.set(name, value);
        Ok(())
    }

    /// Loaded value of a relation.
    pub fn related(&self, id: RecordId, relation: &str) -> Option<&Related> {
        self.get(id).and_then(|r| r.related(relation))
    }

    /// Set a single-valued relation (BelongsTo, HasOne).
    pub fn set_related_one(
        &mut self,
        id: RecordId,
        relation: &str,
        related: Option<RecordId>,
    ) -> Result<()> {
        if let Some(related) = related {
            self.check_target(id, relation, related)?;
        }
        self.set_related(id, relation, Related::One(related), false)
    }

    /// Set a collection relation (HasMany, ManyMany).
    pub fn set_related_many(
        &mut self,
        id: RecordId,
        relation: &str,
        related: Vec<RecordId>,
    ) -> Result<()> {
        for member in &related {
            self.check_target(id, relation, *member)?;
        }
        self.set_related(id, relation, Related::Many(related), true)
    }

    /// Append one record to a collection relation, loading it as an empty
    /// collection first when needed.
    pub fn push_related(&mut self, id: RecordId, relation: &str, related: RecordId) -> Result<()> {
        self.check_target(id, relation, related)?;
        let record = self.declared(id, relation, true)?;
        match record
            .relations
            .entry(relation.to_string())
            .or_insert_with(|| Related::Many(Vec::new()))
        {
            Related::Many(members) => {
                if !members.contains(&related) {
                    members.push(related);
                }
            }
            one @ Related::One(_) => *one = Related::Many(vec![related]),
        }
        Ok(())
    }

    /// Remove a record from a relation. Returns whether it was present.
    pub fn remove_related(&mut self, id: RecordId, relation: &str, related: RecordId) -> bool {
        let Some(value) = self
            .get_mut(id)
            .and_then(|r| r.relations.get_mut(relation))
        else {
            return false;
        };
        match value {
            Related::One(one) if *one == Some(related) => {
                *one = None;
                true
            }
            Related::Many(members) => {
                let before = members.len();
                members.retain(|m| *m != related);
                before != members.len()
            }
            Related::One(_) => false,
        }
    }

    fn set_related(
        &mut self,
        id: RecordId,
        relation: &str,
        related: Related,
        collection: bool,
    ) -> Result<()> {
        let record = self.declared(id, relation, collection)?;
        record.relations.insert(relation.to_string(), related);
        Ok(())
    }

    /// `related` must exist and be stored in the relation's related table.
    /// An undeclared relation is left to [`Self::declared`].
    fn check_target(&self, id: RecordId, relation: &str, related: RecordId) -> Result<()> {
        let target = self.record(related)?;
        let Some(descriptor) = self.record(id)?.model.find_relation(relation) else {
            return Ok(());
        };
        if target.table() != descriptor.related_table {
            return Err(Error::usage(
                relation,
                format!(
                    "relation targets table '{}' but record {} is stored in '{}'",
                    descriptor.related_table,
                    related,
                    target.table()
                ),
            ));
        }
        Ok(())
    }

    /// The record, provided it declares `relation` with the given shape.
    fn declared(&mut self, id: RecordId, relation: &str, collection: bool) -> Result<&mut Record> {
        let record = self.record_mut(id)?;
        let Some(kind) = record.model.relation_kind(relation) else {
            return Err(Error::usage(
                relation,
                format!("'{}' declares no such relation", record.model.name()),
            ));
        };
        if kind.is_collection() != collection {
            let expected = if kind.is_collection() {
                "a collection"
            } else {
                "a single record"
            };
            return Err(Error::usage(
                relation,
                format!("{} relation holds {}", kind, expected),
            ));
        }
        Ok(record)
    }

    /// Add a dotted path (`"comments.author"`) to a record's default
    /// processed relation tree.
    pub fn add_processed_relation(&mut self, id: RecordId, path: &str) -> &mut Self {
        self[id].processed.add_path(path);
        self
    }

    /// Merge a whole tree into a record's default processed relation tree.
    pub fn add_processed_tree(&mut self, id: RecordId, tree: &RelationTree) -> &mut Self {
        self[id].processed.merge(tree);
        self
    }

    /// Remove a name (or dotted path) from a record's default tree.
    pub fn remove_processed_relation(&mut self, id: RecordId, path: &str) -> &mut Self {
        self[id].processed.remove_path(path);
        self
    }

    /// Errors stored by the last validation of a record.
    pub fn errors(&self, id: RecordId) -> Option<&ValidationErrorTree> {
        self.get(id).map(Record::errors)
    }
}

impl Index<RecordId> for RecordGraph {
    type Output = Record;

    fn index(&self, id: RecordId) -> &Record {
        &self.records[id.0]
    }
}

impl IndexMut<RecordId> for RecordGraph {
    fn index_mut(&mut self, id: RecordId) -> &mut Record {
        &mut self.records[id.0]
    }
}

/// Supplies the default processed relation tree attached to a record.
///
/// The persistence engine merges it into the subtree it was handed whenever
/// it recurses into a related record.
pub trait DefaultRelationTreeProvider {
    fn default_relation_tree(&self, record: RecordId) -> RelationTree;
}

impl DefaultRelationTreeProvider for RecordGraph {
    fn default_relation_tree(&self, record: RecordId) -> RelationTree {
        self.get(record)
            .map(|r| r.processed.clone())
            .unwrap_or_default()
    }
}

fn collect_attributes<I, K, V>(attributes: I) -> Attributes
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    attributes
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn unknown_record(id: RecordId) -> Error {
    Error::Usage(UsageError {
        message: format!("record {} does not belong to this graph", id),
        relation: None,
    })
}
