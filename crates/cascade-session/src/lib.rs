//! Cascading validation and persistence for Cascade record graphs.
//!
//! `cascade-session` is the **engine layer**. Given a record in a
//! [`RecordGraph`] and a processed relation tree, it validates or saves the
//! record together with the related records the tree reaches.
//!
//! # Role In The Architecture
//!
//! - **Relation resolver**: turns foreign key specs and table metadata into
//!   concrete column maps ([`resolver`]).
//! - **Junction reconciler**: classifies junction columns and rewrites the
//!   junction rows of ManyMany relations ([`junction`]).
//! - **Junction overlay**: extra junction-row attributes per related record
//!   ([`overlay`]).
//! - **Recursive validator**: nested [`ValidationErrorTree`]s
//!   ([`validator`]).
//! - **Persistence engine**: BelongsTo first, then the owner, then dependent
//!   relations, all inside one transaction ([`persist`]).
//!
//! # Example
//!
//! ```ignore
//! let cascade = Cascade::new(&conn, &schema);
//!
//! let post = graph.create(&post_model, [("title", "Hello")]);
//! let comment = graph.create(&comment_model, [("body", "First!")]);
//! graph.push_related(post, "comments", comment)?;
//!
//! // validates post and comments, then writes both in one transaction
//! if !cascade.save_with(&mut graph, post, &SaveOptions::new().with("comments"))? {
//!     println!("{}", graph[post].errors());
//! }
//! ```

pub mod config;
pub mod junction;
pub mod link;
pub mod overlay;
pub mod persist;
pub mod resolver;
pub mod validator;

mod sql;
mod transaction;

#[cfg(test)]
mod testing;

pub use config::{CascadeConfig, SaveOptions, ValidateOptions};
pub use junction::{JunctionMap, JunctionSpec};
pub use persist::{SaveSession, SaveStats, save_graph};
pub use resolver::{KeyMap, KeyPair, resolve_key_map, resolve_relation_keys};
pub use validator::{clear_errors_tree, validate_tree};

use cascade_core::{
    Attributes, Connection, DefaultRelationTreeProvider, RecordGraph, RecordId, RelationTree,
    Result, SchemaProvider, ValidationErrorTree, Value,
};

/// Entry point binding a connection and a schema provider.
///
/// The engine keeps no state between calls: every record-level fact (the
/// is-new flag, stored errors, default processed trees, junction overlays)
/// lives in the [`RecordGraph`].
#[derive(Debug)]
pub struct Cascade<'a, C: ?Sized, S: ?Sized> {
    conn: &'a C,
    schema: &'a S,
    config: CascadeConfig,
}

impl<'a, C, S> Cascade<'a, C, S>
where
    C: Connection + ?Sized,
    S: SchemaProvider + ?Sized,
{
    /// Create an engine with the default configuration.
    pub fn new(conn: &'a C, schema: &'a S) -> Self {
        Self::with_config(conn, schema, CascadeConfig::default())
    }

    pub fn with_config(conn: &'a C, schema: &'a S, config: CascadeConfig) -> Self {
        Self {
            conn,
            schema,
            config,
        }
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    pub fn connection(&self) -> &'a C {
        self.conn
    }

    pub fn schema(&self) -> &'a S {
        self.schema
    }

    /// Validate `record` with its default processed tree.
    pub fn validate(&self, graph: &mut RecordGraph, record: RecordId) -> Result<bool> {
        self.validate_with(graph, record, &ValidateOptions::new())
    }

    /// Validate `record` and the related records the merged tree reaches.
    ///
    /// Stores the aggregated errors on `record` and returns whether there
    /// are none. Never touches storage.
    #[tracing::instrument(level = "debug", skip(self, graph, options))]
    pub fn validate_with(
        &self,
        graph: &mut RecordGraph,
        record: RecordId,
        options: &ValidateOptions,
    ) -> Result<bool> {
        let tree = graph
            .default_relation_tree(record)
            .merged(&options.relations);
        let clear = options
            .clear_errors
            .unwrap_or(self.config.clear_errors_on_validate);
        if clear {
            clear_errors_tree(graph, record, &tree)?;
        }
        validate_tree(graph, record, &tree)?;

        let valid = graph.record(record)?.errors().is_empty();
        tracing::debug!(record = %record, valid, "Validated record graph");
        Ok(valid)
    }

    /// Errors stored on `record` by the last validation.
    pub fn errors<'g>(
        &self,
        graph: &'g RecordGraph,
        record: RecordId,
    ) -> Result<&'g ValidationErrorTree> {
        Ok(graph.record(record)?.errors())
    }

    /// Save `record` with its default processed tree.
    pub fn save(&self, graph: &mut RecordGraph, record: RecordId) -> Result<bool> {
        self.save_with(graph, record, &SaveOptions::new())
    }

    /// Validate (unless disabled) and save `record` with the related records
    /// the merged tree reaches, in one transaction.
    ///
    /// Returns `Ok(false)` without writing anything when validation fails.
    /// Storage, configuration and usage errors roll back every write of the
    /// call and are returned unchanged.
    #[tracing::instrument(level = "debug", skip(self, graph, options))]
    pub fn save_with(
        &self,
        graph: &mut RecordGraph,
        record: RecordId,
        options: &SaveOptions,
    ) -> Result<bool> {
        let run_validation = options
            .run_validation
            .unwrap_or(self.config.validate_on_save);
        if run_validation {
            let validate = ValidateOptions {
                clear_errors: None,
                relations: options.relations.clone(),
            };
            if !self.validate_with(graph, record, &validate)? {
                tracing::info!(record = %record, "Save skipped: validation failed");
                return Ok(false);
            }
        }
        save_graph(self.conn, self.schema, graph, record, &options.relations)?;
        Ok(true)
    }

    /// Junction attributes of `related` within `owner`'s ManyMany relation.
    pub fn many_many_attributes(
        &self,
        graph: &mut RecordGraph,
        owner: RecordId,
        relation: &str,
        related: RecordId,
    ) -> Result<Attributes> {
        overlay::many_many_attributes(self.conn, self.schema, graph, owner, relation, related)
    }

    /// One junction attribute; `None` when the junction has no such column.
    pub fn many_many_attribute(
        &self,
        graph: &mut RecordGraph,
        owner: RecordId,
        relation: &str,
        related: RecordId,
        name: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .many_many_attributes(graph, owner, relation, related)?
            .remove(name))
    }

    /// Merge junction attributes for `related`; written on the next save.
    pub fn set_many_many_attributes<I, K, V>(
        &self,
        graph: &mut RecordGraph,
        owner: RecordId,
        relation: &str,
        related: RecordId,
        values: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        overlay::set_many_many_attributes(
            self.conn,
            self.schema,
            graph,
            owner,
            relation,
            related,
            values,
        )
    }

    /// See [`link::link`].
    pub fn link(
        &self,
        graph: &mut RecordGraph,
        owner: RecordId,
        relation: &str,
        related: RecordId,
    ) -> Result<()> {
        link::link(self.conn, self.schema, graph, owner, relation, related)
    }

    /// See [`link::unlink`].
    pub fn unlink(
        &self,
        graph: &mut RecordGraph,
        owner: RecordId,
        relation: &str,
        related: Option<RecordId>,
    ) -> Result<()> {
        link::unlink(self.conn, self.schema, graph, owner, relation, related)
    }
}

/// Build a processed relation tree from dotted paths.
///
/// ```ignore
/// let tree = relation_tree(["comments.author", "tags"]);
/// ```
pub fn relation_tree<I, P>(paths: I) -> RelationTree
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    let mut tree = RelationTree::new();
    for path in paths {
        tree.add_path(path.as_ref());
    }
    tree
}
