//! Record type definitions.

use std::fmt;
use std::sync::Arc;

use crate::relation::{RelationDescriptor, RelationKind};
use crate::validate::{RecordValidator, RuleValidator};

/// A record type: its table, its declared relations and its field rules.
///
/// Definitions are built once and shared by every record of the type.
///
/// ```rust,ignore
/// let post = ModelDef::new("Post", "post")
///     .relation(RelationDescriptor::belongs_to("author", "user", "author_id"))
///     .relation(RelationDescriptor::has_many("comments", "comment", "post_id"))
///     .relation(RelationDescriptor::many_many("tags", "tag", "post_tag(post_id, tag_id)"))
///     .validator(RuleValidator::new().rule("title", Rule::Required))
///     .build();
/// ```
#[derive(Clone)]
pub struct ModelDef {
    name: String,
    table: String,
    relations: Vec<RelationDescriptor>,
    validator: Arc<dyn RecordValidator>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            relations: Vec::new(),
            validator: Arc::new(RuleValidator::new()),
        }
    }

    /// Declare a relation. A later declaration with the same name replaces
    /// the earlier one.
    #[must_use]
    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.retain(|r| r.name != relation.name);
        self.relations.push(relation);
        self
    }

    /// Set the record type's own validation rules.
    #[must_use]
    pub fn validator(mut self, validator: impl RecordValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Share the definition.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    /// Look up a declared relation.
    pub fn find_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Whether `name` is a declared relation.
    pub fn has_relation(&self, name: &str) -> bool {
        self.find_relation(name).is_some()
    }

    /// Kind of a declared relation.
    pub fn relation_kind(&self, name: &str) -> Option<RelationKind> {
        self.find_relation(name).map(|r| r.kind)
    }

    pub fn record_validator(&self) -> &dyn RecordValidator {
        self.validator.as_ref()
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("relations", &self.relations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relations_are_looked_up_by_name() {
        let post = ModelDef::new("Post", "post")
            .relation(RelationDescriptor::has_many("comments", "comment", "post_id"))
            .relation(RelationDescriptor::belongs_to("author", "user", "author_id"))
            .relation(RelationDescriptor::has_many("comments", "note", "post_id"))
            .build();

        assert_eq!(post.table(), "post");
        assert_eq!(post.relations().len(), 2);
        assert_eq!(post.relation_kind("author"), Some(RelationKind::BelongsTo));
        assert_eq!(
            post.find_relation("comments").map(|r| r.related_table.as_str()),
            Some("note")
        );
        assert!(!post.has_relation("title"));
    }
}
