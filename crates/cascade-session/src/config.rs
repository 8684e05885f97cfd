//! Engine configuration and per-call options.

use cascade_core::{RelationTree, Result};

/// Defaults applied when a call does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeConfig {
    /// Whether `validate` clears previously stored errors first.
    pub clear_errors_on_validate: bool,
    /// Whether `save` validates the graph before writing.
    pub validate_on_save: bool,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            clear_errors_on_validate: true,
            validate_on_save: true,
        }
    }
}

/// Options for `Cascade::save_with()`.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Overrides [`CascadeConfig::validate_on_save`].
    pub run_validation: Option<bool>,
    /// Relations and attributes processed by this call.
    pub relations: RelationTree,
}

impl SaveOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate (or skip validation) before writing.
    #[must_use]
    pub fn run_validation(mut self, value: bool) -> Self {
        self.run_validation = Some(value);
        self
    }

    /// Replace the processed tree.
    #[must_use]
    pub fn relations(mut self, tree: RelationTree) -> Self {
        self.relations = tree;
        self
    }

    /// Add a dotted path such as `"comments.author"`.
    #[must_use]
    pub fn with(mut self, path: &str) -> Self {
        self.relations.add_path(path);
        self
    }

    /// Merge a tree given as JSON (`{"comments": ["author"], "tags": {}}`).
    pub fn with_json(mut self, tree: &serde_json::Value) -> Result<Self> {
        self.relations.merge(&RelationTree::from_json(tree)?);
        Ok(self)
    }
}

/// Options for `Cascade::validate_with()`.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Overrides [`CascadeConfig::clear_errors_on_validate`].
    pub clear_errors: Option<bool>,
    /// Relations and attributes processed by this call.
    pub relations: RelationTree,
}

impl ValidateOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep (false) or drop (true) errors stored by earlier calls.
    #[must_use]
    pub fn clear_errors(mut self, value: bool) -> Self {
        self.clear_errors = Some(value);
        self
    }

    #[must_use]
    pub fn relations(mut self, tree: RelationTree) -> Self {
        self.relations = tree;
        self
    }

    #[must_use]
    pub fn with(mut self, path: &str) -> Self {
        self.relations.add_path(path);
        self
    }

    pub fn with_json(mut self, tree: &serde_json::Value) -> Result<Self> {
        self.relations.merge(&RelationTree::from_json(tree)?);
        Ok(self)
    }
}
