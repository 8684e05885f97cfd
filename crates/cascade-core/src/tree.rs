//! Processed relation trees.
//!
//! A [`RelationTree`] names the relations (and plain attributes) that take
//! part in one validate or save call. Each entry maps a name to a subtree;
//! an empty subtree is a leaf. The same shape is interpreted by the validator
//! and the persistence engine: names that match a declared relation of the
//! record are cascaded into, every other name is a plain attribute.

use crate::error::{Error, Result};
use serde_json::Value as JsonValue;

/// Ordered mapping from a relation or attribute name to its subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationTree {
    entries: Vec<(String, RelationTree)>,
}

impl RelationTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree of leaves, one per name.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tree = Self::new();
        for name in names {
            tree.insert(name, RelationTree::new());
        }
        tree
    }

    /// Build a tree from JSON.
    ///
    /// Objects map names to subtrees, arrays list leaves (or nested objects),
    /// a string is a single leaf and `null` is empty:
    ///
    /// ```rust,ignore
    /// let tree = RelationTree::from_json(&json!({"comments": {}, "tags": ["name"]}))?;
    /// ```
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let mut tree = Self::new();
        tree.extend_from_json(value)?;
        Ok(tree)
    }

    fn extend_from_json(&mut self, value: &JsonValue) -> Result<()> {
        match value {
            JsonValue::Null => {}
            JsonValue::String(name) => self.insert(name.clone(), RelationTree::new()),
            JsonValue::Array(items) => {
                for item in items {
                    self.extend_from_json(item)?;
                }
            }
            JsonValue::Object(map) => {
                for (name, sub) in map {
                    let subtree = RelationTree::from_json(sub)?;
                    self.insert(name.clone(), subtree);
                }
            }
            other => {
                return Err(Error::config(format!(
                    "relation tree entries must be names, lists or objects, found `{}`",
                    other
                )));
            }
        }
        Ok(())
    }

    /// Whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Subtree for a top-level name.
    pub fn get(&self, name: &str) -> Option<&RelationTree> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, sub)| sub)
    }

    /// Whether a top-level name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Top-level names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Top-level entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RelationTree)> {
        self.entries.iter().map(|(key, sub)| (key.as_str(), sub))
    }

    /// Insert an entry, merging into an existing one of the same name.
    pub fn insert(&mut self, name: impl Into<String>, subtree: RelationTree) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => existing.merge(&subtree),
            None => self.entries.push((name, subtree)),
        }
    }

    /// Add a dotted path: `"a.b.c"` adds `a -> b -> c`.
    pub fn add_path(&mut self, path: &str) {
        let mut parts = path.split('.').map(str::trim).filter(|p| !p.is_empty());
        let Some(first) = parts.next() else {
            return;
        };
        let mut subtree = RelationTree::new();
        let rest: Vec<&str> = parts.collect();
        for part in rest.iter().rev() {
            let mut parent = RelationTree::new();
            parent.entries.push(((*part).to_string(), subtree));
            subtree = parent;
        }
        self.insert(first, subtree);
    }

    /// Remove a dotted path. Only the last component is removed; returns
    /// whether anything was removed.
    pub fn remove_path(&mut self, path: &str) -> bool {
        match path.split_once('.') {
            None => {
                let before = self.entries.len();
                self.entries.retain(|(key, _)| key != path.trim());
                before != self.entries.len()
            }
            Some((head, rest)) => self
                .entries
                .iter_mut()
                .find(|(key, _)| key == head.trim())
                .is_some_and(|(_, sub)| sub.remove_path(rest)),
        }
    }

    /// Recursive key-wise merge. New names are appended, existing ones are
    /// merged into; first-appearance order is preserved.
    pub fn merge(&mut self, other: &RelationTree) {
        for (name, subtree) in &other.entries {
            self.insert(name.clone(), subtree.clone());
        }
    }

    /// Merge into a copy of `self`.
    #[must_use]
    pub fn merged(&self, other: &RelationTree) -> RelationTree {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Split the top-level entries into plain attributes and relations.
    pub fn partition<F>(&self, is_relation: F) -> Partition<'_>
    where
        F: Fn(&str) -> bool,
    {
        let mut partition = Partition::default();
        for (name, subtree) in &self.entries {
            if is_relation(name) {
                partition.relations.push((name.as_str(), subtree));
            } else {
                partition.attributes.push(name.as_str());
            }
        }
        partition
    }
}

impl<S: Into<String>> FromIterator<S> for RelationTree {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        RelationTree::from_names(iter)
    }
}

/// Top-level entries of a tree split into attributes and relations.
#[derive(Debug, Default)]
pub struct Partition<'a> {
    /// Plain attribute names, in tree order.
    pub attributes: Vec<&'a str>,
    /// Relation names with their subtrees, in tree order.
    pub relations: Vec<(&'a str, &'a RelationTree)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_is_recursive_and_order_preserving() {
        let mut left = RelationTree::from_json(&json!({"comments": {"author": {}}, "tags": {}}))
            .unwrap();
        let right =
            RelationTree::from_json(&json!({"comments": ["body"], "category": {}})).unwrap();
        left.merge(&right);

        assert_eq!(left.names().collect::<Vec<_>>(), ["comments", "tags", "category"]);
        let comments = left.get("comments").unwrap();
        assert_eq!(comments.names().collect::<Vec<_>>(), ["author", "body"]);
    }

    #[test]
    fn add_and_remove_paths() {
        let mut tree = RelationTree::new();
        tree.add_path("comments.author.profile");
        tree.add_path("comments.tags");
        tree.add_path("category");

        let comments = tree.get("comments").unwrap();
        assert_eq!(comments.names().collect::<Vec<_>>(), ["author", "tags"]);
        assert!(comments.get("author").unwrap().contains("profile"));

        assert!(tree.remove_path("comments.author"));
        assert!(!tree.get("comments").unwrap().contains("author"));
        assert!(tree.remove_path("category"));
        assert!(!tree.remove_path("category"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn json_forms() {
        let tree = RelationTree::from_json(&json!(["comments", {"tags": null}])).unwrap();
        assert_eq!(tree.names().collect::<Vec<_>>(), ["comments", "tags"]);
        assert!(tree.get("tags").unwrap().is_empty());

        assert!(RelationTree::from_json(&json!({"a": 1})).is_err());
        assert!(RelationTree::from_json(&JsonValue::Null).unwrap().is_empty());
    }

    #[test]
    fn partition_by_predicate() {
        let tree: RelationTree = ["title", "comments", "body"].into_iter().collect();
        let part = tree.partition(|name| name == "comments");
        assert_eq!(part.attributes, ["title", "body"]);
        assert_eq!(part.relations.len(), 1);
        assert_eq!(part.relations[0].0, "comments");
    }
}
