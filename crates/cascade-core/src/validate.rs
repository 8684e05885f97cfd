//! Record-level validation rules and nested error trees.
//!
//! A record's own field rules are supplied by a [`RecordValidator`]. The
//! recursive validator in `cascade-session` runs it for every record reached
//! through a relation tree and nests the results in a [`ValidationErrorTree`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::record::Attributes;
use crate::value::Value;

/// Messages per attribute name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors of one record plus the errors of its related records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrorTree {
    fields: FieldErrors,
    relations: BTreeMap<String, RelatedErrors>,
}

/// Nested errors under one relation key.
#[derive(Debug, Clone, PartialEq)]
pub enum RelatedErrors {
    /// Errors of a single related record.
    One(Box<ValidationErrorTree>),
    /// Errors of collection members, keyed by position in the collection.
    Many(BTreeMap<usize, ValidationErrorTree>),
}

impl ValidationErrorTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when neither the record nor any related record has errors.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(Vec::is_empty) && self.relations.is_empty()
    }

    /// Record an error message for an attribute.
    pub fn add_error(&mut self, attribute: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(attribute.into())
            .or_default()
            .push(message.into());
    }

    /// Append every message of `errors`.
    pub fn add_field_errors(&mut self, errors: FieldErrors) {
        for (attribute, messages) in errors {
            if !messages.is_empty() {
                self.fields.entry(attribute).or_default().extend(messages);
            }
        }
    }

    /// Messages recorded for an attribute.
    pub fn field(&self, attribute: &str) -> &[String] {
        self.fields.get(attribute).map_or(&[], Vec::as_slice)
    }

    /// All attribute errors of this record.
    pub fn fields(&self) -> &FieldErrors {
        &self.fields
    }

    /// Whether this record (not counting related records) has errors.
    pub fn has_field_errors(&self) -> bool {
        self.fields.values().any(|m| !m.is_empty())
    }

    /// Attach the errors of a single related record. Empty trees are dropped.
    pub fn attach_one(&mut self, relation: impl Into<String>, errors: ValidationErrorTree) {
        if errors.is_empty() {
            return;
        }
        self.relations
            .insert(relation.into(), RelatedErrors::One(Box::new(errors)));
    }

    /// Attach the errors of collection member `index`. Empty trees are dropped.
    pub fn attach_many(
        &mut self,
        relation: impl Into<String>,
        index: usize,
        errors: ValidationErrorTree,
    ) {
        if errors.is_empty() {
            return;
        }
        let entry = self
            .relations
            .entry(relation.into())
            .or_insert_with(|| RelatedErrors::Many(BTreeMap::new()));
        match entry {
            RelatedErrors::Many(items) => {
                items.insert(index, errors);
            }
            RelatedErrors::One(_) => {
                let mut items = BTreeMap::new();
                items.insert(index, errors);
                *entry = RelatedErrors::Many(items);
            }
        }
    }

    /// Nested errors under a relation key.
    pub fn relation(&self, relation: &str) -> Option<&RelatedErrors> {
        self.relations.get(relation)
    }

    /// Errors of a single related record.
    pub fn related_one(&self, relation: &str) -> Option<&ValidationErrorTree> {
        match self.relations.get(relation) {
            Some(RelatedErrors::One(tree)) => Some(tree),
            _ => None,
        }
    }

    /// Errors of collection member `index`.
    pub fn related_at(&self, relation: &str, index: usize) -> Option<&ValidationErrorTree> {
        match self.relations.get(relation) {
            Some(RelatedErrors::Many(items)) => items.get(&index),
            _ => None,
        }
    }

    /// Total number of messages in the tree.
    pub fn error_count(&self) -> usize {
        let own: usize = self.fields.values().map(Vec::len).sum();
        let nested: usize = self
            .relations
            .values()
            .map(|related| match related {
                RelatedErrors::One(tree) => tree.error_count(),
                RelatedErrors::Many(items) => items.values().map(Self::error_count).sum(),
            })
            .sum();
        own + nested
    }

    /// Append every message of `other`, recursively.
    pub fn merge(&mut self, other: &ValidationErrorTree) {
        self.add_field_errors(other.fields.clone());
        for (relation, related) in &other.relations {
            match (self.relations.get_mut(relation), related) {
                (Some(RelatedErrors::One(mine)), RelatedErrors::One(theirs)) => mine.merge(theirs),
                (Some(RelatedErrors::Many(mine)), RelatedErrors::Many(theirs)) => {
                    for (index, tree) in theirs {
                        mine.entry(*index).or_default().merge(tree);
                    }
                }
                _ => {
                    self.relations.insert(relation.clone(), related.clone());
                }
            }
        }
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.fields.clear();
        self.relations.clear();
    }
}

impl Serialize for ValidationErrorTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.fields.iter().filter(|(_, m)| !m.is_empty());
        let mut map = serializer.serialize_map(None)?;
        for (attribute, messages) in fields {
            map.serialize_entry(attribute, messages)?;
        }
        for (relation, related) in &self.relations {
            match related {
                RelatedErrors::One(tree) => map.serialize_entry(relation, tree.as_ref())?,
                RelatedErrors::Many(items) => {
                    let keyed: BTreeMap<String, &ValidationErrorTree> =
                        items.iter().map(|(i, t)| (i.to_string(), t)).collect();
                    map.serialize_entry(relation, &keyed)?;
                }
            }
        }
        map.end()
    }
}

impl fmt::Display for ValidationErrorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "validation passed");
        }
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "validation failed: {}", json),
            Err(_) => write!(f, "validation failed ({} errors)", self.error_count()),
        }
    }
}

/// A record type's own attribute rules.
///
/// `only` restricts validation to the named attributes; `None` validates all
/// of them. Returned messages are keyed by attribute name.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, attributes: &Attributes, only: Option<&[&str]>) -> FieldErrors;
}

impl<F> RecordValidator for F
where
    F: Fn(&Attributes, Option<&[&str]>) -> FieldErrors + Send + Sync,
{
    fn validate(&self, attributes: &Attributes, only: Option<&[&str]>) -> FieldErrors {
        self(attributes, only)
    }
}

type CustomCheck = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// One declarative field rule.
#[derive(Clone)]
pub enum Rule {
    /// Value must be present and not blank.
    Required,
    /// Text must have at least this many characters.
    MinLength(usize),
    /// Text must have at most this many characters.
    MaxLength(usize),
    /// Text must match the regular expression.
    Pattern(String),
    /// Arbitrary check returning an error message.
    Custom(CustomCheck),
}

impl Rule {
    /// Wrap a closure as a rule.
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        Rule::Custom(Arc::new(check))
    }

    fn check(&self, attribute: &str, value: &Value) -> Option<String> {
        if !matches!(self, Rule::Required) && is_blank(value) {
            return None;
        }
        match self {
            Rule::Required => {
                is_blank(value).then(|| format!("{} cannot be blank.", attribute))
            }
            Rule::MinLength(min) => {
                let len = text_len(value)?;
                (len < *min).then(|| {
                    format!("{} is too short (minimum is {} characters).", attribute, min)
                })
            }
            Rule::MaxLength(max) => {
                let len = text_len(value)?;
                (len > *max).then(|| {
                    format!("{} is too long (maximum is {} characters).", attribute, max)
                })
            }
            Rule::Pattern(pattern) => {
                let text = value.as_str()?;
                (!matches_pattern(text, pattern)).then(|| format!("{} is invalid.", attribute))
            }
            Rule::Custom(check) => check(value),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => write!(f, "Required"),
            Rule::MinLength(n) => write!(f, "MinLength({})", n),
            Rule::MaxLength(n) => write!(f, "MaxLength({})", n),
            Rule::Pattern(p) => write!(f, "Pattern({:?})", p),
            Rule::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn text_len(value: &Value) -> Option<usize> {
    value.as_str().map(|s| s.chars().count())
}

/// Rule-based [`RecordValidator`].
///
/// ```rust,ignore
/// let rules = RuleValidator::new()
///     .rule("title", Rule::Required)
///     .rule("title", Rule::MaxLength(128))
///     .rule("slug", Rule::Pattern(r"^[a-z0-9-]+$".into()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuleValidator {
    rules: Vec<(String, Rule)>,
}

impl RuleValidator {
    /// A validator without rules (every record is valid).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule for an attribute.
    #[must_use]
    pub fn rule(mut self, attribute: impl Into<String>, rule: Rule) -> Self {
        self.rules.push((attribute.into(), rule));
        self
    }

    /// Number of declared rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are declared.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RecordValidator for RuleValidator {
    fn validate(&self, attributes: &Attributes, only: Option<&[&str]>) -> FieldErrors {
        let mut errors = FieldErrors::new();
        for (attribute, rule) in &self.rules {
            if only.is_some_and(|names| !names.contains(&attribute.as_str())) {
                continue;
            }
            let value = attributes.get(attribute).unwrap_or(&Value::Null);
            if let Some(message) = rule.check(attribute, value) {
                errors.entry(attribute.clone()).or_default().push(message);
            }
        }
        errors
    }
}

/// Compiled patterns, shared process-wide.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(|| RegexCache {
        cache: RwLock::new(HashMap::new()),
    })
}

/// Check if a string matches a regex pattern.
///
/// An invalid pattern never matches and logs a warning.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation rule, treating as non-match"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn rules_report_messages_per_attribute() {
        let rules = RuleValidator::new()
            .rule("title", Rule::Required)
            .rule("title", Rule::MinLength(3))
            .rule("slug", Rule::Pattern(r"^[a-z-]+$".into()))
            .rule("body", Rule::MaxLength(4));

        let errors = rules.validate(
            &attrs(&[
                ("title", Value::Text(" ".into())),
                ("slug", Value::Text("Bad Slug".into())),
                ("body", Value::Text("hello".into())),
            ]),
            None,
        );
        assert_eq!(errors["title"], ["title cannot be blank."]);
        assert_eq!(errors["slug"], ["slug is invalid."]);
        assert_eq!(
            errors["body"],
            ["body is too long (maximum is 4 characters)."]
        );
    }

    #[test]
    fn only_restricts_checked_attributes() {
        let rules = RuleValidator::new()
            .rule("title", Rule::Required)
            .rule("body", Rule::Required);
        let errors = rules.validate(&Attributes::new(), Some(&["body"]));
        assert!(!errors.contains_key("title"));
        assert!(errors.contains_key("body"));
    }

    #[test]
    fn custom_rules_and_closures() {
        let rules = RuleValidator::new().rule(
            "age",
            Rule::custom(|v| match v.as_i64() {
                Some(n) if n < 0 => Some("age must be positive.".into()),
                _ => None,
            }),
        );
        let errors = rules.validate(&attrs(&[("age", Value::Int(-1))]), None);
        assert_eq!(errors["age"], ["age must be positive."]);

        let closure = |_: &Attributes, _: Option<&[&str]>| {
            let mut e = FieldErrors::new();
            e.insert("x".into(), vec!["bad".into()]);
            e
        };
        assert_eq!(closure.validate(&Attributes::new(), None).len(), 1);
    }

    #[test]
    fn tree_serializes_nested_shape() {
        let mut comment = ValidationErrorTree::new();
        comment.add_error("body", "body cannot be blank.");

        let mut root = ValidationErrorTree::new();
        root.attach_many("comments", 1, comment.clone());
        root.attach_many("comments", 0, ValidationErrorTree::new());
        root.attach_one("author", comment);
        root.attach_one("category", ValidationErrorTree::new());

        assert_eq!(
            serde_json::to_value(&root).unwrap(),
            json!({
                "author": {"body": ["body cannot be blank."]},
                "comments": {"1": {"body": ["body cannot be blank."]}}
            })
        );
        assert!(root.related_at("comments", 0).is_none());
        assert!(root.related_at("comments", 1).is_some());
        assert!(root.relation("category").is_none());
        assert_eq!(root.error_count(), 2);
        assert!(!root.has_field_errors());
    }

    #[test]
    fn empty_tree() {
        let mut tree = ValidationErrorTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.to_string(), "validation passed");
        tree.add_error("a", "bad");
        assert!(!tree.is_empty());
        tree.clear();
        assert!(tree.is_empty());
    }

    #[test]
    fn invalid_pattern_never_matches() {
        assert!(!matches_pattern("abc", "("));
        assert!(matches_pattern("abc", "^a"));
    }
}
