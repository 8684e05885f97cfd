//! Recursive validation over a processed relation tree.

use cascade_core::{
    DefaultRelationTreeProvider, RecordGraph, RecordId, Related, RelationTree, Result,
    ValidationErrorTree,
};

/// Validate `record` and every related record the tree reaches.
///
/// Names in `tree` that are not relations of the record restrict which of its
/// attributes are checked (all of them when there are none). Each related
/// record is visited with its default processed tree merged into the subtree,
/// the way a save reaches it. The returned tree holds the errors found by
/// this call; every visited record also has them appended to its stored
/// errors.
pub fn validate_tree(
    graph: &mut RecordGraph,
    record: RecordId,
    tree: &RelationTree,
) -> Result<ValidationErrorTree> {
    validate_on_path(graph, record, tree, &mut Vec::new())
}

/// `path` holds the records being validated above this one with their trees.
/// Meeting the same record with the same tree again ends the walk, so cycles
/// through default trees terminate.
fn validate_on_path(
    graph: &mut RecordGraph,
    record: RecordId,
    tree: &RelationTree,
    path: &mut Vec<(RecordId, RelationTree)>,
) -> Result<ValidationErrorTree> {
    let model = graph.record(record)?.model().clone();
    let partition = tree.partition(|name| model.has_relation(name));

    let only = (!partition.attributes.is_empty()).then_some(partition.attributes.as_slice());
    let mut errors = ValidationErrorTree::new();
    errors.add_field_errors(
        model
            .record_validator()
            .validate(graph.record(record)?.attributes(), only),
    );

    path.push((record, tree.clone()));
    for (relation, subtree) in &partition.relations {
        match graph.related(record, relation).cloned() {
            Some(Related::One(Some(related))) => {
                if let Some(nested) = validate_related(graph, related, subtree, path)? {
                    errors.attach_one(*relation, nested);
                }
            }
            Some(Related::Many(members)) => {
                for (index, related) in members.into_iter().enumerate() {
                    if let Some(nested) = validate_related(graph, related, subtree, path)? {
                        errors.attach_many(*relation, index, nested);
                    }
                }
            }
            Some(Related::One(None)) | None => {}
        }
    }
    path.pop();

    if !errors.is_empty() {
        tracing::debug!(
            record = %record,
            model = model.name(),
            errors = errors.error_count(),
            "Validation failed"
        );
    }

    let mut stored = graph.record(record)?.errors().clone();
    stored.merge(&errors);
    graph.record_mut(record)?.set_errors(stored);
    Ok(errors)
}

fn validate_related(
    graph: &mut RecordGraph,
    related: RecordId,
    subtree: &RelationTree,
    path: &mut Vec<(RecordId, RelationTree)>,
) -> Result<Option<ValidationErrorTree>> {
    let tree = graph.default_relation_tree(related).merged(subtree);
    if path.iter().any(|(seen, seen_tree)| *seen == related && *seen_tree == tree) {
        return Ok(None);
    }
    validate_on_path(graph, related, &tree, path).map(Some)
}

/// Clear the stored errors of every record `tree` reaches from `record`,
/// following default trees the way [`validate_tree`] does.
pub fn clear_errors_tree(
    graph: &mut RecordGraph,
    record: RecordId,
    tree: &RelationTree,
) -> Result<()> {
    clear_once(graph, record, tree, &mut Vec::new())
}

/// `cleared` holds every record cleared so far with the tree it was reached
/// with; a pair is walked once.
fn clear_once(
    graph: &mut RecordGraph,
    record: RecordId,
    tree: &RelationTree,
    cleared: &mut Vec<(RecordId, RelationTree)>,
) -> Result<()> {
    let model = graph.record(record)?.model().clone();
    graph.record_mut(record)?.set_errors(ValidationErrorTree::new());
    cleared.push((record, tree.clone()));

    for (relation, subtree) in tree.partition(|name| model.has_relation(name)).relations {
        let members = graph
            .related(record, relation)
            .map(Related::ids)
            .unwrap_or_default();
        for related in members {
            let tree = graph.default_relation_tree(related).merged(subtree);
            if cleared.iter().any(|(seen, seen_tree)| *seen == related && *seen_tree == tree) {
                continue;
            }
            clear_once(graph, related, &tree, cleared)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::blog;
    use cascade_core::{RelatedErrors, Value};
    use serde_json::json;

    #[test]
    fn nests_errors_by_relation_and_index() {
        let models = blog();
        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "ok")]);
        let good = graph.create(&models.comment, [("body", "fine")]);
        let bad = graph.create(&models.comment, [("body", "")]);
        graph.set_related_many(post, "comments", vec![good, bad]).unwrap();

        let tree = RelationTree::from_names(["comments"]);
        let errors = validate_tree(&mut graph, post, &tree).unwrap();

        assert!(!errors.has_field_errors());
        assert!(errors.related_at("comments", 0).is_none());
        assert_eq!(
            errors.related_at("comments", 1).unwrap().field("body"),
            ["body cannot be blank."]
        );
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!({"comments": {"1": {"body": ["body cannot be blank."]}}})
        );
        // nested records keep their own errors too
        assert!(graph[bad].errors().has_field_errors());
    }

    #[test]
    fn attribute_names_restrict_the_check() {
        let models = blog();
        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "")]);
        let author = graph.create(&models.user, [("name", "")]);
        graph.set_related_one(post, "author", Some(author)).unwrap();

        let tree = RelationTree::from_json(&json!({"author": ["id"]})).unwrap();
        let errors = validate_tree(&mut graph, post, &tree).unwrap();
        assert_eq!(errors.field("title"), ["title cannot be blank."]);
        // only `id` is checked on the author
        assert!(errors.related_one("author").is_none());

        let tree = RelationTree::from_json(&json!({"author": {}})).unwrap();
        let errors = validate_tree(&mut graph, post, &tree).unwrap();
        assert!(matches!(errors.relation("author"), Some(RelatedErrors::One(_))));
    }

    #[test]
    fn unloaded_and_empty_relations_are_skipped() {
        let models = blog();
        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "ok")]);
        graph.set_related_one(post, "author", None).unwrap();

        let tree = RelationTree::from_names(["author", "comments", "tags"]);
        assert!(validate_tree(&mut graph, post, &tree).unwrap().is_empty());
    }

    #[test]
    fn cycles_terminate_with_the_tree() {
        let models = blog();
        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "")]);
        let comment = graph.create(&models.comment, [("body", "a reply")]);
        graph.push_related(post, "comments", comment).unwrap();
        graph.set_related_one(comment, "post", Some(post)).unwrap();

        let tree = RelationTree::from_json(&json!({"comments": {"post": {}}})).unwrap();
        let errors = validate_tree(&mut graph, post, &tree).unwrap();
        let nested = errors.related_at("comments", 0).unwrap();
        assert_eq!(
            nested.related_one("post").unwrap().field("title"),
            ["title cannot be blank."]
        );
    }

    #[test]
    fn default_trees_of_related_records_are_followed() {
        let models = blog();
        let mut graph = RecordGraph::new();
        let user = graph.create(&models.user, [("name", "u")]);
        let post = graph.create(&models.post, [("title", "p")]);
        let comment = graph.create(&models.comment, [("body", "x")]);
        graph.push_related(user, "posts", post).unwrap();
        graph.push_related(post, "comments", comment).unwrap();
        graph.add_processed_relation(post, "comments");

        let errors = validate_tree(&mut graph, user, &RelationTree::from_names(["posts"])).unwrap();
        let nested = errors.related_at("posts", 0).unwrap();
        assert_eq!(
            nested.related_at("comments", 0).unwrap().field("body"),
            ["body is too short (minimum is 3 characters)."]
        );
        assert!(graph[comment].errors().has_field_errors());

        clear_errors_tree(&mut graph, user, &RelationTree::from_names(["posts"])).unwrap();
        assert!(graph[comment].errors().is_empty());
    }

    #[test]
    fn cycles_through_default_trees_terminate() {
        let models = blog();
        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", "")]);
        let comment = graph.create(&models.comment, [("body", "a reply")]);
        graph.push_related(post, "comments", comment).unwrap();
        graph.set_related_one(comment, "post", Some(post)).unwrap();
        graph.add_processed_relation(post, "comments");
        graph.add_processed_relation(comment, "post");

        let tree = graph.default_relation_tree(post);
        let errors = validate_tree(&mut graph, post, &tree).unwrap();
        assert_eq!(errors.field("title"), ["title cannot be blank."]);
        // the post is met again below the comment with the same tree and
        // is not validated a second time
        assert!(errors.related_at("comments", 0).is_none());
        assert_eq!(graph[post].errors().field("title").len(), 1);

        clear_errors_tree(&mut graph, post, &tree).unwrap();
        assert!(graph[post].errors().is_empty());
    }

    #[test]
    fn errors_accumulate_until_cleared() {
        let models = blog();
        let mut graph = RecordGraph::new();
        let post = graph.create(&models.post, [("title", Value::Null)]);
        let comment = graph.create(&models.comment, [("body", "x")]);
        graph.push_related(post, "comments", comment).unwrap();
        let tree = RelationTree::from_names(["comments"]);

        validate_tree(&mut graph, post, &tree).unwrap();
        validate_tree(&mut graph, post, &tree).unwrap();
        assert_eq!(graph[post].errors().field("title").len(), 2);

        clear_errors_tree(&mut graph, post, &tree).unwrap();
        assert!(graph[post].errors().is_empty());
        assert!(graph[comment].errors().is_empty());
    }
}
