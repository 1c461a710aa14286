//! Config validation: referential integrity and resource consistency.

use crate::config::{ResourceConfig, ResourcesFile};
use crate::error::ConfigError;
use crate::links::COUNT_LINK;
use crate::query::FieldPath;
use std::collections::{BTreeSet, HashMap, HashSet};

/// `rel` must be an absolute path of literal segments.
fn check_rel(rel: &str) -> Result<(), ConfigError> {
    let invalid = |why: &str| Err(ConfigError::Validation(format!("rel '{}' {}", rel, why)));
    if !rel.starts_with('/') {
        return invalid("must start with '/'");
    }
    if rel.ends_with('/') {
        return invalid("must not end with '/'");
    }
    for segment in rel[1..].split('/') {
        if segment.is_empty() {
            return invalid("has an empty segment");
        }
        if segment.starts_with(':') || segment.starts_with('*') {
            return invalid("has a parameter segment");
        }
    }
    Ok(())
}

/// Fixed paths a resource mounts: its `rel` and one per static link.
fn fixed_routes(r: &ResourceConfig) -> BTreeSet<String> {
    let mut paths = BTreeSet::from([r.rel.clone()]);
    paths.extend(r.static_links.keys().map(|name| format!("{}/{}", r.rel, name)));
    if r.count {
        paths.insert(format!("{}/{}", r.rel, COUNT_LINK));
    }
    paths
}

/// Links and body rules only make sense over a collection.
fn check_virtual(r: &ResourceConfig) -> Result<(), ConfigError> {
    let kind = r.kind();
    if !kind.is_virtual() {
        return Ok(());
    }
    let offending = [
        (r.count, "count"),
        (!r.static_links.is_empty(), "static_links"),
        (!r.instance_links.is_empty(), "instance_links"),
        (!r.validation.is_empty(), "validation"),
    ];
    match offending.iter().find(|(set, _)| *set) {
        Some((_, what)) => Err(ConfigError::Validation(format!(
            "{}: {} needs a collection-backed node, not {:?}",
            r.rel, what, kind
        ))),
        None => Ok(()),
    }
}

pub fn validate(file: &ResourcesFile) -> Result<(), ConfigError> {
    let mut collection_names = HashSet::new();
    for c in &file.collections {
        if c.name.is_empty() || !c.name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(ConfigError::Validation(format!("invalid collection name '{}'", c.name)));
        }
        if !collection_names.insert(c.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate collection '{}'", c.name)));
        }
    }
    for c in &file.collections {
        for target in c.refs.values() {
            if !collection_names.contains(target.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "collection",
                    id: target.clone(),
                });
            }
        }
    }

    let mut rels = HashSet::new();
    for r in &file.resources {
        check_rel(&r.rel)?;
        if !rels.insert(r.rel.as_str()) {
            return Err(ConfigError::DuplicateRel(r.rel.clone()));
        }
        check_virtual(r)?;
        match (&r.collection, r.node_type.map(|k| k.is_backed())) {
            (Some(c), _) if !collection_names.contains(c.as_str()) => {
                return Err(ConfigError::MissingReference {
                    kind: "collection",
                    id: c.clone(),
                });
            }
            (None, Some(true)) => {
                return Err(ConfigError::Validation(format!("{} needs a collection", r.rel)));
            }
            _ => {}
        }
        for (name, link) in &r.static_links {
            if FieldPath::parse(&link.distinct).is_none() {
                return Err(ConfigError::Validation(format!(
                    "{}: link '{}' has invalid field '{}'",
                    r.rel, name, link.distinct
                )));
            }
        }
        for (name, link) in &r.instance_links {
            if FieldPath::parse(&link.key).is_none() {
                return Err(ConfigError::Validation(format!(
                    "{}: link '{}' has invalid key '{}'",
                    r.rel, name, link.key
                )));
            }
        }
    }

    // a count link clashing with a static link of the same resource is a DuplicateLink
    // at registration; only clashes between resources are caught here
    let mut routes: HashMap<String, &str> = HashMap::new();
    for r in &file.resources {
        for path in fixed_routes(r) {
            if let Some(first) = routes.insert(path.clone(), &r.rel) {
                return Err(ConfigError::RouteConflict {
                    path,
                    first: first.to_string(),
                    second: r.rel.clone(),
                });
            }
        }
    }

    for r in &file.resources {
        for link in r.instance_links.values() {
            if !rels.contains(link.other_side.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "resource",
                    id: link.other_side.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(v: serde_json::Value) -> ResourcesFile {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn accepts_consistent_config() {
        let f = file(json!({
            "collections": [{"name": "books", "refs": {"_author": "authors"}}, {"name": "authors"}],
            "resources": [
                {"rel": "/api/books", "collection": "books", "instance_links": {"author": {"other_side": "/api/authors", "key": "_id"}}},
                {"rel": "/api/authors", "collection": "authors"}
            ]
        }));
        assert!(validate(&f).is_ok());
    }

    #[test]
    fn rejects_duplicate_rel() {
        let f = file(json!({
            "collections": [{"name": "a"}],
            "resources": [{"rel": "/a", "collection": "a"}, {"rel": "/a", "collection": "a"}]
        }));
        assert!(matches!(validate(&f), Err(ConfigError::DuplicateRel(r)) if r == "/a"));
    }

    #[test]
    fn rejects_dangling_references() {
        let f = file(json!({"resources": [{"rel": "/a", "collection": "missing"}]}));
        assert!(matches!(validate(&f), Err(ConfigError::MissingReference { kind: "collection", .. })));

        let f = file(json!({"collections": [{"name": "a", "refs": {"_b": "b"}}], "resources": []}));
        assert!(matches!(validate(&f), Err(ConfigError::MissingReference { .. })));

        let f = file(json!({
            "collections": [{"name": "a"}],
            "resources": [{"rel": "/a", "collection": "a", "instance_links": {"x": {"other_side": "/nope", "key": "_a"}}}]
        }));
        assert!(matches!(validate(&f), Err(ConfigError::MissingReference { kind: "resource", .. })));
    }

    #[test]
    fn backed_kinds_need_a_collection() {
        let f = file(json!({"resources": [{"rel": "/a", "node_type": "leaf"}]}));
        assert!(matches!(validate(&f), Err(ConfigError::Validation(_))));
        let f = file(json!({"resources": [{"rel": "a"}]}));
        assert!(matches!(validate(&f), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rels_are_literal_paths() {
        for rel in ["/api/books/", "/", "/api//books", "/api/:id", "/api/*rest"] {
            let f = file(json!({"resources": [{"rel": rel}]}));
            assert!(matches!(validate(&f), Err(ConfigError::Validation(_))), "{}", rel);
        }
    }

    #[test]
    fn static_link_paths_cannot_shadow_other_resources() {
        let f = file(json!({
            "collections": [{"name": "books"}],
            "resources": [
                {"rel": "/api/books", "collection": "books", "static_links": {"genres": {"distinct": "genre"}}},
                {"rel": "/api/books/genres", "oname": "Genres"}
            ]
        }));
        assert!(matches!(
            validate(&f),
            Err(ConfigError::RouteConflict { path, first, second })
                if path == "/api/books/genres" && first == "/api/books" && second == "/api/books/genres"
        ));

        let f = file(json!({
            "collections": [{"name": "books"}],
            "resources": [
                {"rel": "/api/books/count", "oname": "Tally"},
                {"rel": "/api/books", "collection": "books", "count": true}
            ]
        }));
        assert!(matches!(validate(&f), Err(ConfigError::RouteConflict { path, .. }) if path == "/api/books/count"));
    }

    #[test]
    fn virtual_nodes_carry_no_links() {
        for extra in [
            json!({"count": true}),
            json!({"static_links": {"kinds": {"distinct": "kind"}}}),
            json!({"instance_links": {"x": {"other_side": "/svc", "key": "_svc"}}}),
            json!({"validation": {"name": {"required": true}}}),
        ] {
            let mut svc = json!({"rel": "/svc", "node_type": "internal"});
            for (k, v) in extra.as_object().unwrap() {
                svc[k] = v.clone();
            }
            let f = file(json!({"resources": [svc]}));
            assert!(matches!(validate(&f), Err(ConfigError::Validation(m)) if m.starts_with("/svc: ")), "{}", extra);
        }
        let f = file(json!({"resources": [{"rel": "/svc", "count": true}]}));
        assert!(matches!(validate(&f), Err(ConfigError::Validation(_))));
    }
}
