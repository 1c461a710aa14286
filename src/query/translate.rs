//! Query Translator: effective definition applied step by step to a `StoreQuery`.

use super::definition::{merge, QueryDefaults, QueryDefinition, RequestParams};
use super::filter::{parse_filter, FieldPath};
use crate::error::AppError;
use crate::store::{Expansion, Projection, SortKey, StoreQuery};

/// The merged definition together with the store query built from it.
#[derive(Clone, Debug)]
pub struct EffectiveQuery {
    pub definition: QueryDefinition,
    pub query: StoreQuery,
}

/// `field`, `field asc` or `field desc`.
fn parse_sort_clause(clause: &str) -> Option<SortKey> {
    let mut words = clause.split_whitespace();
    let field = FieldPath::parse(words.next()?)?;
    let descending = match words.next() {
        None | Some("asc") => false,
        Some("desc") => true,
        Some(_) => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some(SortKey { field, descending })
}

/// Translate `field [asc|desc], ...` into sort keys. Bad clauses are logged and skipped.
pub fn translate_orderby(orderby: &str) -> Vec<SortKey> {
    let mut keys = Vec::new();
    for clause in orderby.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        match parse_sort_clause(clause) {
            Some(key) => keys.push(key),
            None => tracing::warn!(clause = %clause, "skipping invalid $orderby clause"),
        }
    }
    keys
}

fn insert_path(tree: &mut Vec<Expansion>, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else { return };
    let idx = match tree.iter().position(|e| e.path == *first) {
        Some(i) => i,
        None => {
            tree.push(Expansion::new(first));
            tree.len() - 1
        }
    };
    insert_path(&mut tree[idx].nested, rest);
}

/// Build the expansion tree. Each value may hold several comma-separated paths;
/// `a.b` expands `a`, then `b` inside it. Shared prefixes are merged.
pub fn build_expansions(values: &[String]) -> Vec<Expansion> {
    let mut tree = Vec::new();
    for value in values {
        for path in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let segments: Vec<&str> = path.split('.').map(str::trim).filter(|s| !s.is_empty()).collect();
            insert_path(&mut tree, &segments);
        }
    }
    tree
}

/// Merge defaults with the request and apply the result to `query`, in order:
/// expansion, projection, lean, limit/offset, ordering, filter.
pub fn translate(defaults: &QueryDefaults, params: &RequestParams, mut query: StoreQuery) -> Result<EffectiveQuery, AppError> {
    let definition = merge(defaults, params);

    for expansion in build_expansions(&definition.expand) {
        query.populate(expansion);
    }
    if let Some(select) = definition.select.as_deref().filter(|s| !s.trim().is_empty()) {
        query.select(Projection::parse(select).map_err(AppError::Validation)?);
    }
    query.lean(definition.lean);
    if let Some(top) = definition.top {
        query.limit(top);
    }
    if let Some(skip) = definition.skip {
        query.skip(skip);
    }

    let mut keys = definition.orderby.as_deref().map(translate_orderby).unwrap_or_default();
    if keys.is_empty() && definition.top.is_some() {
        // paging needs a deterministic order
        keys = translate_orderby(&definition.orderby_paged);
        if keys.is_empty() {
            keys.push(SortKey::asc(FieldPath::id()));
        }
    }
    if !keys.is_empty() {
        query.sort(keys);
    }

    if let Some(filter) = definition.filter.as_deref() {
        let predicate = parse_filter(filter)?;
        tracing::debug!(filter = %predicate, "translated $filter");
        query.and_where(predicate);
    }

    tracing::debug!(collection = %query.collection, limit = ?query.limit, skip = ?query.skip, "translated query");
    Ok(EffectiveQuery { definition, query })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn orderby_keeps_clause_order() {
        let keys = translate_orderby("year desc, title,author.name asc");
        assert_eq!(
            keys,
            vec![
                SortKey { field: field("year"), descending: true },
                SortKey::asc(field("title")),
                SortKey::asc(field("author.name")),
            ]
        );
    }

    #[test]
    fn invalid_orderby_clauses_are_skipped() {
        let keys = translate_orderby("title sideways, year desc, bad$field, , rating");
        assert_eq!(
            keys,
            vec![SortKey { field: field("year"), descending: true }, SortKey::asc(field("rating"))]
        );
        assert!(translate_orderby("a b c").is_empty());
    }

    #[test]
    fn expansions_nest_and_merge() {
        let tree = build_expansions(&["_author._publisher, _author._agent".into(), "_series".into()]);
        assert_eq!(
            tree,
            vec![
                Expansion {
                    path: "_author".into(),
                    nested: vec![Expansion::new("_publisher"), Expansion::new("_agent")],
                },
                Expansion::new("_series"),
            ]
        );
    }

    #[test]
    fn top_without_orderby_sorts_on_paged_key() {
        let params = RequestParams::parse("$top=10");
        let eq = translate(&QueryDefaults::default(), &params, StoreQuery::find("books")).unwrap();
        assert_eq!(eq.query.limit, Some(10));
        assert_eq!(eq.query.sort, vec![SortKey::asc(FieldPath::id())]);

        let defaults = QueryDefaults {
            orderby_paged: Some("title".into()),
            ..Default::default()
        };
        let eq = translate(&defaults, &params, StoreQuery::find("books")).unwrap();
        assert_eq!(eq.query.sort, vec![SortKey::asc(field("title"))]);
    }

    #[test]
    fn all_invalid_orderby_with_top_falls_back() {
        let params = RequestParams::parse("$top=5&$orderby=title%20sideways");
        let eq = translate(&QueryDefaults::default(), &params, StoreQuery::find("books")).unwrap();
        assert_eq!(eq.query.sort, vec![SortKey::asc(FieldPath::id())]);
    }

    #[test]
    fn no_paging_no_sort() {
        let eq = translate(&QueryDefaults::default(), &RequestParams::default(), StoreQuery::find("books")).unwrap();
        assert!(eq.query.sort.is_empty());
        assert!(eq.query.lean);
        assert_eq!(eq.query.limit, None);
    }

    #[test]
    fn enforced_select_and_filter() {
        let defaults = QueryDefaults {
            select: Some("-password".into()),
            ..Default::default()
        };
        let params = RequestParams::parse("$select=password&$filter=email%20eq%20'a@b.c'");
        let eq = translate(&defaults, &params, StoreQuery::find("users")).unwrap();
        assert_eq!(eq.query.projection, Some(Projection::Exclude(vec!["password".into()])));
        assert_eq!(eq.query.filter.unwrap().to_string(), "email == \"a@b.c\"");
    }

    #[test]
    fn filter_is_added_to_the_base_query() {
        let base = StoreQuery::by_key("reviews", field("_book"), "b1");
        let params = RequestParams::parse("$filter=stars%20ge%204");
        let eq = translate(&QueryDefaults::default(), &params, base).unwrap();
        assert_eq!(eq.query.filter.unwrap().to_string(), "(_book == \"b1\") AND (stars >= 4)");
    }

    #[test]
    fn bad_filter_and_bad_select_fail() {
        let params = RequestParams::parse("$filter=genre%20eq%20and%20year%20gt%202000");
        assert!(matches!(
            translate(&QueryDefaults::default(), &params, StoreQuery::find("books")),
            Err(AppError::FilterSyntax(_))
        ));
        let params = RequestParams::parse("$select=a%20-b");
        assert!(matches!(
            translate(&QueryDefaults::default(), &params, StoreQuery::find("books")),
            Err(AppError::Validation(_))
        ));
    }
}
