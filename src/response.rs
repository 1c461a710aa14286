//! Response Mapper and envelope builders.

use crate::config::ResourceDefinition;
use crate::links::{LinkRegistry, COUNT_LINK};
use crate::store::{Serializable, ID_FIELD};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const ODATA_ID: &str = "@odata.id";
pub const ODATA_TYPE: &str = "@odata.type";
pub const NAME: &str = "Name";
pub const MEMBERS: &str = "Members";
pub const MEMBERS_COUNT: &str = "Members@odata.count";
pub const LINKS: &str = "_links";

/// Resource-specific shaping applied after the base mapper. Receives the fully merged
/// entity and its index; its return value is what gets sent.
pub type PostProcess = Arc<dyn Fn(Map<String, Value>, usize) -> Value + Send + Sync>;

/// Maps stored entities to response objects for one resource.
pub struct Mapper<'a> {
    definition: &'a ResourceDefinition,
    links: Option<&'a LinkRegistry>,
    post_process: Option<&'a PostProcess>,
    full: bool,
}

fn key_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl<'a> Mapper<'a> {
    /// `full == false` maps entities to identity references `{ "@odata.id": ... }`.
    pub fn new(definition: &'a ResourceDefinition, post_process: Option<&'a PostProcess>, full: bool) -> Self {
        Mapper {
            definition,
            links: None,
            post_process,
            full,
        }
    }

    /// Attach a `_links` block naming the entity's instance links.
    pub fn with_links(mut self, links: &'a LinkRegistry) -> Self {
        self.links = Some(links);
        self
    }

    /// `rel/<okey value>`, falling back to `_id` when the key field is absent.
    pub fn self_link(&self, entity: &Map<String, Value>) -> String {
        let key = self.definition.key_field();
        let id = key
            .lookup(entity)
            .and_then(key_string)
            .or_else(|| entity.get(ID_FIELD).and_then(key_string));
        match id {
            Some(id) => format!("{}/{}", self.definition.rel.trim_end_matches('/'), id),
            None => self.definition.rel.clone(),
        }
    }

    pub fn map<E: Serializable>(&self, entity: E, index: usize) -> Value {
        let def = self.definition;
        let mut obj = entity.to_plain_record();
        for (k, v) in &def.content {
            obj.insert(k.clone(), v.clone());
        }
        obj.insert(ODATA_TYPE.to_string(), Value::String(def.otype.clone()));
        obj.insert(NAME.to_string(), Value::String(def.oname.clone()));
        let self_link = self.self_link(&obj);
        obj.insert(ODATA_ID.to_string(), Value::String(self_link.clone()));

        if let Some(links) = self.links.filter(|l| l.has_instances()) {
            let mut block = Map::new();
            for (name, handler) in links.instances() {
                match handler.href(&self_link, name) {
                    Ok(href) => {
                        block.insert(name.to_string(), Value::String(href));
                    }
                    Err(e) => tracing::warn!(link = %name, error = %e, "skipping instance link"),
                }
            }
            obj.insert(LINKS.to_string(), Value::Object(block));
        }

        match self.post_process {
            Some(post) => (**post)(obj, index),
            None if self.full => Value::Object(obj),
            None => {
                let mut reference = Map::new();
                reference.insert(ODATA_ID.to_string(), Value::String(self_link));
                Value::Object(reference)
            }
        }
    }

    pub fn map_all<E: Serializable>(&self, entities: Vec<E>) -> Vec<Value> {
        entities.into_iter().enumerate().map(|(i, e)| self.map(e, i)).collect()
    }
}

/// How static links are advertised on a collection envelope.
#[derive(Clone, Copy, Debug)]
pub enum LinkPolicy<'a> {
    /// `find`: count link re-attaches the caller's non-paging parameters.
    Find { query: Option<&'a str> },
    /// Custom list responses: every static link except count.
    List,
    /// Instance link traversal: count link is the request path plus `/count`.
    Related { path: &'a str, query: Option<&'a str> },
}

fn with_query(url: String, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(q) => format!("{}?{}", url, q),
        None => url,
    }
}

/// `_links` for a collection envelope. Best effort: a link that fails to build is
/// logged and left out.
pub fn static_links(definition: &ResourceDefinition, links: &LinkRegistry, policy: LinkPolicy<'_>) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, handler) in links.statics() {
        let is_count = name == COUNT_LINK;
        if is_count && (!definition.count || matches!(policy, LinkPolicy::List)) {
            continue;
        }
        let href = match (is_count, policy) {
            (true, LinkPolicy::Find { query }) => handler.href(&definition.rel, name).map(|h| with_query(h, query)),
            (true, LinkPolicy::Related { path, query }) => {
                Ok(with_query(format!("{}/{}", path.trim_end_matches('/'), COUNT_LINK), query))
            }
            _ => handler.href(&definition.rel, name),
        };
        match href {
            Ok(href) => {
                out.insert(name.to_string(), Value::String(href));
            }
            Err(e) => tracing::warn!(rel = %definition.rel, link = %name, error = %e, "skipping static link"),
        }
    }
    out
}

/// Collection envelope. Backed resources list `members`; virtual kinds are built
/// from the fixed content alone.
pub fn collection_envelope(
    definition: &ResourceDefinition,
    members: Vec<Value>,
    links: Map<String, Value>,
) -> Value {
    let mut out = Map::new();
    out.insert(ODATA_ID.to_string(), Value::String(definition.rel.clone()));
    out.insert(ODATA_TYPE.to_string(), Value::String(definition.otype.clone()));
    if definition.kind.is_backed() {
        out.insert(MEMBERS_COUNT.to_string(), Value::from(members.len()));
        out.insert(MEMBERS.to_string(), Value::Array(members));
        out.insert(NAME.to_string(), Value::String(definition.oname.clone()));
        out.insert(LINKS.to_string(), Value::Object(links));
        for (k, v) in &definition.content {
            out.insert(k.clone(), v.clone());
        }
    } else {
        for (k, v) in &definition.content {
            out.insert(k.clone(), v.clone());
        }
        if let Some(Value::Array(items)) = definition.content.get(MEMBERS) {
            out.insert(MEMBERS_COUNT.to_string(), Value::from(items.len()));
        }
        out.insert(NAME.to_string(), Value::String(definition.oname.clone()));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeKind;
    use crate::error::AppError;
    use crate::links::{CountLink, DistinctLink, LinkContext, LinkHandler, RelatedLink};
    use crate::query::FieldPath;
    use async_trait::async_trait;
    use serde_json::json;

    /// A link whose URL cannot be built.
    struct Unlinkable;

    #[async_trait]
    impl LinkHandler for Unlinkable {
        async fn handle(&self, _ctx: &LinkContext<'_>) -> Result<Value, AppError> {
            Ok(Value::Null)
        }

        fn href(&self, base: &str, name: &str) -> Result<String, AppError> {
            Err(AppError::BadRequest(format!("no url for {} on {}", name, base)))
        }
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    fn accounts() -> ResourceDefinition {
        let mut def = ResourceDefinition::collection("/redfish/v1/AccountService/Accounts", "users");
        def.otype = "#ManagerAccount.v1_10_0.ManagerAccount".into();
        def.oname = "User Account".into();
        def.okey = FieldPath::parse("email");
        def.content = obj(json!({"Description": "User Account"}));
        def
    }

    fn books_links(count: bool) -> (ResourceDefinition, LinkRegistry) {
        let mut def = ResourceDefinition::collection("/api/books", "books");
        def.count = count;
        let mut links = LinkRegistry::default();
        links.add_static(&def.rel, "count", Arc::new(CountLink)).unwrap();
        links
            .add_static(&def.rel, "genres", Arc::new(DistinctLink::new(FieldPath::parse("genre").unwrap())))
            .unwrap();
        (def, links)
    }

    #[test]
    fn full_mapping_merges_content_and_identity() {
        let def = accounts();
        let v = Mapper::new(&def, None, true).map(obj(json!({"_id": "1", "email": "a@b.c", "Description": "x"})), 0);
        assert_eq!(v["@odata.id"], "/redfish/v1/AccountService/Accounts/a@b.c");
        assert_eq!(v["@odata.type"], "#ManagerAccount.v1_10_0.ManagerAccount");
        assert_eq!(v["Name"], "User Account");
        assert_eq!(v["Description"], "User Account");
        assert_eq!(v["email"], "a@b.c");
        assert!(v.get("_links").is_none());
    }

    #[test]
    fn identity_mapping_and_id_fallback() {
        let def = ResourceDefinition::collection("/api/books", "books");
        let v = Mapper::new(&def, None, false).map(obj(json!({"_id": "b1", "title": "t"})), 0);
        assert_eq!(v, json!({"@odata.id": "/api/books/b1"}));
    }

    #[test]
    fn post_process_wins() {
        let def = accounts();
        let post: PostProcess = Arc::new(|mut o: Map<String, Value>, i: usize| {
            o.remove("password");
            o.insert("index".into(), json!(i));
            Value::Object(o)
        });
        let mapper = Mapper::new(&def, Some(&post), false);
        let out = mapper.map_all(vec![obj(json!({"email": "a", "password": "x"})), obj(json!({"email": "b"}))]);
        assert!(out[0].get("password").is_none());
        assert_eq!(out[1]["index"], 1);
        assert_eq!(out[1]["@odata.id"], "/redfish/v1/AccountService/Accounts/b");
    }

    #[test]
    fn instance_links_on_full_entities() {
        let def = ResourceDefinition::collection("/api/books", "books");
        let mut links = LinkRegistry::default();
        links
            .add_instance(&def.rel, "reviews", Arc::new(RelatedLink::new("/api/reviews", FieldPath::parse("_book").unwrap())))
            .unwrap();
        let v = Mapper::new(&def, None, true).with_links(&links).map(obj(json!({"_id": "b1"})), 0);
        assert_eq!(v["_links"], json!({"reviews": "/api/books/b1/reviews"}));
    }

    #[test]
    fn count_link_policies() {
        let (def, links) = books_links(true);
        let find = static_links(&def, &links, LinkPolicy::Find { query: None });
        assert_eq!(Value::Object(find), json!({"count": "/api/books/count", "genres": "/api/books/genres"}));

        let filtered = static_links(&def, &links, LinkPolicy::Find { query: Some("%24filter=genre+eq+%27x%27") });
        assert_eq!(filtered["count"], "/api/books/count?%24filter=genre+eq+%27x%27");

        let list = static_links(&def, &links, LinkPolicy::List);
        assert_eq!(Value::Object(list), json!({"genres": "/api/books/genres"}));

        let related = static_links(
            &def,
            &links,
            LinkPolicy::Related {
                path: "/api/authors/a1/books",
                query: None,
            },
        );
        assert_eq!(related["count"], "/api/authors/a1/books/count");
    }

    #[test]
    fn count_link_suppressed_when_counting_disabled() {
        let (def, links) = books_links(false);
        for policy in [
            LinkPolicy::Find { query: Some("a=1") },
            LinkPolicy::List,
            LinkPolicy::Related { path: "/x", query: None },
        ] {
            assert!(static_links(&def, &links, policy).get("count").is_none());
        }
    }

    #[test]
    fn internal_db_envelope() {
        let (mut def, links) = books_links(true);
        def.content = obj(json!({"Description": "Books"}));
        let members = vec![json!({"@odata.id": "/api/books/1"}), json!({"@odata.id": "/api/books/2"})];
        let env = collection_envelope(&def, members, static_links(&def, &links, LinkPolicy::Find { query: None }));
        assert_eq!(env["@odata.id"], "/api/books");
        assert_eq!(env["Members@odata.count"], 2);
        assert_eq!(env["Members"].as_array().unwrap().len(), 2);
        assert_eq!(env["Name"], "books");
        assert_eq!(env["Description"], "Books");
        assert_eq!(env["_links"]["count"], "/api/books/count");
    }

    #[test]
    fn failing_link_is_left_out_of_the_envelope() {
        let (def, mut links) = books_links(true);
        links.add_static(&def.rel, "broken", Arc::new(Unlinkable)).unwrap();
        let out = static_links(&def, &links, LinkPolicy::Find { query: None });
        assert!(out.get("broken").is_none());
        assert_eq!(out["count"], "/api/books/count");
        assert_eq!(out["genres"], "/api/books/genres");

        let env = collection_envelope(&def, Vec::new(), out);
        assert_eq!(env["Members@odata.count"], 0);
        assert_eq!(env["_links"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn virtual_envelope_counts_content_members() {
        let def = ResourceDefinition::virtual_node(
            "/redfish/v1/Systems",
            NodeKind::Internal,
            obj(json!({"Members": [{"@odata.id": "/redfish/v1/Systems/1"}]})),
        );
        let env = collection_envelope(&def, Vec::new(), Map::new());
        assert_eq!(env["Members@odata.count"], 1);
        assert_eq!(env["Name"], "Systems");
        assert!(env.get("_links").is_none());
    }
}
