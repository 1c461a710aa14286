//! Resource Engine: CRUD operations over one resource definition, and the registry
//! of all resources.

use crate::config::ResourceDefinition;
use crate::error::{AppError, ConfigError, StoreError};
use crate::links::{CountLink, LinkContext, LinkHandler, LinkRegistry, COUNT_LINK};
use crate::query::{translate, EffectiveQuery, FieldPath, RequestParams};
use crate::response::{collection_envelope, static_links, LinkPolicy, Mapper, PostProcess};
use crate::store::{Record, Serializable, Store, StoreQuery};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Resource {
    definition: ResourceDefinition,
    links: LinkRegistry,
    post_process: Option<PostProcess>,
}

fn body_object(body: Value) -> Result<Map<String, Value>, AppError> {
    match body {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::Validation("request body must be a JSON object".into())),
    }
}

impl Resource {
    /// Counting collection-backed resources get the `count` static link up front.
    pub fn new(definition: ResourceDefinition) -> Self {
        let mut links = LinkRegistry::default();
        if definition.count && definition.kind.is_backed() {
            links.push_static(COUNT_LINK, Arc::new(CountLink));
        }
        Resource {
            definition,
            links,
            post_process: None,
        }
    }

    pub fn static_link(mut self, name: &str, handler: impl LinkHandler + 'static) -> Result<Self, ConfigError> {
        self.links.add_static(&self.definition.rel, name, Arc::new(handler))?;
        Ok(self)
    }

    pub fn instance_link(mut self, name: &str, handler: impl LinkHandler + 'static) -> Result<Self, ConfigError> {
        self.links.add_instance(&self.definition.rel, name, Arc::new(handler))?;
        Ok(self)
    }

    pub fn with_post_process<F>(mut self, f: F) -> Self
    where
        F: Fn(Map<String, Value>, usize) -> Value + Send + Sync + 'static,
    {
        self.post_process = Some(Arc::new(f));
        self
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    pub fn rel(&self) -> &str {
        &self.definition.rel
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    pub fn collection_name(&self) -> Result<&str, AppError> {
        self.definition.collection.as_deref().ok_or_else(|| {
            AppError::Config(ConfigError::Validation(format!("{} is not backed by a collection", self.definition.rel)))
        })
    }

    /// Full mappers also name the entity's instance links.
    pub fn mapper(&self, full: bool) -> Mapper<'_> {
        let mapper = Mapper::new(&self.definition, self.post_process.as_ref(), full);
        if full {
            mapper.with_links(&self.links)
        } else {
            mapper
        }
    }

    pub fn translate(&self, params: &RequestParams, base: StoreQuery) -> Result<EffectiveQuery, AppError> {
        translate(&self.definition.defaults, params, base)
    }

    fn key_query(&self, value: &str) -> Result<StoreQuery, AppError> {
        let collection = self.collection_name()?;
        Ok(match &self.definition.okey {
            Some(key) => StoreQuery::by_key(collection, key.clone(), value),
            None => StoreQuery::by_id(collection, value),
        })
    }

    pub fn single_response<E: Serializable>(&self, entity: E) -> Value {
        self.mapper(true).map(entity, 0)
    }

    /// Collection envelope for custom handlers. The count link is never advertised.
    pub fn list_response<E: Serializable>(&self, entities: Vec<E>) -> Value {
        let members = self.mapper(false).map_all(entities);
        collection_envelope(&self.definition, members, static_links(&self.definition, &self.links, LinkPolicy::List))
    }

    /// Collection envelope for a traversed relationship; the count link follows `path`.
    pub fn rel_list_response<E: Serializable>(&self, entities: Vec<E>, path: &str, query: Option<&str>) -> Value {
        let members = self.mapper(false).map_all(entities);
        let links = static_links(&self.definition, &self.links, LinkPolicy::Related { path, query });
        collection_envelope(&self.definition, members, links)
    }

    pub async fn find(&self, store: &dyn Store, params: &RequestParams) -> Result<Value, AppError> {
        let eq = self.translate(params, StoreQuery::find(self.collection_name()?))?;
        let found = store.find(&eq.query).await.map_err(|e| AppError::store("find failed", e))?;
        tracing::debug!(rel = %self.definition.rel, found = found.len(), "find");
        let members = self.mapper(false).map_all(found);
        let query = eq.definition.passthrough_query();
        let links = static_links(
            &self.definition,
            &self.links,
            LinkPolicy::Find { query: query.as_deref() },
        );
        Ok(collection_envelope(&self.definition, members, links))
    }

    async fn find_one(&self, store: &dyn Store, query: StoreQuery, params: &RequestParams, missing: &str) -> Result<Value, AppError> {
        let eq = self.translate(params, query)?;
        match store.find_one(&eq.query).await.map_err(|e| AppError::store("find failed", e))? {
            Some(entity) => Ok(self.single_response(entity)),
            None => Err(AppError::NotFound(missing.to_string())),
        }
    }

    pub async fn find_by_id(&self, store: &dyn Store, id: &str, params: &RequestParams) -> Result<Value, AppError> {
        let query = StoreQuery::by_id(self.collection_name()?, id);
        self.find_one(store, query, params, id).await
    }

    /// Lookup on `okey`; resources without one fall back to `_id`.
    pub async fn find_by_key(&self, store: &dyn Store, value: &str, params: &RequestParams) -> Result<Value, AppError> {
        let query = self.key_query(value)?;
        self.find_one(store, query, params, value).await
    }

    /// Item route lookup.
    pub async fn find_item(&self, store: &dyn Store, id: &str, params: &RequestParams) -> Result<Value, AppError> {
        match self.definition.okey {
            Some(_) => self.find_by_key(store, id, params).await,
            None => self.find_by_id(store, id, params).await,
        }
    }

    pub async fn count(&self, store: &dyn Store, params: &RequestParams) -> Result<u64, AppError> {
        let eq = self.translate(params, StoreQuery::find(self.collection_name()?))?;
        store.count(&eq.query).await.map_err(|e| AppError::store("count failed", e))
    }

    /// Native record behind an item path, ignoring projection, expansion and lean.
    async fn load_native(&self, store: &dyn Store, id: &str) -> Result<Record, AppError> {
        let mut query = self.key_query(id)?;
        query.lean(false);
        let entity = store
            .find_one(&query)
            .await
            .map_err(|e| AppError::store("find failed", e))?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        entity.into_record().map_err(|e| AppError::store("find failed", e))
    }

    /// `_id` of the entity behind an item path.
    pub async fn resolve_id(&self, store: &dyn Store, id: &str) -> Result<String, AppError> {
        let record = self.load_native(store, id).await?;
        record.id.ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Save a new entity and answer with the re-fetched copy.
    pub async fn create(&self, store: &dyn Store, body: Value, params: &RequestParams) -> Result<Value, AppError> {
        let fields = body_object(body)?;
        self.definition.validation.check_create(&fields)?;
        let mut record = Record::new(self.collection_name()?, fields);
        store
            .save(&mut record)
            .await
            .map_err(|e| AppError::store("create failure", e))?;
        let id = record.id.ok_or_else(|| AppError::store("create failure", StoreError::NotNative))?;
        tracing::info!(rel = %self.definition.rel, id = %id, "created");
        self.find_by_id(store, &id, params).await
    }

    /// Partial update: only keys present in `body` change. Not guarded against
    /// concurrent writers; the last save wins.
    pub async fn update(&self, store: &dyn Store, id: &str, body: Value, params: &RequestParams) -> Result<Value, AppError> {
        let fields = body_object(body)?;
        self.definition.validation.check_update(&fields)?;
        let mut record = self.load_native(store, id).await?;
        for (key, value) in fields {
            record.set(&key, value);
        }
        store
            .save(&mut record)
            .await
            .map_err(|e| AppError::store("update failure", e))?;
        let saved_id = record.id.unwrap_or_default();
        tracing::info!(rel = %self.definition.rel, id = %saved_id, "updated");
        self.find_by_id(store, &saved_id, params).await
    }

    pub async fn delete(&self, store: &dyn Store, id: &str) -> Result<(), AppError> {
        let record = self.load_native(store, id).await?;
        store
            .remove(&record)
            .await
            .map_err(|e| AppError::store("remove error", e))?;
        tracing::info!(rel = %self.definition.rel, id = %id, "deleted");
        Ok(())
    }

    /// Collection-shaped envelope built from the fixed content only.
    pub fn internal_node(&self) -> Value {
        let links = static_links(&self.definition, &self.links, LinkPolicy::Find { query: None });
        collection_envelope(&self.definition, Vec::new(), links)
    }

    /// Members of this resource whose `key` equals `id`, as reached through an
    /// instance link at `path`.
    pub async fn related(
        &self,
        store: &dyn Store,
        key: &FieldPath,
        id: &str,
        params: &RequestParams,
        path: &str,
    ) -> Result<Value, AppError> {
        let base = StoreQuery::by_key(self.collection_name()?, key.clone(), id);
        let eq = self.translate(params, base)?;
        let found = store.find(&eq.query).await.map_err(|e| AppError::store("find failed", e))?;
        let query = eq.definition.passthrough_query();
        Ok(self.rel_list_response(found, path, query.as_deref()))
    }

    pub async fn count_related(
        &self,
        store: &dyn Store,
        key: &FieldPath,
        id: &str,
        params: &RequestParams,
    ) -> Result<u64, AppError> {
        let base = StoreQuery::by_key(self.collection_name()?, key.clone(), id);
        let eq = self.translate(params, base)?;
        store.count(&eq.query).await.map_err(|e| AppError::store("count failed", e))
    }

    pub async fn follow_static(
        &self,
        store: &dyn Store,
        registry: &Registry,
        name: &str,
        params: &RequestParams,
        path: &str,
    ) -> Result<Value, AppError> {
        let handler = self
            .links
            .static_link(name)
            .ok_or_else(|| AppError::NotFound(format!("{}/{}", self.rel(), name)))?;
        let ctx = LinkContext {
            store,
            registry,
            resource: self,
            params,
            path,
            id: None,
        };
        handler.handle(&ctx).await
    }

    /// Follow instance link `name` from the entity at item path `id`. With
    /// `count`, answers the cardinality behind the link instead.
    #[allow(clippy::too_many_arguments)]
    pub async fn follow_instance(
        &self,
        store: &dyn Store,
        registry: &Registry,
        id: &str,
        name: &str,
        params: &RequestParams,
        path: &str,
        count: bool,
    ) -> Result<Value, AppError> {
        let handler = self
            .links
            .instance_link(name)
            .ok_or_else(|| AppError::NotFound(format!("{}/{}/{}", self.rel(), id, name)))?;
        let entity_id = self.resolve_id(store, id).await?;
        let ctx = LinkContext {
            store,
            registry,
            resource: self,
            params,
            path,
            id: Some(&entity_id),
        };
        if count {
            return match handler.count(&ctx).await? {
                Some(n) => Ok(Value::from(n)),
                None => Err(AppError::NotFound(format!("{}/{}", path, COUNT_LINK))),
            };
        }
        handler.handle(&ctx).await
    }
}

/// All resources, keyed by `rel`. Built once, read-only afterwards.
pub struct Registry {
    resources: Vec<Resource>,
    by_rel: HashMap<String, usize>,
}

impl Registry {
    pub fn new(resources: Vec<Resource>) -> Result<Self, ConfigError> {
        let mut by_rel = HashMap::new();
        for (i, r) in resources.iter().enumerate() {
            if by_rel.insert(r.rel().to_string(), i).is_some() {
                return Err(ConfigError::DuplicateRel(r.rel().to_string()));
            }
            if r.definition.kind.is_backed() && r.definition.collection.is_none() {
                return Err(ConfigError::Validation(format!("{} needs a collection", r.rel())));
            }
        }
        for r in &resources {
            for (_, handler) in r.links.instances() {
                if let Some(target) = handler.target() {
                    if !by_rel.contains_key(target) {
                        return Err(ConfigError::MissingReference {
                            kind: "resource",
                            id: target.to_string(),
                        });
                    }
                }
            }
        }
        Ok(Registry { resources, by_rel })
    }

    /// Attach a post-process to the resource at `rel`.
    pub fn with_post_process<F>(mut self, rel: &str, f: F) -> Result<Self, ConfigError>
    where
        F: Fn(Map<String, Value>, usize) -> Value + Send + Sync + 'static,
    {
        let i = *self.by_rel.get(rel).ok_or_else(|| ConfigError::MissingReference {
            kind: "resource",
            id: rel.to_string(),
        })?;
        self.resources[i].post_process = Some(Arc::new(f));
        Ok(self)
    }

    pub fn get(&self, rel: &str) -> Option<&Resource> {
        self.by_rel.get(rel).map(|i| &self.resources[*i])
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{DistinctLink, RelatedLink};
    use crate::config::NodeKind;
    use crate::store::{CollectionSchema, Entity, MemoryStore, ID_FIELD};
    use serde_json::json;

    fn library() -> (MemoryStore, Registry) {
        let mut books = CollectionSchema::new("books");
        books.refs.insert("_author".into(), "authors".into());
        let store = MemoryStore::new(vec![books, CollectionSchema::new("authors"), CollectionSchema::new("reviews")]);

        let mut books_def = ResourceDefinition::collection("/api/books", "books");
        books_def.count = true;
        let books = Resource::new(books_def)
            .static_link("genres", DistinctLink::new(FieldPath::parse("genre").unwrap()))
            .unwrap()
            .instance_link("reviews", RelatedLink::new("/api/reviews", FieldPath::parse("_book").unwrap()))
            .unwrap();
        let mut reviews_def = ResourceDefinition::collection("/api/reviews", "reviews");
        reviews_def.count = true;
        let registry = Registry::new(vec![
            books,
            Resource::new(ResourceDefinition::collection("/api/authors", "authors")),
            Resource::new(reviews_def),
        ])
        .unwrap();
        (store, registry)
    }

    async fn create(store: &MemoryStore, registry: &Registry, rel: &str, body: Value) -> String {
        let created = registry
            .get(rel)
            .unwrap()
            .create(store, body, &RequestParams::default())
            .await
            .unwrap();
        created["@odata.id"].as_str().unwrap().rsplit('/').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn paged_find_sorts_and_links_count() {
        let (store, registry) = library();
        for i in 0..12 {
            create(&store, &registry, "/api/books", json!({"title": format!("t{:02}", i)})).await;
        }
        let books = registry.get("/api/books").unwrap();
        let params = RequestParams::parse("$top=10");
        let first = books.find(&store, &params).await.unwrap();
        let again = books.find(&store, &params).await.unwrap();
        assert_eq!(first["Members"], again["Members"]);
        assert_eq!(first["Members@odata.count"], 10);
        assert_eq!(first["_links"]["count"], "/api/books/count");
        assert_eq!(first["_links"]["genres"], "/api/books/genres");
    }

    #[tokio::test]
    async fn update_is_partial() {
        let (store, registry) = library();
        let authors = registry.get("/api/authors").unwrap();
        let id = create(&store, &registry, "/api/authors", json!({"email": "old@example.com", "name": "N", "age": 40})).await;
        let updated = authors
            .update(&store, &id, json!({"email": "new@example.com"}), &RequestParams::default())
            .await
            .unwrap();
        assert_eq!(updated["email"], "new@example.com");
        assert_eq!(updated["name"], "N");
        assert_eq!(updated["age"], 40);
        assert_eq!(updated["_id"], id.as_str());
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let (store, registry) = library();
        let books = registry.get("/api/books").unwrap();
        let params = RequestParams::default();
        assert!(matches!(books.find_item(&store, "nope", &params).await, Err(AppError::NotFound(_))));
        assert!(matches!(books.update(&store, "nope", json!({}), &params).await, Err(AppError::NotFound(_))));
        assert!(matches!(books.delete(&store, "nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(
            books.create(&store, json!([1]), &params).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn instance_links_list_and_count() {
        let (store, registry) = library();
        let book = create(&store, &registry, "/api/books", json!({"title": "Earthsea"})).await;
        let other = create(&store, &registry, "/api/books", json!({"title": "Other"})).await;
        for (b, stars) in [(&book, 5), (&book, 3), (&other, 4)] {
            create(&store, &registry, "/api/reviews", json!({"_book": b, "stars": stars})).await;
        }
        let books = registry.get("/api/books").unwrap();
        let path = format!("/api/books/{}/reviews", book);
        let params = RequestParams::parse("$filter=stars%20gt%204");
        let list = books
            .follow_instance(&store, &registry, &book, "reviews", &params, &path, false)
            .await
            .unwrap();
        assert_eq!(list["Members@odata.count"], 1);
        assert_eq!(list["_links"]["count"], format!("{}/count?%24filter=stars+gt+4", path));
        let n = books
            .follow_instance(&store, &registry, &book, "reviews", &RequestParams::default(), &path, true)
            .await
            .unwrap();
        assert_eq!(n, json!(2));
    }

    #[tokio::test]
    async fn static_links_dispatch() {
        let (store, registry) = library();
        for genre in ["sf", "fantasy", "sf"] {
            create(&store, &registry, "/api/books", json!({"genre": genre})).await;
        }
        let books = registry.get("/api/books").unwrap();
        let params = RequestParams::parse("$filter=genre%20eq%20'sf'");
        let n = books.follow_static(&store, &registry, "count", &params, "/api/books/count").await.unwrap();
        assert_eq!(n, json!(2));
        let genres = books
            .follow_static(&store, &registry, "genres", &RequestParams::default(), "/api/books/genres")
            .await
            .unwrap();
        assert_eq!(genres, json!(["fantasy", "sf"]));
        assert!(matches!(
            books.follow_static(&store, &registry, "nope", &params, "/api/books/nope").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn custom_list_omits_count_link() {
        let (_, registry) = library();
        let books = registry.get("/api/books").unwrap();
        let doc = match json!({"_id": "b1", "title": "t"}) {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        let list = books.list_response(vec![Entity::Plain(doc)]);
        assert_eq!(list["Members"], json!([{"@odata.id": "/api/books/b1"}]));
        assert_eq!(list["_links"], json!({"genres": "/api/books/genres"}));
    }

    #[test]
    fn registry_validates_rels_and_targets() {
        let dup = Registry::new(vec![
            Resource::new(ResourceDefinition::collection("/a", "a")),
            Resource::new(ResourceDefinition::collection("/a", "a")),
        ]);
        assert!(matches!(dup, Err(ConfigError::DuplicateRel(_))));
        let dangling = Resource::new(ResourceDefinition::collection("/a", "a"))
            .instance_link("b", RelatedLink::new("/b", FieldPath::id()))
            .unwrap();
        assert!(matches!(Registry::new(vec![dangling]), Err(ConfigError::MissingReference { .. })));
    }

    #[test]
    fn internal_node_uses_content_only() {
        let def = ResourceDefinition::virtual_node(
            "/redfish/v1/AccountService",
            NodeKind::Internal,
            match json!({"Id": "AccountService", "ServiceEnabled": true}) {
                Value::Object(m) => m,
                _ => Map::new(),
            },
        );
        let node = Resource::new(def).internal_node();
        assert_eq!(node["@odata.id"], "/redfish/v1/AccountService");
        assert_eq!(node["Id"], "AccountService");
        assert_eq!(node["Name"], "AccountService");
        assert!(node.get("Members").is_none());
    }

    #[test]
    fn only_backed_resources_count() {
        let mut def = ResourceDefinition::virtual_node("/svc", NodeKind::Internal, Map::new());
        def.count = true;
        assert!(Resource::new(def).links().static_link(COUNT_LINK).is_none());

        let mut def = ResourceDefinition::collection("/api/reviews", "reviews");
        def.kind = NodeKind::Leaf;
        def.count = true;
        assert!(Resource::new(def).links().static_link(COUNT_LINK).is_some());
    }

    #[test]
    fn post_process_masks_fields() {
        let resource = Resource::new(ResourceDefinition::collection("/users", "users")).with_post_process(|mut o, _| {
            o.remove("password");
            Value::Object(o)
        });
        let v = resource.single_response(Entity::Plain(match json!({"_id": "1", "password": "x"}) {
            Value::Object(m) => m,
            _ => Map::new(),
        }));
        assert!(v.get("password").is_none());
        assert_eq!(v[ID_FIELD], "1");
    }
}
