//! Effective query definition: resource defaults merged with request parameters.
//!
//! Precedence, lowest first: built-in defaults, resource defaults, request parameters,
//! enforced resource values (`$select`).

pub const TOP: &str = "$top";
pub const SKIP: &str = "$skip";
pub const ORDERBY: &str = "$orderby";
pub const SELECT: &str = "$select";
pub const EXPAND: &str = "$expand";
pub const FILTER: &str = "$filter";

/// Parameters that describe paging/ordering rather than the result set itself.
const PAGING_PARAMS: &[&str] = &[TOP, SKIP, ORDERBY];

/// Query string pairs in request order. Repeated keys are kept.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestParams(Vec<(String, String)>);

impl RequestParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        RequestParams(pairs)
    }

    /// Parse a raw query string (`a=1&b=2`).
    pub fn parse(query: &str) -> Self {
        RequestParams(form_urlencoded::parse(query.as_bytes()).into_owned().collect())
    }

    /// First non-empty value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, v)| k == name && !v.trim().is_empty())
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0.iter().filter(|(k, _)| k == name).map(|(_, v)| v.as_str()).collect()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.push((name.to_string(), value.to_string()));
        self
    }
}

/// Query defaults declared on a resource.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryDefaults {
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub orderby: Option<String>,
    pub orderby_paged: Option<String>,
    /// Enforced projection: request `$select` never overrides it.
    pub select: Option<String>,
    pub expand: Vec<String>,
    /// Deprecated default for `$expand`.
    pub populate: Vec<String>,
    pub lean: Option<bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryDefinition {
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub orderby: Option<String>,
    pub orderby_paged: String,
    pub select: Option<String>,
    pub expand: Vec<String>,
    pub filter: Option<String>,
    pub lean: bool,
    /// Request parameters minus paging/ordering, re-attached to generated count links.
    pub passthrough: Vec<(String, String)>,
}

impl QueryDefinition {
    /// `passthrough` as a query string, or None when there is nothing to carry.
    pub fn passthrough_query(&self) -> Option<String> {
        if self.passthrough.is_empty() {
            return None;
        }
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.passthrough {
            ser.append_pair(k, v);
        }
        Some(ser.finish())
    }
}

/// Paging bounds end up as SQL bigints.
const MAX_PAGE: u64 = i64::MAX as u64;

fn positive(v: &str) -> Option<u64> {
    non_negative(v).filter(|n| *n > 0)
}

fn non_negative(v: &str) -> Option<u64> {
    v.trim().parse::<u64>().ok().map(|n| n.min(MAX_PAGE))
}

/// Merge resource defaults with request parameters. Pure: no store access.
pub fn merge(defaults: &QueryDefaults, request: &RequestParams) -> QueryDefinition {
    let mut def = QueryDefinition {
        top: None,
        skip: None,
        orderby: None,
        orderby_paged: "_id".to_string(),
        select: None,
        expand: defaults.populate.clone(),
        filter: None,
        lean: true,
        passthrough: Vec::new(),
    };

    def.top = defaults.top.filter(|n| *n > 0).map(|n| n.min(MAX_PAGE));
    def.skip = defaults.skip.map(|n| n.min(MAX_PAGE));
    def.orderby = defaults.orderby.clone().filter(|s| !s.trim().is_empty());
    if let Some(paged) = defaults.orderby_paged.as_ref().filter(|s| !s.trim().is_empty()) {
        def.orderby_paged = paged.clone();
    }
    def.select = defaults.select.clone();
    if !defaults.expand.is_empty() {
        def.expand = defaults.expand.clone();
    }
    if let Some(lean) = defaults.lean {
        def.lean = lean;
    }

    // invalid numbers are ignored, leaving the default in place
    if let Some(top) = request.get(TOP).and_then(positive) {
        def.top = Some(top);
    }
    if let Some(skip) = request.get(SKIP).and_then(non_negative) {
        def.skip = Some(skip);
    }
    if let Some(orderby) = request.get(ORDERBY) {
        def.orderby = Some(orderby.to_string());
    }
    if let Some(select) = request.get(SELECT) {
        def.select = Some(select.to_string());
    }
    let expand: Vec<String> = request
        .get_all(EXPAND)
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .collect();
    if !expand.is_empty() {
        def.expand = expand;
    }
    def.filter = request.get(FILTER).map(str::to_string);

    if defaults.select.is_some() {
        def.select = defaults.select.clone();
    }

    def.passthrough = request
        .pairs()
        .iter()
        .filter(|(k, _)| !PAGING_PARAMS.contains(&k.as_str()))
        .cloned()
        .collect();
    def
}
