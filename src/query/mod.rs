//! Query parameters to store queries: `$filter` parsing, default merging, translation.

pub mod definition;
pub mod filter;
pub mod translate;

pub use definition::{merge, QueryDefaults, QueryDefinition, RequestParams};
pub use filter::{compare_json, parse_filter, type_rank, CmpOp, FieldPath, Predicate, TextFn};
pub use translate::{build_expansions, translate, translate_orderby, EffectiveQuery};
