//! SQL for the PostgreSQL document store: identifiers from config or validated paths, values as parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
