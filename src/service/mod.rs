//! Request body validation shared by create and update.

mod validation;
pub use validation::BodyRules;
