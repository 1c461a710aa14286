//! Per-field body rules. Compiled once from the resource's `validation` block, so a
//! bad pattern or an unknown format fails at startup instead of on a request.

use crate::config::ValidationRule;
use crate::error::{AppError, ConfigError};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Email,
    Date,
}

impl Format {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "email" => Some(Format::Email),
            "date" => Some(Format::Date),
            _ => None,
        }
    }

    fn accepts(self, s: &str) -> bool {
        match self {
            Format::Email => match s.split_once('@') {
                Some((user, domain)) => !user.is_empty() && !domain.is_empty() && !domain.contains('@'),
                None => false,
            },
            // chrono's %Y takes a signed year, so pin the shape to YYYY-MM-DD first
            Format::Date => {
                s.len() == 10
                    && s.as_bytes()[..4].iter().all(u8::is_ascii_digit)
                    && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Format::Email => "an email address",
            Format::Date => "a date (YYYY-MM-DD)",
        }
    }
}

#[derive(Clone, Debug, Default)]
struct FieldRule {
    required: bool,
    format: Option<Format>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
    allowed: Vec<Value>,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

impl FieldRule {
    fn compile(rel: &str, field: &str, rule: &ValidationRule) -> Result<Self, ConfigError> {
        let invalid = |what: String| ConfigError::Validation(format!("{}: rule for '{}' {}", rel, field, what));
        let format = match rule.format.as_deref() {
            Some(raw) => Some(Format::parse(raw).ok_or_else(|| invalid(format!("has unknown format '{}'", raw)))?),
            None => None,
        };
        let pattern = match rule.pattern.as_deref() {
            Some(raw) => Some(Regex::new(raw).map_err(|e| invalid(format!("has invalid pattern: {}", e)))?),
            None => None,
        };
        if let (Some(min), Some(max)) = (rule.min_length, rule.max_length) {
            if min > max {
                return Err(invalid(format!("has min_length {} above max_length {}", min, max)));
            }
        }
        if let (Some(min), Some(max)) = (rule.minimum, rule.maximum) {
            if min > max {
                return Err(invalid(format!("has minimum {} above maximum {}", min, max)));
            }
        }
        Ok(FieldRule {
            required: rule.required.unwrap_or(false),
            format,
            min_length: rule.min_length.map(|n| n as usize),
            max_length: rule.max_length.map(|n| n as usize),
            pattern,
            allowed: rule.allowed.clone().unwrap_or_default(),
            minimum: rule.minimum,
            maximum: rule.maximum,
        })
    }

    fn wants_string(&self) -> bool {
        self.format.is_some() || self.min_length.is_some() || self.max_length.is_some() || self.pattern.is_some()
    }

    fn wants_number(&self) -> bool {
        self.minimum.is_some() || self.maximum.is_some()
    }

    fn check(&self, field: &str, v: &Value) -> Result<(), AppError> {
        let fail = |what: String| Err(AppError::Validation(format!("{} {}", field, what)));
        if v.is_null() {
            return match self.required {
                true => fail("is required".into()),
                false => Ok(()),
            };
        }
        if !self.allowed.is_empty() && !self.allowed.iter().any(|a| same_value(a, v)) {
            return fail(format!("must be one of {}", Value::Array(self.allowed.clone())));
        }
        if self.wants_string() {
            let Some(s) = v.as_str() else {
                return fail("must be a string".into());
            };
            let len = s.chars().count();
            if let Some(min) = self.min_length.filter(|min| len < *min) {
                return fail(format!("must be at least {} characters", min));
            }
            if let Some(max) = self.max_length.filter(|max| len > *max) {
                return fail(format!("must be at most {} characters", max));
            }
            if let Some(format) = self.format.filter(|f| !f.accepts(s)) {
                return fail(format!("must be {}", format.describe()));
            }
            if let Some(re) = self.pattern.as_ref().filter(|re| !re.is_match(s)) {
                return fail(format!("must match {}", re.as_str()));
            }
        }
        if self.wants_number() {
            let Some(n) = v.as_f64() else {
                return fail("must be a number".into());
            };
            if let Some(min) = self.minimum.filter(|min| n < *min) {
                return fail(format!("must be at least {}", min));
            }
            if let Some(max) = self.maximum.filter(|max| n > *max) {
                return fail(format!("must be at most {}", max));
            }
        }
        Ok(())
    }
}

/// Numbers compare by value, so `5` matches `5.0`.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Compiled `validation` block of one resource.
#[derive(Clone, Debug, Default)]
pub struct BodyRules {
    fields: BTreeMap<String, FieldRule>,
}

impl BodyRules {
    /// `declared` is the collection's field list; rules may only name those fields.
    pub fn compile(
        rel: &str,
        rules: &HashMap<String, ValidationRule>,
        declared: Option<&[String]>,
    ) -> Result<Self, ConfigError> {
        let mut fields = BTreeMap::new();
        for (field, rule) in rules {
            if let Some(declared) = declared {
                if !declared.iter().any(|d| d == field) {
                    return Err(ConfigError::Validation(format!(
                        "{}: rule for '{}' names a field the collection does not declare",
                        rel, field
                    )));
                }
            }
            fields.insert(field.clone(), FieldRule::compile(rel, field, rule)?);
        }
        Ok(BodyRules { fields })
    }

    /// Create bodies: every required field must be present.
    pub fn check_create(&self, body: &Map<String, Value>) -> Result<(), AppError> {
        for (field, rule) in &self.fields {
            rule.check(field, body.get(field).unwrap_or(&Value::Null))?;
        }
        Ok(())
    }

    /// Update bodies: only the fields present are checked.
    pub fn check_update(&self, body: &Map<String, Value>) -> Result<(), AppError> {
        for (field, v) in body {
            if let Some(rule) = self.fields.get(field) {
                rule.check(field, v)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    fn rules(v: Value) -> HashMap<String, ValidationRule> {
        serde_json::from_value(v).unwrap()
    }

    fn accounts() -> BodyRules {
        BodyRules::compile(
            "/accounts",
            &rules(json!({
                "email": {"required": true, "format": "email", "max_length": 254},
                "password": {"required": true, "min_length": 8, "max_length": 20},
                "role": {"allowed": ["Administrator", "Operator", "ReadOnly"]},
                "born": {"format": "date"},
                "level": {"minimum": 1, "maximum": 5}
            })),
            None,
        )
        .unwrap()
    }

    fn message(r: Result<(), AppError>) -> String {
        match r {
            Err(AppError::Validation(m)) => m,
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn create_requires_fields() {
        let rules = accounts();
        assert!(rules
            .check_create(&obj(json!({"email": "a@b.c", "password": "12345678", "role": "Operator"})))
            .is_ok());
        assert_eq!(message(rules.check_create(&obj(json!({"email": "a@b.c"})))), "password is required");
        assert_eq!(
            message(rules.check_create(&obj(json!({"email": "a@b.c", "password": null})))),
            "password is required"
        );
    }

    #[test]
    fn update_checks_present_fields_only() {
        let rules = accounts();
        assert!(rules.check_update(&obj(json!({"role": "ReadOnly"}))).is_ok());
        assert!(rules.check_update(&obj(json!({"born": null}))).is_ok());
        assert!(rules.check_update(&obj(json!({"role": "Root"}))).is_err());
        assert_eq!(
            message(rules.check_update(&obj(json!({"password": "short"})))),
            "password must be at least 8 characters"
        );
        assert_eq!(message(rules.check_update(&obj(json!({"email": "nope"})))), "email must be an email address");
        assert_eq!(message(rules.check_update(&obj(json!({"email": null})))), "email is required");
    }

    #[test]
    fn lengths_count_characters() {
        let rules = accounts();
        assert!(rules.check_update(&obj(json!({"password": "pässwörd"}))).is_ok());
        assert!(rules.check_update(&obj(json!({"password": "ppppppppppppppppppppp"}))).is_err());
    }

    #[test]
    fn values_must_have_the_ruled_type() {
        let rules = accounts();
        assert_eq!(message(rules.check_update(&obj(json!({"password": 12345678})))), "password must be a string");
        assert_eq!(message(rules.check_update(&obj(json!({"level": "3"})))), "level must be a number");
        assert!(rules.check_update(&obj(json!({"level": 5.0}))).is_ok());
        assert_eq!(message(rules.check_update(&obj(json!({"level": 6})))), "level must be at most 5");
    }

    #[test]
    fn dates_must_exist_on_the_calendar() {
        let rules = accounts();
        for ok in ["2024-02-29", "1929-10-21"] {
            assert!(rules.check_update(&obj(json!({"born": ok}))).is_ok(), "{}", ok);
        }
        for bad in ["2023-02-31", "+999-01-01", "2023-04-31", "2024-13-01", "24-01-01", "yesterday"] {
            assert_eq!(
                message(rules.check_update(&obj(json!({"born": bad})))),
                "born must be a date (YYYY-MM-DD)",
                "{}",
                bad
            );
        }
    }

    #[test]
    fn patterns_are_compiled_once() {
        let compiled = BodyRules::compile("/books", &rules(json!({"genre": {"pattern": "^[a-z]+$"}})), None).unwrap();
        assert!(compiled.check_update(&obj(json!({"genre": "sf"}))).is_ok());
        assert_eq!(message(compiled.check_update(&obj(json!({"genre": "Sci Fi"})))), "genre must match ^[a-z]+$");

        let bad = BodyRules::compile("/books", &rules(json!({"genre": {"pattern": "([a-z"}})), None);
        assert!(matches!(bad, Err(ConfigError::Validation(m)) if m.starts_with("/books: rule for 'genre' has invalid pattern")));
    }

    #[test]
    fn rules_are_checked_against_the_collection() {
        let declared = vec!["title".to_string(), "year".to_string()];
        assert!(BodyRules::compile("/books", &rules(json!({"title": {"required": true}})), Some(&declared)).is_ok());
        assert!(matches!(
            BodyRules::compile("/books", &rules(json!({"titel": {"required": true}})), Some(&declared)),
            Err(ConfigError::Validation(m)) if m.contains("'titel'")
        ));
        assert!(BodyRules::compile("/books", &rules(json!({"year": {"format": "isbn"}})), None).is_err());
        assert!(BodyRules::compile("/books", &rules(json!({"year": {"minimum": 10, "maximum": 1}})), None).is_err());
    }
}
