use crate::core::{FieldMap, Value};
use std::sync::Arc;

/// Check run against the field values about to be saved.
/// `Err` carries the message shown to the user.
pub type PreSaveTest = Arc<dyn Fn(&FieldMap) -> Result<(), String> + Send + Sync>;

/// A rule attached to an entity kind, checked before every save.
pub trait FieldRule: Send + Sync {
    fn check(&self, fields: &FieldMap) -> Option<String>;
}

/// Field must be present and not blank.
pub struct RequiredField {
    field: String,
    message: String,
}

impl RequiredField {
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{} is required", field);
        Self { field, message }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl FieldRule for RequiredField {
    fn check(&self, fields: &FieldMap) -> Option<String> {
        match fields.get(&self.field) {
            Some(value) if !value.is_blank() => None,
            _ => Some(self.message.clone()),
        }
    }
}

/// Run pre-save tests, then field rules, collecting every failure.
pub(crate) fn collect_failures(
    fields: &FieldMap,
    tests: &[PreSaveTest],
    rules: &[Arc<dyn FieldRule>],
) -> Vec<String> {
    let mut failures: Vec<String> = tests.iter().filter_map(|t| t(fields).err()).collect();
    failures.extend(rules.iter().filter_map(|rule| rule.check(fields)));
    failures
}

pub(crate) fn value_or_null(fields: &FieldMap, field: &str) -> Value {
    fields.get(field).cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_field() {
        let rule = RequiredField::new("name");
        let mut fields = FieldMap::new();
        assert_eq!(rule.check(&fields), Some("name is required".to_string()));

        fields.insert("name".into(), Value::from("  "));
        assert!(rule.check(&fields).is_some());

        fields.insert("name".into(), Value::from("Alice"));
        assert_eq!(rule.check(&fields), None);
    }

    #[test]
    fn test_failures_accumulate() {
        let first: PreSaveTest = Arc::new(|_: &FieldMap| Err("first".to_string()));
        let passing: PreSaveTest = Arc::new(|_: &FieldMap| Ok(()));
        let second: PreSaveTest = Arc::new(|_: &FieldMap| Err("second".to_string()));
        let tests = vec![first, passing, second];
        let required: Arc<dyn FieldRule> = Arc::new(RequiredField::new("email"));
        let rules = vec![required];

        let failures = collect_failures(&FieldMap::new(), &tests, &rules);
        assert_eq!(failures, vec!["first", "second", "email is required"]);
    }
}
