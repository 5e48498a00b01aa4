//! Key and value validation, applied before any store or cache access.

use crate::{AttributeValue, EntityId, KvValue, ValidationError, ValidationSettings};
use once_cell::sync::Lazy;
use regex::Regex;

/// Script tags, `javascript:` URIs and inline event handlers.
static XSS_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(<\s*/?\s*(script|iframe|object|embed)\b|javascript\s*:|\bon[a-z]+\s*=)").ok()
});

#[derive(Debug, Clone)]
pub struct AttributeValidator {
    max_key_length: usize,
    xss_filter: bool,
}

impl Default for AttributeValidator {
    fn default() -> Self {
        Self::new(&ValidationSettings::default())
    }
}

impl AttributeValidator {
    pub fn new(settings: &ValidationSettings) -> Self {
        Self {
            max_key_length: settings.max_key_length,
            xss_filter: settings.xss_filter,
        }
    }

    pub fn validate_entity(&self, entity_id: &EntityId) -> Result<(), ValidationError> {
        if entity_id.is_nil() {
            return Err(ValidationError::InvalidValue {
                field: "entity_id".to_string(),
                reason: "must not be the nil UUID".to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_key(&self, entity_id: &EntityId, key: &str) -> Result<(), ValidationError> {
        self.validate_entity(entity_id)?;
        if key.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "key".to_string(),
            });
        }
        if key.chars().count() > self.max_key_length {
            return Err(ValidationError::InvalidValue {
                field: "key".to_string(),
                reason: format!("longer than {} characters", self.max_key_length),
            });
        }
        if key.contains('\0') {
            return Err(ValidationError::InvalidValue {
                field: "key".to_string(),
                reason: "contains NUL character".to_string(),
            });
        }
        if self.xss_filter && is_unsafe(key) {
            return Err(ValidationError::UnsafeContent {
                field: "key".to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_value(&self, value: &AttributeValue) -> Result<(), ValidationError> {
        if value.last_update_ts <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "last_update_ts".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        let Some(payload) = &value.value else {
            return Ok(());
        };
        if payload.data_type() != value.data_type {
            return Err(ValidationError::TypeMismatch {
                key: value.key.clone(),
                declared: value.data_type.to_string(),
                actual: payload.data_type().to_string(),
            });
        }
        match payload {
            KvValue::Json(text) => {
                if let Err(e) = serde_json::from_str::<serde_json::Value>(text) {
                    return Err(ValidationError::InvalidValue {
                        field: value.key.clone(),
                        reason: format!("invalid JSON: {}", e),
                    });
                }
                if self.xss_filter && is_unsafe(text) {
                    return Err(ValidationError::UnsafeContent {
                        field: value.key.clone(),
                    });
                }
            }
            KvValue::String(text) => {
                if self.xss_filter && is_unsafe(text) {
                    return Err(ValidationError::UnsafeContent {
                        field: value.key.clone(),
                    });
                }
            }
            KvValue::Boolean(_) | KvValue::Double(_) | KvValue::Long(_) => {}
        }
        Ok(())
    }
}

fn is_unsafe(text: &str) -> bool {
    match XSS_PATTERN.as_ref() {
        Some(pattern) => pattern.is_match(text),
        // Pattern is a literal; failing to compile would be a build-time bug.
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;
    use uuid::Uuid;

    fn device() -> EntityId {
        EntityId::device(Uuid::new_v4())
    }

    fn filtering() -> AttributeValidator {
        AttributeValidator::new(&ValidationSettings {
            max_key_length: 16,
            xss_filter: true,
        })
    }

    #[test]
    fn test_xss_pattern_compiles() {
        assert!(XSS_PATTERN.is_some());
    }

    #[test]
    fn test_rejects_nil_entity() {
        let validator = AttributeValidator::default();
        let nil = EntityId::device(Uuid::nil());
        assert!(validator.validate_key(&nil, "fw").is_err());
    }

    #[test]
    fn test_rejects_blank_and_long_keys() {
        let validator = filtering();
        assert!(matches!(
            validator.validate_key(&device(), "   "),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(matches!(
            validator.validate_key(&device(), "a_very_long_attribute_name"),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(validator.validate_key(&device(), "bad\0key").is_err());
        assert!(validator.validate_key(&device(), "firmware").is_ok());
    }

    #[test]
    fn test_rejects_non_positive_timestamp() {
        let validator = AttributeValidator::default();
        assert!(validator
            .validate_value(&AttributeValue::long("count", 1, 0))
            .is_err());
        assert!(validator
            .validate_value(&AttributeValue::long("count", 1, -5))
            .is_err());
        assert!(validator
            .validate_value(&AttributeValue::long("count", 1, 1))
            .is_ok());
    }

    #[test]
    fn test_rejects_type_mismatch() {
        let mut value = AttributeValue::string("mode", "eco", 10);
        value.data_type = DataType::Long;
        assert!(matches!(
            AttributeValidator::default().validate_value(&value),
            Err(ValidationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_json() {
        let validator = AttributeValidator::default();
        assert!(validator
            .validate_value(&AttributeValue::json("cfg", "{\"a\":", 10))
            .is_err());
        assert!(validator
            .validate_value(&AttributeValue::json("cfg", "{\"a\":1}", 10))
            .is_ok());
    }

    #[test]
    fn test_xss_filter_only_when_enabled() {
        let payload = AttributeValue::string("label", "<script>alert(1)</script>", 10);
        assert!(AttributeValidator::default().validate_value(&payload).is_ok());
        assert!(matches!(
            filtering().validate_value(&payload),
            Err(ValidationError::UnsafeContent { .. })
        ));

        let handler = AttributeValue::json("cfg", r#"{"html":"<img onerror=x>"}"#, 10);
        assert!(filtering().validate_value(&handler).is_err());

        let benign = AttributeValue::string("label", "online since 10:00", 10);
        assert!(filtering().validate_value(&benign).is_ok());
    }

    #[test]
    fn test_unset_value_is_valid() {
        let unset = AttributeValue::unset("fw", DataType::String, 10);
        assert!(filtering().validate_value(&unset).is_ok());
    }
}
