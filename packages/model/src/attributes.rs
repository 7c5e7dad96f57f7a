use crate::events::PropertyValue;
use serde::{Deserialize, Serialize};

/// Declared type of a component attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttrType {
    #[default]
    Text,
    Integer,
    Boolean,
}

impl AttrType {
    /// Coerce a raw attribute string. `None` when the text does not fit the type.
    pub fn coerce(self, raw: &str) -> Option<PropertyValue> {
        match self {
            Self::Text => Some(PropertyValue::Text(raw.to_string())),
            Self::Integer => raw.trim().parse().ok().map(PropertyValue::Integer),
            Self::Boolean => match raw.trim() {
                "true" | "1" => Some(PropertyValue::Boolean(true)),
                "false" | "0" => Some(PropertyValue::Boolean(false)),
                _ => None,
            },
        }
    }

    pub fn coerce_opt(self, raw: Option<&str>) -> Option<PropertyValue> {
        raw.and_then(|r| self.coerce(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercion() {
        assert_eq!(AttrType::Integer.coerce(" 42 "), Some(PropertyValue::Integer(42)));
        assert_eq!(AttrType::Integer.coerce("forty"), None);
        assert_eq!(AttrType::Boolean.coerce("1"), Some(PropertyValue::Boolean(true)));
        assert_eq!(AttrType::Boolean.coerce("yes"), None);
        assert_eq!(
            AttrType::Text.coerce_opt(Some("x")),
            Some(PropertyValue::Text("x".to_string()))
        );
        assert_eq!(AttrType::Text.coerce_opt(None), None);
    }
}
