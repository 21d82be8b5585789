//! Shared types used across Director crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved label carrying the formations a resource belongs to.
pub const SCENARIOS_LABEL: &str = "scenarios";

/// Runtime label that opts out of application name normalization when `"false"`.
pub const IS_NORMALIZED_LABEL: &str = "isNormalized";

/// Runtime type label, checked against formation template constraints.
pub const RUNTIME_TYPE_LABEL: &str = "runtimeType";

/// Application type label, checked against formation template constraints.
pub const APPLICATION_TYPE_LABEL: &str = "applicationType";

/// Tenant identifier. Every stored object is scoped to exactly one tenant.
pub type TenantId = String;

/// A label value: either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Scalar(String),
    List(Vec<String>),
}

impl LabelValue {
    /// Whether the value equals `needle` (scalar) or contains it (list).
    pub fn contains(&self, needle: &str) -> bool {
        match self {
            LabelValue::Scalar(v) => v == needle,
            LabelValue::List(vs) => vs.iter().any(|v| v == needle),
        }
    }

    /// Flatten into a list of values.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            LabelValue::Scalar(v) => vec![v.clone()],
            LabelValue::List(vs) => vs.clone(),
        }
    }

    /// The scalar value, if this is a scalar.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            LabelValue::Scalar(v) => Some(v),
            LabelValue::List(_) => None,
        }
    }
}

impl From<&str> for LabelValue {
    fn from(v: &str) -> Self {
        LabelValue::Scalar(v.to_string())
    }
}

impl From<Vec<String>> for LabelValue {
    fn from(vs: Vec<String>) -> Self {
        LabelValue::List(vs)
    }
}

/// Kind of resource that can be a formation member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Application,
    Runtime,
}

impl ResourceType {
    /// Stable key segment used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Application => "application",
            ResourceType::Runtime => "runtime",
        }
    }

    /// Label holding this kind's type for template checks.
    pub fn type_label(&self) -> &'static str {
        match self {
            ResourceType::Application => APPLICATION_TYPE_LABEL,
            ResourceType::Runtime => RUNTIME_TYPE_LABEL,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "application" => Some(ResourceType::Application),
            "runtime" => Some(ResourceType::Runtime),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of authenticated caller issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerType {
    #[default]
    User,
    Application,
    Runtime,
    IntegrationSystem,
}

impl ConsumerType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "USER" => Some(ConsumerType::User),
            "APPLICATION" => Some(ConsumerType::Application),
            "RUNTIME" => Some(ConsumerType::Runtime),
            "INTEGRATION_SYSTEM" => Some(ConsumerType::IntegrationSystem),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_value_untagged_serde() {
        let scalar: LabelValue = serde_json::from_str(r#""false""#).unwrap();
        assert_eq!(scalar, LabelValue::Scalar("false".to_string()));

        let list: LabelValue = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(list, LabelValue::List(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(serde_json::to_string(&list).unwrap(), r#"["a","b"]"#);
    }

    #[test]
    fn label_value_contains() {
        assert!(LabelValue::from("x").contains("x"));
        assert!(!LabelValue::from("x").contains("y"));
        let list = LabelValue::from(vec!["x".to_string(), "y".to_string()]);
        assert!(list.contains("y"));
        assert_eq!(list.as_scalar(), None);
    }

    #[test]
    fn resource_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&ResourceType::Application).unwrap(),
            r#""APPLICATION""#
        );
        assert_eq!(ResourceType::parse("RUNTIME"), Some(ResourceType::Runtime));
        assert_eq!(ResourceType::parse("bundle"), None);
    }

    #[test]
    fn consumer_type_parse() {
        assert_eq!(
            ConsumerType::parse("integration-system"),
            Some(ConsumerType::IntegrationSystem)
        );
        assert_eq!(ConsumerType::parse("user"), Some(ConsumerType::User));
        assert_eq!(ConsumerType::parse("robot"), None);
    }
}
