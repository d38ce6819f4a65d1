//! Cloud API capability.
//!
//! The engine talks to the cloud exclusively through the opaque
//! [`CloudApi`] trait. Resources are addressed by kind and server-side id
//! and carry a free-form JSON attribute map; request semantics beyond that
//! belong to the implementation.

mod http;
mod memory;

pub use http::RestCloudClient;
pub use memory::{MemoryCloud, Mutation};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::error::CloudError;

/// Attribute map of a cloud object.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Attribute equality filter used by listings.
pub type Filter = BTreeMap<String, String>;

/// Result type for cloud calls.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// A resource as reported by the cloud API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudObject {
    /// Server-side identifier.
    pub id: String,
    /// Resource attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

impl CloudObject {
    /// Creates a new object.
    #[must_use]
    pub fn new(id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    /// Returns a string attribute.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        self.attributes
            .get(name)
            .and_then(serde_json::Value::as_str)
            .map(ToOwned::to_owned)
    }

    /// Returns an integer attribute.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(serde_json::Value::as_i64)
    }

    /// Returns a boolean attribute.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.attributes.get(name).and_then(serde_json::Value::as_bool)
    }

    /// Returns a list-of-strings attribute.
    #[must_use]
    pub fn text_list(&self, name: &str) -> Option<Vec<String>> {
        self.attributes.get(name).and_then(|v| {
            v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(ToOwned::to_owned))
                    .collect()
            })
        })
    }

    /// Returns a string-map attribute.
    #[must_use]
    pub fn text_map(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.attributes.get(name).and_then(|v| {
            v.as_object().map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                    .collect()
            })
        })
    }

    /// Returns true if every filter entry matches an attribute.
    #[must_use]
    pub fn matches(&self, filter: &Filter) -> bool {
        filter.iter().all(|(name, expected)| {
            self.attributes.get(name).is_some_and(|value| match value {
                serde_json::Value::String(s) => s == expected,
                other => other.to_string() == *expected,
            })
        })
    }
}

/// Opaque capability for reading and mutating cloud resources.
///
/// "Not found" is `Ok(None)` from [`get`](Self::get), never an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudApi: Debug + Send + Sync {
    /// Returns the region this API operates in.
    fn region(&self) -> String;

    /// Fetches a resource by id.
    async fn get(&self, kind: &str, id: &str) -> CloudResult<Option<CloudObject>>;

    /// Lists resources of a kind matching the filter.
    async fn list(&self, kind: &str, filter: &Filter) -> CloudResult<Vec<CloudObject>>;

    /// Creates a resource and returns it with its server-side id.
    async fn create(&self, kind: &str, attributes: &Attributes) -> CloudResult<CloudObject>;

    /// Updates the given attributes of a resource.
    async fn update(&self, kind: &str, id: &str, attributes: &Attributes)
    -> CloudResult<CloudObject>;

    /// Associates a resource with another resource.
    async fn associate(&self, kind: &str, id: &str, relation: &str, target: &str)
    -> CloudResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object() -> CloudObject {
        let attributes = json!({
            "cidr": "10.0.0.0/16",
            "size": 5,
            "shared": false,
            "rules": ["a", "b"],
            "tags": {"env": "prod"}
        });
        let serde_json::Value::Object(attributes) = attributes else {
            unreachable!()
        };
        CloudObject::new("vpc-1", attributes)
    }

    #[test]
    fn test_attribute_accessors() {
        let obj = object();
        assert_eq!(obj.text("cidr").as_deref(), Some("10.0.0.0/16"));
        assert_eq!(obj.integer("size"), Some(5));
        assert_eq!(obj.flag("shared"), Some(false));
        assert_eq!(obj.text_list("rules"), Some(vec![String::from("a"), String::from("b")]));
        assert_eq!(
            obj.text_map("tags").and_then(|t| t.get("env").cloned()).as_deref(),
            Some("prod")
        );
        assert!(obj.text("missing").is_none());
    }

    #[test]
    fn test_filter_matching() {
        let obj = object();
        let mut filter = Filter::new();
        filter.insert(String::from("cidr"), String::from("10.0.0.0/16"));
        filter.insert(String::from("shared"), String::from("false"));
        assert!(obj.matches(&filter));

        filter.insert(String::from("size"), String::from("6"));
        assert!(!obj.matches(&filter));
    }
}
