//! Comparable task fields.
//!
//! Every task kind describes its managed state as a list of [`Field`]s. The
//! diff engine compares these lists field by field, honoring each field's
//! [`ComparePolicy`].

use std::collections::BTreeMap;
use std::fmt;

use super::TaskKey;

/// A comparable field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Free-form text.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Boolean value.
    Bool(bool),
    /// Ordered sequence of values.
    List(Vec<FieldValue>),
    /// String map (tags, labels).
    Map(BTreeMap<String, String>),
    /// Reference to another task in the plan, compared by key.
    Reference(TaskKey),
}

impl FieldValue {
    /// Returns true for empty text, lists and maps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
            Self::Integer(_) | Self::Bool(_) | Self::Reference(_) => false,
        }
    }

    /// Returns the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Map(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Self::Reference(key) => write!(f, "ref({key})"),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<TaskKey> for FieldValue {
    fn from(value: TaskKey) -> Self {
        Self::Reference(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value.into_iter().map(Self::Text).collect())
    }
}

impl From<Vec<TaskKey>> for FieldValue {
    fn from(value: Vec<TaskKey>) -> Self {
        Self::List(value.into_iter().map(Self::Reference).collect())
    }
}

impl From<BTreeMap<String, String>> for FieldValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self::Map(value)
    }
}

/// How a field participates in comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ComparePolicy {
    /// Compared exactly; set-but-empty differs from unset.
    #[default]
    Compared,
    /// Never compared.
    Ignored,
    /// Compared, but empty values are treated as unset.
    EmptyEqualsUnset,
}

/// A named, optionally set field of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name as shown in deltas.
    pub name: &'static str,
    /// Field value; `None` means unset.
    pub value: Option<FieldValue>,
    /// Comparison policy.
    pub policy: ComparePolicy,
}

impl Field {
    /// Creates a compared field from an optional value.
    #[must_use]
    pub fn new<V: Into<FieldValue>>(name: &'static str, value: Option<V>) -> Self {
        Self {
            name,
            value: value.map(Into::into),
            policy: ComparePolicy::Compared,
        }
    }

    /// Creates a compared field that is always set.
    #[must_use]
    pub fn set(name: &'static str, value: impl Into<FieldValue>) -> Self {
        Self::new(name, Some(value))
    }

    /// Marks this field as ignored during comparison.
    #[must_use]
    pub const fn ignored(mut self) -> Self {
        self.policy = ComparePolicy::Ignored;
        self
    }

    /// Treats empty values of this field as unset.
    #[must_use]
    pub const fn empty_equals_unset(mut self) -> Self {
        self.policy = ComparePolicy::EmptyEqualsUnset;
        self
    }

    /// Returns the value after applying the comparison policy.
    #[must_use]
    pub fn normalized(&self) -> Option<&FieldValue> {
        match self.policy {
            ComparePolicy::Ignored => None,
            ComparePolicy::EmptyEqualsUnset => self.value.as_ref().filter(|v| !v.is_empty()),
            ComparePolicy::Compared => self.value.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_equals_unset_normalization() {
        let field = Field::set("tags", BTreeMap::<String, String>::new()).empty_equals_unset();
        assert!(field.normalized().is_none());

        let field = Field::set("tags", BTreeMap::<String, String>::new());
        assert!(field.normalized().is_some());
    }

    #[test]
    fn test_ignored_field_has_no_value() {
        let field = Field::set("size", 5_i64).ignored();
        assert!(field.normalized().is_none());
        assert_eq!(field.value, Some(FieldValue::Integer(5)));
    }

    #[test]
    fn test_value_display() {
        let list = FieldValue::from(vec![String::from("a"), String::from("b")]);
        assert_eq!(list.to_string(), "[a, b]");
        let reference = FieldValue::from(TaskKey::new("vpc", "main"));
        assert_eq!(reference.to_string(), "ref(vpc/main)");
    }
}
