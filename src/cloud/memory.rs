//! In-process cloud API.
//!
//! Used for local runs (`cloud.provider: memory`) and as the fake cloud in
//! tests. Tracks read and mutation counts and can inject transient failures.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::CloudError;

use super::{Attributes, CloudApi, CloudObject, CloudResult, Filter};

/// A recorded mutating call.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// A resource was created.
    Create {
        /// Resource kind.
        kind: String,
        /// Attributes sent.
        attributes: Attributes,
    },
    /// A resource was updated.
    Update {
        /// Resource kind.
        kind: String,
        /// Resource id.
        id: String,
        /// Attributes sent.
        attributes: Attributes,
    },
    /// A resource was associated with another resource.
    Associate {
        /// Resource kind.
        kind: String,
        /// Resource id.
        id: String,
        /// Relation name.
        relation: String,
        /// Target id.
        target: String,
    },
}

#[derive(Debug, Default)]
struct Store {
    objects: BTreeMap<String, BTreeMap<String, CloudObject>>,
    counters: BTreeMap<String, u64>,
    mutations: Vec<Mutation>,
    reads: u64,
    transient_failures: u32,
}

impl Store {
    fn take_failure(&mut self) -> CloudResult<()> {
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(CloudError::api_error(503, "injected transient failure"));
        }
        Ok(())
    }

    fn next_id(&mut self, kind: &str) -> String {
        let counter = self.counters.entry(kind.to_owned()).or_insert(0);
        *counter += 1;
        format!("{}-{:04}", id_prefix(kind), counter)
    }
}

fn id_prefix(kind: &str) -> &str {
    match kind {
        "security_group" => "sg",
        "dns_zone" => "zone",
        "instance" => "i",
        other => other,
    }
}

/// In-memory cloud API.
#[derive(Debug)]
pub struct MemoryCloud {
    region: String,
    store: Mutex<Store>,
}

impl MemoryCloud {
    /// Creates an empty cloud for the given region.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            store: Mutex::new(Store::default()),
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds an existing resource.
    pub fn insert(&self, kind: &str, object: CloudObject) {
        self.store()
            .objects
            .entry(kind.to_owned())
            .or_default()
            .insert(object.id.clone(), object);
    }

    /// Returns a resource without counting a read.
    #[must_use]
    pub fn peek(&self, kind: &str, id: &str) -> Option<CloudObject> {
        self.store()
            .objects
            .get(kind)
            .and_then(|objects| objects.get(id))
            .cloned()
    }

    /// Returns every resource of a kind without counting a read.
    #[must_use]
    pub fn all(&self, kind: &str) -> Vec<CloudObject> {
        self.store()
            .objects
            .get(kind)
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes the next `count` calls fail with a transient error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.store().transient_failures = count;
    }

    /// Returns the number of read calls served.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.store().reads
    }

    /// Returns the number of mutating calls served.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.store().mutations.len()
    }

    /// Returns every mutating call served, in order.
    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.store().mutations.clone()
    }

    /// Returns the most recent mutating call.
    #[must_use]
    pub fn last_mutation(&self) -> Option<Mutation> {
        self.store().mutations.last().cloned()
    }
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new("us-east-1")
    }
}

#[async_trait]
impl CloudApi for MemoryCloud {
    fn region(&self) -> String {
        self.region.clone()
    }

    async fn get(&self, kind: &str, id: &str) -> CloudResult<Option<CloudObject>> {
        let mut store = self.store();
        store.take_failure()?;
        store.reads += 1;
        Ok(store.objects.get(kind).and_then(|o| o.get(id)).cloned())
    }

    async fn list(&self, kind: &str, filter: &Filter) -> CloudResult<Vec<CloudObject>> {
        let mut store = self.store();
        store.take_failure()?;
        store.reads += 1;
        Ok(store
            .objects
            .get(kind)
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| o.matches(filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, kind: &str, attributes: &Attributes) -> CloudResult<CloudObject> {
        let mut store = self.store();
        store.take_failure()?;
        let id = store.next_id(kind);
        let object = CloudObject::new(id.clone(), attributes.clone());
        store
            .objects
            .entry(kind.to_owned())
            .or_default()
            .insert(id, object.clone());
        store.mutations.push(Mutation::Create {
            kind: kind.to_owned(),
            attributes: attributes.clone(),
        });
        Ok(object)
    }

    async fn update(
        &self,
        kind: &str,
        id: &str,
        attributes: &Attributes,
    ) -> CloudResult<CloudObject> {
        let mut store = self.store();
        store.take_failure()?;
        let object = store
            .objects
            .get_mut(kind)
            .and_then(|o| o.get_mut(id))
            .ok_or_else(|| CloudError::api_error(404, format!("{kind} {id} not found")))?;
        for (name, value) in attributes {
            object.attributes.insert(name.clone(), value.clone());
        }
        let updated = object.clone();
        store.mutations.push(Mutation::Update {
            kind: kind.to_owned(),
            id: id.to_owned(),
            attributes: attributes.clone(),
        });
        Ok(updated)
    }

    async fn associate(
        &self,
        kind: &str,
        id: &str,
        relation: &str,
        target: &str,
    ) -> CloudResult<()> {
        let mut store = self.store();
        store.take_failure()?;
        let object = store
            .objects
            .get_mut(kind)
            .and_then(|o| o.get_mut(id))
            .ok_or_else(|| CloudError::api_error(404, format!("{kind} {id} not found")))?;
        let entry = object
            .attributes
            .entry(relation.to_owned())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let serde_json::Value::Array(items) = entry {
            items.push(serde_json::Value::String(target.to_owned()));
        }
        store.mutations.push(Mutation::Associate {
            kind: kind.to_owned(),
            id: id.to_owned(),
            relation: relation.to_owned(),
            target: target.to_owned(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let cloud = MemoryCloud::default();
        let first = cloud.create("vpc", &Attributes::new()).await.expect("create");
        let second = cloud.create("vpc", &Attributes::new()).await.expect("create");
        let sg = cloud
            .create("security_group", &Attributes::new())
            .await
            .expect("create");

        assert_eq!(first.id, "vpc-0001");
        assert_eq!(second.id, "vpc-0002");
        assert_eq!(sg.id, "sg-0001");
        assert_eq!(cloud.mutation_count(), 3);
    }

    #[tokio::test]
    async fn test_update_merges_attributes() {
        let cloud = MemoryCloud::default();
        let mut attributes = Attributes::new();
        attributes.insert(String::from("cidr"), json!("10.0.0.0/16"));
        attributes.insert(String::from("name"), json!("main"));
        cloud.insert("vpc", CloudObject::new("vpc-1", attributes));

        let mut change = Attributes::new();
        change.insert(String::from("name"), json!("renamed"));
        let updated = cloud.update("vpc", "vpc-1", &change).await.expect("update");

        assert_eq!(updated.text("name").as_deref(), Some("renamed"));
        assert_eq!(updated.text("cidr").as_deref(), Some("10.0.0.0/16"));
        assert!(matches!(cloud.last_mutation(), Some(Mutation::Update { .. })));
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let cloud = MemoryCloud::default();
        cloud.inject_transient_failures(2);

        assert!(cloud.get("vpc", "x").await.expect_err("first").is_retryable());
        assert!(cloud.get("vpc", "x").await.expect_err("second").is_retryable());
        assert!(cloud.get("vpc", "x").await.expect("third").is_none());
        assert_eq!(cloud.read_count(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_resource_is_terminal() {
        let cloud = MemoryCloud::default();
        let err = cloud
            .update("vpc", "nope", &Attributes::new())
            .await
            .expect_err("missing");
        assert!(!err.is_retryable());
    }
}
