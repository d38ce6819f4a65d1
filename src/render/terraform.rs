//! Terraform JSON configuration writer.
//!
//! Produces `main.tf.json`:
//!
//! ```json
//! {
//!   "provider": { "aws": { "region": "us-east-1" } },
//!   "resource": { "aws_vpc": { "main": { "cidr_block": "10.0.0.0/16" } } }
//! }
//! ```
//!
//! References to declared tasks become `${type.name.id}` interpolations.

use serde_json::{json, Map, Value};

use crate::error::{ArtifactError, Result};

use super::{Artifact, ResourceDeclaration};

pub(super) fn document(artifact: &Artifact) -> Result<Value> {
    let link = |target: &ResourceDeclaration| {
        Value::String(format!(
            "${{{}.{}.id}}",
            target.resource_type,
            block_name(&target.name)
        ))
    };

    let mut resources: Map<String, Value> = Map::new();
    for declaration in artifact.declarations() {
        let mut body = Map::new();
        for (property, literal) in &declaration.properties {
            body.insert(
                property.clone(),
                artifact.resolve(&declaration.owner, literal, &link)?,
            );
        }

        let blocks = resources
            .entry(declaration.resource_type.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(blocks) = blocks {
            // Distinct task names may sanitize to the same block name.
            let name = block_name(&declaration.name);
            if blocks.contains_key(&name) {
                return Err(ArtifactError::DuplicateDeclaration {
                    resource_type: declaration.resource_type.clone(),
                    name,
                }
                .into());
            }
            blocks.insert(name, Value::Object(body));
        }
    }

    Ok(json!({
        "provider": { "aws": { "region": artifact.region() } },
        "resource": resources,
    }))
}

/// Turns a task name into a valid Terraform block name.
pub(super) fn block_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !sanitized.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        sanitized.insert(0, '_');
    }
    sanitized
}
