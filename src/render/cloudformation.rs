//! `CloudFormation` JSON template writer.
//!
//! Produces `template.json` with one entry under `Resources` per declaration.
//! Logical ids are derived from the declaration name and the last segment of
//! the resource type (`main` + `AWS::EC2::VPC` -> `MainVPC`); references to
//! declared tasks become `{"Ref": LogicalId}`.

use serde_json::{json, Map, Value};

use crate::error::{ArtifactError, Result};

use super::{Artifact, ResourceDeclaration};

const TEMPLATE_VERSION: &str = "2010-09-09";

pub(super) fn document(artifact: &Artifact) -> Result<Value> {
    let link = |target: &ResourceDeclaration| json!({ "Ref": logical_id(target) });

    let mut resources: Map<String, Value> = Map::new();
    for declaration in artifact.declarations() {
        let mut properties = Map::new();
        for (property, literal) in &declaration.properties {
            properties.insert(
                property.clone(),
                artifact.resolve(&declaration.owner, literal, &link)?,
            );
        }

        let id = logical_id(declaration);
        if resources.contains_key(&id) {
            return Err(ArtifactError::DuplicateDeclaration {
                resource_type: declaration.resource_type.clone(),
                name: id,
            }
            .into());
        }
        resources.insert(
            id,
            json!({
                "Type": declaration.resource_type,
                "Properties": properties,
            }),
        );
    }

    Ok(json!({
        "AWSTemplateFormatVersion": TEMPLATE_VERSION,
        "Description": format!("Generated by converge for {}", artifact.region()),
        "Resources": resources,
    }))
}

/// Derives an alphanumeric logical id for a declaration.
pub(super) fn logical_id(declaration: &ResourceDeclaration) -> String {
    let mut id: String = declaration
        .name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect();
    let suffix = declaration
        .resource_type
        .rsplit("::")
        .next()
        .unwrap_or_default();
    id.extend(suffix.chars().filter(char::is_ascii_alphanumeric));
    id
}
