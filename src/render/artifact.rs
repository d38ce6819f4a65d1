//! Artifact declarations shared by the Terraform and `CloudFormation` targets.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{ArtifactError, Result};
use crate::task::TaskKey;

use super::{cloudformation, terraform};

/// Output format of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Terraform JSON configuration.
    Terraform,
    /// `CloudFormation` JSON template.
    CloudFormation,
}

impl ArtifactFormat {
    /// Returns the conventional file name of the artifact.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Terraform => "main.tf.json",
            Self::CloudFormation => "template.json",
        }
    }
}

/// A property value in a declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// A plain value.
    Value(serde_json::Value),
    /// A symbolic link to another task.
    ///
    /// Resolved at serialization time to the referenced task's declaration,
    /// or to `fallback` (its resolved identifier) if it has none.
    Reference {
        /// Referenced task.
        key: TaskKey,
        /// Resolved identifier of the referenced task.
        fallback: Option<String>,
    },
    /// A list of literals.
    List(Vec<Literal>),
}

impl From<serde_json::Value> for Literal {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self::Value(serde_json::Value::String(value))
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::Value(serde_json::Value::String(value.to_owned()))
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Value(value.into())
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Value(value.into())
    }
}

impl From<Vec<Literal>> for Literal {
    fn from(value: Vec<Literal>) -> Self {
        Self::List(value)
    }
}

/// One resource block in an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDeclaration {
    /// Task that produced the declaration.
    pub owner: TaskKey,
    /// Target resource type, e.g. `aws_vpc` or `AWS::EC2::VPC`.
    pub resource_type: String,
    /// Block name, unique per resource type.
    pub name: String,
    /// Whether references to `owner` resolve to this declaration.
    pub represents_owner: bool,
    /// Block properties.
    pub properties: BTreeMap<String, Literal>,
}

impl ResourceDeclaration {
    /// Creates the declaration that stands for its owning task.
    #[must_use]
    pub fn primary(owner: TaskKey, resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner,
            resource_type: resource_type.into(),
            name: name.into(),
            represents_owner: true,
            properties: BTreeMap::new(),
        }
    }

    /// Creates an additional declaration (e.g. an association) for a task.
    #[must_use]
    pub fn supplementary(
        owner: TaskKey,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            represents_owner: false,
            ..Self::primary(owner, resource_type, name)
        }
    }

    /// Sets a property.
    #[must_use]
    pub fn with(mut self, property: &str, value: impl Into<Literal>) -> Self {
        self.properties.insert(property.to_owned(), value.into());
        self
    }

    /// Sets a property if a value is present.
    #[must_use]
    pub fn with_optional<V: Into<Literal>>(self, property: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(property, value),
            None => self,
        }
    }
}

/// Accumulator of declarations for one artifact target execution.
#[derive(Debug, Clone)]
pub struct Artifact {
    format: ArtifactFormat,
    region: String,
    declarations: Vec<ResourceDeclaration>,
}

impl Artifact {
    /// Creates an empty artifact.
    #[must_use]
    pub fn new(format: ArtifactFormat, region: impl Into<String>) -> Self {
        Self {
            format,
            region: region.into(),
            declarations: Vec::new(),
        }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> ArtifactFormat {
        self.format
    }

    /// Returns the region written into provider settings.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns every declaration.
    #[must_use]
    pub fn declarations(&self) -> &[ResourceDeclaration] {
        &self.declarations
    }

    /// Appends a declaration.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDeclaration` if a declaration with the same type and
    /// name already exists.
    pub fn push(&mut self, declaration: ResourceDeclaration) -> Result<()> {
        if self.declarations.iter().any(|d| {
            d.resource_type == declaration.resource_type && d.name == declaration.name
        }) {
            return Err(ArtifactError::DuplicateDeclaration {
                resource_type: declaration.resource_type,
                name: declaration.name,
            }
            .into());
        }
        self.declarations.push(declaration);
        Ok(())
    }

    /// Returns the declaration standing for a task, if any.
    #[must_use]
    pub fn primary_for(&self, key: &TaskKey) -> Option<&ResourceDeclaration> {
        self.declarations
            .iter()
            .find(|d| d.represents_owner && &d.owner == key)
    }

    /// Serializes the artifact, resolving every reference.
    ///
    /// # Errors
    ///
    /// Returns `DanglingReference` if a referenced task has neither a
    /// declaration nor a resolved identifier.
    pub fn render(&self) -> Result<String> {
        let document = match self.format {
            ArtifactFormat::Terraform => terraform::document(self)?,
            ArtifactFormat::CloudFormation => cloudformation::document(self)?,
        };
        serde_json::to_string_pretty(&document).map_err(|e| {
            ArtifactError::Serialization {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Resolves a literal using a format-specific rendering of references.
    pub(super) fn resolve(
        &self,
        from: &TaskKey,
        literal: &Literal,
        link: &dyn Fn(&ResourceDeclaration) -> serde_json::Value,
    ) -> Result<serde_json::Value> {
        match literal {
            Literal::Value(value) => Ok(value.clone()),
            Literal::List(items) => items
                .iter()
                .map(|item| self.resolve(from, item, link))
                .collect::<Result<Vec<_>>>()
                .map(serde_json::Value::Array),
            Literal::Reference { key, fallback } => {
                if let Some(declaration) = self.primary_for(key) {
                    Ok(link(declaration))
                } else if let Some(id) = fallback {
                    Ok(serde_json::Value::String(id.clone()))
                } else {
                    Err(ArtifactError::DanglingReference {
                        from: from.clone(),
                        to: key.clone(),
                    }
                    .into())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;

    fn vpc_key() -> TaskKey {
        TaskKey::new("vpc", "main")
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut artifact = Artifact::new(ArtifactFormat::Terraform, "us-east-1");
        artifact
            .push(ResourceDeclaration::primary(vpc_key(), "aws_vpc", "main"))
            .expect("push");
        let err = artifact
            .push(ResourceDeclaration::primary(vpc_key(), "aws_vpc", "main"))
            .expect_err("duplicate");
        assert!(matches!(
            err,
            ConvergeError::Artifact(ArtifactError::DuplicateDeclaration { .. })
        ));
    }

    #[test]
    fn test_dangling_reference_fails_render() {
        let mut artifact = Artifact::new(ArtifactFormat::Terraform, "us-east-1");
        artifact
            .push(
                ResourceDeclaration::primary(TaskKey::new("subnet", "a"), "aws_subnet", "a").with(
                    "vpc_id",
                    Literal::Reference {
                        key: vpc_key(),
                        fallback: None,
                    },
                ),
            )
            .expect("push");
        let err = artifact.render().expect_err("dangling");
        assert!(matches!(
            err,
            ConvergeError::Artifact(ArtifactError::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_supplementary_does_not_represent_owner() {
        let mut artifact = Artifact::new(ArtifactFormat::Terraform, "us-east-1");
        artifact
            .push(ResourceDeclaration::supplementary(
                vpc_key(),
                "aws_route53_zone_association",
                "main",
            ))
            .expect("push");
        assert!(artifact.primary_for(&vpc_key()).is_none());
    }
}
