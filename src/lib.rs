use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

pub mod generate;
pub mod i18n;
pub mod selector;

/// Shard key for the root level of the hierarchy.
pub const INDEX_SHARD: &str = "index";

pub fn shard_file_name(key: &str) -> String {
    format!("{}.json", key)
}

/// Shard keys become file names, so an id must be one plain path component.
pub fn validate_shard_key(key: &str) -> Result<()> {
    let mut components = Path::new(key).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == key
    );
    if !single_normal || key.contains(['/', '\\']) {
        bail!("Organization id {:?} cannot be used as a shard name", key);
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationMetadata {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub govt_org_type: Option<String>,
    #[serde(default)]
    pub govt_org_children_type: Option<String>,
}

/// Roots carry either no parent or an empty object, so every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParentRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub org_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<OrganizationMetadata>,
    #[serde(default)]
    pub level_cache: Option<u32>,
    #[serde(default)]
    pub system_generated: bool,
    #[serde(default)]
    pub has_children: bool,
    #[serde(default)]
    pub parent: Option<ParentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationsResponse {
    pub count: usize,
    pub results: Vec<Organization>,
}

/// One row of a published shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub name: String,
    pub has_children: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub org_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children_type: Option<String>,
}

impl From<&Organization> for CacheEntry {
    fn from(org: &Organization) -> Self {
        let metadata = org.metadata.as_ref();
        Self {
            id: org.id.clone(),
            name: org.name.clone(),
            has_children: org.has_children,
            org_type: metadata.and_then(|m| m.govt_org_type.clone()),
            children_type: metadata.and_then(|m| m.govt_org_children_type.clone()),
        }
    }
}
