use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::errors::Error;

/// SHA-1 of a manifest's ordinary JSON encoding. Identity of an
/// [`crate::app_version::AppVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestHash(String);

impl ManifestHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-1 of the UTF-8 bytes of `serde_json::to_vec(manifest)`. No
    /// canonicalization beyond the serializer's own field order, which
    /// for a `serde_json::Map`-free struct is declaration order — this
    /// must stay in lockstep with whatever produced the manifest.
    pub fn of(manifest: &Manifest) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(manifest)?;
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        Ok(Self(hex::encode(hasher.finalize())))
    }
}

impl fmt::Display for ManifestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ManifestHash {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ManifestHash {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(ManifestHash(String::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetGroupMode {
    Prefetch,
    Lazy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetGroupConfig {
    pub name: String,
    pub mode: AssetGroupMode,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataGroupConfig {
    pub name: String,
    pub patterns: Vec<String>,
    #[serde(rename = "maxSize")]
    pub max_size: u64,
    #[serde(rename = "maxAge")]
    pub max_age_ms: i64,
    #[serde(rename = "timeoutMs", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "configVersion")]
    pub config_version: u32,
    #[serde(rename = "appData", default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<HashMap<String, String>>,
    #[serde(rename = "assetGroups", default)]
    pub asset_groups: Vec<AssetGroupConfig>,
    #[serde(rename = "dataGroups", default)]
    pub data_groups: Vec<DataGroupConfig>,
    #[serde(rename = "hashTable")]
    pub hash_table: HashMap<String, String>,
}

impl Manifest {
    /// Every URL an asset group lists must be hash-pinned. Checked at
    /// construction time, not merely assumed, because a handwritten
    /// manifest is easy to get wrong.
    pub fn validate(&self) -> Result<(), Error> {
        for group in &self.asset_groups {
            for url in &group.urls {
                if !self.hash_table.contains_key(url) {
                    return Err(Error::InvariantViolated(format!(
                        "asset group {:?} lists {url} but it is missing from hashTable",
                        group.name
                    )));
                }
            }
        }
        Ok(())
    }
}
