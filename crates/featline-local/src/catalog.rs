//! Feature group catalog kept in a TOML file

use std::path::Path;

use anyhow::{Context, Result, bail};
use featline_core::{FeatureGroup, MetadataService, RemoteError};
use serde::Deserialize;

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "feature_group")]
    feature_groups: Vec<FeatureGroup>,
}

/// [`MetadataService`] over `[[feature_group]]` tables:
///
/// ```toml
/// [[feature_group]]
/// name = "customers"
/// record_identifier = "customer_id"
/// features = [{ name = "age", type = "integral" }]
/// offline = { database = "sagemaker_featurestore" }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TomlCatalog {
    groups: Vec<FeatureGroup>,
}

impl TomlCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid catalog: {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(text)?;
        for (i, group) in file.feature_groups.iter().enumerate() {
            if group.name.trim().is_empty() {
                bail!("feature group #{} has an empty name", i + 1);
            }
            if group.record_identifier.trim().is_empty() {
                bail!("feature group '{}' has no record identifier", group.name);
            }
            if file.feature_groups[..i].iter().any(|g| g.name == group.name) {
                bail!("feature group '{}' is defined twice", group.name);
            }
        }
        log::debug!("Loaded {} feature groups", file.feature_groups.len());
        Ok(Self {
            groups: file.feature_groups,
        })
    }

    pub fn groups(&self) -> &[FeatureGroup] {
        &self.groups
    }
}

impl MetadataService for TomlCatalog {
    fn describe(&self, feature_group: &str) -> Result<FeatureGroup, RemoteError> {
        self.groups
            .iter()
            .find(|g| g.name == feature_group)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("feature group '{feature_group}' not found")))
    }

    fn list(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.groups.iter().map(|g| g.name.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featline_core::{ErrorKind, FeatureType};

    const CATALOG: &str = r#"
[[feature_group]]
name = "customers"
record_identifier = "customer_id"
features = [
    { name = "age", type = "integral" },
    { name = "score", type = "fractional" },
    { name = "segment" },
]
offline = { database = "sagemaker_featurestore", table = "customers_1700000000" }

[[feature_group]]
name = "orders"
record_identifier = "order_id"
event_time = "ts"
online_enabled = false
"#;

    #[test]
    fn parses_groups_with_defaults() {
        let catalog = TomlCatalog::from_toml_str(CATALOG).unwrap();
        let customers = catalog.describe("customers").unwrap();
        assert_eq!(customers.event_time, "EventTime");
        assert!(customers.online_enabled);
        assert_eq!(customers.features[0].feature_type, FeatureType::Integral);
        assert_eq!(customers.features[2].feature_type, FeatureType::String);
        assert_eq!(
            customers.offline.unwrap().table.as_deref(),
            Some("customers_1700000000")
        );

        let orders = catalog.describe("orders").unwrap();
        assert_eq!(orders.event_time, "ts");
        assert!(!orders.online_enabled);
        assert!(orders.offline.is_none());
    }

    #[test]
    fn list_and_not_found() {
        let catalog = TomlCatalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.list().unwrap(), vec!["customers", "orders"]);
        assert_eq!(catalog.describe("nope").unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn rejects_duplicates() {
        let text = format!("{CATALOG}\n[[feature_group]]\nname = \"orders\"\nrecord_identifier = \"x\"\n");
        assert!(TomlCatalog::from_toml_str(&text).is_err());
    }

    #[test]
    fn empty_catalog() {
        let catalog = TomlCatalog::from_toml_str("").unwrap();
        assert!(catalog.groups().is_empty());
    }
}
