//! Reconciler configuration.
//!
//! Loaded from TOML. Every field has a default so an empty document is a valid
//! configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;
use crate::types::TrafficType;

/// Names of networks that the controller provisions on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticNetworkNames {
    /// Network carrying management traffic.
    pub management: String,
    /// Link-local network used for control traffic.
    pub control: String,
    /// Network carrying storage traffic.
    pub storage: String,
}

impl Default for StaticNetworkNames {
    fn default() -> Self {
        Self {
            management: "ip-fabric".to_string(),
            control: "__link_local__".to_string(),
            storage: "ip-fabric".to_string(),
        }
    }
}

/// Defaults for service templates created on behalf of service instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceTemplateConfig {
    pub name: String,
    pub image_name: String,
    pub service_type: String,
    pub service_mode: String,
}

impl Default for ServiceTemplateConfig {
    fn default() -> Self {
        Self {
            name: "firewall-template".to_string(),
            image_name: "vsrx".to_string(),
            service_type: "firewall".to_string(),
            service_mode: "in-network".to_string(),
        }
    }
}

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Domain that owns every orchestrator-managed object.
    pub domain: String,
    /// Project that owns every orchestrator-managed object.
    pub project: String,
    /// Name of the IPAM singleton subnets are attached through.
    pub ipam_name: String,
    /// Name of the floating-IP pool created under public networks.
    pub floating_ip_pool_name: String,
    pub static_networks: StaticNetworkNames,
    pub service_template: ServiceTemplateConfig,
    /// Re-run `update` on roots that fail verification during a resync.
    pub repair_on_resync: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            domain: "default-domain".to_string(),
            project: "default-project".to_string(),
            ipam_name: "default-network-ipam".to_string(),
            floating_ip_pool_name: "PublicIpPool".to_string(),
            static_networks: StaticNetworkNames::default(),
            service_template: ServiceTemplateConfig::default(),
            repair_on_resync: true,
        }
    }
}

impl ReconcilerConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `TomlParseFailed` for malformed TOML and `InvalidConfig` when
    /// a required name is empty.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(document).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `FileReadFailed` if the file cannot be read, otherwise the
    /// errors of [`ReconcilerConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&document)
    }

    /// Check that every name used to build fq-names is non-empty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("domain", &self.domain),
            ("project", &self.project),
            ("ipam_name", &self.ipam_name),
            ("floating_ip_pool_name", &self.floating_ip_pool_name),
            ("service_template.name", &self.service_template.name),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(Error::invalid_config(format!("{field} must not be empty"))),
            None => Ok(()),
        }
    }

    /// Fully-qualified name of the owning project.
    pub fn project_fq_name(&self) -> Vec<String> {
        vec![self.domain.clone(), self.project.clone()]
    }

    /// Fully-qualified name of an object created directly under the project.
    pub fn project_child_fq_name(&self, name: impl Into<String>) -> Vec<String> {
        vec![self.domain.clone(), self.project.clone(), name.into()]
    }

    /// Name of the controller-owned network for a traffic type, if it has one.
    pub fn static_network_name(&self, traffic: TrafficType) -> Option<&str> {
        match traffic {
            TrafficType::Management => Some(&self.static_networks.management),
            TrafficType::Control => Some(&self.static_networks.control),
            TrafficType::Storage => Some(&self.static_networks.storage),
            TrafficType::Guest | TrafficType::Public => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ReconcilerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ReconcilerConfig::default());
        assert_eq!(
            config.project_fq_name(),
            vec!["default-domain".to_string(), "default-project".to_string()]
        );
    }

    #[test]
    fn test_partial_document_overrides() {
        let config = ReconcilerConfig::from_toml_str(
            r#"
            project = "tenant-a"
            repair_on_resync = false

            [static_networks]
            control = "__ll__"

            [service_template]
            name = "nat-template"
            "#,
        )
        .unwrap();
        assert_eq!(config.project, "tenant-a");
        assert!(!config.repair_on_resync);
        assert_eq!(config.static_network_name(TrafficType::Control), Some("__ll__"));
        assert_eq!(config.static_network_name(TrafficType::Management), Some("ip-fabric"));
        assert_eq!(config.static_network_name(TrafficType::Guest), None);
        assert_eq!(config.service_template.name, "nat-template");
        assert_eq!(config.service_template.service_mode, "in-network");
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = ReconcilerConfig::from_toml_str("domain = \"  \"");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_malformed_document_rejected() {
        let result = ReconcilerConfig::from_toml_str("domain = ");
        assert!(matches!(result, Err(Error::TomlParseFailed { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ipam_name = \"tenant-ipam\"").unwrap();
        let config = ReconcilerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ipam_name, "tenant-ipam");
    }

    #[test]
    fn test_missing_file() {
        let result = ReconcilerConfig::from_file("/nonexistent/vnc-reconciler.toml");
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }
}
