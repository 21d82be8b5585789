//! director.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::normalize::Normalizer;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    pub server: ServerConfig,
    pub normalization: NormalizationConfig,
    pub visibility: VisibilityConfig,
    pub pagination: PaginationConfig,
    pub merge: MergeConfig,
    /// Per-tenant overrides keyed by tenant ID.
    pub tenants: HashMap<String, TenantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Prefix applied to application names exposed to runtimes.
    pub prefix: String,
    /// Used when a runtime carries no `isNormalized` label.
    pub default_normalized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Applications with any of these label key/value pairs are hidden from runtimes.
    pub hide_selectors: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Applications carrying any of these labels cannot take part in a merge.
    pub protected_label_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    pub normalization_prefix: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: PathBuf::from("/var/lib/director"),
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            prefix: "mp-".to_string(),
            default_normalized: true,
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { max_page_size: 200 }
    }
}

impl DirectorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DirectorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Normalization prefix for a tenant, falling back to the global one.
    pub fn normalization_prefix(&self, tenant: &str) -> &str {
        self.tenants
            .get(tenant)
            .and_then(|t| t.normalization_prefix.as_deref())
            .unwrap_or(&self.normalization.prefix)
    }

    /// Build the name normalizer for a tenant.
    pub fn normalizer(&self, tenant: &str) -> Normalizer {
        Normalizer::new(self.normalization_prefix(tenant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DirectorConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.normalization.prefix, "mp-");
        assert!(config.normalization.default_normalized);
        assert_eq!(config.pagination.max_page_size, 200);
        assert!(config.visibility.hide_selectors.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[server]
port = 8080
data_dir = "/tmp/director"

[normalization]
prefix = "sys-"
default_normalized = false

[visibility]
hide_selectors = { "applicationHideSelectorKey" = ["applicationHideSelectorValue"] }

[merge]
protected_label_keys = ["managed"]

[tenants.acme]
normalization_prefix = "acme-"
"#;
        let config: DirectorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(!config.normalization.default_normalized);
        assert_eq!(
            config.visibility.hide_selectors["applicationHideSelectorKey"],
            vec!["applicationHideSelectorValue".to_string()]
        );
        assert_eq!(config.merge.protected_label_keys, vec!["managed".to_string()]);
        assert_eq!(config.pagination.max_page_size, 200);
        assert_eq!(config.normalization_prefix("acme"), "acme-");
        assert_eq!(config.normalization_prefix("other"), "sys-");
    }

    #[test]
    fn test_roundtrip_to_toml() {
        let config = DirectorConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("mp-"));
        let parsed: DirectorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }
}
