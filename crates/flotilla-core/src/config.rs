//! flotilla.toml configuration parser.
//!
//! ```toml
//! [cloud]
//! name = "hyper"
//! server = "tcp://us-west-1.hyper.sh:443"
//! credentials_id = "hyper-prod"
//! callback_url = "https://ci.example.com/"
//! agent_secret = "change-me"
//!
//! [provisioning]
//! connect_timeout = "15m"
//! poll_interval = "1s"
//! max_units_per_request = 100
//!
//! [[templates]]
//! labels = "linux docker"
//! image = "jenkins/inbound-agent"
//! size = "s4"
//! remote_root = "/home/jenkins"
//!
//! [credentials.hyper-prod]
//! access_key = "..."
//! secret_key = "..."
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::template::SlaveTemplate;

/// Endpoint used when `[cloud].server` is blank.
pub const DEFAULT_SERVER: &str = "tcp://us-west-1.hyper.sh:443";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlotillaConfig {
    pub cloud: CloudConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    /// Templates in selection order; the first match wins.
    #[serde(default)]
    pub templates: Vec<SlaveTemplate>,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_cloud_name")]
    pub name: String,
    #[serde(default)]
    pub server: String,
    pub credentials_id: Option<String>,
    /// Runtime CLI executable.
    #[serde(default = "default_cli")]
    pub cli: String,
    /// Controller URL handed to new agents.
    pub callback_url: String,
    /// Environment variable carrying `callback_url` into the instance.
    #[serde(default = "default_callback_env")]
    pub callback_env: String,
    /// Key the per-node connection secrets are derived from.
    pub agent_secret: String,
    /// Instance label key tying instances back to this cloud.
    pub label_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Largest `units` a single provision request may ask for.
    #[serde(default = "default_max_units_per_request")]
    pub max_units_per_request: u32,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub access_key: String,
    pub secret_key: String,
    /// Restrict the entry to a single cloud name.
    pub scope: Option<String>,
}

impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

fn default_cloud_name() -> String {
    "hyper".to_string()
}

fn default_cli() -> String {
    "hyper".to_string()
}

fn default_callback_env() -> String {
    "FLOTILLA_URL".to_string()
}

fn default_connect_timeout() -> String {
    "15m".to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_max_units_per_request() -> u32 {
    100
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            poll_interval: default_poll_interval(),
            max_units_per_request: default_max_units_per_request(),
        }
    }
}

impl CloudConfig {
    /// Remote endpoint, falling back to [`DEFAULT_SERVER`].
    pub fn server(&self) -> &str {
        if self.server.trim().is_empty() {
            DEFAULT_SERVER
        } else {
            &self.server
        }
    }

    pub fn label_key(&self) -> String {
        self.label_key
            .clone()
            .unwrap_or_else(|| format!("io.flotilla.{}", self.name))
    }
}

impl ProvisioningConfig {
    pub fn connect_timeout(&self) -> ConfigResult<Duration> {
        parse_duration(&self.connect_timeout)
    }

    pub fn poll_interval(&self) -> ConfigResult<Duration> {
        parse_duration(&self.poll_interval)
    }
}

impl FlotillaConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::parse(&content)?;
        debug!(?path, templates = config.templates.len(), "config loaded");
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: FlotillaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.cloud.name.trim().is_empty() {
            return Err(ConfigError::Invalid("cloud.name must not be empty".into()));
        }
        if self.cloud.cli.trim().is_empty() {
            return Err(ConfigError::Invalid("cloud.cli must not be empty".into()));
        }
        if self.templates.is_empty() {
            return Err(ConfigError::Invalid("at least one [[templates]] entry is required".into()));
        }
        for (idx, template) in self.templates.iter().enumerate() {
            if template.image().trim().is_empty() {
                return Err(ConfigError::Invalid(format!("templates[{idx}].image must not be empty")));
            }
            if template.remote_root().trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "templates[{idx}].remote_root must not be empty"
                )));
            }
        }
        self.provisioning.connect_timeout()?;
        if self.provisioning.poll_interval()?.is_zero() {
            return Err(ConfigError::Invalid("provisioning.poll_interval must be non-zero".into()));
        }
        if self.provisioning.max_units_per_request == 0 {
            return Err(ConfigError::Invalid(
                "provisioning.max_units_per_request must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration string like `"500ms"`, `"30s"`, `"15m"`, `"1h"`.
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::Duration(s.to_string());
    let (digits, millis_per_unit) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600_000)
    } else {
        (s, 1_000)
    };
    let n = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    let millis = n.checked_mul(millis_per_unit).ok_or_else(invalid)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::InstanceSize;

    const MINIMAL: &str = r#"
[cloud]
callback_url = "http://ci.local:8080/"
agent_secret = "s3cret"

[[templates]]
labels = "linux"
image = "jenkins/inbound-agent"
size = "s2"
remote_root = "/home/jenkins"
"#;

    #[test]
    fn parse_minimal_applies_defaults() {
        let config = FlotillaConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.cloud.name, "hyper");
        assert_eq!(config.cloud.cli, "hyper");
        assert_eq!(config.cloud.server(), DEFAULT_SERVER);
        assert_eq!(config.cloud.callback_env, "FLOTILLA_URL");
        assert_eq!(config.cloud.label_key(), "io.flotilla.hyper");
        assert_eq!(config.provisioning.connect_timeout().unwrap(), Duration::from_secs(900));
        assert_eq!(config.provisioning.poll_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(config.provisioning.max_units_per_request, 100);
        assert_eq!(config.templates[0].size(), InstanceSize::S2);
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let config = FlotillaConfig::parse(
            r#"
[cloud]
name = "eu"
server = "tcp://eu-central-1.hyper.sh:443"
credentials_id = "prod"
cli = "/usr/local/bin/hyper"
callback_url = "https://ci.example.com/"
agent_secret = "k"
label_key = "com.example.ci"

[provisioning]
connect_timeout = "2m"
poll_interval = "250ms"
max_units_per_request = 8

[[templates]]
labels = "linux docker"
image = "a"
size = "m3"
remote_root = "/work"

[[templates]]
labels = "arm"
image = "b"
size = "l1"
remote_root = "/work"

[credentials.prod]
access_key = "AK"
secret_key = "SK"
scope = "eu"
"#,
        )
        .unwrap();
        assert_eq!(config.cloud.server(), "tcp://eu-central-1.hyper.sh:443");
        assert_eq!(config.cloud.label_key(), "com.example.ci");
        assert_eq!(config.provisioning.poll_interval().unwrap(), Duration::from_millis(250));
        assert_eq!(config.provisioning.max_units_per_request, 8);
        assert_eq!(config.templates.len(), 2);
        assert_eq!(config.templates[1].image(), "b");
        assert_eq!(config.credentials["prod"].scope.as_deref(), Some("eu"));
    }

    #[test]
    fn credential_debug_redacts_secret() {
        let entry = CredentialEntry {
            access_key: "AK".into(),
            secret_key: "very-secret".into(),
            scope: None,
        };
        let rendered = format!("{entry:?}");
        assert!(rendered.contains("AK"));
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn missing_templates_is_invalid() {
        let err = FlotillaConfig::parse(
            r#"
[cloud]
callback_url = "http://ci/"
agent_secret = "s"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("templates")));
    }

    #[test]
    fn zero_poll_interval_is_invalid() {
        let doc = MINIMAL.replace("[[templates]]", "[provisioning]\npoll_interval = \"0s\"\n\n[[templates]]");
        assert!(matches!(FlotillaConfig::parse(&doc), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_unit_limit_is_invalid() {
        let doc = MINIMAL.replace("[[templates]]", "[provisioning]\nmax_units_per_request = 0\n\n[[templates]]");
        assert!(matches!(FlotillaConfig::parse(&doc), Err(ConfigError::Invalid(msg)) if msg.contains("max_units")));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let doc = MINIMAL.replace("[[templates]]", "[provisioning]\nconnect_timeout = \"soon\"\n\n[[templates]]");
        assert!(matches!(FlotillaConfig::parse(&doc), Err(ConfigError::Duration(_))));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flotilla.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = FlotillaConfig::from_file(&path).unwrap();
        assert_eq!(config.templates.len(), 1);

        let missing = FlotillaConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("750ms").unwrap(), Duration::from_millis(750));
        assert_eq!(parse_duration("12").unwrap(), Duration::from_secs(12));
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("").is_err());
    }
}
