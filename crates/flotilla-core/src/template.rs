//! Node templates, the immutable descriptors of a provisionable node class.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::label::LabelSet;

/// Quantized resource class of a backing instance.
///
/// Serialized as the lowercase code the runtime CLI expects (`s1` … `l3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSize {
    S1,
    S2,
    S3,
    S4,
    M1,
    M2,
    M3,
    L1,
    L2,
    L3,
}

impl InstanceSize {
    pub const ALL: [InstanceSize; 10] = [
        InstanceSize::S1,
        InstanceSize::S2,
        InstanceSize::S3,
        InstanceSize::S4,
        InstanceSize::M1,
        InstanceSize::M2,
        InstanceSize::M3,
        InstanceSize::L1,
        InstanceSize::L2,
        InstanceSize::L3,
    ];

    /// The `--size` argument passed to the runtime CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceSize::S1 => "s1",
            InstanceSize::S2 => "s2",
            InstanceSize::S3 => "s3",
            InstanceSize::S4 => "s4",
            InstanceSize::M1 => "m1",
            InstanceSize::M2 => "m2",
            InstanceSize::M3 => "m3",
            InstanceSize::L1 => "l1",
            InstanceSize::L2 => "l2",
            InstanceSize::L3 => "l3",
        }
    }
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        InstanceSize::ALL
            .into_iter()
            .find(|size| size.as_str() == lowered)
            .ok_or_else(|| ConfigError::UnknownSize(s.to_string()))
    }
}

/// Describes a class of node the provisioner can launch.
///
/// Built once from configuration and shared behind an `Arc`; running
/// provisioning tasks only ever read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveTemplate {
    /// Whitespace-separated label atoms this template satisfies.
    #[serde(default)]
    labels: String,
    /// Container image carrying the node agent.
    image: String,
    size: InstanceSize,
    /// Working directory of the agent inside the instance.
    remote_root: String,
}

impl SlaveTemplate {
    pub fn new(
        labels: impl Into<String>,
        image: impl Into<String>,
        size: InstanceSize,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            labels: labels.into(),
            image: image.into(),
            size,
            remote_root: remote_root.into(),
        }
    }

    pub fn labels(&self) -> &str {
        &self.labels
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn size(&self) -> InstanceSize {
        self.size
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Parsed set of label atoms.
    pub fn label_set(&self) -> LabelSet {
        LabelSet::parse(&self.labels)
    }

    /// Human-readable name used for pending capacity, e.g. `hyper node linux docker`.
    pub fn display_name(&self, cloud: &str) -> String {
        let labels = self.label_set();
        if labels.is_empty() {
            format!("{cloud} node")
        } else {
            format!("{cloud} node {labels}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_parses_case_insensitively() {
        assert_eq!("m2".parse::<InstanceSize>().unwrap(), InstanceSize::M2);
        assert_eq!("L3".parse::<InstanceSize>().unwrap(), InstanceSize::L3);
        assert_eq!(" s1 ".parse::<InstanceSize>().unwrap(), InstanceSize::S1);
    }

    #[test]
    fn unknown_size_is_rejected() {
        let err = "xl".parse::<InstanceSize>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSize(s) if s == "xl"));
    }

    #[test]
    fn size_round_trips_through_display() {
        for size in InstanceSize::ALL {
            assert_eq!(size.to_string().parse::<InstanceSize>().unwrap(), size);
        }
    }

    #[test]
    fn display_name_lists_labels() {
        let t = SlaveTemplate::new("linux  docker", "jenkins/agent", InstanceSize::S4, "/home/agent");
        assert_eq!(t.display_name("hyper"), "hyper node docker linux");

        let bare = SlaveTemplate::new("", "jenkins/agent", InstanceSize::S1, "/");
        assert_eq!(bare.display_name("hyper"), "hyper node");
    }

    #[test]
    fn template_deserializes_from_toml() {
        let t: SlaveTemplate = toml::from_str(
            r#"
labels = "linux"
image = "jenkins/agent:latest"
size = "m1"
remote_root = "/home/jenkins"
"#,
        )
        .unwrap();
        assert_eq!(t.size(), InstanceSize::M1);
        assert!(t.label_set().contains("linux"));
    }

    #[test]
    fn template_rejects_unknown_size() {
        let result: Result<SlaveTemplate, _> = toml::from_str(
            r#"
image = "jenkins/agent"
size = "huge"
remote_root = "/"
"#,
        );
        assert!(result.is_err());
    }
}
