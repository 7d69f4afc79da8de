//! Configuration for the preservation engine.
//!
//! Configuration is loaded by an external collaborator (the workflow daemon)
//! and passed in as a plain struct; this crate never reads settings files
//! itself. Structs can be constructed programmatically or deserialized from
//! YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use preservation_engine::config::{ArchiveConfig, CollectionConfig};
//!
//! let config = ArchiveConfig {
//!     collections: vec![
//!         CollectionConfig::for_testing("books", &["pillar-1", "pillar-2", "pillar-3"], 1),
//!     ],
//!     ..ArchiveConfig::for_testing("/tmp/staging")
//! };
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ArchiveConfig
//! ├── component_id: String          # This client's id on the shared transport
//! ├── trust_settings_dir            # Pillar trust settings, passed to the transport
//! ├── identity_key_file             # Client key material, passed to the transport
//! ├── mode: ArchiveMode             # Local (test/dev) or Distributed
//! ├── collections: Vec<CollectionConfig>
//! │   ├── collection_id
//! │   ├── pillar_ids                # Fixed set of storage nodes
//! │   └── max_failing_pillars       # Tolerated failures per operation (>= 0)
//! ├── packaging: PackagingConfig
//! │   ├── container_size_limit      # Seal-and-ship threshold (bytes)
//! │   ├── staging_dir               # Reachable staging location for uploads
//! │   ├── local_archive_dir         # Base directory for Local mode
//! │   └── digest_algorithm          # Default sha1
//! └── timeouts: TimeoutConfig
//!     ├── identification            # e.g. "10s"
//!     └── operation                 # e.g. "1m"
//! ```

use crate::digest::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed from the workflow daemon
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level configuration for the packaging and replication engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Identifier for this client on the shared message transport.
    /// Derived from the host name plus a random suffix so that several
    /// clients on one host never collide.
    #[serde(default = "default_component_id")]
    pub component_id: String,

    /// Directory holding the pillar trust settings (endpoints, public
    /// keys). Passed through to the transport implementation untouched,
    /// like `component_id`; this crate never reads the files itself.
    #[serde(default)]
    pub trust_settings_dir: Option<PathBuf>,

    /// Key material identifying this client on the shared transport.
    /// Passed through to the transport implementation untouched.
    #[serde(default)]
    pub identity_key_file: Option<PathBuf>,

    /// Which archive implementation to use. Resolved once at startup;
    /// there is no runtime switching.
    #[serde(default)]
    pub mode: ArchiveMode,

    /// The replica collections this deployment may package into.
    pub collections: Vec<CollectionConfig>,

    /// Container packaging settings (size limit, staging, digest).
    #[serde(default)]
    pub packaging: PackagingConfig,

    /// Fan-out wait bounds.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            component_id: default_component_id(),
            trust_settings_dir: None,
            identity_key_file: None,
            mode: ArchiveMode::default(),
            collections: Vec::new(),
            packaging: PackagingConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ArchiveConfig {
    /// Create a minimal config for testing, staging into `staging_dir`.
    pub fn for_testing(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            component_id: "test-client".to_string(),
            trust_settings_dir: None,
            identity_key_file: None,
            mode: ArchiveMode::Local,
            collections: Vec::new(),
            packaging: PackagingConfig {
                staging_dir: staging_dir.into(),
                ..PackagingConfig::default()
            },
            timeouts: TimeoutConfig::for_testing(),
        }
    }

    /// Look up a collection by id.
    pub fn collection(&self, collection_id: &str) -> Option<&CollectionConfig> {
        self.collections
            .iter()
            .find(|c| c.collection_id == collection_id)
    }
}

/// Generate the default component identifier: `<hostname>-archive-<suffix>`.
fn default_component_id() -> String {
    let host = gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown-host".to_string());
    format!("{}-archive-{:08x}", host, rand::random::<u32>())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ArchiveMode: strategy selected once at boot
// ═══════════════════════════════════════════════════════════════════════════════

/// Archive implementation selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// Single-directory fallback archive for non-distributed/test
    /// deployments. Never fans out and never partially fails.
    Local,
    /// Quorum-tolerant fan-out across the pillars of each collection.
    #[default]
    Distributed,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CollectionConfig: one entry per replica collection
// ═══════════════════════════════════════════════════════════════════════════════

/// A named set of pillars plus the number of pillars allowed to fail
/// without invalidating an operation. Static per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection identifier, matched against each record's collection.
    pub collection_id: String,

    /// The pillars holding replicas for this collection.
    pub pillar_ids: Vec<String>,

    /// Maximum pillars allowed to fail per operation. Applies to uploads
    /// and listings; fixity checks always use zero tolerance.
    #[serde(default)]
    pub max_failing_pillars: usize,
}

impl CollectionConfig {
    /// Create a collection config for testing.
    pub fn for_testing(collection_id: &str, pillar_ids: &[&str], max_failing: usize) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            pillar_ids: pillar_ids.iter().map(|p| p.to_string()).collect(),
            max_failing_pillars: max_failing,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PackagingConfig: container rotation and staging
// ═══════════════════════════════════════════════════════════════════════════════

/// Container packaging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Seal and upload a container once its size exceeds this many bytes.
    #[serde(default = "default_container_size_limit")]
    pub container_size_limit: u64,

    /// Directory where active containers are written and uploads are staged.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Base directory of the local fallback archive. Only used in
    /// [`ArchiveMode::Local`].
    #[serde(default = "default_local_archive_dir")]
    pub local_archive_dir: PathBuf,

    /// Block digest algorithm for container records and fixity checksums.
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
}

fn default_container_size_limit() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("preservation_staging")
}

fn default_local_archive_dir() -> PathBuf {
    PathBuf::from("preservation_archive")
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            container_size_limit: default_container_size_limit(),
            staging_dir: default_staging_dir(),
            local_archive_dir: default_local_archive_dir(),
            digest_algorithm: DigestAlgorithm::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TimeoutConfig: fan-out wait bounds
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounds for the blocking wait on an in-flight fan-out operation.
///
/// The caller blocks for at most `identification + operation` before the
/// verdict is forced to `Failed`. Parsed from duration strings ("10s", "1m").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Time budget for pillars to identify themselves for the operation.
    #[serde(default = "default_identification_timeout")]
    pub identification: String,

    /// Time budget for the operation itself once identified.
    #[serde(default = "default_operation_timeout")]
    pub operation: String,
}

fn default_identification_timeout() -> String {
    "10s".to_string()
}

fn default_operation_timeout() -> String {
    "1m".to_string()
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            identification: default_identification_timeout(),
            operation: default_operation_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Short bounds for tests.
    pub fn for_testing() -> Self {
        Self {
            identification: "200ms".to_string(),
            operation: "500ms".to_string(),
        }
    }

    /// Total wait budget for one fan-out operation.
    pub fn total(&self) -> Duration {
        self.identification_duration() + self.operation_duration()
    }

    /// Parse the identification timeout, falling back to 10 seconds.
    pub fn identification_duration(&self) -> Duration {
        humantime::parse_duration(&self.identification).unwrap_or(Duration::from_secs(10))
    }

    /// Parse the operation timeout, falling back to 60 seconds.
    pub fn operation_duration(&self) -> Duration {
        humantime::parse_duration(&self.operation).unwrap_or(Duration::from_secs(60))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_component_id_has_suffix() {
        let a = default_component_id();
        let b = default_component_id();
        assert!(a.contains("-archive-"));
        // Random suffixes keep two clients on one host distinct.
        assert_ne!(a, b);
    }

    #[test]
    fn test_collection_lookup() {
        let mut config = ArchiveConfig::for_testing("/tmp/staging");
        config
            .collections
            .push(CollectionConfig::for_testing("books", &["p1", "p2"], 1));

        let col = config.collection("books").unwrap();
        assert_eq!(col.pillar_ids, vec!["p1", "p2"]);
        assert_eq!(col.max_failing_pillars, 1);
        assert!(config.collection("missing").is_none());
    }

    #[test]
    fn test_packaging_defaults() {
        let packaging = PackagingConfig::default();
        assert_eq!(packaging.container_size_limit, 100 * 1024 * 1024);
        assert_eq!(packaging.digest_algorithm, DigestAlgorithm::Sha1);
    }

    #[test]
    fn test_timeout_parsing() {
        let timeouts = TimeoutConfig {
            identification: "5s".to_string(),
            operation: "2m".to_string(),
        };
        assert_eq!(timeouts.identification_duration(), Duration::from_secs(5));
        assert_eq!(timeouts.operation_duration(), Duration::from_secs(120));
        assert_eq!(timeouts.total(), Duration::from_secs(125));
    }

    #[test]
    fn test_timeout_various_formats() {
        let cases = [
            ("500ms", Duration::from_millis(500)),
            ("10s", Duration::from_secs(10)),
            ("1m", Duration::from_secs(60)),
        ];
        for (input, expected) in cases {
            let timeouts = TimeoutConfig {
                identification: input.to_string(),
                ..Default::default()
            };
            assert_eq!(timeouts.identification_duration(), expected, "input: {input}");
        }
    }

    #[test]
    fn test_timeout_invalid_fallback() {
        let timeouts = TimeoutConfig {
            identification: "soon".to_string(),
            operation: "eventually".to_string(),
        };
        assert_eq!(timeouts.identification_duration(), Duration::from_secs(10));
        assert_eq!(timeouts.operation_duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_mode_is_distributed() {
        assert_eq!(ArchiveMode::default(), ArchiveMode::Distributed);
    }

    #[test]
    fn test_for_testing_uses_local_mode() {
        let config = ArchiveConfig::for_testing("/tmp/staging");
        assert_eq!(config.mode, ArchiveMode::Local);
        assert_eq!(config.packaging.staging_dir, PathBuf::from("/tmp/staging"));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = ArchiveConfig {
            component_id: "node-a-archive-00c0ffee".to_string(),
            trust_settings_dir: Some(PathBuf::from("/etc/preservation/trust")),
            identity_key_file: Some(PathBuf::from("/etc/preservation/client.pem")),
            mode: ArchiveMode::Distributed,
            collections: vec![
                CollectionConfig::for_testing("books", &["p1", "p2", "p3"], 1),
                CollectionConfig::for_testing("images", &["p1"], 0),
            ],
            packaging: PackagingConfig::default(),
            timeouts: TimeoutConfig::default(),
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ArchiveConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.component_id, "node-a-archive-00c0ffee");
        assert_eq!(
            parsed.trust_settings_dir.as_deref(),
            Some(Path::new("/etc/preservation/trust"))
        );
        assert_eq!(
            parsed.identity_key_file.as_deref(),
            Some(Path::new("/etc/preservation/client.pem"))
        );
        assert_eq!(parsed.mode, ArchiveMode::Distributed);
        assert_eq!(parsed.collections.len(), 2);
        assert_eq!(parsed.collections[0].max_failing_pillars, 1);
        assert_eq!(parsed.collections[1].pillar_ids, vec!["p1"]);
    }

    #[test]
    fn test_config_minimal_json() {
        // Only collections are mandatory; everything else has defaults.
        let parsed: ArchiveConfig = serde_json::from_str(r#"{"collections": []}"#).unwrap();
        assert_eq!(parsed.mode, ArchiveMode::Distributed);
        assert_eq!(parsed.timeouts.identification, "10s");
        // Transport credentials are optional pass-through values.
        assert!(parsed.trust_settings_dir.is_none());
        assert!(parsed.identity_key_file.is_none());
    }

    #[test]
    fn test_max_failing_pillars_defaults_to_zero() {
        let parsed: CollectionConfig = serde_json::from_str(
            r#"{"collection_id": "c", "pillar_ids": ["p1"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.max_failing_pillars, 0);
    }
}
