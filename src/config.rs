use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

/// Top-level settings loaded from `orgsync.toml`. Upstream endpoints and
/// credentials come from the environment (see `main.rs`); this file holds
/// the synchronisation policy.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    /// Institutions to synchronise, in order.
    #[serde(default)]
    pub institution_identifiers: Vec<String>,
    /// Optional path of unit uuids from the organisation root down to the
    /// effective root, per institution.
    #[serde(default)]
    pub subtree_paths: HashMap<String, Vec<Uuid>>,
    /// Roots of the subtree that collects obsolete units. Units below
    /// them still receive mutations but skip the post-mutation hook and
    /// email notification.
    #[serde(default)]
    pub obsolete_unit_roots: Vec<Uuid>,
    #[serde(default = "default_true")]
    pub apply_business_logic: bool,
    /// Units whose name matches any of these regexes are not synchronised.
    #[serde(default)]
    pub unit_name_deny_list: Vec<String>,
    /// Restrict address synchronisation to line-management units.
    #[serde(default)]
    pub line_management_only: bool,
    #[serde(default)]
    pub email: EmailConfig,
    /// Units excluded from email notification. Exists to work around an
    /// upstream over-reporting bug; drop when that is fixed.
    #[serde(default)]
    pub email_notifications_disabled_units: Vec<Uuid>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_run_db_path")]
    pub run_db_path: String,
    #[serde(default = "default_src_zone")]
    pub src_zone: String,
    #[serde(default = "default_unit_type")]
    pub unit_type_user_key: String,
    /// Fixed engagement-type class. When unset the class is resolved by
    /// user key once per run.
    #[serde(default)]
    pub engagement_type_class_uuid: Option<Uuid>,
    #[serde(default = "default_engagement_type")]
    pub engagement_type_user_key: String,
    #[serde(default = "default_leave_type")]
    pub leave_type_user_key: String,
    /// Look up orphaned departments referenced by engagements and splice
    /// their parent chains into the source tree.
    #[serde(default)]
    pub build_extra_tree: bool,
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    #[serde(default = "default_smtp_from")]
    pub smtp_from: String,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_run_db_path() -> String {
    "./orgsync_run.db".to_string()
}

fn default_src_zone() -> String {
    "Europe/Copenhagen".to_string()
}

fn default_unit_type() -> String {
    "Enhed".to_string()
}

fn default_engagement_type() -> String {
    "Ansat".to_string()
}

fn default_leave_type() -> String {
    "Orlov".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_from() -> String {
    "orgsync@localhost".to_string()
}

impl Settings {
    /// Load settings from a TOML file. Returns defaults if the file
    /// doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(settings)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn src_zone(&self) -> anyhow::Result<chrono_tz::Tz> {
        self.src_zone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid src_zone {:?}: {e}", self.src_zone))
    }

    pub fn subtree_path_for(&self, institution: &str) -> &[Uuid] {
        self.subtree_paths
            .get(institution)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let settings = Settings::default();
        assert!(settings.apply_business_logic);
        assert_eq!(settings.request_timeout_secs, 60);
        assert!(settings.src_zone().is_ok());
        assert!(settings.subtree_path_for("II").is_empty());
    }

    #[test]
    fn toml_round_trip_of_the_interesting_fields() {
        let raw = r#"
            institution_identifiers = ["AB", "CD"]
            unit_name_deny_list = ["^Udd\\..*"]
            line_management_only = true
            obsolete_unit_roots = ["f1060962-4f50-4bd9-9346-55ce0b88a4b3"]

            [subtree_paths]
            AB = ["25d9db7a-e84e-4aaf-a26d-0d1ab76c7dd5"]

            [email]
            enabled = true
            recipients = ["ops@example.org"]
            smtp_host = "mail.example.org"
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.institution_identifiers, vec!["AB", "CD"]);
        assert_eq!(settings.subtree_path_for("AB").len(), 1);
        assert!(settings.email.enabled);
        assert_eq!(settings.email.smtp_port, 587);
        assert_eq!(settings.obsolete_unit_roots.len(), 1);
    }
}
