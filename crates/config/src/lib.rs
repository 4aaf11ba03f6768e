use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Consecutive disagreeing cycles before an alert is sent.
pub const DEFAULT_ALERT_THRESHOLD: u32 = 6;

// ── Monitor ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Shared by all residents.
    pub alert_threshold: u32,
    /// Pause between uploading a snapshot and verifying it, giving the
    /// portal time to ingest the file.
    pub settle_delay_secs: u64,
    /// Sleep applied after a cycle blew up at the service level.
    pub error_backoff_secs: u64,
    /// Flat JSON snapshot of the last confirmed status per resident.
    pub state_file: String,
    /// WebDAV directory holding one `{id}.json` notification per resident.
    pub remote_dir: String,
    /// Rewrite the upload file with a random status before every cycle.
    /// Used to exercise the portal end to end without real sensors.
    pub simulate_local_updates: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            settle_delay_secs: 5,
            error_backoff_secs: 5,
            state_file: "data/state.json".to_string(),
            remote_dir: "json_notifications".to_string(),
            simulate_local_updates: false,
        }
    }
}

impl MonitorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn remote_path_for(&self, resident_id: &str) -> String {
        let dir = self.remote_dir.trim_end_matches('/');
        if dir.is_empty() {
            format!("{resident_id}.json")
        } else {
            format!("{dir}/{resident_id}.json")
        }
    }
}

// ── Residents ───────────────────────────────────────────────────────────────

/// One `[[residents]]` entry as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentEntry {
    pub id: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<String>,
}

fn default_interval_secs() -> u64 {
    60
}

impl ResidentEntry {
    pub fn new(id: impl Into<String>, interval_secs: u64) -> Self {
        Self {
            id: id.into(),
            interval_secs,
            upload_path: None,
            download_path: None,
        }
    }

    /// Resolve defaults into an immutable [`ResidentConfig`].
    pub fn resolve(&self) -> ResidentConfig {
        ResidentConfig {
            id: self.id.clone(),
            poll_interval: Duration::from_secs(self.interval_secs),
            upload_path: self
                .upload_path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(format!("data/{}_upload.json", self.id))),
            download_path: self
                .download_path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(format!("data/{}_download.json", self.id))),
        }
    }
}

/// Fully resolved settings for a single monitored resident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidentConfig {
    pub id: String,
    pub poll_interval: Duration,
    pub upload_path: PathBuf,
    pub download_path: PathBuf,
}

// ── WebDAV ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDavConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
    /// The sensor gateway ships a self-signed certificate.
    pub accept_invalid_certs: bool,
    pub timeout_secs: u64,
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            accept_invalid_certs: true,
            timeout_secs: 30,
        }
    }
}

impl WebDavConfig {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.hostname.is_empty() {
            missing.push("HOSTNAME");
        }
        if self.username.is_empty() {
            missing.push("USERNAME");
        }
        if self.password.is_empty() {
            missing.push("PASSWORD");
        }
        missing
    }
}

// ── Portal ──────────────────────────────────────────────────────────────────

const PORTAL_PREFIX: &str = "/ems/vmedd-monitor/fo/portal";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Pre-obtained session cookies (`name=value; name2=value2`), e.g. copied
    /// from a browser login.  Seeded into the session's cookie jar.
    pub cookie: String,
    pub timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://vmedd-portal.de".to_string(),
            username: String::new(),
            password: String::new(),
            cookie: String::new(),
            timeout_secs: 10,
        }
    }
}

impl PortalConfig {
    fn url(&self, suffix: &str) -> String {
        format!("{}{PORTAL_PREFIX}/{suffix}", self.base_url.trim_end_matches('/'))
    }

    pub fn login_url(&self) -> String {
        self.url("loginWidget.json")
    }

    pub fn sensor_info_url(&self) -> String {
        self.url("vmeddNotifications.json")
    }

    pub fn start_url(&self) -> String {
        self.url("start")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Email ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub sender: String,
    pub password: String,
    pub recipients: Vec<String>,
    pub smtp_server: String,
    /// Implicit-TLS submission port.
    pub smtp_port: u16,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            sender: String::new(),
            password: String::new(),
            recipients: vec![],
            smtp_server: String::new(),
            smtp_port: 465,
        }
    }
}

impl EmailConfig {
    pub fn is_complete(&self) -> bool {
        !self.sender.is_empty()
            && !self.password.is_empty()
            && !self.smtp_server.is_empty()
            && !self.recipients.is_empty()
    }
}

/// Split a comma-separated address list, trimming whitespace and dropping
/// empty items.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// When set, logs go to a daily-rotated `vigil.log` in this directory
    /// instead of stdout.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub residents: Vec<ResidentEntry>,
    pub webdav: WebDavConfig,
    pub portal: PortalConfig,
    pub email: EmailConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Environment (usually populated from `.env`) takes precedence over the
    /// config file for credentials and the resident list.
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| lookup(*key).filter(|value| !value.is_empty()))
        };
        let set = |slot: &mut String, keys: &[&str]| {
            if let Some(value) = get(keys) {
                *slot = value;
            }
        };

        // Containers export HOSTNAME as the machine name; only a URL counts.
        if let Some(value) = get(&["WEBDAV_HOSTNAME"])
            .or_else(|| get(&["HOSTNAME"]).filter(|value| value.contains("://")))
        {
            self.webdav.hostname = value;
        }
        set(&mut self.webdav.username, &["WEBDAV_USERNAME", "USERNAME"]);
        set(&mut self.webdav.password, &["WEBDAV_PASSWORD", "PASSWORD"]);

        set(&mut self.portal.username, &["PORTAL_USERNAME"]);
        set(&mut self.portal.password, &["PORTAL_PASSWORD"]);
        set(&mut self.portal.cookie, &["PORTAL_COOKIE"]);

        set(&mut self.email.sender, &["EMAIL_SENDER"]);
        set(&mut self.email.password, &["EMAIL_PASSWORD"]);
        set(&mut self.email.smtp_server, &["SMTP_SERVER"]);
        if let Some(raw) = get(&["EMAIL_RECIPIENTS"]) {
            self.email.recipients = parse_recipients(&raw);
        }
        if let Some(raw) = get(&["SMTP_PORT"]) {
            self.email.smtp_port = raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("SMTP_PORT is not a valid port: {raw}"))?;
        }

        if let Some(raw) = get(&["RESIDENTS"]) {
            self.residents = parse_residents(&raw)?;
        }
        Ok(())
    }

    /// Resolved per-resident configs in declaration order.
    pub fn resident_configs(&self) -> Vec<ResidentConfig> {
        self.residents.iter().map(ResidentEntry::resolve).collect()
    }

    /// Check the settings the monitor cannot run without.
    pub fn validate(&self) -> Result<()> {
        let missing = self.webdav.missing_fields();
        if !missing.is_empty() {
            bail!("missing WebDAV settings: {}", missing.join(", "));
        }
        if self.residents.is_empty() {
            bail!("no residents configured");
        }
        if self.monitor.alert_threshold == 0 {
            bail!("monitor.alert_threshold must be at least 1");
        }

        let mut seen = HashSet::new();
        for resident in &self.residents {
            if resident.id.trim().is_empty() {
                bail!("resident id must not be empty");
            }
            if resident.interval_secs == 0 {
                bail!("resident {} has a zero poll interval", resident.id);
            }
            if !seen.insert(resident.id.as_str()) {
                bail!("resident {} is configured more than once", resident.id);
            }
        }
        Ok(())
    }
}

/// Parse `ID[:interval_secs]` items separated by commas, e.g.
/// `CG0128:30, BL0004`.
pub fn parse_residents(raw: &str) -> Result<Vec<ResidentEntry>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(':') {
            Some((id, interval)) => {
                let interval_secs = interval
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid interval in resident entry `{item}`"))?;
                Ok(ResidentEntry::new(id.trim(), interval_secs))
            }
            None => Ok(ResidentEntry::new(item, default_interval_secs())),
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn valid_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.webdav.hostname = "https://dav.example".to_string();
        cfg.webdav.username = "user".to_string();
        cfg.webdav.password = "secret".to_string();
        cfg.residents = vec![ResidentEntry::new("CG0128", 60)];
        cfg
    }

    // ── Defaults ──────────────────────────────────────────────────────────

    #[test]
    fn monitor_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.monitor.alert_threshold, 6);
        assert_eq!(cfg.monitor.settle_delay(), Duration::from_secs(5));
        assert_eq!(cfg.monitor.error_backoff(), Duration::from_secs(5));
        assert_eq!(cfg.monitor.state_file, "data/state.json");
        assert!(!cfg.monitor.simulate_local_updates);
        assert_eq!(cfg.email.smtp_port, 465);
        assert_eq!(cfg.telemetry.log_level, "info");
        assert!(cfg.telemetry.log_dir.is_empty());
        assert!(cfg.webdav.accept_invalid_certs);
    }

    #[test]
    fn portal_urls_derive_from_base() {
        let mut portal = PortalConfig::default();
        portal.base_url = "https://portal.test/".to_string();
        assert_eq!(
            portal.login_url(),
            "https://portal.test/ems/vmedd-monitor/fo/portal/loginWidget.json"
        );
        assert_eq!(
            portal.sensor_info_url(),
            "https://portal.test/ems/vmedd-monitor/fo/portal/vmeddNotifications.json"
        );
        assert_eq!(
            portal.start_url(),
            "https://portal.test/ems/vmedd-monitor/fo/portal/start"
        );
    }

    #[test]
    fn remote_path_joins_directory() {
        let mut monitor = MonitorConfig::default();
        assert_eq!(monitor.remote_path_for("BL0004"), "json_notifications/BL0004.json");
        monitor.remote_dir = "feeds/".to_string();
        assert_eq!(monitor.remote_path_for("BL0004"), "feeds/BL0004.json");
        monitor.remote_dir = String::new();
        assert_eq!(monitor.remote_path_for("BL0004"), "BL0004.json");
    }

    // ── Residents ─────────────────────────────────────────────────────────

    #[test]
    fn resident_paths_default_from_id() {
        let resolved = ResidentEntry::new("CG0128", 30).resolve();
        assert_eq!(resolved.poll_interval, Duration::from_secs(30));
        assert_eq!(resolved.upload_path, PathBuf::from("data/CG0128_upload.json"));
        assert_eq!(resolved.download_path, PathBuf::from("data/CG0128_download.json"));
    }

    #[test]
    fn resident_explicit_paths_win() {
        let mut entry = ResidentEntry::new("CG0128", 30);
        entry.upload_path = Some("/srv/up.json".to_string());
        entry.download_path = Some("/srv/down.json".to_string());
        let resolved = entry.resolve();
        assert_eq!(resolved.upload_path, PathBuf::from("/srv/up.json"));
        assert_eq!(resolved.download_path, PathBuf::from("/srv/down.json"));
    }

    #[test]
    fn parse_residents_accepts_optional_interval() {
        let parsed = parse_residents("CG0128:30, BL0004 ,,").unwrap();
        assert_eq!(
            parsed,
            vec![ResidentEntry::new("CG0128", 30), ResidentEntry::new("BL0004", 60)]
        );
    }

    #[test]
    fn parse_residents_rejects_bad_interval() {
        assert!(parse_residents("CG0128:soon").is_err());
    }

    #[test]
    fn parse_recipients_trims_and_skips_empty() {
        assert_eq!(
            parse_recipients(" a@example.org, ,b@example.org,"),
            vec!["a@example.org".to_string(), "b@example.org".to_string()]
        );
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.monitor.alert_threshold, 6);
        assert_eq!(cfg.portal.base_url, "https://vmedd-portal.de");
    }

    #[test]
    fn load_from_valid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.toml");
        fs::write(
            &path,
            r#"
[monitor]
alert_threshold = 3
settle_delay_secs = 2
state_file = "/var/lib/vigil/state.json"

[[residents]]
id = "CG0128"
interval_secs = 30

[[residents]]
id = "BL0004"
upload_path = "/srv/bl/up.json"

[email]
recipients = ["ops@example.org", "night@example.org"]
smtp_port = 2465
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.monitor.alert_threshold, 3);
        assert_eq!(cfg.monitor.settle_delay_secs, 2);
        assert_eq!(cfg.monitor.state_file, "/var/lib/vigil/state.json");
        assert_eq!(cfg.residents.len(), 2);
        assert_eq!(cfg.residents[0].interval_secs, 30);
        assert_eq!(cfg.residents[1].interval_secs, 60);
        assert_eq!(cfg.residents[1].upload_path.as_deref(), Some("/srv/bl/up.json"));
        assert_eq!(cfg.email.recipients.len(), 2);
        assert_eq!(cfg.email.smtp_port, 2465);
        // Unspecified sections should have defaults
        assert_eq!(cfg.monitor.remote_dir, "json_notifications");
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.monitor.alert_threshold = 4;
        cfg.residents = vec![ResidentEntry::new("CG0128", 15)];
        cfg.portal.base_url = "https://portal.test".to_string();

        cfg.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.monitor.alert_threshold, 4);
        assert_eq!(loaded.residents, vec![ResidentEntry::new("CG0128", 15)]);
        assert_eq!(loaded.portal.base_url, "https://portal.test");
    }

    // ── Env var overrides ──────────────────────────────────────────────────

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_email_and_residents() {
        let mut cfg = AppConfig::default();
        cfg.email.recipients = vec!["file@example.org".to_string()];
        cfg.apply_overrides(overrides(&[
            ("EMAIL_RECIPIENTS", "a@example.org, b@example.org"),
            ("RESIDENTS", "ZX0001:45"),
            ("SMTP_PORT", "587"),
        ]))
        .unwrap();
        assert_eq!(
            cfg.email.recipients,
            vec!["a@example.org".to_string(), "b@example.org".to_string()]
        );
        assert_eq!(cfg.residents, vec![ResidentEntry::new("ZX0001", 45)]);
        assert_eq!(cfg.email.smtp_port, 587);
    }

    #[test]
    fn env_prefixed_webdav_names_win_over_generic_ones() {
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(overrides(&[
            ("HOSTNAME", "container-7f3a"),
            ("WEBDAV_HOSTNAME", "https://dav.example"),
            ("USERNAME", "dav-user"),
        ]))
        .unwrap();
        assert_eq!(cfg.webdav.hostname, "https://dav.example");
        assert_eq!(cfg.webdav.username, "dav-user");
        assert!(cfg.webdav.password.is_empty());
    }

    #[test]
    fn bare_hostname_must_be_a_url() {
        let mut cfg = AppConfig::default();
        cfg.webdav.hostname = "https://from-file".to_string();
        cfg.apply_overrides(overrides(&[("HOSTNAME", "container-7f3a")])).unwrap();
        assert_eq!(cfg.webdav.hostname, "https://from-file");

        cfg.apply_overrides(overrides(&[("HOSTNAME", "https://dav.example")])).unwrap();
        assert_eq!(cfg.webdav.hostname, "https://dav.example");
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = AppConfig::default();
        cfg.portal.username = "from-file".to_string();
        cfg.apply_overrides(overrides(&[("PORTAL_USERNAME", "")])).unwrap();
        assert_eq!(cfg.portal.username, "from-file");
    }

    #[test]
    fn invalid_smtp_port_is_an_error() {
        let mut cfg = AppConfig::default();
        assert!(cfg.apply_overrides(overrides(&[("SMTP_PORT", "smtps")])).is_err());
    }

    // ── validate ───────────────────────────────────────────────────────────

    #[test]
    fn validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_reports_missing_webdav_fields() {
        let mut cfg = valid_config();
        cfg.webdav.password.clear();
        cfg.webdav.hostname.clear();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("HOSTNAME"), "{err}");
        assert!(err.contains("PASSWORD"), "{err}");
        assert!(!err.contains("USERNAME"), "{err}");
    }

    #[test]
    fn validate_rejects_empty_and_duplicate_residents() {
        let mut cfg = valid_config();
        cfg.residents.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.residents.push(ResidentEntry::new("CG0128", 30));
        assert!(cfg.validate().unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn validate_rejects_zero_interval_and_threshold() {
        let mut cfg = valid_config();
        cfg.residents[0].interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.monitor.alert_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn email_completeness() {
        let mut email = EmailConfig::default();
        assert!(!email.is_complete());
        email.sender = "vigil@example.org".to_string();
        email.password = "pw".to_string();
        email.smtp_server = "smtp.example.org".to_string();
        assert!(!email.is_complete());
        email.recipients = vec!["ops@example.org".to_string()];
        assert!(email.is_complete());
    }
}
