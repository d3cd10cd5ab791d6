//! Configuration for the cadenza engine.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CADENZA_HOME, CADENZA_DB)
//! 2. Config file (.cadenza/config.yaml)
//! 3. Defaults (~/.cadenza)
//!
//! Config file discovery searches the current directory and parents for
//! .cadenza/config.yaml. The resolved configuration is built once at
//! startup and passed into each component's constructor; there is no
//! global handle.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub cadence: CadenceConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub requeue: RequeueConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory
    pub home: Option<String>,
    /// SQLite database path
    pub db: Option<String>,
}

/// Tick-modulo cadence for each job type.
///
/// Every job is assigned a modulus against the external tick index;
/// this multiplexes all recurring work onto a single scheduled trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Research pass runs every Nth tick
    pub research_every: u64,
    /// Message-channel pass runs every Nth tick
    pub message_every: u64,
    /// Voice-channel pass runs every Nth tick
    pub voice_every: u64,
    /// Heartbeat runs every Nth tick
    pub heartbeat_every: u64,
    /// Discovery pass runs every Nth tick
    pub discovery_every: u64,
    /// Requeue pass runs every Nth tick
    pub requeue_every: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            research_every: 1,
            message_every: 10,
            voice_every: 3,
            heartbeat_every: 5,
            discovery_every: 30,
            requeue_every: 15,
        }
    }
}

/// Channel dispatch windows, batch caps, and nurture schedule
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// First local hour (inclusive) the SMS window is open
    pub sms_window_start_hour: u32,
    /// Last local hour (exclusive) the SMS window is open
    pub sms_window_end_hour: u32,
    /// Offset applied to UTC to obtain the contacts' local time
    pub local_utc_offset_hours: i32,
    /// Max contacts processed per message pass
    pub message_batch_cap: usize,
    /// Max contacts processed per research pass
    pub research_batch_cap: usize,
    /// Max contacts processed per voice pass
    pub voice_batch_cap: usize,
    /// Max voice attempts per calendar day
    pub voice_daily_cap: i64,
    /// Days after the last message before a voice follow-up fires
    pub voice_followup_min_days: i64,
    /// Worker-pool size for dispatch jobs
    pub pool_workers: usize,
    /// Drip schedule: days since first dispatch for each nurture stage
    pub nurture_day_offsets: Vec<i64>,
    /// Denominator for deterministic message-variant bucketing
    pub variant_buckets: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sms_window_start_hour: 9,
            sms_window_end_hour: 17,
            local_utc_offset_hours: 0,
            message_batch_cap: 10,
            research_batch_cap: 20,
            voice_batch_cap: 5,
            voice_daily_cap: 10,
            voice_followup_min_days: 1,
            pool_workers: 4,
            nurture_day_offsets: vec![2, 5, 9],
            variant_buckets: 2,
        }
    }
}

/// Circuit breaker sampling window and threshold
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// How many recent non-passive touches to sample
    pub sample_size: usize,
    /// Failure count within the sample that trips the breaker
    pub failure_threshold: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            sample_size: 10,
            failure_threshold: 5,
        }
    }
}

/// Discovery matrix and paging bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Niche/category axis of the query matrix
    pub niches: Vec<String>,
    /// Geography axis of the query matrix
    pub geographies: Vec<String>,
    /// Matrix positions consumed per discovery pass
    pub queries_per_run: usize,
    /// Pages fetched per query before moving on
    pub max_pages_per_query: usize,
    /// Provenance tag stamped on inserted contacts
    pub source_tag: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            niches: Vec::new(),
            geographies: Vec::new(),
            queries_per_run: 3,
            max_pages_per_query: 2,
            source_tag: "directory".to_string(),
        }
    }
}

/// Self-healing requeue bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequeueConfig {
    /// Days without a reply before a contact counts as unresponsive
    pub observation_days: i64,
    /// Ghost-count ceiling; above it the contact is trashed
    pub ghost_ceiling: i64,
    /// Days before a requeued contact becomes dispatchable again
    pub retry_delay_days: i64,
    /// Max contacts processed per requeue pass
    pub batch_cap: usize,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            observation_days: 14,
            ghost_ceiling: 2,
            retry_delay_days: 3,
            batch_cap: 50,
        }
    }
}

/// External provider endpoints and credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub directory_url: String,
    pub directory_api_key: String,
    pub sms_url: String,
    pub sms_api_key: String,
    pub email_url: String,
    pub email_api_key: String,
    pub voice_url: String,
    pub voice_api_key: String,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to cadenza home (engine state)
    pub home: PathBuf,
    /// Absolute path to the SQLite database
    pub db_path: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    pub cadence: CadenceConfig,
    pub dispatch: DispatchConfig,
    pub breaker: BreakerConfig,
    pub discovery: DiscoveryConfig,
    pub requeue: RequeueConfig,
    pub providers: ProvidersConfig,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".cadenza").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Load configuration from all sources
pub fn load() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".cadenza");

    let config_path = find_config_file();
    let file = match config_path.as_deref() {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // Paths in the file are relative to the .cadenza/ directory
    let base_dir = config_path
        .as_deref()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let home = if let Ok(env_home) = std::env::var("CADENZA_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = file.paths.home {
        resolve_path(&base_dir, home_path)
    } else {
        default_home
    };

    let db_path = if let Ok(env_db) = std::env::var("CADENZA_DB") {
        PathBuf::from(env_db)
    } else if let Some(ref db) = file.paths.db {
        resolve_path(&base_dir, db)
    } else {
        home.join("cadenza.db")
    };

    Ok(ResolvedConfig {
        home,
        db_path,
        config_file: config_path,
        cadence: file.cadence,
        dispatch: file.dispatch,
        breaker: file.breaker,
        discovery: file.discovery,
        requeue: file.requeue,
        providers: file.providers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_sections() {
        let file = ConfigFile::default();

        assert_eq!(file.cadence.research_every, 1);
        assert_eq!(file.cadence.message_every, 10);
        assert_eq!(file.cadence.voice_every, 3);
        assert_eq!(file.cadence.heartbeat_every, 5);

        assert_eq!(file.breaker.sample_size, 10);
        assert_eq!(file.breaker.failure_threshold, 5);

        assert_eq!(file.dispatch.sms_window_start_hour, 9);
        assert_eq!(file.dispatch.sms_window_end_hour, 17);
        assert_eq!(file.dispatch.nurture_day_offsets, vec![2, 5, 9]);

        assert_eq!(file.requeue.ghost_ceiling, 2);
        assert_eq!(file.requeue.observation_days, 14);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let cadenza_dir = temp.path().join(".cadenza");
        std::fs::create_dir_all(&cadenza_dir).unwrap();

        let config_path = cadenza_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
paths:
  home: ./
  db: ./outreach.db
cadence:
  message_every: 20
breaker:
  failure_threshold: 3
discovery:
  niches: [plumber, roofer]
  geographies: [austin, dallas]
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.paths.home, Some("./".to_string()));
        assert_eq!(config.cadence.message_every, 20);
        // Unset fields keep their defaults
        assert_eq!(config.cadence.voice_every, 3);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.sample_size, 10);
        assert_eq!(config.discovery.niches, vec!["plumber", "roofer"]);
        assert_eq!(config.discovery.geographies, vec!["austin", "dallas"]);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.cadenza");

        assert_eq!(
            resolve_path(&base, "state"),
            PathBuf::from("/home/user/project/.cadenza/state")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
