//! Configuration loading and validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Source folders to import/watch.
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// Archive root that date folders are created under.
    #[serde(default)]
    pub destination: PathBuf,

    /// Removable volume labels to import/watch when attached.
    #[serde(default)]
    pub devices: Vec<String>,

    /// Keep watching sources/devices after the first import pass.
    #[serde(default)]
    pub watch: bool,

    #[serde(default)]
    pub watcher: WatchConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Quiet period before a batch of newly-added files is emitted. Must
    /// exceed the watch backend's own write-settle delay (>= 3s).
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,

    /// Maximum directory depth below each watch root.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Optional regex applied to full paths; matches are ignored. Hidden
    /// (dot) paths and the duplicates folder are always ignored.
    #[serde(default)]
    pub ignore: Option<String>,
}

fn default_debounce() -> u64 {
    4
}
fn default_max_depth() -> usize {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce(),
            max_depth: default_max_depth(),
            ignore: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Name of the folder (created beside a duplicate source file) that
    /// true duplicates are rerouted into.
    #[serde(default = "default_duplicates_dir")]
    pub duplicates_dir: String,

    /// How long the queue waits after emptying before declaring the drain
    /// cycle complete. Absorbs enqueues racing the empty check.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

fn default_duplicates_dir() -> String {
    "_duplicates".to_string()
}
fn default_grace_ms() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            duplicates_dir: default_duplicates_dir(),
            grace_ms: default_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    /// Interval between removable-volume polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    4
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    /// A file must carry at least one of these tags to be treated as media.
    /// The metadata backend parses any file without reporting whether it is
    /// an image/video, so this guards against non-media files.
    #[serde(default = "default_valid_tags")]
    pub valid_tags: Vec<String>,
}

fn default_valid_tags() -> Vec<String> {
    vec!["ImageWidth".to_string()]
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            valid_tags: default_valid_tags(),
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Load config from default locations or return default config.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./photosift.toml",
        "~/.config/photosift/config.toml",
        "/etc/photosift/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate a fully-merged configuration. Failures here are fatal; the
/// binary reports them and exits.
pub fn validate(config: &Config) -> Result<()> {
    if config.sources.is_empty() && config.devices.is_empty() {
        anyhow::bail!("At least one of sources or devices must be configured");
    }

    if config.destination.as_os_str().is_empty() {
        anyhow::bail!("Destination directory must be configured");
    }

    if !config.destination.is_dir() {
        anyhow::bail!(
            "Destination directory does not exist: {:?}",
            config.destination
        );
    }

    for source in &config.sources {
        if !source.is_dir() {
            anyhow::bail!("Source directory does not exist: {:?}", source);
        }
    }

    if let Some(pattern) = &config.watcher.ignore {
        regex::Regex::new(pattern)
            .with_context(|| format!("Invalid ignore pattern: {}", pattern))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.watcher.debounce_secs, 4);
        assert_eq!(config.queue.duplicates_dir, "_duplicates");
        assert_eq!(config.queue.grace_ms, 1000);
        assert_eq!(config.media.poll_interval_secs, 4);
        assert_eq!(config.metadata.valid_tags, vec!["ImageWidth"]);
        assert!(!config.watch);
    }

    #[test]
    fn validate_requires_a_source_or_device() {
        let config = Config::default();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_bad_ignore_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sources = vec![dir.path().to_path_buf()];
        config.destination = dir.path().to_path_buf();
        config.watcher.ignore = Some("([unclosed".to_string());
        assert!(validate(&config).is_err());

        config.watcher.ignore = Some("_duplicates".to_string());
        assert!(validate(&config).is_ok());
    }
}
