// Configuration module for mediarr-rust
// Handles XDG-compliant directory paths and TOML configuration file

use serde::Deserialize;
use std::path::PathBuf;

const APP_NAME: &str = "mediarr-rust";
const CONFIG_FILENAME: &str = "config.toml";

/// Default number of records a sensor publishes.
pub const DEFAULT_MAX_ITEMS: usize = 10;
/// Default calendar lookahead window in days.
pub const DEFAULT_DAYS_TO_CHECK: i64 = 60;
/// Default poll interval in minutes.
pub const DEFAULT_POLL_MINUTES: u64 = 10;

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_days_to_check() -> i64 {
    DEFAULT_DAYS_TO_CHECK
}

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server configuration
    pub server: ServerConfig,

    /// Directory paths (overrides XDG defaults)
    pub paths: PathsConfig,

    /// Polling configuration
    pub poll: PollConfig,

    /// TMDB configuration (enrichment key + optional discovery sensors)
    pub tmdb: TmdbConfig,

    /// Upcoming-series sensor (Sonarr calendar)
    pub sonarr: Option<SonarrConfig>,

    /// Upcoming-movies sensor (Radarr collection)
    pub radarr: Option<RadarrConfig>,

    /// Popular/trending sensor (Trakt lists)
    pub trakt: Option<TraktConfig>,

    /// Recently-added sensor (Jellyfin libraries)
    pub jellyfin: Option<JellyfinConfig>,

    /// Recently-added sensor (Plex sections)
    pub plex: Option<PlexConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server port (default: 8150)
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8150,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Override cache directory (local image store)
    pub cache_dir: Option<PathBuf>,

    /// Override config directory
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Minutes between poll cycles (default: 10)
    pub interval_minutes: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_POLL_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TmdbConfig {
    /// TMDB API read access token. Required for Sonarr/Radarr/Trakt image
    /// enrichment and for the discovery lists below.
    pub api_key: Option<String>,

    /// Discovery lists to publish as sensors, one sensor per entry.
    /// Valid: trending, now_playing, upcoming, on_air, airing_today
    pub lists: Vec<String>,

    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SonarrConfig {
    pub url: String,
    pub api_key: String,

    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Calendar lookahead window in days (default: 60)
    #[serde(default = "default_days_to_check")]
    pub days_to_check: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadarrConfig {
    pub url: String,
    pub api_key: String,

    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraktConfig {
    pub client_id: String,
    pub client_secret: String,

    /// Which popular lists to merge: "shows", "movies" or "both"
    #[serde(default = "default_trending_type")]
    pub trending_type: String,

    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_trending_type() -> String {
    "both".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct JellyfinConfig {
    pub url: String,
    pub token: String,

    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlexConfig {
    pub url: String,
    pub token: String,

    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

/// Application paths following XDG Base Directory Specification on Unix
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for configuration files (config.toml)
    /// XDG: $XDG_CONFIG_HOME/mediarr-rust or ~/.config/mediarr-rust
    pub config_dir: PathBuf,

    /// Directory for cache files (downloaded artwork)
    /// XDG: $XDG_CACHE_HOME/mediarr-rust or ~/.cache/mediarr-rust
    pub cache_dir: PathBuf,
}

/// Fixed URL prefix under which the image cache directory is served.
pub const IMAGE_URL_PREFIX: &str = "/local/mediarr";

impl AppPaths {
    /// Create application paths using XDG directories (or fallbacks)
    ///
    /// Priority order:
    /// 1. Environment variables (MEDIARR_CONFIG_DIR, MEDIARR_CACHE_DIR)
    /// 2. Config file overrides
    /// 3. XDG directories
    /// 4. Current directory fallback
    pub fn new(config_overrides: &PathsConfig) -> Self {
        Self {
            config_dir: Self::resolve_config_dir(&config_overrides.config_dir),
            cache_dir: Self::resolve_cache_dir(&config_overrides.cache_dir),
        }
    }

    /// Create application paths rooted in the current directory
    /// (portable/development mode)
    pub fn current_dir() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            config_dir: cwd.clone(),
            cache_dir: cwd.join("cache"),
        }
    }

    fn resolve_config_dir(config_override: &Option<PathBuf>) -> PathBuf {
        if let Ok(path) = std::env::var("MEDIARR_CONFIG_DIR") {
            return PathBuf::from(path);
        }
        if let Some(ref path) = config_override {
            return path.clone();
        }
        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    fn resolve_cache_dir(config_override: &Option<PathBuf>) -> PathBuf {
        if let Ok(path) = std::env::var("MEDIARR_CACHE_DIR") {
            return PathBuf::from(path);
        }
        if let Some(ref path) = config_override {
            return path.clone();
        }
        if let Some(dir) = dirs::cache_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("cache")
    }

    /// The web-servable image cache directory, exposed at IMAGE_URL_PREFIX.
    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("mediarr")
    }

    /// Get the config file path
    pub fn config_file_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILENAME)
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::create_dir_all(self.image_cache_dir()).await?;
        Ok(())
    }

    /// Log the configured paths
    pub fn log_paths(&self) {
        tracing::info!("Configuration directory: {}", self.config_dir.display());
        tracing::info!("Cache directory: {}", self.cache_dir.display());
        tracing::debug!(
            "Image cache served from {} at {}",
            self.image_cache_dir().display(),
            IMAGE_URL_PREFIX
        );
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new(&PathsConfig::default())
    }
}

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Application paths
    pub paths: AppPaths,

    /// Server port
    pub port: u16,

    /// Bind address
    pub bind_address: String,

    /// Minutes between poll cycles
    pub poll_interval_minutes: u64,

    /// TMDB enrichment key + discovery lists
    pub tmdb: TmdbConfig,

    pub sonarr: Option<SonarrConfig>,
    pub radarr: Option<RadarrConfig>,
    pub trakt: Option<TraktConfig>,
    pub jellyfin: Option<JellyfinConfig>,
    pub plex: Option<PlexConfig>,
}

impl AppConfig {
    /// Load configuration from TOML file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML config file
    /// 3. Default values
    pub fn load() -> Self {
        let portable_mode = std::env::var("MEDIARR_PORTABLE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let config_dir = if portable_mode {
            tracing::info!("Running in portable mode (using current directory)");
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            Self::find_config_dir()
        };

        let config_file = Self::load_config_file(&config_dir);
        Self::build(config_file, portable_mode)
    }

    /// Find the config directory (for locating config.toml)
    fn find_config_dir() -> PathBuf {
        if let Ok(path) = std::env::var("MEDIARR_CONFIG_DIR") {
            return PathBuf::from(path);
        }
        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Load and parse the TOML config file
    fn load_config_file(config_dir: &std::path::Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from config file with environment overrides
    fn build(config_file: ConfigFile, portable_mode: bool) -> Self {
        let paths = if portable_mode {
            AppPaths::current_dir()
        } else {
            AppPaths::new(&config_file.paths)
        };

        let port = Self::env_port().unwrap_or(config_file.server.port);

        let bind_address =
            Self::env_bind_address().unwrap_or_else(|| config_file.server.bind_address.clone());

        let poll_interval_minutes =
            Self::env_poll_minutes().unwrap_or(config_file.poll.interval_minutes);

        // TMDB key: env > config
        let mut tmdb = config_file.tmdb;
        if let Ok(key) = std::env::var("TMDB_API_KEY") {
            tmdb.api_key = Some(key);
        }

        Self {
            paths,
            port,
            bind_address,
            poll_interval_minutes,
            tmdb,
            sonarr: config_file.sonarr,
            radarr: config_file.radarr,
            trakt: config_file.trakt,
            jellyfin: config_file.jellyfin,
            plex: config_file.plex,
        }
    }

    fn env_port() -> Option<u16> {
        std::env::var("MEDIARR_PORT").ok().and_then(|p| p.parse().ok())
    }

    fn env_bind_address() -> Option<String> {
        std::env::var("MEDIARR_BIND_ADDRESS").ok()
    }

    fn env_poll_minutes() -> Option<u64> {
        std::env::var("MEDIARR_POLL_MINUTES")
            .ok()
            .and_then(|p| p.parse().ok())
    }

    /// Log configuration status
    pub fn log_config(&self) {
        self.paths.log_paths();
        tracing::info!("Server listening on {}:{}", self.bind_address, self.port);
        tracing::info!("Poll interval: {} minutes", self.poll_interval_minutes);

        if self.tmdb.api_key.is_some() {
            tracing::info!("TMDB enrichment: ENABLED");
        } else {
            tracing::info!("TMDB enrichment: disabled (upcoming sensors publish without artwork)");
            tracing::info!("Hint: add api_key under [tmdb] in config.toml or set TMDB_API_KEY");
        }

        let mut sources: Vec<&str> = Vec::new();
        if self.sonarr.is_some() {
            sources.push("sonarr");
        }
        if self.radarr.is_some() {
            sources.push("radarr");
        }
        if self.trakt.is_some() {
            sources.push("trakt");
        }
        if self.jellyfin.is_some() {
            sources.push("jellyfin");
        }
        if self.plex.is_some() {
            sources.push("plex");
        }
        if !self.tmdb.lists.is_empty() {
            sources.push("tmdb-discovery");
        }

        if sources.is_empty() {
            tracing::warn!("No sources configured; the server will publish no sensors");
        } else {
            tracing::info!("Configured sources: {}", sources.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_dir_paths() {
        let paths = AppPaths::current_dir();
        assert!(paths.config_dir.is_absolute() || paths.config_dir == PathBuf::from("."));
        assert!(paths.cache_dir.ends_with("cache"));
        assert!(paths.image_cache_dir().ends_with("cache/mediarr"));
    }

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();
        assert_eq!(config.server.port, 8150);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.poll.interval_minutes, 10);
        assert!(config.sonarr.is_none());
        assert!(config.tmdb.api_key.is_none());
        assert!(config.tmdb.lists.is_empty());
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[server]
port = 9000
bind_address = "127.0.0.1"

[poll]
interval_minutes = 5

[tmdb]
api_key = "tmdb_key"
lists = ["trending", "upcoming"]

[sonarr]
url = "http://sonarr:8989"
api_key = "abc"
days_to_check = 14

[radarr]
url = "http://radarr:7878"
api_key = "def"
max_items = 5

[trakt]
client_id = "cid"
client_secret = "secret"
trending_type = "shows"

[jellyfin]
url = "http://jellyfin:8096"
token = "tok"

[plex]
url = "http://plex:32400"
token = "plex_tok"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.poll.interval_minutes, 5);
        assert_eq!(config.tmdb.api_key.as_deref(), Some("tmdb_key"));
        assert_eq!(config.tmdb.lists, vec!["trending", "upcoming"]);

        let sonarr = config.sonarr.unwrap();
        assert_eq!(sonarr.url, "http://sonarr:8989");
        assert_eq!(sonarr.days_to_check, 14);
        assert_eq!(sonarr.max_items, DEFAULT_MAX_ITEMS);

        let radarr = config.radarr.unwrap();
        assert_eq!(radarr.max_items, 5);

        let trakt = config.trakt.unwrap();
        assert_eq!(trakt.trending_type, "shows");

        assert!(config.jellyfin.is_some());

        let plex = config.plex.unwrap();
        assert_eq!(plex.url, "http://plex:32400");
        assert_eq!(plex.max_items, DEFAULT_MAX_ITEMS);
    }

    #[test]
    fn test_partial_config_toml() {
        // Partial configs work (only specify what you need)
        let toml_str = r#"
[trakt]
client_id = "cid"
client_secret = "secret"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8150); // default
        let trakt = config.trakt.unwrap();
        assert_eq!(trakt.trending_type, "both"); // default
        assert_eq!(trakt.max_items, DEFAULT_MAX_ITEMS);
    }
}
