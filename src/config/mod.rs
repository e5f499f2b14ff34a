use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub locales: LocaleConfig,
    pub popularity: PopularityConfig,
    pub scheduler: SchedulerConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the warm tier raster files
    pub raster_path: PathBuf,
    /// File name prefix for warm tier entries
    pub raster_prefix: String,
    /// Directory holding the provisioned season snapshot JSON files
    pub snapshot_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of rasters held in memory
    pub hot_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocaleConfig {
    /// Locales pre-generated by every refresh cycle
    pub supported: Vec<String>,
    pub default_locale: String,
    pub default_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularityConfig {
    /// Minimum requests inside the window before a variant is pre-generated
    pub min_requests: i64,
    /// Trailing window, in hours, for popularity ranking
    pub window_hours: i64,
    /// Upper bound on pre-generated timezone variants per cycle
    pub candidate_limit: i64,
    /// Days of popularity rows kept before pruning
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Cron expression (with seconds field) gating refresh cycles
    pub refresh_cron: String,
    /// Run one refresh cycle immediately on startup
    pub run_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Time bound, in seconds, for one schedule provider call
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./data/pitboard.db".to_string(),
                max_connections: Some(10),
            },
            storage: StorageConfig {
                raster_path: PathBuf::from("./data/rasters"),
                raster_prefix: "calendar".to_string(),
                snapshot_path: PathBuf::from("./data/seasons"),
            },
            cache: CacheConfig { hot_capacity: 100 },
            locales: LocaleConfig {
                supported: vec!["en".to_string(), "cs".to_string()],
                default_locale: "en".to_string(),
                default_timezone: "Europe/Prague".to_string(),
            },
            popularity: PopularityConfig {
                min_requests: 10,
                window_hours: 24,
                candidate_limit: 20,
                retention_days: 30,
            },
            scheduler: SchedulerConfig {
                enabled: true,
                refresh_cron: "0 0 * * * *".to_string(),
                run_on_startup: true,
            },
            provider: ProviderConfig {
                timeout_seconds: 10,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::create_dir_all("./data/rasters")?;
            std::fs::create_dir_all("./data/seasons")?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.locales.default_timezone, "Europe/Prague");
        assert_eq!(parsed.popularity.min_requests, 10);
        assert_eq!(parsed.popularity.candidate_limit, 20);
        assert_eq!(parsed.cache.hot_capacity, 100);
    }
}
