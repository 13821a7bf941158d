use std::path::PathBuf;

use clap::Parser;
use lib_ranking::configs::{ConfigError, RankingSettings};

const DEFAULT_CONFIG_FILE: &str = "server_leaderboard.conf";
const DEFAULT_PORT: u16 = 9003;

#[derive(Parser, Debug, Clone, Default)]
#[clap(about = "Leaderboard ranking server", version)]
pub struct Cli {
    #[clap(
        long,
        env = "LEADERBOARD_PORT",
        help = "Port to listen on for HTTP and WebSocket clients."
    )]
    pub port: Option<u16>,

    #[clap(long, env = "LEADERBOARD_CONFIG_PATH", help = "Path to the JSON settings file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LEADERBOARD_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(
        long,
        env = "LEADERBOARD_LOG_LEVEL",
        help = "Logging level (trace, debug, info, warn, error)."
    )]
    pub log_level: Option<String>,

    #[clap(long, env = "REDIS_URL", help = "Redis URL of the ranked store.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL URL for games, users and score history.")]
    pub database_url: Option<String>,

    #[clap(long, env = "LEADERBOARD_DB_MAX_CONNECTIONS", help = "Maximum PostgreSQL pool size.")]
    pub db_max_connections: Option<usize>,

    #[clap(
        long,
        env = "LEADERBOARD_STORE_TIMEOUT_MS",
        help = "Deadline in milliseconds for each ranked-store call."
    )]
    pub store_timeout_ms: Option<u64>,

    #[clap(
        long,
        env = "LEADERBOARD_SERVICE_TIMEOUT_MS",
        help = "Deadline in milliseconds for catalog, directory and history calls."
    )]
    pub service_timeout_ms: Option<u64>,

    #[clap(
        long,
        env = "LEADERBOARD_BROADCAST_CAPACITY",
        help = "Bound of the snapshot queue feeding live observers."
    )]
    pub broadcast_capacity: Option<usize>,

    #[clap(long, env = "LEADERBOARD_BROADCAST_TOP_N", help = "Entries per pushed snapshot.")]
    pub broadcast_top_n: Option<usize>,

    #[clap(long, env = "LEADERBOARD_MAX_TOP_N", help = "Upper bound for any top-N request.")]
    pub max_top_n: Option<usize>,

    #[clap(
        long,
        env = "LEADERBOARD_CHANNEL_WRITE_TIMEOUT_MS",
        help = "Deadline in milliseconds for one WebSocket write."
    )]
    pub channel_write_timeout_ms: Option<u64>,
}

/// Fully resolved configuration of one server process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub settings: RankingSettings,
}

impl Cli {
    // Values given on the command line or in the environment win over the file.
    fn apply(self, mut settings: RankingSettings) -> RankingSettings {
        if let Some(v) = self.log_dir {
            settings.log_dir = v;
        }
        if let Some(v) = self.log_level {
            settings.log_level = v;
        }
        if let Some(v) = self.redis_url {
            settings.redis_url = v;
        }
        if let Some(v) = self.database_url {
            settings.database_url = v;
        }
        if let Some(v) = self.db_max_connections {
            settings.db_max_connections = v;
        }
        if let Some(v) = self.store_timeout_ms {
            settings.store_timeout_ms = v;
        }
        if let Some(v) = self.service_timeout_ms {
            settings.service_timeout_ms = v;
        }
        if let Some(v) = self.broadcast_capacity {
            settings.broadcast_capacity = v;
        }
        if let Some(v) = self.broadcast_top_n {
            settings.broadcast_top_n = v;
        }
        if let Some(v) = self.max_top_n {
            settings.max_top_n = v;
        }
        if let Some(v) = self.channel_write_timeout_ms {
            settings.channel_write_timeout_ms = v;
        }
        settings
    }
}

/// Layers defaults, then the settings file, then environment and CLI flags.
pub fn resolve(cli: Cli) -> Result<ServerConfig, ConfigError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let from_file = RankingSettings::load_or_default(&config_file_path)?;
    let port = cli.port.unwrap_or(DEFAULT_PORT);
    let settings = cli.apply(from_file);
    settings.validate()?;

    Ok(ServerConfig { port, settings })
}

pub fn load_config() -> Result<ServerConfig, ConfigError> {
    resolve(Cli::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{body}").unwrap();
        file
    }

    #[test]
    fn cli_overrides_file_which_overrides_defaults() {
        let file =
            settings_file(r#"{"maxTopN": 40, "broadcastTopN": 5, "redisUrl": "redis://file/"}"#);
        let cli = Cli {
            config_path: Some(file.path().to_path_buf()),
            max_top_n: Some(60),
            port: Some(8080),
            ..Default::default()
        };

        let config = resolve(cli).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.settings.max_top_n, 60);
        assert_eq!(config.settings.broadcast_top_n, 5);
        assert_eq!(config.settings.redis_url, "redis://file/");
        assert_eq!(config.settings.store_timeout_ms, 2000);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            config_path: Some(dir.path().join("nope.conf")),
            ..Default::default()
        };
        let config = resolve(cli).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.settings, RankingSettings::default());
    }

    #[test]
    fn invalid_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            config_path: Some(dir.path().join("nope.conf")),
            broadcast_capacity: Some(0),
            ..Default::default()
        };
        assert!(matches!(resolve(cli), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn file_values_are_validated_after_overrides() {
        // On its own the file asks for more pushed entries than maxTopN allows.
        let file = settings_file(r#"{"broadcastTopN": 200}"#);
        let cli = Cli {
            config_path: Some(file.path().to_path_buf()),
            max_top_n: Some(300),
            ..Default::default()
        };
        let config = resolve(cli).unwrap();
        assert_eq!(config.settings.broadcast_top_n, 200);
        assert_eq!(config.settings.max_top_n, 300);

        let without_override = Cli {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            resolve(without_override),
            Err(ConfigError::Invalid { field: "broadcastTopN", .. })
        ));
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "server_leaderboard",
            "--port",
            "7000",
            "--store-timeout-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(7000));
        assert_eq!(cli.store_timeout_ms, Some(250));
    }
}
