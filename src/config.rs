// Application configuration, loaded from environment variables and CLI flags.

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Wall-clock budget for a single strategy decide() call, in milliseconds.
    pub decide_timeout_ms: u64,
    /// Number of OS threads in the match simulation worker pool.
    pub match_workers: usize,
    /// Whether the weekly tournament scheduler runs at all.
    pub scheduler_enabled: bool,
    /// Accelerated scheduler cadence for testing: fire every N seconds
    /// instead of weekly. None means the weekly cadence.
    pub scheduler_dev_interval_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:dilemma.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `DECIDE_TIMEOUT_MS` - per-call strategy budget (default: 50)
    /// - `MATCH_WORKERS` - worker pool size (default: 4)
    /// - `SCHEDULER` - set to `off` or `0` to disable the weekly scheduler
    /// - `SCHEDULER_DEV_INTERVAL_SECS` - accelerated cadence for testing
    ///
    /// CLI flags:
    /// - `--port <PORT>` - override the port
    /// - `--dev-scheduler <SECS>` - same as `SCHEDULER_DEV_INTERVAL_SECS`
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:dilemma.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let decide_timeout_ms = std::env::var("DECIDE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        let match_workers = std::env::var("MATCH_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(4);

        let scheduler_enabled = std::env::var("SCHEDULER")
            .map(|v| !(v.eq_ignore_ascii_case("off") || v == "0"))
            .unwrap_or(true);

        let scheduler_dev_interval_secs = Self::parse_cli_value(&args, "--dev-scheduler")
            .and_then(|v| v.parse().ok())
            .or_else(|| {
                std::env::var("SCHEDULER_DEV_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            });

        Config {
            database_url,
            port,
            decide_timeout_ms,
            match_workers,
            scheduler_enabled,
            scheduler_dev_interval_secs,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
