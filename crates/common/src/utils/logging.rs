use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Directives that keep HTTP and storage internals out of the service log
/// unless `RUST_LOG` asks for them.
const DEPENDENCY_DIRECTIVES: &[&str] = &["hyper=warn", "h2=warn", "reqwest=warn", "sled=warn"];

/// Output format of the service log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One line per event
    #[default]
    Compact,
    /// Multi-line, for a terminal
    Pretty,
    /// One JSON object per event, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "unknown log format {:?} (expected compact, pretty or json)",
                other
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Compact => "compact",
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        })
    }
}

/// Logging section shared by the faucet and lockd configs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level or filter directive, e.g. `info` or `drip_faucet=debug`
    pub level: String,

    pub format: LogFormat,

    /// Print the module path of each event
    pub include_target: bool,

    /// Cap HTTP client/server and sled logs at `warn`
    pub quiet_dependencies: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_target: true,
            quiet_dependencies: true,
        }
    }
}

impl LoggingConfig {
    /// Config for a binary's `--debug` flag.
    pub fn debug(mut self, enabled: bool) -> Self {
        if enabled {
            self.level = "debug".to_string();
        }
        self
    }

    /// Filter directive string: configured level, dependency caps, then
    /// `RUST_LOG`, later directives winning.
    fn directives(&self, rust_log: Option<&str>) -> String {
        let mut directives = vec![self.level.as_str()];
        if self.quiet_dependencies {
            directives.extend_from_slice(DEPENDENCY_DIRECTIVES);
        }
        if let Some(rust_log) = rust_log.filter(|s| !s.trim().is_empty()) {
            directives.push(rust_log);
        }
        directives.join(",")
    }
}

/// Initialize the global tracing subscriber.
///
/// Fails if a subscriber is already installed or a directive does not parse.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let env_filter = EnvFilter::try_new(config.directives(rust_log.as_deref()))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target);

    let installed = match config.format {
        LogFormat::Json => subscriber.json().try_init(),
        LogFormat::Pretty => subscriber.pretty().try_init(),
        LogFormat::Compact => subscriber.compact().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;

    tracing::info!(level = %config.level, log_format = %config.format, "logging initialized");
    Ok(())
}

/// Initialize logging for testing. Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .try_init();
}
