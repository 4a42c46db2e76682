use anyhow::{Context, Result, anyhow};
use std::{
    env,
    net::SocketAddr,
    str::FromStr,
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub secret_key: String,
    pub sandbox: SandboxConfig,
    pub limits: RunLimits,
    pub max_code_bytes: usize,
    pub notify: NotifyBackendConfig,
    pub watchdog: WatchdogConfig,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub batch_url: String,
    pub api_key: String,
    pub callback_url: String,
    pub timeout: Duration,
}

/// Resource ceilings sent with every test case of a batch.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub cpu_time_limit_ms: u64,
    pub wall_time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub stack_size_limit_kb: u64,
    pub max_file_size_kb: u64,
    pub max_processes: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            cpu_time_limit_ms: 2_000,
            wall_time_limit_ms: 5_000,
            memory_limit_kb: 131_072,
            stack_size_limit_kb: 65_536,
            max_file_size_kb: 1_024,
            max_processes: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NotifyBackendConfig {
    InMemory,
    Redis { url: String, channel_prefix: String },
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" | "text" => Ok(Self::Compact),
            _ => Err(format!("unsupported log format: {s}")),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let public_url = env::var("PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{bind_addr}"))
            .trim_end_matches('/')
            .to_string();

        let sandbox = SandboxConfig {
            batch_url: env::var("SANDBOX_URL").unwrap_or_else(|_| {
                "https://backend.codedamn.com/api/public/request-dsa-code-execution-batch"
                    .to_string()
            }),
            api_key: env::var("SANDBOX_API_KEY").unwrap_or_default(),
            callback_url: format!("{public_url}/interview/dsa-response/callback"),
            timeout: Duration::from_millis(env_parse("SANDBOX_TIMEOUT_MS", 10_000u64).max(100)),
        };

        let defaults = RunLimits::default();
        let limits = RunLimits {
            cpu_time_limit_ms: env_parse("CPU_TIME_LIMIT_MS", defaults.cpu_time_limit_ms),
            wall_time_limit_ms: env_parse("WALL_TIME_LIMIT_MS", defaults.wall_time_limit_ms),
            memory_limit_kb: env_parse("MEMORY_LIMIT_KB", defaults.memory_limit_kb),
            stack_size_limit_kb: env_parse("STACK_SIZE_LIMIT_KB", defaults.stack_size_limit_kb),
            max_file_size_kb: env_parse("MAX_FILE_SIZE_KB", defaults.max_file_size_kb),
            max_processes: env_parse("MAX_PROCESSES", defaults.max_processes),
        };

        let notify = match env::var("NOTIFY_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" | "in_memory" => NotifyBackendConfig::InMemory,
            "redis" => NotifyBackendConfig::Redis {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                channel_prefix: env::var("REDIS_CHANNEL_PREFIX")
                    .unwrap_or_else(|_| "challenge:live".to_string()),
            },
            other => return Err(anyhow!("unsupported NOTIFY_BACKEND: {other}")),
        };

        let watchdog = WatchdogConfig {
            timeout: Duration::from_secs(env_parse("WATCHDOG_TIMEOUT_SECS", 120u64).max(1)),
            interval: Duration::from_secs(env_parse("WATCHDOG_INTERVAL_SECS", 15u64).max(1)),
        };

        let secret_key = env::var("SECRET_KEY").context("SECRET_KEY must be set")?;
        if secret_key.trim().is_empty() {
            return Err(anyhow!("SECRET_KEY must not be empty"));
        }

        Ok(Self {
            bind_addr,
            secret_key,
            sandbox,
            limits,
            max_code_bytes: env_parse("MAX_CODE_BYTES", 64 * 1024usize),
            notify,
            watchdog,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env_parse("LOG_FORMAT", LogFormat::Json),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
