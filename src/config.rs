use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstreams classified as trusted or untrusted by the domestic CIDR table.
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Upstreams that are always trusted, wherever they are located.
    #[serde(default)]
    pub trusted_servers: Vec<String>,

    #[serde(default = "default_udp_max_bytes")]
    pub udp_max_bytes: u16,
    #[serde(default)]
    pub force_tcp: bool,
    #[serde(default)]
    pub mutation: bool,
    #[serde(default = "default_bidirectional")]
    pub bidirectional: bool,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    #[serde(default = "default_test_domains")]
    pub test_domains: Vec<String>,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_sec: u64,

    #[serde(default = "default_chn_list")]
    pub chn_list: Option<String>,
    #[serde(default)]
    pub ip_blacklist: Option<String>,
    #[serde(default)]
    pub domain_blacklist: Option<String>,
    #[serde(default)]
    pub domain_polluted: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_enable")]
    pub enable: bool,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_enable")]
    pub enable: bool,
    #[serde(default = "default_log_interval")]
    pub log_interval_seconds: u64,
}

// Defaults
fn default_host() -> String {
    "::".to_string()
}
fn default_port() -> u16 {
    53
}
fn default_servers() -> Vec<String> {
    vec!["119.29.29.29:53".to_string(), "114.114.114.114:53".to_string()]
}
fn default_udp_max_bytes() -> u16 {
    4096
}
fn default_bidirectional() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_delay_ms() -> u64 {
    100
}
fn default_test_domains() -> Vec<String> {
    vec!["qq.com".to_string(), "163.com".to_string()]
}
fn default_health_check_interval() -> u64 {
    60
}
fn default_chn_list() -> Option<String> {
    Some("./china.list".to_string())
}
fn default_log_enable() -> bool {
    true
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_stats_enable() -> bool {
    true
}
fn default_log_interval() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            servers: default_servers(),
            trusted_servers: vec![],
            udp_max_bytes: default_udp_max_bytes(),
            force_tcp: false,
            mutation: false,
            bidirectional: default_bidirectional(),
            timeout_ms: default_timeout_ms(),
            delay_ms: default_delay_ms(),
            test_domains: default_test_domains(),
            health_check_interval_sec: default_health_check_interval(),
            chn_list: default_chn_list(),
            ip_blacklist: None,
            domain_blacklist: None,
            domain_polluted: None,
            logging: LoggingConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable: default_log_enable(),
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enable: default_stats_enable(),
            log_interval_seconds: default_log_interval(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config TOML")?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Address the DNS listener binds to.
    pub fn listen_addr(&self) -> Result<std::net::SocketAddr> {
        let ip: std::net::IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid listen host {}", self.host))?;
        Ok(std::net::SocketAddr::new(ip, self.port))
    }
}

/// Parses an upstream address, appending the default DNS port when it carries none.
pub fn parse_server_addr(addr: &str) -> Result<std::net::SocketAddr> {
    let addr = addr.trim();
    if let Ok(sa) = addr.parse::<std::net::SocketAddr>() {
        return Ok(sa);
    }
    let ip: std::net::IpAddr = addr
        .parse()
        .with_context(|| format!("Invalid upstream server address {}", addr))?;
    Ok(std::net::SocketAddr::new(ip, 53))
}
