use crate::dns::constants::DEFAULT_DNS_PORT;
use crate::error::ConfigError;
use crate::issuer;
use chrono::{DateTime, Utc};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Nameservers used when the system configuration lists none.
pub const FALLBACK_NAMESERVERS: [&str; 2] = [
    "google-public-dns-a.google.com:53",
    "google-public-dns-b.google.com:53",
];

const RESOLV_CONF: &str = "/etc/resolv.conf";

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Recursive nameservers, always in `host:port` form
    pub nameservers: Vec<String>,

    /// Timeout for a single query exchange with one nameserver
    pub timeout: Duration,

    /// Send every query over TCP instead of trying UDP first
    pub tcp_only: bool,

    /// Port appended to authoritative nameserver names discovered via NS
    pub authoritative_port: u16,

    /// Remember zone apexes until their SOA TTL runs out
    pub cache_zone_apex: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            nameservers: FALLBACK_NAMESERVERS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(10),
            tcp_only: false,
            authoritative_port: DEFAULT_DNS_PORT,
            cache_zone_apex: false,
        }
    }
}

impl ResolverConfig {
    /// Resolver configuration for the given nameservers with default settings.
    pub fn with_nameservers<S: AsRef<str>>(nameservers: &[S]) -> Self {
        Self {
            nameservers: nameservers.iter().map(|ns| normalize_nameserver(ns.as_ref())).collect(),
            ..Default::default()
        }
    }

    /// Nameservers from `/etc/resolv.conf`, falling back to public resolvers.
    pub fn from_system() -> Self {
        match read_resolv_conf(RESOLV_CONF) {
            Ok(nameservers) if !nameservers.is_empty() => Self {
                nameservers,
                ..Default::default()
            },
            Ok(_) => {
                debug!("No nameservers in {}, using fallback servers", RESOLV_CONF);
                Self::default()
            }
            Err(e) => {
                warn!("Failed to read {}: {}, using fallback servers", RESOLV_CONF, e);
                Self::default()
            }
        }
    }

    /// Create a ResolverConfig from environment variables, starting from the
    /// system configuration. Returns Err if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_system();

        if let Ok(nameservers) = std::env::var("DNS_PERSIST_NAMESERVERS") {
            let servers: Vec<String> = nameservers
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(normalize_nameserver)
                .collect();
            if servers.is_empty() {
                return Err(ConfigError::InvalidNameserver(
                    "No valid nameservers provided".to_string(),
                ));
            }
            config.nameservers = servers;
        }

        if let Ok(timeout_str) = std::env::var("DNS_PERSIST_DNS_TIMEOUT") {
            config.timeout = parse_seconds(&timeout_str)?;
        }

        if let Ok(tcp_only) = std::env::var("DNS_PERSIST_TCP_ONLY") {
            config.tcp_only = parse_bool(&tcp_only, false);
        }

        if let Ok(port) = std::env::var("DNS_PERSIST_AUTHORITATIVE_PORT") {
            config.authoritative_port = port.parse::<u16>().map_err(|_| {
                ConfigError::ParseError(format!("Invalid authoritative port: {}", port))
            })?;
        }

        if let Ok(cache) = std::env::var("DNS_PERSIST_CACHE_ZONE_APEX") {
            config.cache_zone_apex = parse_bool(&cache, false);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and put every nameserver in `host:port` form.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.nameservers.is_empty() {
            return Err(ConfigError::InvalidNameserver(
                "At least one nameserver is required".to_string(),
            ));
        }
        for ns in &mut self.nameservers {
            if ns.trim().is_empty() {
                return Err(ConfigError::InvalidNameserver(
                    "Nameserver must not be empty".to_string(),
                ));
            }
            *ns = normalize_nameserver(ns);
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if self.timeout.as_secs() > 300 {
            return Err(ConfigError::InvalidTimeout(
                "Timeout too large (max 300 seconds)".to_string(),
            ));
        }

        if self.authoritative_port == 0 {
            return Err(ConfigError::ParseError(
                "Authoritative port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    /// Account URI bound into the issue-value
    pub account_uri: String,

    /// Operator-pinned issuer-domain-name; normalized by `validate`
    pub issuer_domain_name: Option<String>,

    /// Optional persistUntil cutoff written into and required of the record
    pub persist_until: Option<DateTime<Utc>>,

    /// Upper bound on the propagation wait
    pub propagation_timeout: Duration,

    /// Delay between propagation checks
    pub polling_interval: Duration,

    /// Require every recursive nameserver to observe the record
    pub require_recursive: bool,

    /// Require every authoritative nameserver to observe the record
    pub require_authoritative: bool,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            account_uri: String::new(),
            issuer_domain_name: None,
            persist_until: None,
            propagation_timeout: Duration::from_secs(60),
            polling_interval: Duration::from_secs(2),
            require_recursive: false,
            require_authoritative: true,
        }
    }
}

impl ChallengeConfig {
    /// Create a ChallengeConfig from environment variables
    /// Returns Err if critical configuration is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(account_uri) = std::env::var("DNS_PERSIST_ACCOUNT_URI") {
            config.account_uri = account_uri.trim().to_string();
        }

        if let Ok(issuer) = std::env::var("DNS_PERSIST_ISSUER_DOMAIN_NAME") {
            if !issuer.trim().is_empty() {
                config.issuer_domain_name = Some(issuer);
            }
        }

        if let Ok(persist_until) = std::env::var("DNS_PERSIST_PERSIST_UNTIL") {
            let seconds = persist_until
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidPersistUntil(persist_until.clone()))?;
            config.persist_until = Some(
                DateTime::from_timestamp(seconds, 0)
                    .ok_or(ConfigError::InvalidPersistUntil(persist_until))?,
            );
        }

        if let Ok(timeout) = std::env::var("DNS_PERSIST_PROPAGATION_TIMEOUT") {
            config.propagation_timeout = parse_seconds(&timeout)?;
        }

        if let Ok(interval) = std::env::var("DNS_PERSIST_POLLING_INTERVAL") {
            config.polling_interval = parse_seconds(&interval)?;
        }

        if let Ok(recursive) = std::env::var("DNS_PERSIST_REQUIRE_RECURSIVE") {
            config.require_recursive = parse_bool(&recursive, false);
        }

        if let Ok(authoritative) = std::env::var("DNS_PERSIST_REQUIRE_AUTHORITATIVE") {
            config.require_authoritative = parse_bool(&authoritative, true);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate every field in one pass, normalizing the pinned issuer.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if let Some(issuer) = &self.issuer_domain_name {
            self.issuer_domain_name = Some(issuer::normalize_user_supplied(issuer)?);
        }

        if self.propagation_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "Propagation timeout must be greater than 0".to_string(),
            ));
        }
        if self.polling_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "Polling interval must be greater than 0".to_string(),
            ));
        }
        if self.polling_interval > self.propagation_timeout {
            return Err(ConfigError::InvalidTimeout(format!(
                "Polling interval {:?} exceeds propagation timeout {:?}",
                self.polling_interval, self.propagation_timeout
            )));
        }

        Ok(())
    }
}

/// Give a nameserver an explicit port, defaulting to 53.
///
/// Accepts `host`, `host:port`, bare IPv4/IPv6 addresses and `[v6]:port`.
pub fn normalize_nameserver(nameserver: &str) -> String {
    let nameserver = nameserver.trim();
    if nameserver.parse::<SocketAddr>().is_ok() {
        return nameserver.to_string();
    }
    if let Ok(ip) = nameserver.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_DNS_PORT).to_string();
    }
    match nameserver.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            nameserver.to_string()
        }
        _ => format!("{}:{}", nameserver, DEFAULT_DNS_PORT),
    }
}

/// Collect `nameserver` entries from a resolv.conf style file.
pub fn read_resolv_conf(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    Ok(parse_resolv_conf(&content))
}

fn parse_resolv_conf(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split(['#', ';']).next().unwrap_or_default())
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("nameserver"), Some(addr)) => Some(normalize_nameserver(addr)),
                _ => None,
            }
        })
        .collect()
}

fn parse_seconds(value: &str) -> Result<Duration, ConfigError> {
    let seconds = value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidTimeout(value.to_string()))?;
    if seconds == 0 {
        return Err(ConfigError::InvalidTimeout(
            "Timeout must be greater than 0".to_string(),
        ));
    }
    Ok(Duration::from_secs(seconds))
}

/// Parse a boolean from a string, with a default value for invalid input
fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}
