//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{
    CliArgs, Command, CommonOverrides, FlushArgs, PurgeArgs, ServeArgs, SnapshotArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cachegate";
const ENV_PREFIX: &str = "CACHEGATE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_SITE_HOME: &str = "http://localhost";
const DEFAULT_POLICY_FILE: &str = "data/policy.json";
const DEFAULT_SNAPSHOT_FILE: &str = "pre-load/config.toml";
const DEFAULT_SCRATCH_DIR: &str = "data/flushed";
const DEFAULT_PROXY_ADDRESS: &str = "http://127.0.0.1:6081";
const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MEMORY_LIMIT: usize = 1024;
const DEFAULT_FILESYSTEM_DIR: &str = "data/pages";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub policy: PolicySettings,
    pub scratch: ScratchSettings,
    pub proxy: ProxySettings,
    pub memory: MemorySettings,
    pub filesystem: FilesystemSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Home URL without a trailing slash.
    pub home: String,
}

#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub file: PathBuf,
    /// `None` disables the bootstrap snapshot.
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ScratchSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub enabled: bool,
    pub address: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct FilesystemSettings {
    pub enabled: bool,
    pub directory: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_common_overrides(&cli.overrides);
    if let Some(Command::Serve(args)) = cli.command.as_ref() {
        raw.apply_serve_overrides(args);
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    policy: RawPolicySettings,
    scratch: RawScratchSettings,
    proxy: RawProxySettings,
    memory: RawMemorySettings,
    filesystem: RawFilesystemSettings,
}

impl RawSettings {
    fn apply_common_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(home) = overrides.site_home.as_ref() {
            self.site.home = Some(home.clone());
        }
        if let Some(address) = overrides.proxy_address.as_ref() {
            self.proxy.address = Some(address.clone());
        }
        if let Some(file) = overrides.policy_file.as_ref() {
            self.policy.file = Some(file.clone());
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeArgs) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            site,
            policy,
            scratch,
            proxy,
            memory,
            filesystem,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            site: build_site_settings(site)?,
            policy: build_policy_settings(policy),
            scratch: ScratchSettings {
                directory: scratch
                    .directory
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR)),
            },
            proxy: build_proxy_settings(proxy)?,
            memory: build_memory_settings(memory)?,
            filesystem: FilesystemSettings {
                enabled: filesystem.enabled.unwrap_or(true),
                directory: filesystem
                    .directory
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FILESYSTEM_DIR)),
            },
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;
    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let home = site
        .home
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SITE_HOME.to_string());
    let parsed = Url::parse(&home)
        .map_err(|err| LoadError::invalid("site.home", format!("invalid url `{home}`: {err}")))?;
    if !parsed.has_host() {
        return Err(LoadError::invalid("site.home", "url must include a host"));
    }

    Ok(SiteSettings {
        home: home.trim_end_matches('/').to_string(),
    })
}

fn build_policy_settings(policy: RawPolicySettings) -> PolicySettings {
    let snapshot = match policy.snapshot {
        Some(path) if path.as_os_str().is_empty() => None,
        Some(path) => Some(path),
        None => Some(PathBuf::from(DEFAULT_SNAPSHOT_FILE)),
    };
    PolicySettings {
        file: policy
            .file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_POLICY_FILE)),
        snapshot,
    }
}

fn build_proxy_settings(proxy: RawProxySettings) -> Result<ProxySettings, LoadError> {
    let address = proxy
        .address
        .unwrap_or_else(|| DEFAULT_PROXY_ADDRESS.to_string());
    Url::parse(&address).map_err(|err| {
        LoadError::invalid("proxy.address", format!("invalid url `{address}`: {err}"))
    })?;

    let timeout_secs = proxy.timeout_seconds.unwrap_or(DEFAULT_PROXY_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "proxy.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ProxySettings {
        enabled: proxy.enabled.unwrap_or(true),
        address,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_memory_settings(memory: RawMemorySettings) -> Result<MemorySettings, LoadError> {
    let limit = memory.limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
    let limit = NonZeroUsize::new(limit)
        .ok_or_else(|| LoadError::invalid("memory.limit", "must be greater than zero"))?;
    Ok(MemorySettings { limit })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    home: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPolicySettings {
    file: Option<PathBuf>,
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawScratchSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProxySettings {
    enabled: Option<bool>,
    address: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMemorySettings {
    limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFilesystemSettings {
    enabled: Option<bool>,
    directory: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
