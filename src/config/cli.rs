use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the cachegate binary.
#[derive(Debug, Parser)]
#[command(
    name = "cachegate",
    version,
    about = "Cache policy enforcement and invalidation"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CACHEGATE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CommonOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the admin HTTP service.
    Serve(ServeArgs),
    /// Purge one or more cache keys through the active driver.
    Purge(PurgeArgs),
    /// Flush the whole site from the active driver.
    Flush(FlushArgs),
    /// List registered drivers and whether they are reachable.
    Drivers,
    /// Rewrite the configuration snapshot from the stored policy.
    Snapshot(SnapshotArgs),
}

/// Overrides accepted by every command.
#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the site home URL used for wildcard flushes and labels.
    #[arg(long = "site-home", value_name = "URL", global = true)]
    pub site_home: Option<String>,

    /// Override the reverse proxy address.
    #[arg(long = "proxy-address", value_name = "URL", global = true)]
    pub proxy_address: Option<String>,

    /// Override the policy file location.
    #[arg(long = "policy-file", value_name = "PATH", global = true)]
    pub policy_file: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    /// Override the admin listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the admin listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    /// Keys to purge; a trailing `*` purges by prefix.
    #[arg(value_name = "KEY", required = true)]
    pub keys: Vec<String>,

    /// Record the purge in this actor's flushed-pages queue.
    #[arg(long, value_name = "ID")]
    pub actor: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FlushArgs {
    /// Record the flush in this actor's flushed-pages queue.
    #[arg(long, value_name = "ID")]
    pub actor: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SnapshotArgs {
    /// Write a disabled snapshot instead.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub disable: bool,
}
