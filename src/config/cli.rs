use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::domain::types::Scope;

/// Command-line arguments for the fireledger binary.
#[derive(Debug, Parser)]
#[command(name = "fireledger", version, about = "FIRE dashboard and shared ledger client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FIRELEDGER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the API base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Override the API bearer token.
    #[arg(long = "api-token", env = "FIRELEDGER_API_TOKEN", value_name = "TOKEN", global = true)]
    pub api_token: Option<String>,

    /// Override the request timeout.
    #[arg(long = "api-timeout-seconds", value_name = "SECONDS", global = true)]
    pub api_timeout_seconds: Option<u64>,

    /// Override the preferences file location.
    #[arg(long = "preferences-file", value_name = "PATH", global = true)]
    pub preferences_file: Option<PathBuf>,

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

    /// Toggle batched consumption of invalidation events.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Inspect or change the active view scope.
    Scope(ScopeArgs),
    /// Inspect family membership.
    Family(FamilyArgs),
    /// FIRE assets.
    Assets(AssetsArgs),
    /// Income and expense flows.
    Flows(FlowsArgs),
    /// Shared expense ledgers.
    Ledgers(LedgersArgs),
    /// Ledger expenses.
    Expenses(ExpensesArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ScopeArgs {
    #[command(subcommand)]
    pub command: ScopeCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ScopeCommand {
    /// Print the active scope and membership.
    Show,
    /// Switch the active scope.
    Set {
        #[arg(value_parser = parse_scope)]
        scope: Scope,
    },
}

#[derive(Debug, Args, Clone)]
pub struct FamilyArgs {
    #[command(subcommand)]
    pub command: FamilyCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum FamilyCommand {
    /// Print the caller's family, if any.
    Show,
}

#[derive(Debug, Args, Clone)]
pub struct AssetsArgs {
    #[command(subcommand)]
    pub command: AssetsCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum AssetsCommand {
    /// List assets in the active scope.
    List,
}

#[derive(Debug, Args, Clone)]
pub struct FlowsArgs {
    #[command(subcommand)]
    pub command: FlowsCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum FlowsCommand {
    /// List flows in the active scope.
    List {
        /// Only flows linked to this asset.
        #[arg(long = "asset-id", value_name = "ID")]
        asset_id: Option<String>,
    },
    /// Monthly flow totals in the active scope.
    Stats,
}

#[derive(Debug, Args, Clone)]
pub struct LedgersArgs {
    #[command(subcommand)]
    pub command: LedgersCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum LedgersCommand {
    /// List ledgers the caller belongs to.
    List,
}

#[derive(Debug, Args, Clone)]
pub struct ExpensesArgs {
    #[command(subcommand)]
    pub command: ExpensesCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ExpensesCommand {
    /// Expense totals for one ledger.
    Stats {
        #[arg(long = "ledger-id", value_name = "ID")]
        ledger_id: String,
    },
}

fn parse_scope(value: &str) -> Result<Scope, String> {
    value.parse().map_err(|err: crate::domain::types::UnknownScope| err.to_string())
}
