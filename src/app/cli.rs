//! Usage: Command-line surface (`clap` derive).

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_STATUS_PROPERTY: &str = "状态";
pub const DEFAULT_TITLE_PROPERTY: &str = "任务";
pub const DEFAULT_BLOCKED_STATUS: &str = "已阻塞";
pub const DEFAULT_INCLUDE_STATUSES: [&str; 5] = ["待办", "队列中", "进行中", "需要更多信息", "已阻塞"];
pub const DEFAULT_ACTIVE_STATUSES: [&str; 4] = ["待办", "队列中", "进行中", "需要更多信息"];

#[derive(Debug, Parser)]
#[command(
    name = "npt",
    version,
    about = "NPT Notion OAuth and data source query helper"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level unless NPT_LOG / RUST_LOG say otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open browser and complete OAuth exchange automatically.
    OauthLogin(LoginArgs),
    /// Generate OAuth authorization URL.
    OauthStart(StartArgs),
    /// Exchange OAuth code for token bundle.
    OauthExchange(ExchangeArgs),
    /// Refresh stored OAuth token.
    OauthRefresh,
    /// Print valid access token from store.
    OauthToken,
    /// Query a data source for tasks in the tracked statuses.
    QueryActive(QueryActiveArgs),
    /// Create a page comment via comments API.
    CreateComment(CreateCommentArgs),
}

#[derive(Debug, Clone, Args)]
pub struct AuthorizeArgs {
    /// OAuth owner value: user or workspace.
    #[arg(long, default_value = "user")]
    pub owner: String,

    /// Override redirect URI.
    #[arg(long)]
    pub redirect_uri: Option<String>,

    /// Explicit state value.
    #[arg(long)]
    pub state: Option<String>,

    /// Do not persist generated state.
    #[arg(long, default_value_t = false)]
    pub no_store_state: bool,

    /// Output JSON only.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct StartArgs {
    #[command(flatten)]
    pub authorize: AuthorizeArgs,
}

#[derive(Debug, Clone, Args)]
pub struct LoginArgs {
    #[command(flatten)]
    pub authorize: AuthorizeArgs,

    /// Callback wait timeout in seconds.
    #[arg(
        long,
        default_value_t = DEFAULT_OAUTH_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(10..)
    )]
    pub timeout: u64,

    /// Do not auto-open browser.
    #[arg(long, default_value_t = false)]
    pub no_open: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ExchangeArgs {
    /// Authorization code.
    #[arg(long)]
    pub code: Option<String>,

    /// Full redirect URL containing code/state.
    #[arg(long)]
    pub redirect_url: Option<String>,

    /// Expected state override.
    #[arg(long)]
    pub state: Option<String>,

    /// Override redirect URI.
    #[arg(long)]
    pub redirect_uri: Option<String>,

    /// Skip state validation.
    #[arg(long, default_value_t = false)]
    pub skip_state_check: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ApiArgs {
    /// Notion-Version header.
    #[arg(long)]
    pub notion_version: Option<String>,

    /// Explicit bearer token.
    #[arg(long)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct QueryActiveArgs {
    /// Notion data source UUID.
    #[arg(long)]
    pub data_source_id: String,

    /// Status property name.
    #[arg(long, default_value = DEFAULT_STATUS_PROPERTY)]
    pub status_property: String,

    /// Title property name.
    #[arg(long, default_value = DEFAULT_TITLE_PROPERTY)]
    pub title_property: String,

    /// Status to include (repeatable).
    #[arg(long = "include-statuses")]
    pub include_statuses: Vec<String>,

    /// Statuses treated as active (repeatable).
    #[arg(long = "active-statuses")]
    pub active_statuses: Vec<String>,

    /// Blocked status label.
    #[arg(long, default_value = DEFAULT_BLOCKED_STATUS)]
    pub blocked_status: String,

    /// Query page size (1-100).
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub page_size: u8,

    /// Include complete simplified result list under `all`.
    #[arg(long, default_value_t = false)]
    pub include_all: bool,

    #[command(flatten)]
    pub api: ApiArgs,
}

impl QueryActiveArgs {
    pub fn include_statuses(&self) -> Vec<String> {
        or_defaults(&self.include_statuses, &DEFAULT_INCLUDE_STATUSES)
    }

    pub fn active_statuses(&self) -> Vec<String> {
        or_defaults(&self.active_statuses, &DEFAULT_ACTIVE_STATUSES)
    }
}

fn or_defaults(given: &[String], defaults: &[&str]) -> Vec<String> {
    if given.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        given.to_vec()
    }
}

#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("comment_source")
        .required(true)
        .args(["text", "text_file", "stdin"])
))]
pub struct CreateCommentArgs {
    /// Notion page UUID.
    #[arg(long)]
    pub page_id: String,

    /// Comment content.
    #[arg(long)]
    pub text: Option<String>,

    /// Read comment content from file.
    #[arg(long)]
    pub text_file: Option<PathBuf>,

    /// Read comment content from stdin.
    #[arg(long, default_value_t = false)]
    pub stdin: bool,

    #[command(flatten)]
    pub api: ApiArgs,
}
