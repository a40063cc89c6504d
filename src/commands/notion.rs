//! Usage: `query-active` and `create-comment` handlers.

use super::oauth::load_fresh_bundle;
use super::{CommandContext, CommandOutput};
use crate::app::cli::{ApiArgs, CreateCommentArgs, QueryActiveArgs};
use crate::infra::settings::expand_home;
use crate::notion::client::{DataSourceQuery, NotionClient};
use crate::notion::pages::{simplify_page, SimplifiedPage};
use crate::shared::blocking;
use crate::shared::error::AppResult;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::Read;

/// Bearer token for downstream calls plus where it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub source: &'static str,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &crate::shared::security::mask_token(&self.token))
            .field("source", &self.source)
            .finish()
    }
}

/// `--access-token`, then `NOTION_API_KEY`, then the stored OAuth bundle (refreshed if due).
pub async fn resolve_access_token(
    ctx: &CommandContext,
    explicit: Option<&str>,
) -> AppResult<AccessToken> {
    if let Some(token) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(AccessToken {
            token: token.to_string(),
            source: "explicit_token",
        });
    }
    if let Some(api_key) = ctx.settings.api_key.as_deref() {
        return Ok(AccessToken {
            token: api_key.to_string(),
            source: "notion_api_key",
        });
    }
    if let Some(bundle) = load_fresh_bundle(ctx).await? {
        return Ok(AccessToken {
            token: bundle.access_token,
            source: "oauth_store",
        });
    }
    Err(
        "TOKEN_MISSING: No query token found. Set NOTION_API_KEY, pass --access-token, or run oauth-login.".into(),
    )
}

async fn api_client(
    ctx: &CommandContext,
    api: &ApiArgs,
) -> AppResult<(NotionClient, &'static str)> {
    let token = resolve_access_token(ctx, api.access_token.as_deref()).await?;
    let version = api
        .notion_version
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ctx.settings.notion_version.as_str());
    let client = NotionClient::new(&ctx.settings.endpoints.api_base, &token.token, version)?;
    Ok((client, token.source))
}

pub async fn query_active(
    ctx: &CommandContext,
    args: &QueryActiveArgs,
) -> AppResult<CommandOutput> {
    let include_statuses = args.include_statuses();
    let active_statuses: HashSet<String> = args.active_statuses().into_iter().collect();
    let (client, source) = api_client(ctx, &args.api).await?;

    let pages = client
        .query_data_source(&DataSourceQuery {
            data_source_id: &args.data_source_id,
            status_property: &args.status_property,
            include_statuses: &include_statuses,
            page_size: args.page_size,
        })
        .await?;

    let simplified: Vec<SimplifiedPage> = pages
        .iter()
        .map(|page| simplify_page(page, &args.status_property, &args.title_property))
        .collect();
    let active: Vec<&SimplifiedPage> = simplified
        .iter()
        .filter(|page| active_statuses.contains(&page.status))
        .collect();
    let blocked: Vec<&SimplifiedPage> = simplified
        .iter()
        .filter(|page| page.status == args.blocked_status)
        .collect();
    let skipped = simplified
        .len()
        .saturating_sub(active.len() + blocked.len());

    Ok(CommandOutput::Json(json!({
        "query_confidence": "high",
        "source": source,
        "data_source_id": args.data_source_id,
        "status_property": args.status_property,
        "counts": {
            "total": simplified.len(),
            "active": active.len(),
            "blocked": blocked.len(),
            "skipped": skipped,
        },
        "active": active,
        "blocked": blocked,
        "all": if args.include_all { json!(simplified) } else { json!([]) },
    })))
}

async fn read_comment_text(args: &CreateCommentArgs) -> AppResult<String> {
    if let Some(text) = args.text.as_ref() {
        return Ok(text.clone());
    }
    if let Some(raw_path) = args.text_file.as_ref() {
        let path = expand_home(&raw_path.to_string_lossy());
        return blocking::run("comment.read_file", move || {
            std::fs::read_to_string(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    format!("INVALID_INPUT: Comment text file not found: {}", path.display())
                } else {
                    format!("INVALID_INPUT: failed to read {}: {e}", path.display())
                }
            })
        })
        .await;
    }
    if args.stdin {
        return blocking::run("comment.read_stdin", || {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map(|_| text)
                .map_err(|e| format!("INVALID_INPUT: failed to read stdin: {e}"))
        })
        .await;
    }
    Ok(String::new())
}

pub async fn create_comment(
    ctx: &CommandContext,
    args: &CreateCommentArgs,
) -> AppResult<CommandOutput> {
    let text = read_comment_text(args).await?;
    if text.trim().is_empty() {
        return Err(
            "INVALID_INPUT: Comment text is empty. Provide --text, --text-file, or --stdin.".into(),
        );
    }

    let (client, source) = api_client(ctx, &args.api).await?;
    let response = client.create_page_comment(&args.page_id, &text).await?;
    let field = |key: &str| {
        response
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(CommandOutput::Json(json!({
        "ok": true,
        "source": source,
        "page_id": args.page_id,
        "comment_id": field("id"),
        "url": field("url"),
    })))
}
