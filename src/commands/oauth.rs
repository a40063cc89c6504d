//! Usage: `oauth-*` command handlers.

use super::{CommandContext, CommandOutput};
use crate::app::cli::{AuthorizeArgs, ExchangeArgs, LoginArgs, StartArgs};
use crate::domain::token_bundle::TokenBundle;
use crate::oauth::authorize::{open_browser, AuthorizationRequest, OwnerScope};
use crate::oauth::callback_server::{
    parse_loopback_redirect, parse_redirect_url, CallbackListener, CallbackResult,
};
use crate::oauth::refresh::{ensure_fresh, force_refresh, needs_refresh};
use crate::oauth::token_exchange::TokenExchangeClient;
use crate::shared::blocking;
use crate::shared::error::AppResult;
use crate::shared::time::now_utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn token_client(
    ctx: &CommandContext,
    redirect_override: Option<&str>,
) -> AppResult<(TokenExchangeClient, String)> {
    let credentials = ctx.credentials(redirect_override)?;
    let client = TokenExchangeClient::new(&ctx.settings.endpoints.token_url, &credentials)?;
    Ok((client, credentials.redirect_uri))
}

fn bundle_summary(ctx: &CommandContext, bundle: &TokenBundle) -> serde_json::Map<String, Value> {
    let mut out = serde_json::Map::new();
    out.insert("ok".into(), json!(true));
    out.insert("store_mode".into(), json!(ctx.token_store.mode().as_str()));
    out.insert(
        "workspace_name".into(),
        json!(bundle.workspace_name.clone().unwrap_or_default()),
    );
    out.insert(
        "workspace_id".into(),
        json!(bundle.workspace_id.clone().unwrap_or_default()),
    );
    out.insert(
        "owner_type".into(),
        json!(bundle.owner_type().unwrap_or_default()),
    );
    out.insert(
        "has_refresh_token".into(),
        json!(bundle.refresh_token().is_some()),
    );
    out.insert("expires_at".into(), json!(bundle.expires_at_iso()));
    out
}

async fn save_bundle(ctx: &CommandContext, bundle: &TokenBundle) -> AppResult<()> {
    let store = Arc::clone(&ctx.token_store);
    let bundle = bundle.clone();
    blocking::run("token_store.save", move || store.save(&bundle)).await
}

/// Builds the authorization request and persists its `state` unless disabled.
async fn prepare_authorization(
    ctx: &CommandContext,
    args: &AuthorizeArgs,
    client_id: &str,
    redirect_uri: &str,
) -> AppResult<AuthorizationRequest> {
    let owner: OwnerScope = args.owner.parse()?;
    let request = AuthorizationRequest::build(
        &ctx.settings.endpoints.authorize_url,
        client_id,
        redirect_uri,
        owner,
        args.state.as_deref(),
    )?;
    if !args.no_store_state {
        let state_store = ctx.state_store.clone();
        let doc = request.persisted_state();
        blocking::run("state_store.save", move || state_store.save(&doc)).await?;
    }
    Ok(request)
}

pub async fn oauth_start(ctx: &CommandContext, args: &StartArgs) -> AppResult<CommandOutput> {
    let args = &args.authorize;
    let credentials = ctx.credentials(args.redirect_uri.as_deref())?;
    let request =
        prepare_authorization(ctx, args, &credentials.client_id, &credentials.redirect_uri).await?;

    if args.json {
        return Ok(CommandOutput::Json(json!({
            "authorization_url": request.url,
            "state": request.state,
            "redirect_uri": request.redirect_uri,
            "owner": request.owner.as_str(),
            "state_saved": !args.no_store_state,
            "store_mode": ctx.token_store.mode().as_str(),
        })));
    }

    Ok(CommandOutput::Text(format!(
        "Open this URL in your browser and approve access:\n{}\n\nState: {}\nRedirect URI: {}\nAfter redirect, run oauth-exchange with --redirect-url or --code.",
        request.url, request.state, request.redirect_uri
    )))
}

pub async fn oauth_login(ctx: &CommandContext, args: &LoginArgs) -> AppResult<CommandOutput> {
    let authorize = &args.authorize;
    let credentials = ctx.credentials(authorize.redirect_uri.as_deref())?;
    let redirect = parse_loopback_redirect(&credentials.redirect_uri)?;
    let request = prepare_authorization(
        ctx,
        authorize,
        &credentials.client_id,
        &credentials.redirect_uri,
    )
    .await?;

    // Listen before the browser can possibly redirect back.
    let listener = CallbackListener::bind(redirect).await?;

    let opened = if args.no_open {
        false
    } else {
        match open_browser(&request.url) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("could not open browser: {}", err);
                false
            }
        }
    };
    if !authorize.json {
        if opened {
            eprintln!("Opened browser for Notion OAuth authorization.");
        } else {
            eprintln!("Could not auto-open browser. Open this URL manually:");
            eprintln!("{}", request.url);
        }
        eprintln!(
            "Waiting for callback at {} (timeout: {}s)...",
            request.redirect_uri, args.timeout
        );
    }

    let grant = listener
        .wait(Some(request.state.as_str()), Duration::from_secs(args.timeout))
        .await?;
    let client = TokenExchangeClient::new(&ctx.settings.endpoints.token_url, &credentials)?;
    let bundle = client
        .exchange_code(&grant.code, &credentials.redirect_uri)
        .await?;
    save_bundle(ctx, &bundle).await?;

    let mut out = bundle_summary(ctx, &bundle);
    out.insert("mode".into(), json!("oauth_login"));
    out.insert("opened_browser".into(), json!(opened));
    out.insert(
        "authorization_url".into(),
        json!(if authorize.json { request.url.as_str() } else { "" }),
    );
    Ok(CommandOutput::Json(Value::Object(out)))
}

pub async fn oauth_exchange(
    ctx: &CommandContext,
    args: &ExchangeArgs,
) -> AppResult<CommandOutput> {
    let from_url = match args.redirect_url.as_deref() {
        Some(url) => parse_redirect_url(url)?,
        None => CallbackResult::default(),
    };
    let explicit_code = args
        .code
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let callback = CallbackResult {
        code: explicit_code.or(from_url.code),
        ..from_url
    };
    if callback.error.is_none() && callback.code.is_none() {
        return Err("INVALID_INPUT: Missing OAuth code. Provide --code or --redirect-url.".into());
    }

    // A bare --code carries no state to compare against.
    let expected_state = if args.skip_state_check || callback.state.is_none() {
        None
    } else if let Some(state) = args.state.clone() {
        Some(state)
    } else {
        let state_store = ctx.state_store.clone();
        blocking::run("state_store.load", move || state_store.load())
            .await?
            .and_then(|doc| doc.expected_state().map(str::to_string))
    };
    let grant = callback.validate(expected_state.as_deref())?;

    let (client, redirect_uri) = token_client(ctx, args.redirect_uri.as_deref())?;
    let bundle = client.exchange_code(&grant.code, &redirect_uri).await?;
    save_bundle(ctx, &bundle).await?;

    Ok(CommandOutput::Json(Value::Object(bundle_summary(ctx, &bundle))))
}

pub async fn oauth_refresh(ctx: &CommandContext) -> AppResult<CommandOutput> {
    let (client, _) = token_client(ctx, None)?;
    let bundle = force_refresh(Arc::clone(&ctx.token_store), &client).await?;

    let mut out = bundle_summary(ctx, &bundle);
    out.remove("owner_type");
    Ok(CommandOutput::Json(Value::Object(out)))
}

/// Stored bundle, refreshed when near expiry. Credentials are only required for a refresh.
pub(super) async fn load_fresh_bundle(ctx: &CommandContext) -> AppResult<Option<TokenBundle>> {
    let store = Arc::clone(&ctx.token_store);
    let Some(bundle) = blocking::run("token_store.load", move || store.load()).await? else {
        return Ok(None);
    };
    if !needs_refresh(&bundle, now_utc()) || bundle.refresh_token().is_none() {
        return Ok(Some(bundle));
    }
    let (client, _) = token_client(ctx, None)?;
    ensure_fresh(Arc::clone(&ctx.token_store), &client, bundle)
        .await
        .map(Some)
}

pub async fn oauth_token(ctx: &CommandContext) -> AppResult<CommandOutput> {
    let bundle = load_fresh_bundle(ctx).await?.ok_or(
        "TOKEN_MISSING: No stored OAuth token. Run oauth-login or oauth-start/oauth-exchange first.",
    )?;
    Ok(CommandOutput::Text(bundle.access_token))
}
