use crate::{
    api::{
        self,
        cookie::{CookieConfig, SameSite},
    },
    cli::telemetry,
    identity::SessionConfig,
};
use anyhow::{anyhow, Result};
use chrono::Duration;
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub refresh_cookie_name: String,
    pub refresh_cookie_path: String,
    pub refresh_cookie_same_site: String,
    pub refresh_cookie_secure: bool,
    pub frontend_base_url: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, the database is
/// unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let refresh_ttl = Duration::days(args.refresh_token_ttl_days);

    let session_config = SessionConfig::new(args.token_secret)
        .with_issuer(args.token_issuer)
        .with_access_ttl(Duration::minutes(args.access_token_ttl_minutes))
        .with_refresh_ttl(refresh_ttl);

    let same_site: SameSite = args
        .refresh_cookie_same_site
        .parse()
        .map_err(|err: String| anyhow!("Invalid refresh cookie SameSite value: {err}"))?;
    let cookie_config = CookieConfig::new(args.refresh_cookie_name)
        .with_path(args.refresh_cookie_path)
        .with_same_site(same_site)
        .with_secure(args.refresh_cookie_secure)
        .with_max_age(refresh_ttl);

    debug!(?session_config, ?cookie_config, "server configuration");

    let result = api::new(
        args.port,
        args.dsn,
        session_config,
        cookie_config,
        &args.frontend_base_url,
    )
    .await;

    telemetry::shutdown_tracer();

    result
}
