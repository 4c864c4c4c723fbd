//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        token_secret: auth_opts.token_secret,
        token_issuer: auth_opts.token_issuer,
        access_token_ttl_minutes: auth_opts.access_token_ttl_minutes,
        refresh_token_ttl_days: auth_opts.refresh_token_ttl_days,
        refresh_cookie_name: auth_opts.cookie.name,
        refresh_cookie_path: auth_opts.cookie.path,
        refresh_cookie_same_site: auth_opts.cookie.same_site,
        refresh_cookie_secure: auth_opts.cookie.secure,
        frontend_base_url: auth_opts.frontend_base_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSN: &str = "postgres://user@localhost:5432/quire";

    #[test]
    fn token_secret_required() {
        temp_env::with_vars(
            [("QUIRE_TOKEN_SECRET", None::<&str>), ("QUIRE_DSN", Some(DSN))],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["quire"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err
                        .to_string()
                        .contains("missing required argument: --token-secret"));
                }
            },
        );
    }

    #[test]
    fn builds_server_action() {
        temp_env::with_vars(
            [
                ("QUIRE_TOKEN_SECRET", Some("0123456789abcdef0123456789abcdef")),
                ("QUIRE_DSN", Some(DSN)),
                ("QUIRE_PORT", Some("9000")),
                ("QUIRE_REFRESH_TOKEN_TTL_DAYS", Some("30")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["quire"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 9000);
                    assert_eq!(args.dsn, DSN);
                    assert_eq!(args.refresh_token_ttl_days, 30);
                    assert_eq!(args.refresh_cookie_same_site, "Strict");
                }
            },
        );
    }
}
