use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_ACCESS_TOKEN_TTL_MINUTES: &str = "access-token-ttl-minutes";
pub const ARG_REFRESH_TOKEN_TTL_DAYS: &str = "refresh-token-ttl-days";
pub const ARG_REFRESH_COOKIE_NAME: &str = "refresh-cookie-name";
pub const ARG_REFRESH_COOKIE_PATH: &str = "refresh-cookie-path";
pub const ARG_REFRESH_COOKIE_SAME_SITE: &str = "refresh-cookie-same-site";
pub const ARG_REFRESH_COOKIE_INSECURE: &str = "refresh-cookie-insecure";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";

/// HS256 keys shorter than the digest size are rejected.
pub const MIN_TOKEN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub name: String,
    pub path: String,
    pub same_site: String,
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub cookie: CookieOptions,
    pub frontend_base_url: String,
}

impl Options {
    /// Parse token and cookie arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or too short.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let token_secret = match matches.get_one::<String>(ARG_TOKEN_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_TOKEN_SECRET}"),
        };
        if token_secret.expose_secret().len() < MIN_TOKEN_SECRET_BYTES {
            anyhow::bail!("--{ARG_TOKEN_SECRET} must be at least {MIN_TOKEN_SECRET_BYTES} bytes");
        }

        let get_string = |id: &str, default: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            token_secret,
            token_issuer: get_string(ARG_TOKEN_ISSUER, "quire"),
            access_token_ttl_minutes: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL_MINUTES)
                .copied()
                .unwrap_or(15),
            refresh_token_ttl_days: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_TTL_DAYS)
                .copied()
                .unwrap_or(7),
            cookie: CookieOptions {
                name: get_string(ARG_REFRESH_COOKIE_NAME, "refreshToken"),
                path: get_string(ARG_REFRESH_COOKIE_PATH, "/v1/auth"),
                same_site: get_string(ARG_REFRESH_COOKIE_SAME_SITE, "Strict"),
                secure: !matches.get_flag(ARG_REFRESH_COOKIE_INSECURE),
            },
            frontend_base_url: get_string(ARG_FRONTEND_BASE_URL, "http://localhost:3000"),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_cookie_args(command);
    command.arg(
        Arg::new(ARG_FRONTEND_BASE_URL)
            .long(ARG_FRONTEND_BASE_URL)
            .help("Frontend base URL allowed by CORS")
            .env("QUIRE_FRONTEND_BASE_URL")
            .default_value("http://localhost:3000"),
    )
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret used to sign access tokens (at least 32 bytes)")
                .env("QUIRE_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer (iss) written into and required from access tokens")
                .env("QUIRE_TOKEN_ISSUER")
                .default_value("quire"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_MINUTES)
                .long(ARG_ACCESS_TOKEN_TTL_MINUTES)
                .help("Access token TTL in minutes")
                .env("QUIRE_ACCESS_TOKEN_TTL_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_DAYS)
                .long(ARG_REFRESH_TOKEN_TTL_DAYS)
                .help("Refresh token TTL in days")
                .env("QUIRE_REFRESH_TOKEN_TTL_DAYS")
                .default_value("7")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REFRESH_COOKIE_NAME)
                .long(ARG_REFRESH_COOKIE_NAME)
                .help("Name of the refresh token cookie")
                .env("QUIRE_REFRESH_COOKIE_NAME")
                .default_value("refreshToken"),
        )
        .arg(
            Arg::new(ARG_REFRESH_COOKIE_PATH)
                .long(ARG_REFRESH_COOKIE_PATH)
                .help("Path attribute of the refresh token cookie")
                .env("QUIRE_REFRESH_COOKIE_PATH")
                .default_value("/v1/auth"),
        )
        .arg(
            Arg::new(ARG_REFRESH_COOKIE_SAME_SITE)
                .long(ARG_REFRESH_COOKIE_SAME_SITE)
                .help("SameSite attribute of the refresh token cookie")
                .env("QUIRE_REFRESH_COOKIE_SAME_SITE")
                .default_value("Strict")
                .value_parser(PossibleValuesParser::new(["Strict", "Lax", "None"])),
        )
        .arg(
            Arg::new(ARG_REFRESH_COOKIE_INSECURE)
                .long(ARG_REFRESH_COOKIE_INSECURE)
                .help("Omit the Secure attribute (plain HTTP development only)")
                .env("QUIRE_REFRESH_COOKIE_INSECURE")
                .action(ArgAction::SetTrue),
        )
}
