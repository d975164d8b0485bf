use anyhow::{ensure, Context, Result};
use axum::http::HeaderValue;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "chatty-server", author, version, about = "Chatty event gateway")]
pub struct Cli {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Port to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "CHATTY_PORT")]
    pub port: u16,

    /// Runtime environment tag (development | production).
    #[arg(long, env = "CHATTY_ENV")]
    pub environment: String,

    /// Token-signing secret.
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    /// First session-signing secret.
    #[arg(long, env = "SECRET_KEY_ONE")]
    pub secret_key_one: String,

    /// Second session-signing secret.
    #[arg(long, env = "SECRET_KEY_TWO")]
    pub secret_key_two: String,

    /// Allowed client origin for CORS.
    #[arg(long, env = "CLIENT_URL")]
    pub client_url: String,

    /// Redis connection URI used as the cross-process event broker.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: String,
}

/// Immutable runtime configuration, constructed and validated exactly once
/// at startup. Every required setting is a required argument, so a missing
/// environment variable fails the process before any dependency is touched.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub environment: String,
    pub jwt_secret: String,
    pub secret_key_one: String,
    pub secret_key_two: String,
    pub client_origin: HeaderValue,
    pub redis_url: String,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        ensure!(!cli.jwt_secret.is_empty(), "JWT_SECRET must not be empty");
        ensure!(
            !cli.secret_key_one.is_empty() && !cli.secret_key_two.is_empty(),
            "session-signing secrets must not be empty"
        );
        let client_origin = cli
            .client_url
            .parse::<HeaderValue>()
            .with_context(|| format!("invalid client origin: {}", cli.client_url))?;
        Ok(Config {
            database_url: cli.database_url,
            port: cli.port,
            environment: cli.environment,
            jwt_secret: cli.jwt_secret,
            secret_key_one: cli.secret_key_one,
            secret_key_two: cli.secret_key_two,
            client_origin,
            redis_url: cli.redis_url,
        })
    }
}
