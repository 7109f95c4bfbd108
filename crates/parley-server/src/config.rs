use anyhow::{Context, Result};

/// Server configuration, read from the environment (a `.env` file is
/// loaded first when present).
pub struct Config {
    pub jwt_secret: String,
    pub db_path: String,
    pub host: String,
    pub port: u16,
    pub rate_limit_per_minute: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret =
            std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
        let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
        let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("PARLEY_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("PARLEY_PORT must be a port number")?;
        let rate_limit_per_minute: u32 = std::env::var("PARLEY_RATE_LIMIT_PER_MINUTE")
            .unwrap_or_else(|_| "120".into())
            .parse()
            .context("PARLEY_RATE_LIMIT_PER_MINUTE must be a number")?;

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            rate_limit_per_minute,
        })
    }
}
