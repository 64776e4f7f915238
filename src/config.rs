use std::fmt::Display;
use std::str::FromStr;

// Startup configuration. Secrets are mandatory on purpose: no inline
// fallback literals for JWT or gateway credentials.
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub portone_api_key: String,
    pub portone_api_secret: String,
    pub portone_base_url: String,
    pub port: u16,
    pub max_connection_pooling: u32,
    pub log_file: String,
}

impl Config {
    pub fn load() -> Result<Self, String> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            jwt_secret: require("JWT_SECRET")?,
            portone_api_key: require("PORTONE_API_KEY")?,
            portone_api_secret: require("PORTONE_API_SECRET")?,
            portone_base_url: optional("PORTONE_BASE_URL", "https://api.iamport.kr")?,
            port: optional("PORT", "3000")?,
            max_connection_pooling: optional("MAX_CONNECTION_POOLING", "5")?,
            log_file: optional("LOG_FILE", "app.log")?,
        })
    }
}

fn require(key: &str) -> Result<String, String> {
    dotenv::var(key).map_err(|_| format!("{key} must be set"))
}

fn optional<T: FromStr>(key: &str, default: &str) -> Result<T, String>
where
    T::Err: Display,
{
    dotenv::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|err| format!("invalid {key}: {err}"))
}
