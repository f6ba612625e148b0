use std::{fmt::Display, str::FromStr};

use tracing::info;

pub const DEFAULT_DB_HOST: &str = "cluster0.knw8z6m.mongodb.net";
pub const DEFAULT_DB_NAME: &str = "profastDB";
pub const DEFAULT_GATEWAY_URL: &str = "https://api.stripe.com";
pub const DEFAULT_PORT: &str = "5000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MongoSource {
    Uri(String),
    Atlas {
        user: String,
        password: String,
        host: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo: MongoSource,
    pub database_name: String,
    pub gateway_key: String,
    pub gateway_url: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));

        let mongo = match lookup("MONGODB_URI") {
            Some(uri) => MongoSource::Uri(uri),
            None => MongoSource::Atlas {
                user: require("DB_USER")?,
                password: require("DB_PASSWORD")?,
                host: or_default(&lookup, "DB_HOST", DEFAULT_DB_HOST),
            },
        };

        Ok(Self {
            mongo,
            database_name: or_default(&lookup, "DB_NAME", DEFAULT_DB_NAME),
            gateway_key: require("PAYMENT_GATEWAY_KEY")?,
            gateway_url: or_default(&lookup, "PAYMENT_GATEWAY_URL", DEFAULT_GATEWAY_URL),
            port: parse(&lookup, "PORT", DEFAULT_PORT)?,
        })
    }
}

fn or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn parse<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    or_default(lookup, key, default)
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        })
}
