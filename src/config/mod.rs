use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub announcements: AnnouncementConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_validity_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnnouncementConfig {
    /// Page size used when a listing request does not give one.
    pub default_page_size: i64,
    /// Upper bound on any listing page.
    pub max_page_size: i64,
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            default_page_size: 16,
            max_page_size: 64,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Pick up a local .env before reading the environment
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite://herald.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("auth.jwt_issuer", "herald")?
            .set_default("auth.jwt_validity_minutes", 60)?
            .set_default("announcements.default_page_size", 16)?
            .set_default("announcements.max_page_size", 64)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with HERALD__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("HERALD").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://herald.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                jwt_issuer: "herald".to_string(),
                jwt_validity_minutes: 60,
            },
            announcements: AnnouncementConfig::default(),
        }
    }
}
