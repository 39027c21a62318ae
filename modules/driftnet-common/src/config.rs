use std::env;

/// Default jetstream instance to consume from.
pub const DEFAULT_JETSTREAM_ADDR: &str = "wss://jetstream2.us-east.bsky.network/subscribe";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Feed identity
    pub feed_host: String,
    pub feed_name: String,
    pub feed_keyword: String,

    // Upstream stream
    pub jetstream_addr: String,

    // Storage
    pub database_path: String,

    // Web server. Must stay on the port the feed was published with.
    pub server_port: u16,

    // Moderation list, absent when BLOCKLIST_KEY is unset.
    pub blocklist: Option<BlocklistConfig>,
}

/// Credentials and list key for the moderation blocklist.
#[derive(Debug, Clone)]
pub struct BlocklistConfig {
    pub handle: String,
    pub app_password: String,
    pub pds_host: String,
    pub list_key: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        let blocklist = env::var("BLOCKLIST_KEY").ok().filter(|k| !k.is_empty()).map(|list_key| {
            BlocklistConfig {
                handle: required_env("BSKY_HANDLE"),
                app_password: required_env("BSKY_PASS"),
                pds_host: env::var("BSKY_HOST")
                    .unwrap_or_else(|_| "https://bsky.social".to_string()),
                list_key,
            }
        });

        Self {
            feed_host: required_env("FEED_HOST_NAME"),
            feed_name: required_env("FEED_NAME"),
            feed_keyword: required_env("FEED_KEYWORD"),
            jetstream_addr: env::var("JETSTREAM_ADDR")
                .unwrap_or_else(|_| DEFAULT_JETSTREAM_ADDR.to_string()),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "./".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "11011".to_string())
                .parse()
                .expect("SERVER_PORT must be a number"),
            blocklist,
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
