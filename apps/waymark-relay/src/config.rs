use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("WAYMARK_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("WAYMARK_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4090),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4090,
        }
    }
}
