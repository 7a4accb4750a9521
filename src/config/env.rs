use std::path::PathBuf;

use super::AgentConfig;

const DEFAULT_CONFIG_PATH: &str = "hubsync.toml";

/// Config file path from `HUBSYNC_CONFIG`, falling back to `hubsync.toml`.
pub fn config_path() -> PathBuf {
    std::env::var("HUBSYNC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// `HUBSYNC_RESET=1` asks for a registry reset at startup.
pub fn reset_requested() -> bool {
    matches!(std::env::var("HUBSYNC_RESET").as_deref(), Ok("1") | Ok("true"))
}

impl AgentConfig {
    /// Applies environment variable overrides on top of the file config.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`; unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HUBSYNC_WEBHOOK_URL") {
            self.hub.webhook_url = v;
        }
        if let Some(v) = lookup("HUBSYNC_TOKEN") {
            self.hub.token = Some(v);
        }
        if let Some(v) = lookup("HUBSYNC_REGISTRY_DB") {
            self.registry.path = v;
        }
        if let Some(v) = lookup("HUBSYNC_API_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.api.port = port;
            }
        }
        if let Some(v) = lookup("NATS_URL") {
            self.bus.url = v;
            self.bus.enabled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HUBSYNC_WEBHOOK_URL", "http://hub:8123/api/webhook/xyz"),
            ("HUBSYNC_TOKEN", "tok"),
            ("HUBSYNC_API_PORT", "4040"),
            ("NATS_URL", "nats://bus:4222"),
        ]);

        let mut config = AgentConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.hub.webhook_url, "http://hub:8123/api/webhook/xyz");
        assert_eq!(config.hub.token.as_deref(), Some("tok"));
        assert_eq!(config.api.port, 4040);
        assert!(config.bus.enabled);
        assert_eq!(config.bus.url, "nats://bus:4222");
        assert_eq!(config.registry.path, "hubsync-registry.db");
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = AgentConfig::default();
        config.apply_overrides(|key| (key == "HUBSYNC_API_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.api.port, 3030);
    }
}
