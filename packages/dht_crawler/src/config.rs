use std::time::Duration;

use serde::Deserialize;

/// Every tunable the node recognizes, with defaults matching the reference
/// parameters. Layered at load time: compiled defaults, then an optional
/// TOML file, then CLI flags — each layer only overriding fields it
/// actually set.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub bootstrap_nodes: Vec<String>,

    pub k: usize,
    pub alpha: usize,
    pub finder_num: usize,

    pub find_node_time_limit_secs: u64,
    pub ping_node_time_limit_secs: u64,
    pub request_timeout_secs: u64,
    pub max_unchanged_count: u64,

    pub token_time_limit_secs: u64,
    pub bucket_last_changed_time_limit_secs: u64,
    pub node_refreshness_time_limit_secs: u64,

    pub filtered_clients: Vec<String>,
}

impl Config {
    pub fn find_node_time_limit(&self) -> Duration {
        Duration::from_secs(self.find_node_time_limit_secs)
    }

    pub fn ping_node_time_limit(&self) -> Duration {
        Duration::from_secs(self.ping_node_time_limit_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_time_limit(&self) -> Duration {
        Duration::from_secs(self.token_time_limit_secs)
    }

    pub fn bucket_last_changed_time_limit(&self) -> Duration {
        Duration::from_secs(self.bucket_last_changed_time_limit_secs)
    }

    pub fn node_refreshness_time_limit(&self) -> Duration {
        Duration::from_secs(self.node_refreshness_time_limit_secs)
    }

    /// Merges `other` on top of `self`, field by field, used to apply a
    /// parsed TOML file over the compiled defaults.
    pub fn merge(mut self, other: PartialConfig) -> Config {
        if let Some(v) = other.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = other.bootstrap_nodes {
            self.bootstrap_nodes = v;
        }
        if let Some(v) = other.k {
            self.k = v;
        }
        if let Some(v) = other.alpha {
            self.alpha = v;
        }
        if let Some(v) = other.finder_num {
            self.finder_num = v;
        }
        if let Some(v) = other.find_node_time_limit_secs {
            self.find_node_time_limit_secs = v;
        }
        if let Some(v) = other.ping_node_time_limit_secs {
            self.ping_node_time_limit_secs = v;
        }
        if let Some(v) = other.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = other.max_unchanged_count {
            self.max_unchanged_count = v;
        }
        if let Some(v) = other.token_time_limit_secs {
            self.token_time_limit_secs = v;
        }
        if let Some(v) = other.bucket_last_changed_time_limit_secs {
            self.bucket_last_changed_time_limit_secs = v;
        }
        if let Some(v) = other.node_refreshness_time_limit_secs {
            self.node_refreshness_time_limit_secs = v;
        }
        if let Some(v) = other.filtered_clients {
            self.filtered_clients = v;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            bind_addr: "0.0.0.0:6881".to_string(),
            bootstrap_nodes: vec![
                "router.bittorrent.com:6881".to_string(),
                "dht.transmissionbt.com:6881".to_string(),
                "router.utorrent.com:6881".to_string(),
                "router.transmission.com:6881".to_string(),
            ],
            k: 8,
            alpha: 3,
            finder_num: 2,
            find_node_time_limit_secs: 120,
            ping_node_time_limit_secs: 30,
            request_timeout_secs: 10,
            max_unchanged_count: 5000,
            token_time_limit_secs: 300,
            bucket_last_changed_time_limit_secs: 15 * 60,
            node_refreshness_time_limit_secs: 60,
            filtered_clients: Vec::new(),
        }
    }
}

/// Deserialization target for a TOML config file: every field optional so a
/// file only needs to name the tunables it actually overrides.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PartialConfig {
    pub bind_addr: Option<String>,
    pub bootstrap_nodes: Option<Vec<String>>,
    pub k: Option<usize>,
    pub alpha: Option<usize>,
    pub finder_num: Option<usize>,
    pub find_node_time_limit_secs: Option<u64>,
    pub ping_node_time_limit_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub max_unchanged_count: Option<u64>,
    pub token_time_limit_secs: Option<u64>,
    pub bucket_last_changed_time_limit_secs: Option<u64>,
    pub node_refreshness_time_limit_secs: Option<u64>,
    pub filtered_clients: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_parameters() {
        let config = Config::default();
        assert_eq!(config.k, 8);
        assert_eq!(config.alpha, 3);
        assert_eq!(config.finder_num, 2);
        assert_eq!(config.max_unchanged_count, 5000);
        assert_eq!(config.bootstrap_nodes.len(), 4);
    }

    #[test]
    fn merge_only_overrides_set_fields() {
        let config = Config::default().merge(PartialConfig {
            k: Some(20),
            ..Default::default()
        });
        assert_eq!(config.k, 20);
        assert_eq!(config.alpha, 3);
    }
}
