use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::encoding::Network;
use crate::error::{Result, WalletError};

pub const DEFAULT_DELEGATED_WORK_URL: &str = "https://boompow.banano.cc/graphql";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct VaultConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub work: WorkConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Empty means the network default.
    #[serde(default)]
    pub node_rpc_url: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11338
}

fn default_db_path() -> String {
    "./data/nanovault".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            node_rpc_url: String::new(),
            db_path: default_db_path(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WalletConfig {
    #[serde(default)]
    pub banano: bool,
    #[serde(default = "default_reps_nano")]
    pub preconfigured_representatives_nano: Vec<String>,
    #[serde(default = "default_reps_banano")]
    pub preconfigured_representatives_banano: Vec<String>,
    /// Raw amount; empty means the network default.
    #[serde(default)]
    pub receive_minimum: String,
    #[serde(default = "default_true")]
    pub auto_receive_on_send: bool,
}

fn default_reps_nano() -> Vec<String> {
    [
        "nano_1x7biz69cem95oo7gxkrw6kzhfywq4x5dupw4z1bdzkb74dk9kpxwzjbdhhs",
        "nano_1thingspmippfngcrtk1ofd3uwftffnu4qu9xkauo9zkiuep6iknzci3jxa6",
        "nano_1natrium1o3z5519ifou7xii8crpxpk8y65qmkih8e8bpsjri651oza8imdd",
        "nano_3o7uzba8b9e1wqu5ziwpruteyrs3scyqr761x7ke6w1xctohxfh5du75qgaj",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_reps_banano() -> Vec<String> {
    [
        "ban_1ka1ium4pfue3uxtntqsrib8mumxgazsjf58gidh1xeo5te3whsq8z476goo",
        "ban_1cake36ua5aqcq1c5i3dg7k8xtosw7r9r7qbbf5j15sk75csp9okesz87nfn",
        "ban_1fomoz167m7o38gw4rzt7hz67oq6itejpt4yocrfywujbpatd711cjew8gjj",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            banano: false,
            preconfigured_representatives_nano: default_reps_nano(),
            preconfigured_representatives_banano: default_reps_banano(),
            receive_minimum: String::new(),
            auto_receive_on_send: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkConfig {
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_delegated_url")]
    pub delegated_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_key: Option<String>,
    #[serde(default = "default_work_timeout")]
    pub timeout_secs: u64,
    /// 0 uses every available core.
    #[serde(default)]
    pub local_threads: usize,
}

fn default_delegated_url() -> String {
    DEFAULT_DELEGATED_WORK_URL.to_string()
}

fn default_work_timeout() -> u64 {
    10
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            peers: vec![],
            delegated_url: default_delegated_url(),
            delegated_key: None,
            timeout_secs: default_work_timeout(),
            local_threads: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LockConfig {
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_retry_interval() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval(),
            max_retries: default_max_retries(),
        }
    }
}

impl WorkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn threads(&self) -> usize {
        if self.local_threads > 0 {
            return self.local_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl VaultConfig {
    pub fn network(&self) -> Network {
        Network::from_banano_flag(self.wallet.banano)
    }

    pub fn node_rpc_url(&self) -> String {
        if !self.server.node_rpc_url.is_empty() {
            return self.server.node_rpc_url.clone();
        }
        match self.network() {
            Network::Banano => "http://[::1]:7072".to_string(),
            Network::Nano => "http://[::1]:7076".to_string(),
        }
    }

    /// Smallest pending amount (raw) worth receiving.
    pub fn receive_minimum(&self) -> String {
        if !self.wallet.receive_minimum.is_empty() {
            return self.wallet.receive_minimum.clone();
        }
        match self.network() {
            Network::Banano => "1000000000000000000000000000".to_string(),
            Network::Nano => "1000000000000000000000000".to_string(),
        }
    }

    pub fn representatives(&self) -> &[String] {
        match self.network() {
            Network::Banano => &self.wallet.preconfigured_representatives_banano,
            Network::Nano => &self.wallet.preconfigured_representatives_nano,
        }
    }

    pub fn random_representative(&self) -> Result<String> {
        self.representatives()
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| WalletError::InvalidInput("no preconfigured representatives".to_string()))
    }

    /// `BPOW_KEY` / `BPOW_URL` take precedence over the file.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("BPOW_KEY") {
            if !key.is_empty() {
                self.work.delegated_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("BPOW_URL") {
            if !url.is_empty() {
                self.work.delegated_url = url;
            }
        }
    }

    pub fn load_or_default(path: &str) -> Self {
        let mut config = if std::path::Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => c,
                    Err(e) => {
                        eprintln!("Error parsing config: {}. Using Defaults.", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    eprintln!("Error reading config: {}. Using Defaults.", e);
                    Self::default()
                }
            }
        } else {
            println!("Config file not found at '{}'. Creating default.", path);
            let config = Self::default();
            if let Ok(s) = toml::to_string_pretty(&config) {
                let _ = std::fs::write(path, s);
            }
            config
        };
        config.apply_env();
        config
    }
}
