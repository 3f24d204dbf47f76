use crate::prelude::*;

use serde::Deserialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_listener")]
    pub listener: Listener,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to append published snapshots in JSON lines format
    pub snapshot_file: Option<String>,
}

// Listener {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Listener {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_listener_port")]
    pub port: u16,

    /// Send the defensive acknowledgement when a frame does not decode.
    /// Off unless the connected data-logger is known to expect a reply.
    #[serde(default = "Config::default_reply_to_unknown_frames")]
    pub reply_to_unknown_frames: bool,

    pub use_tcp_nodelay: Option<bool>,
    pub tcp_keepalive_secs: Option<u64>,
}
impl Listener {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn reply_to_unknown_frames(&self) -> bool {
        self.reply_to_unknown_frames
    }

    pub fn use_tcp_nodelay(&self) -> bool {
        self.use_tcp_nodelay.unwrap_or(true)
    }

    pub fn tcp_keepalive_secs(&self) -> u64 {
        self.tcp_keepalive_secs.unwrap_or(60)
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn listener(&self) -> Listener {
        self.config.lock().unwrap().listener.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }

    pub fn snapshot_file(&self) -> Option<String> {
        self.config.lock().unwrap().snapshot_file.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;

        info!("Configuration loaded successfully:");
        info!("  Listener: {}", if config.listener.enabled { "enabled" } else { "disabled" });
        info!("    Port: {}", config.listener.port);
        info!("    Reply to unknown frames: {}", config.listener.reply_to_unknown_frames);
        info!("    TCP NoDelay: {}", config.listener.use_tcp_nodelay.unwrap_or(true));
        info!("    TCP Keepalive: {}s", config.listener.tcp_keepalive_secs.unwrap_or(60));
        if let Some(path) = &config.snapshot_file {
            info!("  Snapshot file: {}", path);
        }
        info!("  Log Level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.listener.enabled && self.listener.port == 0 {
            bail!("listener.port must be between 1 and 65535");
        }

        if let Some(path) = &self.snapshot_file {
            if path.is_empty() {
                bail!("snapshot_file cannot be empty when set");
            }
        }

        Ok(())
    }

    fn default_listener() -> Listener {
        Listener {
            enabled: Self::default_enabled(),
            port: Self::default_listener_port(),
            reply_to_unknown_frames: Self::default_reply_to_unknown_frames(),
            use_tcp_nodelay: None,
            tcp_keepalive_secs: None,
        }
    }

    fn default_enabled() -> bool {
        true
    }

    // Port the Solis/Ginlong data-logger pushes to out of the box.
    fn default_listener_port() -> u16 {
        8899
    }

    fn default_reply_to_unknown_frames() -> bool {
        false
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
