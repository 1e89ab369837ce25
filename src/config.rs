use serde::Deserialize;

use crate::error::Error;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub channel: ChannelConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub host: String,
    pub port: u16,
    #[serde(flatten)]
    pub mode: ChannelMode,
}

/// Which side of the channel this process plays.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ChannelMode {
    /// Sandbox side: listen and evaluate incoming fragments.
    Serve,
    /// Host side: connect and dispatch fragments interactively.
    Connect {
        /// Local deadline per request; a late response is discarded.
        #[serde(default = "default_request_timeout")]
        request_timeout_secs: u64,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Fragments larger than this are rejected before evaluation.
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CapabilitiesConfig {
    #[serde(default = "default_capability_enabled")]
    pub counter: bool,
    #[serde(default = "default_capability_enabled")]
    pub start_flag: bool,
    #[serde(default = "default_capability_enabled")]
    pub log: bool,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_code_bytes() -> usize {
    8192
}

fn default_capability_enabled() -> bool {
    true
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: default_max_code_bytes(),
        }
    }
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            counter: true,
            start_flag: true,
            log: true,
        }
    }
}

impl ChannelConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Human-readable description of the channel mode
    pub fn mode_description(&self) -> String {
        match &self.mode {
            ChannelMode::Serve => format!("serve ({})", self.addr()),
            ChannelMode::Connect { .. } => format!("connect ({})", self.addr()),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${SANDPIPE_PORT}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.channel.port == 0 {
            return Err(Error::Config {
                message: "channel.port must be non-zero".into(),
            });
        }
        if self.limits.max_code_bytes == 0 {
            return Err(Error::Config {
                message: "limits.max_code_bytes must be at least 1".into(),
            });
        }
        Ok(())
    }
}
