use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::VidLinkError;

/// Client configuration.
///
/// Keys may be written in snake_case or with the upper-case names used by
/// older `config.json` files (`BUFFER_SIZE`, `QUALITY_REFRESH`, ...). Missing
/// keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_ip: String,
    pub server_port: u16,
    /// Seconds to wait for the callee to pick up.
    pub call_timeout: u64,
    #[serde(flatten)]
    pub qos: QosConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ip: "vega.ii.uam.es".to_owned(),
            server_port: 8000,
            call_timeout: 15,
            qos: QosConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, VidLinkError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| {
            VidLinkError::ConfigurationInvalid { reason: e.to_string() }
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }

    pub fn directory_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }

    pub fn validate(&self) -> Result<(), VidLinkError> {
        let invalid = |reason: &str| {
            Err(VidLinkError::ConfigurationInvalid { reason: reason.to_owned() })
        };
        let q = &self.qos;
        if q.buffer_size == 0 {
            return invalid("BUFFER_SIZE must be positive");
        }
        if q.buffer_threshold >= q.buffer_size {
            return invalid("BUFFER_THRESHOLD must be smaller than BUFFER_SIZE");
        }
        if q.min_fps == 0 || q.min_fps > q.max_fps {
            return invalid("fps bounds must satisfy 0 < min_fps <= max_fps");
        }
        if !(0.0..=1.0).contains(&q.report_weight) {
            return invalid("REPORT_WEIGHT must be within [0, 1]");
        }
        let periods = [
            q.quality_refresh,
            q.fps_refresh,
            q.resolution_refresh,
            q.report_refresh,
        ];
        if periods.iter().any(|p| !(*p > 0.0)) {
            return invalid("refresh periods must be positive");
        }
        if q.medium_lost >= q.worst_lost {
            return invalid("MEDIUM_LOST must be below WORST_LOST");
        }
        Ok(())
    }
}

/// Jitter-buffer and adaptation tunables. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosConfig {
    #[serde(alias = "BUFFER_SIZE")]
    pub buffer_size: usize,
    /// Frames that must be buffered before playback starts.
    #[serde(alias = "BUFFER_THRESHOLD")]
    pub buffer_threshold: usize,
    /// Margin added to the fixed delay budget.
    #[serde(alias = "FIXED_DELAY_THRESHOLD")]
    pub fixed_delay_threshold: f64,
    #[serde(alias = "QUALITY_REFRESH")]
    pub quality_refresh: f64,
    #[serde(alias = "FPS_REFRESH")]
    pub fps_refresh: f64,
    #[serde(alias = "RESOLUTION_REFRESH")]
    pub resolution_refresh: f64,
    #[serde(alias = "REPORT_REFRESH")]
    pub report_refresh: f64,
    #[serde(alias = "REPORT_WEIGHT")]
    pub report_weight: f64,
    #[serde(alias = "MEDIUM_LOST")]
    pub medium_lost: f64,
    #[serde(alias = "WORST_LOST")]
    pub worst_lost: f64,
    pub max_fps: u32,
    pub min_fps: u32,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            buffer_threshold: 10,
            fixed_delay_threshold: 0.25,
            quality_refresh: 1.0,
            fps_refresh: 5.0,
            resolution_refresh: 10.0,
            report_refresh: 10.0,
            report_weight: 0.7,
            medium_lost: 1.0 / 15.0,
            worst_lost: 4.0 / 15.0,
            max_fps: 30,
            min_fps: 10,
        }
    }
}
