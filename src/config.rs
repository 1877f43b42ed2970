//! Application configuration
//!
//! No persisted state: configuration comes from defaults overridden by CLI
//! flags, and sessions never survive a restart.

use serde::Deserialize;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub browser: BrowserConfig,
    pub capture: CaptureConfig,
    pub resize: ResizeConfig,
}

/// Listen settings for the viewer endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8600,
        }
    }
}

/// Browser attachment settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// DevTools WebSocket endpoint of the running browser
    pub ws_endpoint: String,
    /// Document loaded into each encoder sandbox page
    pub encoder_url: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            ws_endpoint: "ws://127.0.0.1:9222/devtools/browser".to_string(),
            encoder_url: "http://127.0.0.1:8600/encoder.html".to_string(),
        }
    }
}

/// Capture defaults applied before the viewer says otherwise
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Resize coalescing settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    /// Quiescence window before a resize burst fires, milliseconds
    pub quiescence_ms: u64,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self { quiescence_ms: 500 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8600);
        assert_eq!((config.capture.width, config.capture.height), (1280, 720));
        assert_eq!(config.resize.quiescence_ms, 500);
    }

    #[test]
    fn test_partial_override() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "server": { "port": 9000 } }"#).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.address, "0.0.0.0");
        assert_eq!(config.capture.width, 1280);
    }
}
