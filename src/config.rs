//! Process-wide configuration: a `.env` overlay (camera/store credentials)
//! plus a JSON document (everything else). See `Config::from_files`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NvrError, Result};

/// Top-level, immutable configuration snapshot.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub camera: CameraConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scale: ScaleConfig,
    pub board: BoardConfig,
    #[serde(default)]
    pub bbox: BboxConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Camera connection parameters. `username`, `password`, `host`, `rtsp_port`,
/// `rtsp_path` and `trackid` are overlaid from `.env`; the remainder come
/// from `config.json`.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CameraConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    #[serde(default = "default_rtsp_path")]
    pub rtsp_path: String,
    #[serde(default)]
    pub trackid: String,
}

fn default_rtsp_port() -> u16 { 554 }
fn default_rtsp_path() -> String { "/profile1".into() }

impl CameraConfig {
    pub fn rtsp_url(&self) -> String {
        format!(
            "rtsp://{user}:{pass}@{host}:{port}{path}",
            user = self.username,
            pass = self.password,
            host = self.host,
            port = self.rtsp_port,
            path = self.rtsp_path,
        )
    }

    pub fn http_authority(&self) -> String {
        format!("https://{}", self.host)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

fn default_db_file() -> String { "nvr.db".into() }

/// Risk-heuristic thresholds consumed by the out-of-scope analysis layer;
/// carried here only because the config document defines them.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_dist_threshold")]
    pub dist_threshold: f64,
    #[serde(default = "default_parallelism_threshold")]
    pub parallelism_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            dist_threshold: default_dist_threshold(),
            parallelism_threshold: default_parallelism_threshold(),
        }
    }
}

fn default_dist_threshold() -> f64 { 50.0 }
fn default_parallelism_threshold() -> f64 { 0.9 }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_frame_cache_size")]
    pub frame_cache_size: usize,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            frame_cache_size: default_frame_cache_size(),
            history_size: default_history_size(),
        }
    }
}

fn default_frame_cache_size() -> usize { 50 }
fn default_history_size() -> usize { 30 }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScaleConfig {
    #[serde(default = "default_scale")]
    pub x: f64,
    #[serde(default = "default_scale")]
    pub y: f64,
    #[serde(default = "default_scale")]
    pub base_x: f64,
    #[serde(default = "default_scale")]
    pub base_y: f64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self { x: 1.0, y: 1.0, base_x: 1.0, base_y: 1.0 }
    }
}

fn default_scale() -> f64 { 1.0 }

/// Serial board wiring: board id (1-based) → device path.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BoardConfig {
    pub ports: HashMap<u8, String>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_board_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_retry_count() -> u32 { 5 }
fn default_board_timeout_ms() -> u64 { 500 }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BboxConfig {
    #[serde(default = "default_buffer_delay_ms")]
    pub buffer_delay_ms: u64,
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
}

impl Default for BboxConfig {
    fn default() -> Self {
        Self {
            buffer_delay_ms: default_buffer_delay_ms(),
            send_interval_ms: default_send_interval_ms(),
        }
    }
}

fn default_buffer_delay_ms() -> u64 { 2000 }
fn default_send_interval_ms() -> u64 { 50 }

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

fn default_server_port() -> u16 { 8080 }
fn default_cert_path() -> String { "fullchain.pem".into() }
fn default_key_path() -> String { "privkey.pem".into() }

/// The RTSP relay is an external collaborator; only its source/sink are
/// relevant to this process.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub sink_url: String,
}

impl Config {
    /// Load `.env` (camera/store credentials), then `config.json`
    /// (everything else), and merge the two into one snapshot.
    pub fn from_files(env_path: &Path, json_path: &Path) -> Result<Self> {
        let env_vars = load_dotenv(env_path)?;

        let content = std::fs::read_to_string(json_path)
            .map_err(|e| NvrError::Config(format!("cannot read config file: {e}")))?;
        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| NvrError::Config(format!("invalid JSON: {e}")))?;

        config.overlay_env(&env_vars)?;
        config.validate()?;
        Ok(config)
    }

    fn overlay_env(&mut self, env: &HashMap<String, String>) -> Result<()> {
        let required = ["USERNAME", "PASSWORD", "HOST", "RTSP_PORT", "RTSP_PATH", "DB_FILE", "TRACKID"];
        for key in required {
            if !env.contains_key(key) {
                return Err(NvrError::Config(format!("missing required .env key: {key}")));
            }
        }
        self.camera.username = env["USERNAME"].clone();
        self.camera.password = env["PASSWORD"].clone();
        self.camera.host = env["HOST"].clone();
        self.camera.rtsp_port = env["RTSP_PORT"]
            .parse()
            .map_err(|_| NvrError::Config("RTSP_PORT must be a valid port number".into()))?;
        self.camera.rtsp_path = env["RTSP_PATH"].clone();
        self.camera.trackid = env["TRACKID"].clone();
        self.store.db_file = env["DB_FILE"].clone();
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.host.is_empty() {
            return Err(NvrError::Config("camera.host must not be empty".into()));
        }
        if self.board.ports.is_empty() {
            return Err(NvrError::Config("board.ports must define at least one board".into()));
        }
        if self.bbox.send_interval_ms == 0 {
            return Err(NvrError::Config("bbox.send_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Minimal `.env` reader: `KEY=VALUE` lines, `#` comments, blank lines
/// skipped. No interpolation; one pair of surrounding quotes is stripped.
fn load_dotenv(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    let content = std::fs::read_to_string(path)
        .map_err(|e| NvrError::Config(format!("cannot read .env file: {e}")))?;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let mut value = value.trim().to_string();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = value[1..value.len() - 1].to_string();
        }
        vars.insert(key, value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(name: &str, content: &str) -> tempfile::TempPath {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        let _ = name;
        f.into_temp_path()
    }

    #[test]
    fn loads_env_and_json_and_overlays() {
        let env = write_tmp(
            ".env",
            "USERNAME=admin\nPASSWORD=secret\nHOST=192.168.1.10\nRTSP_PORT=554\nRTSP_PATH=/profile1\nDB_FILE=test.db\nTRACKID=abc123\n",
        );
        let json = write_tmp(
            "config.json",
            r#"{
                "camera": {},
                "store": {},
                "board": { "ports": { "1": "/dev/ttyUSB0" } }
            }"#,
        );

        let config = Config::from_files(&env, &json).unwrap();
        assert_eq!(config.camera.username, "admin");
        assert_eq!(config.camera.host, "192.168.1.10");
        assert_eq!(config.store.db_file, "test.db");
        assert_eq!(config.board.ports.get(&1).unwrap(), "/dev/ttyUSB0");
        assert_eq!(config.bbox.buffer_delay_ms, 2000);
    }

    #[test]
    fn rejects_missing_env_key() {
        let env = write_tmp(".env", "USERNAME=admin\n");
        let json = write_tmp(
            "config.json",
            r#"{"camera": {}, "store": {}, "board": {"ports": {"1": "/dev/ttyUSB0"}}}"#,
        );
        let result = Config::from_files(&env, &json);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_board_ports() {
        let env = write_tmp(
            ".env",
            "USERNAME=a\nPASSWORD=b\nHOST=h\nRTSP_PORT=554\nRTSP_PATH=/p\nDB_FILE=d.db\nTRACKID=t\n",
        );
        let json = write_tmp(
            "config.json",
            r#"{"camera": {}, "store": {}, "board": {"ports": {}}}"#,
        );
        let result = Config::from_files(&env, &json);
        assert!(result.is_err());
    }
}
