//! Core types for the media optimizer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use transform_cache::{CacheConfig, CacheStats, CoordinatorConfig};

/// Configuration for the media optimizer
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    /// Shared metadata store; `None` keeps metadata in process memory
    pub redis_url: Option<String>,
    pub cache_ttl_secs: u64,
    pub revalidate_secs: u64,
    pub sliding_expiration: bool,
    pub lock_ttl_secs: u64,
    pub lock_wait_secs: u64,
    pub sweep_interval_secs: u64,
    pub origin_timeout_secs: u64,
    pub max_source_bytes: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            port: 3100,
            cache_dir: PathBuf::from("./cache"),
            redis_url: None,
            cache_ttl_secs: 24 * 60 * 60,      // 24 hours
            revalidate_secs: 5 * 60,           // 5 minutes
            sliding_expiration: false,
            lock_ttl_secs: 60,
            lock_wait_secs: 90,
            sweep_interval_secs: 24 * 60 * 60, // daily
            origin_timeout_secs: 30,
            max_source_bytes: 50 * 1024 * 1024, // 50MB
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl OptimizerConfig {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            cache_dir: self.cache_dir.clone(),
            ttl: Duration::from_secs(self.cache_ttl_secs),
            sliding_expiration: self.sliding_expiration,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            revalidate_after: Duration::from_secs(self.revalidate_secs),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            max_wait: Duration::from_secs(self.lock_wait_secs),
            ..CoordinatorConfig::default()
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub store: String,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Summary of the first video stream of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub codec: String,
    pub resolution: Resolution,
    pub fps: f64,
    pub duration: f64,
}

/// Body of the `/ffprobe` endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<VideoInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Subset of `ffprobe -print_format json` output
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: Option<FfprobeFormat>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OptimizerConfig::default();
        assert_eq!(config.port, 3100);
        assert_eq!(config.cache_dir, PathBuf::from("./cache"));
        assert!(config.redis_url.is_none());
        assert_eq!(config.cache_ttl_secs, 24 * 60 * 60);
        assert_eq!(config.revalidate_secs, 300);
        assert_eq!(config.max_source_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_core_configs_follow_env_config() {
        let config = OptimizerConfig {
            cache_ttl_secs: 10,
            revalidate_secs: 5,
            lock_ttl_secs: 7,
            lock_wait_secs: 9,
            sliding_expiration: true,
            ..OptimizerConfig::default()
        };

        let cache = config.cache_config();
        assert_eq!(cache.ttl, Duration::from_secs(10));
        assert!(cache.sliding_expiration);

        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.revalidate_after, Duration::from_secs(5));
        assert_eq!(coordinator.lock_ttl, Duration::from_secs(7));
        assert_eq!(coordinator.max_wait, Duration::from_secs(9));
    }

    #[test]
    fn test_probe_response_serialization() {
        let response = ProbeResponse {
            success: true,
            data: Some(VideoInfo {
                codec: "h264".to_string(),
                resolution: Resolution {
                    width: 1280,
                    height: 720,
                },
                fps: 30.0,
                duration: 12.5,
            }),
            error: None,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["resolution"]["width"], 1280);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_ffprobe_output_deserialization() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "vp9", "width": 640, "height": 360, "r_frame_rate": "25/1"}
            ],
            "format": {"duration": "3.040000"}
        }"#;

        let output: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(output.streams.len(), 2);
        assert_eq!(output.streams[1].width, Some(640));
        assert_eq!(
            output.format.unwrap().duration.as_deref(),
            Some("3.040000")
        );
    }
}
