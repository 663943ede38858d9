//! Media Optimizer - on-demand image and animation transcoding proxy
//!
//! Fetches source media from remote origins, transforms it, and serves the
//! result from a content-addressed cache shared by every instance.

mod animation;
mod error;
mod imaging;
mod origin;
mod params;
mod pipeline;
mod probe;
mod server;
mod types;

use crate::error::{OptimizerError, Result};
use crate::origin::OriginFetcher;
use crate::pipeline::{MediaPipeline, PipelineConfig};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::OptimizerConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use transform_cache::{spawn_sweeper, CacheCoordinator, MemoryStore, MetadataStore, RedisStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("media_optimizer=info".parse()?)
        .add_directive("transform_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting media optimizer...");

    let config = load_config(|name| std::env::var(name).ok());
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache TTL: {} seconds", config.cache_ttl_secs);
    info!("Revalidate after: {} seconds", config.revalidate_secs);

    let (store, store_kind): (Arc<dyn MetadataStore>, &'static str) = match &config.redis_url {
        Some(url) => (Arc::new(RedisStore::connect(url).await?), "redis"),
        None => {
            warn!("REDIS_URL not set, cache metadata is local to this process");
            (Arc::new(MemoryStore::new()), "memory")
        }
    };

    let fetcher = OriginFetcher::new(Duration::from_secs(config.origin_timeout_secs))
        .map_err(|e| OptimizerError::Config(format!("Failed to build HTTP client: {}", e)))?;
    let pipeline = MediaPipeline::new(fetcher, PipelineConfig::from(&config));

    let coordinator = CacheCoordinator::new(
        store,
        &config.cache_config(),
        config.coordinator_config(),
        Arc::new(pipeline),
    );
    coordinator.init().await?;

    spawn_sweeper(
        config.cache_dir.clone(),
        Duration::from_secs(config.cache_ttl_secs),
        Duration::from_secs(config.sweep_interval_secs),
    );

    let state: SharedState = Arc::new(ServerState::new(coordinator, store_kind));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| OptimizerError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn load_config(lookup: impl Fn(&str) -> Option<String>) -> OptimizerConfig {
    let defaults = OptimizerConfig::default();

    let sliding_expiration = lookup("SLIDING_EXPIRATION")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(defaults.sliding_expiration);

    // Zero would make the sweeper's interval panic
    let sweep_interval_secs =
        parsed(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs).max(1);

    OptimizerConfig {
        port: parsed(&lookup, "PORT", defaults.port),
        cache_dir: lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir),
        redis_url: lookup("REDIS_URL").filter(|s| !s.trim().is_empty()),
        cache_ttl_secs: parsed(&lookup, "CACHE_TTL_SECS", defaults.cache_ttl_secs),
        revalidate_secs: parsed(&lookup, "REVALIDATE_SECS", defaults.revalidate_secs),
        sliding_expiration,
        lock_ttl_secs: parsed(&lookup, "LOCK_TTL_SECS", defaults.lock_ttl_secs),
        lock_wait_secs: parsed(&lookup, "LOCK_WAIT_SECS", defaults.lock_wait_secs),
        sweep_interval_secs,
        origin_timeout_secs: parsed(&lookup, "ORIGIN_TIMEOUT_SECS", defaults.origin_timeout_secs),
        max_source_bytes: parsed(&lookup, "MAX_SOURCE_BYTES", defaults.max_source_bytes),
        ffmpeg_path: lookup("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
        ffprobe_path: lookup("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> OptimizerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_config(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_load_config_defaults() {
        let config = config_from(&[]);
        let defaults = OptimizerConfig::default();
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.cache_dir, defaults.cache_dir);
        assert!(config.redis_url.is_none());
        assert_eq!(config.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_load_config_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("CACHE_DIR", "/var/cache/media"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("CACHE_TTL_SECS", "600"),
            ("SLIDING_EXPIRATION", "true"),
            ("LOCK_WAIT_SECS", "15"),
            ("FFPROBE_PATH", "/opt/ffmpeg/bin/ffprobe"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/media"));
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.cache_ttl_secs, 600);
        assert!(config.sliding_expiration);
        assert_eq!(config.lock_wait_secs, 15);
        assert_eq!(config.ffprobe_path, "/opt/ffmpeg/bin/ffprobe");
    }

    #[test]
    fn test_load_config_ignores_garbage() {
        let config = config_from(&[
            ("PORT", "eighty"),
            ("REDIS_URL", "  "),
            ("SWEEP_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.port, 3100);
        assert!(config.redis_url.is_none());
        assert_eq!(config.sweep_interval_secs, 1);
    }
}
