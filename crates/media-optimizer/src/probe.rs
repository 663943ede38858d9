//! Video metadata probing with ffprobe

use crate::origin::{collect_prefix, OriginFetcher};
use crate::types::{FfprobeOutput, Resolution, VideoInfo};
use bytes::Bytes;
use futures::{stream, StreamExt};
use tokio::process::Command;
use tracing::debug;
use transform_cache::{PipelineError, PipelineOutput, ProbeRequest};

/// WebM/Matroska carry their headers up front
const SMALL_PROBE_BYTES: u64 = 2 * 1024;
/// MP4 may need more to reach the moov atom
const LARGE_PROBE_BYTES: u64 = 1024 * 1024;

/// Inclusive byte range worth fetching for a source of this content type
pub fn probe_range(content_type: Option<&str>) -> (u64, u64) {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    let len = if content_type.contains("webm")
        || content_type.contains("mkv")
        || content_type.contains("matroska")
    {
        SMALL_PROBE_BYTES
    } else {
        LARGE_PROBE_BYTES
    };
    (0, len - 1)
}

/// Frame rate from ffprobe's `num/den` notation
fn parse_frame_rate(raw: &str) -> f64 {
    let mut parts = raw.splitn(2, '/');
    let num = parts.next().and_then(|n| n.trim().parse::<f64>().ok()).unwrap_or(0.0);
    let den = parts.next().and_then(|d| d.trim().parse::<f64>().ok()).unwrap_or(1.0);
    let fps = num / den;
    if fps.is_finite() {
        fps
    } else {
        0.0
    }
}

/// Summarise the first video stream, if there is one
pub fn video_info(output: &FfprobeOutput) -> Option<VideoInfo> {
    let stream = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))?;

    let duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Some(VideoInfo {
        codec: stream
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        resolution: Resolution {
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
        },
        fps: stream.r_frame_rate.as_deref().map(parse_frame_rate).unwrap_or(0.0),
        duration,
    })
}

pub async fn produce(
    fetcher: &OriginFetcher,
    ffprobe_path: &str,
    request: &ProbeRequest,
) -> Result<PipelineOutput, PipelineError> {
    let content_type = fetcher.head(&request.url).await?;
    let range = probe_range(content_type.as_deref());
    debug!(url = %request.url, ?content_type, ?range, "Probing source");

    let origin = fetcher.fetch(&request.url, Some(range)).await?;
    let head = collect_prefix(origin.body, (range.1 + 1) as usize).await?;

    let scratch = tempfile::NamedTempFile::new()?;
    tokio::fs::write(scratch.path(), &head).await?;

    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(scratch.path())
        .output()
        .await
        .map_err(|e| PipelineError::Transform(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Transform(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| PipelineError::Transform(format!("unreadable ffprobe output: {}", e)))?;
    let info = video_info(&parsed)
        .ok_or_else(|| PipelineError::Unsupported("no video stream found".to_string()))?;

    let json = serde_json::to_vec(&info)
        .map_err(|e| PipelineError::Transform(e.to_string()))?;
    Ok(PipelineOutput {
        content_type: "application/json".to_string(),
        body: stream::once(async move { Ok(Bytes::from(json)) }).boxed(),
    })
}
