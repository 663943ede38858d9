//! Animation transcoding through ffmpeg
//!
//! The origin body is piped into ffmpeg's stdin and its stdout is streamed
//! straight into the cache, so nothing is buffered whole in memory.

use crate::origin::OriginFetcher;
use futures::{stream, StreamExt, TryStreamExt};
use std::io;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;
use transform_cache::{AnimationFormat, AnimationRequest, PipelineError, PipelineOutput};

/// Keep this much of ffmpeg's stderr for error messages
const STDERR_TAIL: usize = 512;

pub fn ffmpeg_args(format: AnimationFormat) -> Vec<&'static str> {
    let mut args = vec!["-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-an"];
    match format {
        AnimationFormat::Mp4 => args.extend([
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            // Fragmented so the moov atom can be written to a pipe
            "-movflags",
            "frag_keyframe+empty_moov",
            // yuv420p needs even dimensions
            "-filter:v",
            "crop=floor(in_w/2)*2:floor(in_h/2)*2",
            "-f",
            "mp4",
        ]),
        AnimationFormat::Webm => args.extend([
            "-c:v",
            "libvpx-vp9",
            "-b:v",
            "0",
            "-crf",
            "40",
            "-f",
            "webm",
        ]),
    }
    args.push("pipe:1");
    args
}

pub async fn produce(
    fetcher: &OriginFetcher,
    ffmpeg_path: &str,
    request: &AnimationRequest,
) -> Result<PipelineOutput, PipelineError> {
    let origin = fetcher.fetch(&request.url, None).await?;

    let mut child = Command::new(ffmpeg_path)
        .args(ffmpeg_args(request.format))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::Transform(format!("failed to start ffmpeg: {}", e)))?;

    let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(PipelineError::Transform(
            "ffmpeg pipes unavailable".to_string(),
        ));
    };

    let url = request.url.clone();
    tokio::spawn(async move {
        let mut source = StreamReader::new(origin.body);
        // ffmpeg may stop reading early; its exit status decides the outcome
        if let Err(e) = tokio::io::copy(&mut source, &mut stdin).await {
            debug!(url = %url, error = %e, "Stopped feeding ffmpeg");
        }
    });

    let stderr_tail = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        let start = buf.len().saturating_sub(STDERR_TAIL);
        String::from_utf8_lossy(&buf[start..]).trim().to_string()
    });

    let exit = stream::once(async move {
        let status = child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let stderr = stderr_tail.await.unwrap_or_default();
        Err(io::Error::other(format!("ffmpeg exited with {}: {}", status, stderr)))
    })
    .try_filter_map(|()| async { Ok(None) });

    Ok(PipelineOutput {
        content_type: request.format.mime().to_string(),
        body: ReaderStream::new(stdout).chain(exit).boxed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::testing::spawn_origin;
    use axum::routing::get;
    use axum::Router;
    use std::time::Duration;

    #[test]
    fn test_mp4_args() {
        let args = ffmpeg_args(AnimationFormat::Mp4);
        assert_eq!(&args[3..6], &["-i", "pipe:0", "-an"]);
        assert!(args.contains(&"libx264"));
        assert!(args.contains(&"yuv420p"));
        assert!(args.contains(&"frag_keyframe+empty_moov"));
        assert_eq!(args.last(), Some(&"pipe:1"));
    }

    #[test]
    fn test_webm_args() {
        let args = ffmpeg_args(AnimationFormat::Webm);
        assert!(args.contains(&"libvpx-vp9"));
        let crf = args.iter().position(|a| *a == "-crf").unwrap();
        assert_eq!(args[crf + 1], "40");
        assert!(!args.contains(&"libx264"));
    }

    fn request(base: &str) -> AnimationRequest {
        AnimationRequest {
            url: format!("{}/cat.gif", base),
            format: AnimationFormat::Mp4,
        }
    }

    async fn gif_origin() -> String {
        spawn_origin(Router::new().route("/cat.gif", get(|| async { "GIF89a" }))).await
    }

    #[tokio::test]
    async fn test_missing_binary_is_transform_error() {
        let base = gif_origin().await;
        let fetcher = OriginFetcher::new(Duration::from_secs(5)).unwrap();

        let result = produce(&fetcher, "/nonexistent/ffmpeg", &request(&base)).await;
        assert!(matches!(result, Err(PipelineError::Transform(_))));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_the_stream() {
        let base = gif_origin().await;
        let fetcher = OriginFetcher::new(Duration::from_secs(5)).unwrap();

        // `false` ignores its arguments and exits 1
        let output = produce(&fetcher, "false", &request(&base)).await.unwrap();
        assert_eq!(output.content_type, "video/mp4");

        let chunks: Vec<io::Result<_>> = output.body.collect().await;
        assert!(chunks.last().unwrap().is_err());
    }
}
