//! Fetch+transform pipeline behind the cache

use crate::origin::OriginFetcher;
use crate::types::OptimizerConfig;
use crate::{animation, imaging, probe};
use async_trait::async_trait;
use transform_cache::{Pipeline, PipelineError, PipelineOutput, RequestDescriptor};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_source_bytes: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl From<&OptimizerConfig> for PipelineConfig {
    fn from(config: &OptimizerConfig) -> Self {
        Self {
            max_source_bytes: config.max_source_bytes,
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
        }
    }
}

pub struct MediaPipeline {
    fetcher: OriginFetcher,
    config: PipelineConfig,
}

impl MediaPipeline {
    pub fn new(fetcher: OriginFetcher, config: PipelineConfig) -> Self {
        Self { fetcher, config }
    }
}

#[async_trait]
impl Pipeline for MediaPipeline {
    async fn produce(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<PipelineOutput, PipelineError> {
        match descriptor {
            RequestDescriptor::Image(request) => {
                imaging::produce(&self.fetcher, request, self.config.max_source_bytes).await
            }
            RequestDescriptor::Animation(request) => {
                animation::produce(&self.fetcher, &self.config.ffmpeg_path, request).await
            }
            RequestDescriptor::Probe(request) => {
                probe::produce(&self.fetcher, &self.config.ffprobe_path, request).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::testing::spawn_origin;
    use crate::origin::collect_body;
    use axum::http::header;
    use axum::routing::get;
    use axum::Router;
    use image::codecs::png::PngEncoder;
    use image::{DynamicImage, GenericImageView, RgbImage};
    use std::time::Duration;
    use transform_cache::{ImageFormat, ImageRequest};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buf = Vec::new();
        img.write_with_encoder(PngEncoder::new(&mut buf)).unwrap();
        buf
    }

    async fn origin() -> String {
        let photo = png(80, 40);
        let router = Router::new()
            .route(
                "/photo.png",
                get(move || {
                    let photo = photo.clone();
                    async move { ([(header::CONTENT_TYPE, "image/png")], photo) }
                }),
            )
            .route(
                "/loop.gif",
                get(|| async { ([(header::CONTENT_TYPE, "image/gif")], "GIF89a-frames") }),
            )
            .route(
                "/page.html",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html></html>") }),
            );
        spawn_origin(router).await
    }

    fn pipeline(max_source_bytes: u64) -> MediaPipeline {
        MediaPipeline::new(
            OriginFetcher::new(Duration::from_secs(5)).unwrap(),
            PipelineConfig {
                max_source_bytes,
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
            },
        )
    }

    fn image_request(url: String, width: Option<u32>, format: ImageFormat) -> RequestDescriptor {
        RequestDescriptor::Image(ImageRequest {
            url,
            width,
            height: None,
            quality: 75,
            format,
        })
    }

    #[tokio::test]
    async fn test_image_is_resized_and_reencoded() {
        let base = origin().await;

        let output = pipeline(1024 * 1024)
            .produce(&image_request(format!("{}/photo.png", base), Some(20), ImageFormat::Webp))
            .await
            .unwrap();
        assert_eq!(output.content_type, "image/webp");

        let bytes = collect_body(output.body, u64::MAX).await.unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.dimensions(), (20, 10));
    }

    #[tokio::test]
    async fn test_gif_passes_through() {
        let base = origin().await;

        let output = pipeline(1024 * 1024)
            .produce(&image_request(format!("{}/loop.gif", base), Some(20), ImageFormat::Jpeg))
            .await
            .unwrap();
        assert_eq!(output.content_type, "image/gif");

        let bytes = collect_body(output.body, u64::MAX).await.unwrap();
        assert_eq!(bytes, b"GIF89a-frames");
    }

    #[tokio::test]
    async fn test_non_image_source_is_unsupported() {
        let base = origin().await;

        let result = pipeline(1024 * 1024)
            .produce(&image_request(format!("{}/page.html", base), None, ImageFormat::Jpeg))
            .await;
        assert!(matches!(result, Err(PipelineError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_oversized_source_is_rejected() {
        let base = origin().await;

        let result = pipeline(16)
            .produce(&image_request(format!("{}/photo.png", base), None, ImageFormat::Jpeg))
            .await;
        assert!(matches!(result, Err(PipelineError::Unsupported(_))));
    }
}
