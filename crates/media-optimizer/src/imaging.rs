//! Still image resize and re-encode

use crate::origin::{collect_body, OriginFetcher};
use bytes::Bytes;
use futures::{stream, StreamExt};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;
use tracing::debug;
use transform_cache::{ImageFormat, ImageRequest, PipelineError, PipelineOutput};

pub const GIF: &str = "image/gif";
pub const SVG: &str = "image/svg+xml";

/// ravif speed, 1 (slowest) to 10
const AVIF_SPEED: u8 = 6;

/// AVIF holds up at much lower quality settings than JPEG or WebP
fn avif_quality(quality: u8) -> u8 {
    quality.saturating_sub(25).max(40)
}

/// How a source content type is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Served byte-for-byte under its own content type
    Passthrough,
    Decode(image::ImageFormat),
}

/// Lowercase, drop parameters, and fix the common `image/jpg` misspelling
pub fn normalize_content_type(raw: &str) -> String {
    let essence = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if essence == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        essence
    }
}

pub fn source_kind(content_type: &str) -> Result<SourceKind, PipelineError> {
    match content_type {
        GIF | SVG => Ok(SourceKind::Passthrough),
        "image/jpeg" => Ok(SourceKind::Decode(image::ImageFormat::Jpeg)),
        "image/png" => Ok(SourceKind::Decode(image::ImageFormat::Png)),
        "image/webp" => Ok(SourceKind::Decode(image::ImageFormat::WebP)),
        other => Err(PipelineError::Unsupported(format!(
            "image content type {:?}",
            other
        ))),
    }
}

pub async fn produce(
    fetcher: &OriginFetcher,
    request: &ImageRequest,
    max_source_bytes: u64,
) -> Result<PipelineOutput, PipelineError> {
    let origin = fetcher.fetch(&request.url, None).await?;
    let content_type = origin
        .content_type
        .as_deref()
        .map(normalize_content_type)
        .ok_or_else(|| PipelineError::Unsupported("origin sent no content type".to_string()))?;

    let codec = match source_kind(&content_type)? {
        SourceKind::Passthrough => {
            debug!(url = %request.url, content_type = %content_type, "Passing image through");
            return Ok(PipelineOutput {
                content_type,
                body: origin.body,
            });
        }
        SourceKind::Decode(codec) => codec,
    };

    if origin.content_length.is_some_and(|len| len > max_source_bytes) {
        return Err(PipelineError::Unsupported(format!(
            "source larger than {} bytes",
            max_source_bytes
        )));
    }
    let source = collect_body(origin.body, max_source_bytes).await?;

    let job = request.clone();
    let encoded = tokio::task::spawn_blocking(move || transform(&source, codec, &job))
        .await
        .map_err(|e| PipelineError::Transform(e.to_string()))??;

    Ok(PipelineOutput {
        content_type: request.format.mime().to_string(),
        body: stream::once(async move { Ok(Bytes::from(encoded)) }).boxed(),
    })
}

fn transform_error(err: image::ImageError) -> PipelineError {
    PipelineError::Transform(err.to_string())
}

/// Decode, orient, shrink and re-encode one image
pub fn transform(
    source: &[u8],
    codec: image::ImageFormat,
    request: &ImageRequest,
) -> Result<Vec<u8>, PipelineError> {
    let mut decoder = ImageReader::with_format(Cursor::new(source), codec)
        .into_decoder()
        .map_err(transform_error)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder).map_err(transform_error)?;
    img.apply_orientation(orientation);

    let img = fit_within(img, request.width, request.height);
    encode(&img, request.format, request.quality)
}

/// Shrink to fit the requested box, keeping aspect ratio. Never enlarges.
pub fn fit_within(img: DynamicImage, width: Option<u32>, height: Option<u32>) -> DynamicImage {
    if width.is_none() && height.is_none() {
        return img;
    }
    let max_w = width.unwrap_or(u32::MAX).min(img.width());
    let max_h = height.unwrap_or(u32::MAX).min(img.height());
    if max_w == img.width() && max_h == img.height() {
        return img;
    }
    img.resize(max_w, max_h, FilterType::Lanczos3)
}

fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))
        }
        ImageFormat::Png => img.write_with_encoder(PngEncoder::new(&mut buf)),
        // The webp encoder is lossless only
        ImageFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buf))
        }
        ImageFormat::Avif => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(AvifEncoder::new_with_speed_quality(
                &mut buf,
                AVIF_SPEED,
                avif_quality(quality),
            ))
        }
    }
    .map_err(transform_error)?;
    Ok(buf)
}
