//! Query validation and `Range` parsing
//!
//! Everything here runs before the cache is consulted, so a bad request
//! never takes a lock.

use crate::error::{OptimizerError, Result};
use serde::Deserialize;
use transform_cache::{
    AnimationFormat, AnimationRequest, ImageFormat, ImageRequest, ProbeRequest, DEFAULT_QUALITY,
};
use url::Url;

#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    pub url: Option<String>,
    pub w: Option<String>,
    pub h: Option<String>,
    pub q: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnimationQuery {
    pub url: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeQuery {
    pub url: Option<String>,
}

fn bad_request(msg: impl Into<String>) -> OptimizerError {
    OptimizerError::BadRequest(msg.into())
}

/// Require an absolute http(s) URL
pub fn source_url(raw: Option<&str>) -> Result<String> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request("Missing url parameter"))?;
    let url = Url::parse(raw).map_err(|e| bad_request(format!("Invalid URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(bad_request(format!("Unsupported URL scheme: {}", other))),
    }
}

fn dimension(name: &str, raw: Option<&str>) -> Result<Option<u32>> {
    match raw {
        None => Ok(None),
        Some(value) => match value.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(bad_request(format!("Invalid {} parameter", name))),
        },
    }
}

fn quality(raw: Option<&str>) -> Result<u8> {
    match raw {
        None => Ok(DEFAULT_QUALITY),
        Some(value) => match value.trim().parse::<u8>() {
            Ok(q) if (1..=100).contains(&q) => Ok(q),
            _ => Err(bad_request("Invalid q parameter")),
        },
    }
}

/// First supported `image/*` type listed in an `Accept` header
pub fn negotiate_format(accept: Option<&str>) -> Option<ImageFormat> {
    accept?
        .split(',')
        .filter_map(|part| part.split(';').next())
        .map(str::trim)
        .filter(|media| media.to_ascii_lowercase().starts_with("image/"))
        .find_map(ImageFormat::parse)
}

pub fn image_request(query: &ImageQuery, accept: Option<&str>) -> Result<ImageRequest> {
    let url = source_url(query.url.as_deref())?;
    let width = dimension("w", query.w.as_deref())?;
    let height = dimension("h", query.h.as_deref())?;
    let quality = quality(query.q.as_deref())?;

    let format = match query.format.as_deref() {
        Some(raw) => ImageFormat::parse(raw).ok_or_else(|| bad_request("Unsupported format"))?,
        None => negotiate_format(accept).unwrap_or(ImageFormat::Jpeg),
    };

    Ok(ImageRequest {
        url,
        width,
        height,
        quality,
        format,
    })
}

pub fn animation_request(query: &AnimationQuery) -> Result<AnimationRequest> {
    let url = source_url(query.url.as_deref())?;
    let format = query
        .format
        .as_deref()
        .and_then(AnimationFormat::parse)
        .ok_or_else(|| bad_request("Missing or invalid format parameter"))?;
    Ok(AnimationRequest { url, format })
}

pub fn probe_request(query: &ProbeQuery) -> Result<ProbeRequest> {
    Ok(ProbeRequest {
        url: source_url(query.url.as_deref())?,
    })
}

/// Outcome of applying a `Range` header to a body of known size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    Full,
    /// Inclusive bounds
    Partial(u64, u64),
    Unsatisfiable,
}

/// Resolve a single `bytes=` range. Anything we don't understand, including
/// multiple ranges, is served in full.
pub fn parse_range(header: Option<&str>, size: u64) -> ByteRange {
    let Some(ranges) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return ByteRange::Full;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = ranges.split_once('-') else {
        return ByteRange::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // Suffix range: the last `n` bytes
        return match end.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if size == 0 => ByteRange::Unsatisfiable,
            Ok(n) => ByteRange::Partial(size.saturating_sub(n), size - 1),
            Err(_) => ByteRange::Full,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Full;
    };
    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    if end.is_empty() {
        return ByteRange::Partial(start, size - 1);
    }
    match end.parse::<u64>() {
        Ok(end) if end >= start => ByteRange::Partial(start, end.min(size - 1)),
        _ => ByteRange::Full,
    }
}
