//! Request descriptors and their fingerprints

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const DEFAULT_QUALITY: u8 = 75;

/// Output encodings for still images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Avif => "image/avif",
        }
    }

    /// Parse a short name (`jpg`, `webp`, ...) or a MIME type
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "png" | "image/png" => Some(ImageFormat::Png),
            "webp" | "image/webp" => Some(ImageFormat::Webp),
            "avif" | "image/avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }
}

/// Output containers for animations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationFormat {
    Mp4,
    Webm,
}

impl AnimationFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            AnimationFormat::Mp4 => "video/mp4",
            AnimationFormat::Webm => "video/webm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp4" => Some(AnimationFormat::Mp4),
            "webm" => Some(AnimationFormat::Webm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRequest {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default = "default_quality")]
    pub quality: u8,
    pub format: ImageFormat,
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnimationRequest {
    pub url: String,
    pub format: AnimationFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub url: String,
}

/// A unit of cacheable work. One arm per kind of output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RequestDescriptor {
    Image(ImageRequest),
    Animation(AnimationRequest),
    Probe(ProbeRequest),
}

impl RequestDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestDescriptor::Image(_) => "image",
            RequestDescriptor::Animation(_) => "animation",
            RequestDescriptor::Probe(_) => "probe",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            RequestDescriptor::Image(req) => &req.url,
            RequestDescriptor::Animation(req) => &req.url,
            RequestDescriptor::Probe(req) => &req.url,
        }
    }

    /// Canonical serialization: kind tag first, then fields in declaration order.
    pub fn canonical(&self) -> String {
        // Serializing plain structs and enums into a String cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Derive the cache and lock key for this descriptor
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        Fingerprint(format!("{}-{}", self.kind(), hex::encode(hasher.finalize())))
    }
}

/// Stable key derived from a [`RequestDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: Option<u32>, format: ImageFormat) -> RequestDescriptor {
        RequestDescriptor::Image(ImageRequest {
            url: "https://example.com/a.png".to_string(),
            width,
            height: None,
            quality: 75,
            format,
        })
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = image(Some(200), ImageFormat::Webp);
        let b = image(Some(200), ImageFormat::Webp);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let fp = a.fingerprint();
        let (kind, digest) = fp.as_str().split_once('-').unwrap();
        assert_eq!(kind, "image");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let first: RequestDescriptor = serde_json::from_str(
            r#"{"kind":"image","url":"https://example.com/a.png","width":200,"height":null,"quality":75,"format":"webp"}"#,
        )
        .unwrap();
        let permuted: RequestDescriptor = serde_json::from_str(
            r#"{"format":"webp","quality":75,"height":null,"width":200,"url":"https://example.com/a.png","kind":"image"}"#,
        )
        .unwrap();
        assert_eq!(first.fingerprint(), permuted.fingerprint());
        assert_eq!(first.fingerprint(), image(Some(200), ImageFormat::Webp).fingerprint());
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = image(Some(200), ImageFormat::Webp);
        let other_format = image(Some(200), ImageFormat::Jpeg);
        let other_width = image(Some(201), ImageFormat::Webp);
        let no_width = image(None, ImageFormat::Webp);
        let other_quality = RequestDescriptor::Image(ImageRequest {
            url: "https://example.com/a.png".to_string(),
            width: Some(200),
            height: None,
            quality: 80,
            format: ImageFormat::Webp,
        });

        let fps = [
            base.fingerprint(),
            other_format.fingerprint(),
            other_width.fingerprint(),
            no_width.fingerprint(),
            other_quality.fingerprint(),
        ];
        for (i, a) in fps.iter().enumerate() {
            for b in fps.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_fingerprint_namespaced_by_kind() {
        let url = "https://example.com/clip.gif".to_string();
        let probe = RequestDescriptor::Probe(ProbeRequest { url: url.clone() });
        let animation = RequestDescriptor::Animation(AnimationRequest {
            url,
            format: AnimationFormat::Mp4,
        });
        assert!(probe.fingerprint().as_str().starts_with("probe-"));
        assert!(animation.fingerprint().as_str().starts_with("animation-"));
        assert_ne!(probe.fingerprint(), animation.fingerprint());
    }

    #[test]
    fn test_quality_defaults_when_absent() {
        let parsed: RequestDescriptor = serde_json::from_str(
            r#"{"kind":"image","url":"https://example.com/a.png","width":null,"height":null,"format":"jpeg"}"#,
        )
        .unwrap();
        match parsed {
            RequestDescriptor::Image(req) => assert_eq!(req.quality, DEFAULT_QUALITY),
            other => panic!("unexpected descriptor {:?}", other),
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(ImageFormat::parse("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("image/webp"), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::parse("avif"), Some(ImageFormat::Avif));
        assert_eq!(ImageFormat::parse("image/gif"), None);
        assert_eq!(AnimationFormat::parse("WEBM"), Some(AnimationFormat::Webm));
        assert_eq!(AnimationFormat::parse("gif"), None);
    }
}
