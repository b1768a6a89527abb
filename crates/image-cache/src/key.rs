//! Cache key derivation
//!
//! A [`CacheKey`] is the lowercase hex SHA-256 digest of a request's canonical
//! form, `url|w<width>|h<height>|f<format>|q<quality>`.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a hex-encoded SHA-256 digest
pub const KEY_LEN: usize = 64;

/// Output encodings the optimizer can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Webp,
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = CacheError;

    /// Format names are matched exactly; `JPEG` or `jpg` are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webp" => Ok(ImageFormat::Webp),
            "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            other => Err(CacheError::InvalidFormat(other.to_string())),
        }
    }
}

/// Everything that determines the bytes of a processed image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub source_url: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub quality: u8,
}

impl RequestDescriptor {
    pub fn new(
        source_url: impl Into<String>,
        width: u32,
        height: u32,
        format: ImageFormat,
        quality: u8,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            width,
            height,
            format,
            quality,
        }
    }

    /// The exact string hashed into the cache key
    pub fn canonical(&self) -> String {
        format!(
            "{}|w{}|h{}|f{}|q{}",
            self.source_url, self.width, self.height, self.format, self.quality
        )
    }
}

/// Fixed-length lowercase hex fingerprint of a [`RequestDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(descriptor: &RequestDescriptor) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(descriptor.canonical().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First- and second-level shard directory names
    pub fn shards(&self) -> (&str, &str) {
        (&self.0[0..2], &self.0[2..4])
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == KEY_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(CacheError::InvalidKey(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the cache key for a request
pub fn derive_key(descriptor: &RequestDescriptor) -> CacheKey {
    CacheKey::derive(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor::new("https://example.com/cat.png", 300, 200, ImageFormat::Webp, 80)
    }

    #[test]
    fn test_canonical_form() {
        assert_eq!(
            descriptor().canonical(),
            "https://example.com/cat.png|w300|h200|fwebp|q80"
        );
    }

    #[test]
    fn test_known_digest() {
        let key = derive_key(&descriptor());
        assert_eq!(
            key.as_str(),
            "dc1bd9918d63a0b298d0c20f739be36547a703ea1d702361b5fde25449e818f2"
        );
        assert_eq!(key.shards(), ("dc", "1b"));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let key1 = derive_key(&descriptor());
        let key2 = derive_key(&descriptor());
        assert_eq!(key1, key2);
        assert_eq!(key1.as_str().len(), KEY_LEN);
        assert!(key1
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_every_field_changes_key() {
        let base = derive_key(&descriptor());

        let variants = [
            RequestDescriptor {
                source_url: "https://example.com/dog.png".to_string(),
                ..descriptor()
            },
            RequestDescriptor {
                width: 301,
                ..descriptor()
            },
            RequestDescriptor {
                height: 201,
                ..descriptor()
            },
            RequestDescriptor {
                format: ImageFormat::Png,
                ..descriptor()
            },
            RequestDescriptor {
                quality: 81,
                ..descriptor()
            },
        ];

        for variant in &variants {
            assert_ne!(derive_key(variant), base, "{:?}", variant);
        }
    }

    #[test]
    fn test_quality_80_vs_81() {
        let q81 = RequestDescriptor {
            quality: 81,
            ..descriptor()
        };
        assert_eq!(
            derive_key(&q81).as_str(),
            "c2cd7cc14ba16735a032f7157d5b3f6953e2a322660a55df6d2741c09fd85a8c"
        );
    }

    #[test]
    fn test_field_tags_prevent_ambiguity() {
        // Concatenated without tags both would read "u123jpeg5".
        let a = RequestDescriptor::new("u", 1, 23, ImageFormat::Jpeg, 5);
        let b = RequestDescriptor::new("u", 12, 3, ImageFormat::Jpeg, 5);
        assert_ne!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn test_parse_key() {
        let key = derive_key(&descriptor());
        let parsed: CacheKey = key.as_str().parse().unwrap();
        assert_eq!(parsed, key);

        assert!("abc".parse::<CacheKey>().is_err());
        assert!("A".repeat(64).parse::<CacheKey>().is_err());
        assert!("g".repeat(64).parse::<CacheKey>().is_err());
        assert!("a".repeat(65).parse::<CacheKey>().is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("webp".parse::<ImageFormat>().unwrap(), ImageFormat::Webp);
        assert_eq!("jpeg".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!("png".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert!("jpg".parse::<ImageFormat>().is_err());
        assert!("PNG".parse::<ImageFormat>().is_err());
        assert!("".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn test_format_content_type() {
        assert_eq!(ImageFormat::Webp.content_type(), "image/webp");
        assert_eq!(ImageFormat::Jpeg.to_string(), "jpeg");
    }

    #[test]
    fn test_key_serializes_as_string() {
        let key = derive_key(&descriptor());
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key));
    }
}
