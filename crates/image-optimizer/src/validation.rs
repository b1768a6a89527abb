//! Query-string validation for `GET /`

use crate::error::{OptimizerError, Result};
use crate::transform::MAX_DIMENSION;
use image_cache::{ImageFormat, RequestDescriptor};
use serde::Deserialize;
use url::Url;

const DEFAULT_FORMAT: ImageFormat = ImageFormat::Webp;
const DEFAULT_QUALITY: u8 = 80;

/// Raw query parameters; everything is optional until validated
#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    pub url: Option<String>,
    pub w: Option<String>,
    pub h: Option<String>,
    pub f: Option<String>,
    pub q: Option<String>,
}

fn invalid(msg: &str) -> OptimizerError {
    OptimizerError::Validation(msg.to_string())
}

/// Treat absent and empty parameters alike
fn param(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a number, truncating any fractional part
fn number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|n| n.is_finite()).map(f64::trunc)
}

fn dimension(value: &Option<String>) -> Result<u32> {
    let Some(raw) = param(value) else {
        return Ok(0);
    };

    match number(raw) {
        Some(n) if n < 0.0 => Err(invalid(
            "Width and height must be greater than or equal to 0.",
        )),
        Some(n) if n > MAX_DIMENSION as f64 => Err(OptimizerError::Validation(format!(
            "Width and height must not exceed {}.",
            MAX_DIMENSION
        ))),
        Some(n) => Ok(n as u32),
        None => Err(invalid(
            "Width and height must be greater than or equal to 0.",
        )),
    }
}

/// Turn a raw query into the descriptor that keys the cache
pub fn validate(query: &ImageQuery) -> Result<RequestDescriptor> {
    let url = param(&query.url).ok_or_else(|| invalid("url is required."))?;

    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => return Err(invalid("url must be an absolute http(s) URL.")),
    }

    let format = match param(&query.f) {
        Some(f) => f.parse::<ImageFormat>().map_err(|_| invalid("Invalid format."))?,
        None => DEFAULT_FORMAT,
    };

    let quality = match param(&query.q) {
        Some(q) => match number(q) {
            Some(n) if (0.0..=100.0).contains(&n) => n as u8,
            _ => return Err(invalid("Quality must be between 0 and 100.")),
        },
        None => DEFAULT_QUALITY,
    };

    let width = dimension(&query.w)?;
    let height = dimension(&query.h)?;

    Ok(RequestDescriptor::new(url, width, height, format, quality))
}
