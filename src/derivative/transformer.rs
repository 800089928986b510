//! Image transformer.
//!
//! Decodes an original, resizes it and re-encodes it as WebP.
//!
//! # Resize policy
//!
//! - Both `width` and `height`: resized to exactly that size. Aspect ratio is
//!   not preserved; callers asking for both get what they asked for.
//! - Only one of them: the other is derived from the original aspect ratio,
//!   rounded to the nearest pixel (never below 1).
//! - Neither: served at the original size.
//!
//! A derived axis is bounded too: if it would exceed the transformer's
//! `max_dimension`, both axes are scaled down together until it fits.
//!
//! Resampling always uses Lanczos3.
//!
//! # Encoding policy
//!
//! Originals with at least one non-opaque pixel are encoded losslessly so the
//! alpha channel survives exactly. Everything else is encoded lossy at the
//! tier's quality.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageReader};

use super::quality::{QualityPolicy, QualityTier};
use super::service::DEFAULT_MAX_DIMENSION;
use crate::error::TransformError;

/// Content type of every derivative.
pub const WEBP_CONTENT_TYPE: &str = "image/webp";

/// Resampling filter used for every resize.
pub const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// Largest width or height a WebP image can have.
pub const WEBP_MAX_DIMENSION: u32 = 16383;

/// Decodes, resizes and re-encodes originals as WebP.
///
/// The transformer is stateless apart from its quality policy and is cheap
/// to clone. All methods are CPU-bound and blocking; async callers should run
/// them on a blocking thread.
#[derive(Debug, Clone)]
pub struct ImageTransformer {
    policy: QualityPolicy,
    max_dimension: u32,
}

impl Default for ImageTransformer {
    fn default() -> Self {
        Self::new(QualityPolicy::default())
    }
}

impl ImageTransformer {
    /// Create a transformer encoding tiers with the given policy.
    pub fn new(policy: QualityPolicy) -> Self {
        Self {
            policy,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    /// Bound every resized axis to `max_dimension` (at most the WebP limit).
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension.clamp(1, WEBP_MAX_DIMENSION);
        self
    }

    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Produce the WebP derivative of `source`.
    ///
    /// # Errors
    ///
    /// - `DecodeError` if `source` is not a supported, intact image
    /// - `EncodeError` if WebP encoding fails
    pub fn transform(
        &self,
        source: &[u8],
        width: Option<u32>,
        height: Option<u32>,
        tier: QualityTier,
    ) -> Result<Bytes, TransformError> {
        let img = decode(source)?;

        // Decided on the original so resampling at alpha edges cannot flip it
        let lossless = has_transparency(&img);

        let original = (img.width(), img.height());
        let img = match target_dimensions(original, width, height, self.max_dimension) {
            Some((w, h)) if (w, h) != (img.width(), img.height()) => {
                img.resize_exact(w, h, RESIZE_FILTER)
            }
            _ => img,
        };

        if lossless {
            encode_lossless(&img)
        } else {
            encode_lossy(&img, self.policy.encode_quality(tier))
        }
    }
}

/// Compute the output size for a resize request.
///
/// Neither returned axis exceeds `max`. When the derived axis would, it is
/// pinned to `max` and the requested axis shrinks to keep the aspect ratio.
///
/// Returns `None` when no resize was requested.
pub fn target_dimensions(
    original: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    max: u32,
) -> Option<(u32, u32)> {
    let (orig_w, orig_h) = original;
    let max = max.max(1);
    match (width, height) {
        (Some(w), Some(h)) => Some((w.min(max), h.min(max))),
        (Some(w), None) => {
            let w = w.min(max);
            let h = scale_axis(orig_h, w, orig_w);
            if h > max {
                Some((scale_axis(orig_w, max, orig_h), max))
            } else {
                Some((w, h))
            }
        }
        (None, Some(h)) => {
            let h = h.min(max);
            let w = scale_axis(orig_w, h, orig_h);
            if w > max {
                Some((max, scale_axis(orig_h, max, orig_w)))
            } else {
                Some((w, h))
            }
        }
        (None, None) => None,
    }
}

/// `other * requested / reference`, rounded to nearest and at least 1.
fn scale_axis(other: u32, requested: u32, reference: u32) -> u32 {
    if reference == 0 {
        return requested.max(1);
    }
    let scaled = f64::from(other) * f64::from(requested) / f64::from(reference);
    // `as` saturates, so absurd ratios land on u32::MAX and get pinned by the caller
    (scaled.round() as u32).max(1)
}

/// Returns `true` if the image has an alpha channel with any non-opaque pixel.
pub fn has_transparency(img: &DynamicImage) -> bool {
    match img {
        DynamicImage::ImageRgba8(buf) => buf.pixels().any(|p| p[3] < u8::MAX),
        DynamicImage::ImageLumaA8(buf) => buf.pixels().any(|p| p[1] < u8::MAX),
        DynamicImage::ImageRgba16(buf) => buf.pixels().any(|p| p[3] < u16::MAX),
        DynamicImage::ImageLumaA16(buf) => buf.pixels().any(|p| p[1] < u16::MAX),
        other if other.color().has_alpha() => {
            other.to_rgba8().pixels().any(|p| p[3] < u8::MAX)
        }
        _ => false,
    }
}

fn decode(source: &[u8]) -> Result<DynamicImage, TransformError> {
    ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(|e| TransformError::DecodeError {
            message: e.to_string(),
        })?
        .decode()
        .map_err(|e| TransformError::DecodeError {
            message: e.to_string(),
        })
}

fn encode_lossless(img: &DynamicImage) -> Result<Bytes, TransformError> {
    let rgba = img.to_rgba8();
    let mut output = Vec::new();

    WebPEncoder::new_lossless(&mut output)
        .encode(
            rgba.as_raw(),
            rgba.width(),
            rgba.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| TransformError::EncodeError {
            message: e.to_string(),
        })?;

    Ok(Bytes::from(output))
}

fn encode_lossy(img: &DynamicImage, quality: u8) -> Result<Bytes, TransformError> {
    let rgb = img.to_rgb8();

    let encoded = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
        .encode_simple(false, f32::from(quality))
        .map_err(|e| TransformError::EncodeError {
            message: format!("{:?}", e),
        })?;

    Ok(Bytes::copy_from_slice(&encoded))
}
