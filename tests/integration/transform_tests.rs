//! Transformer integration tests.
//!
//! Tests verify:
//! - Input formats (PNG, JPEG)
//! - Lossy vs lossless encoding by transparency
//! - Alpha region preservation through transform and re-decode
//! - Tier quality affects output size

use derivative_cache::error::TransformError;
use derivative_cache::{ImageTransformer, QualityTier};

use super::test_utils::{
    alpha_bbox, create_jpeg, create_noisy_png, create_png, create_png_with_hole, image_dimensions,
    is_valid_webp, webp_chunk,
};

#[test]
fn test_jpeg_input() {
    let transformer = ImageTransformer::default();
    let output = transformer
        .transform(&create_jpeg(300, 150), Some(100), None, QualityTier::Preview)
        .unwrap();

    assert!(is_valid_webp(&output));
    assert_eq!(image_dimensions(&output), (100, 50));
}

#[test]
fn test_opaque_input_encodes_lossy() {
    let transformer = ImageTransformer::default();
    let output = transformer
        .transform(&create_png(64, 64), None, None, QualityTier::Full)
        .unwrap();
    assert_eq!(webp_chunk(&output), b"VP8 ");
}

#[test]
fn test_transparent_input_encodes_lossless() {
    let transformer = ImageTransformer::default();
    let output = transformer
        .transform(
            &create_png_with_hole(64, 64, (8, 8, 16, 16)),
            None,
            None,
            QualityTier::Thumbnail,
        )
        .unwrap();
    assert_eq!(webp_chunk(&output), b"VP8L");
}

#[test]
fn test_transparency_bbox_preserved() {
    let region = (16, 8, 32, 40);
    let source = create_png_with_hole(64, 64, region);
    assert_eq!(alpha_bbox(&source, u8::MAX), Some(region));

    let transformer = ImageTransformer::default();
    let output = transformer
        .transform(&source, None, None, QualityTier::Thumbnail)
        .unwrap();

    assert_eq!(alpha_bbox(&output, u8::MAX), Some(region));
}

#[test]
fn test_transparency_bbox_survives_resize() {
    let source = create_png_with_hole(128, 128, (32, 32, 96, 96));

    let transformer = ImageTransformer::default();
    let output = transformer
        .transform(&source, Some(64), None, QualityTier::Preview)
        .unwrap();
    assert_eq!(image_dimensions(&output), (64, 64));

    // Fully transparent core at half scale is (16, 16)-(48, 48); Lanczos
    // blends a pixel or two at the edges
    let (x0, y0, x1, y1) = alpha_bbox(&output, 128).unwrap();
    for (actual, expected) in [(x0, 16), (y0, 16), (x1, 48), (y1, 48)] {
        assert!(
            actual.abs_diff(expected) <= 2,
            "bbox edge {} too far from {}",
            actual,
            expected
        );
    }
}

#[test]
fn test_higher_tier_is_larger() {
    let source = create_noisy_png(128, 128);
    let transformer = ImageTransformer::default();

    let thumbnail = transformer
        .transform(&source, None, None, QualityTier::Thumbnail)
        .unwrap();
    let full = transformer
        .transform(&source, None, None, QualityTier::Full)
        .unwrap();

    assert!(
        full.len() > thumbnail.len(),
        "full ({}) should be larger than thumbnail ({})",
        full.len(),
        thumbnail.len()
    );
}

#[test]
fn test_truncated_input_is_decode_error() {
    let mut source = create_png(64, 64);
    source.truncate(source.len() / 2);

    let transformer = ImageTransformer::default();
    let err = transformer
        .transform(&source, None, None, QualityTier::Preview)
        .unwrap_err();
    assert!(matches!(err, TransformError::DecodeError { .. }));
}
