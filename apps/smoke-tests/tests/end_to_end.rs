use anyhow::Result;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use pixmill_codec::RasterCodec;
use pixmill_core::{
    find_quality_for_target, matte, process, Codec, OutputFormat, ProcessRequest, Transform,
};
use pixmill_image::{format_file_size, SizeSpec};

fn encode_png(img: RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// Opaque single-color upload, as from a camera or screenshot.
fn flat_upload(width: u32, height: u32) -> Result<Vec<u8>> {
    encode_png(RgbImage::from_pixel(width, height, Rgb([120, 80, 40])))
}

/// Busy photo-like content so lossy sizes spread over a usable range.
fn noisy_upload(width: u32, height: u32) -> Result<Vec<u8>> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let seed = x.wrapping_mul(31).wrapping_add(y.wrapping_mul(17));
        Rgb([
            (seed.wrapping_mul(7) % 256) as u8,
            (seed.wrapping_mul(13) % 256) as u8,
            (seed.wrapping_mul(23) % 256) as u8,
        ])
    });
    encode_png(img)
}

#[test]
fn resize_upload_to_preset_dimensions() -> Result<()> {
    let codec = RasterCodec;
    let source_bytes = flat_upload(2000, 1000)?;

    let spec = SizeSpec::Pixels {
        width: 1080,
        height: 1080,
    };
    let (width, height) = spec.resolve(2000, 1000);
    let request = ProcessRequest {
        source_bytes,
        transform: Transform::Resize {
            width,
            height,
            format: OutputFormat::Png,
            quality: None,
        },
    };
    let result = process(&codec, &request)?;
    assert_eq!((result.width, result.height), (1080, 1080));
    assert_eq!(result.image.format, OutputFormat::Png);

    // Round-trip the output and verify it stayed fully opaque.
    let decoded = codec.decode(&result.image.bytes)?;
    assert_eq!((decoded.width(), decoded.height()), (1080, 1080));
    assert!(decoded.data().chunks_exact(4).all(|px| px[3] == 255));
    Ok(())
}

#[test]
fn percent_resize_uses_original_dimensions() -> Result<()> {
    let codec = RasterCodec;
    let source_bytes = flat_upload(400, 300)?;
    let spec = SizeSpec::Percent {
        width_pct: 50.0,
        height_pct: 50.0,
    };
    let (width, height) = spec.resolve(400, 300);
    let request = ProcessRequest {
        source_bytes,
        transform: Transform::Resize {
            width,
            height,
            format: OutputFormat::Png,
            quality: None,
        },
    };
    let result = process(&codec, &request)?;
    assert_eq!((result.width, result.height), (200, 150));
    Ok(())
}

#[test]
fn compress_to_target_is_exact_or_flagged() -> Result<()> {
    let codec = RasterCodec;
    let source_bytes = noisy_upload(512, 512)?;
    let target_bytes: u64 = 300 * 1024;

    let request = ProcessRequest {
        source_bytes,
        transform: Transform::CompressToSize {
            target_bytes,
            format: OutputFormat::Jpeg,
        },
    };
    let result = process(&codec, &request)?;
    let found = result.quality.expect("compress reports a quality result");

    assert_eq!(result.image.len(), found.actual_size);
    let diff = found.actual_size.abs_diff(target_bytes);
    if found.is_exact {
        assert!(diff as f64 <= target_bytes as f64 * 0.005);
    }
    // Download convention: jpeg results carry a .jpg extension.
    assert_eq!(result.image.format.extension(), "jpg");
    Ok(())
}

#[test]
fn solver_boundaries_against_real_encoder() -> Result<()> {
    let codec = RasterCodec;
    let buffer = codec.decode(&noisy_upload(64, 64)?)?;

    let huge = find_quality_for_target(&codec, &buffer, OutputFormat::Jpeg, 100_000_000)?;
    assert_eq!(huge.quality, 100);
    assert!(!huge.is_exact);

    let tiny = find_quality_for_target(&codec, &buffer, OutputFormat::Jpeg, 1)?;
    assert_eq!(tiny.quality, 1);
    assert!(!tiny.is_exact);
    Ok(())
}

#[test]
fn background_removal_end_to_end() -> Result<()> {
    let codec = RasterCodec;
    // White background with a saturated red block in the middle.
    let img = RgbImage::from_fn(64, 64, |x, y| {
        if (20..44).contains(&x) && (20..44).contains(&y) {
            Rgb([255, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    });
    let request = ProcessRequest {
        source_bytes: encode_png(img)?,
        transform: Transform::RemoveBackground {
            threshold: matte::DEFAULT_THRESHOLD,
        },
    };
    let result = process(&codec, &request)?;
    // Alpha output is always PNG, whatever was asked for downstream.
    assert_eq!(result.image.format, OutputFormat::Png);

    let decoded = codec.decode(&result.image.bytes)?;
    // Background matches the corner average exactly: fully transparent.
    assert_eq!(decoded.pixel(0, 0)[3], 0);
    assert_eq!(decoded.pixel(63, 63)[3], 0);
    // Red is far beyond 2x threshold from white: untouched.
    assert_eq!(decoded.pixel(32, 32), [255, 0, 0, 255]);
    Ok(())
}

#[test]
fn png_round_trip_preserves_matte_alpha() -> Result<()> {
    let codec = RasterCodec;
    let source = codec.decode(&flat_upload(16, 16)?)?;
    let matted = matte::remove_background(&source, matte::DEFAULT_THRESHOLD);
    let encoded = codec.encode(&matted, OutputFormat::Png, None)?;
    let decoded = codec.decode(&encoded.bytes)?;
    assert_eq!(decoded, matted);
    Ok(())
}

#[test]
fn reported_sizes_are_human_readable() -> Result<()> {
    let codec = RasterCodec;
    let source_bytes = flat_upload(32, 32)?;
    let request = ProcessRequest {
        source_bytes,
        transform: Transform::Convert {
            format: OutputFormat::Png,
            quality: None,
        },
    };
    let result = process(&codec, &request)?;
    let label = format_file_size(result.image.len());
    assert!(label.ends_with("Bytes") || label.ends_with("KB"));
    Ok(())
}
