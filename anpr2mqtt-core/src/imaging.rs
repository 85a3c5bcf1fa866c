//! Image loading and payload size reduction

use crate::config::{JpegOptions, PngCompression, PngFilter, PngOptions};
use crate::error::Result;
use crate::filename::ImageInfo;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, DynamicImage, ImageEncoder, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

/// Decoded image ready for field extraction and publication
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: DynamicImage,
    /// Format of the source, sniffed or taken from the extension
    pub format: Option<ImageFormat>,
    /// Re-encoded bytes, when the image was rewritten in `format`
    pub encoded: Option<Vec<u8>>,
}

impl NormalizedImage {
    /// Bytes to publish for `format`, reusing the re-encoded buffer if it fits
    pub fn payload(&self, format: ImageFormat) -> Result<Vec<u8>> {
        match (&self.encoded, self.format) {
            (Some(encoded), Some(source)) if source == format => Ok(encoded.clone()),
            _ => encode(&self.image, format),
        }
    }
}

/// Open an image and optionally rewrite it to shrink the payload
///
/// The file on disk is never modified. Failures are logged and yield `None`.
pub fn normalize(
    path: &Path,
    image_info: &mut ImageInfo,
    jpeg_opts: &JpegOptions,
    png_opts: &PngOptions,
) -> Option<NormalizedImage> {
    match load_and_rewrite(path, image_info, jpeg_opts, png_opts) {
        Ok(normalized) => Some(normalized),
        Err(e) => {
            warn!("Unable to load image at {}: {}", path.display(), e);
            None
        }
    }
}

fn load_and_rewrite(
    path: &Path,
    image_info: &mut ImageInfo,
    jpeg_opts: &JpegOptions,
    png_opts: &PngOptions,
) -> Result<NormalizedImage> {
    let mut reader = image::io::Reader::open(path)?.with_guessed_format()?;
    let format = reader.format().or_else(|| {
        image_info
            .extension
            .as_deref()
            .and_then(ImageFormat::from_extension)
    });
    if let Some(format) = format {
        reader.set_format(format);
    }
    let image = reader.decode()?;

    let rewritten = match format {
        Some(ImageFormat::Jpeg) if !jpeg_opts.is_empty() => {
            debug!("Rewriting image with {:?}", jpeg_opts);
            Some((ImageFormat::Jpeg, encode_jpeg(&image, jpeg_opts)?))
        }
        Some(ImageFormat::Png) if !png_opts.is_empty() => {
            debug!("Rewriting image with {:?}", png_opts);
            Some((ImageFormat::Png, encode_png(&image, png_opts)?))
        }
        _ => None,
    };

    let Some((format, buffer)) = rewritten else {
        return Ok(NormalizedImage {
            image,
            format,
            encoded: None,
        });
    };

    let size = buffer.len() as u64;
    if size != image_info.size_bytes {
        info!("Image size {} -> {}", image_info.size_bytes, size);
        image_info.size_bytes = size;
    }
    let image = image::load_from_memory_with_format(&buffer, format)?;
    Ok(NormalizedImage {
        image,
        format: Some(format),
        encoded: Some(buffer),
    })
}

/// Output format for a file extension; `jpg` is an alias of JPEG
pub fn output_format(extension: &str) -> Option<ImageFormat> {
    if extension.eq_ignore_ascii_case("jpg") {
        return Some(ImageFormat::Jpeg);
    }
    ImageFormat::from_extension(extension)
}

/// Encode an image with the format's default settings
pub fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    if format == ImageFormat::Jpeg {
        return encode_jpeg(image, &JpegOptions::default());
    }
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format)?;
    Ok(buffer.into_inner())
}

fn encode_jpeg(image: &DynamicImage, opts: &JpegOptions) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let rgb = image.to_rgb8();
    {
        let mut encoder = match opts.quality {
            Some(quality) => JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)),
            None => JpegEncoder::new(&mut buffer),
        };
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
    }
    Ok(buffer)
}

fn encode_png(image: &DynamicImage, opts: &PngOptions) -> Result<Vec<u8>> {
    let compression = match opts.compression {
        Some(PngCompression::Fast) => CompressionType::Fast,
        Some(PngCompression::Best) => CompressionType::Best,
        Some(PngCompression::Default) | None => CompressionType::Default,
    };
    let filter = match opts.filter {
        Some(PngFilter::None) => FilterType::NoFilter,
        Some(PngFilter::Sub) => FilterType::Sub,
        Some(PngFilter::Up) => FilterType::Up,
        Some(PngFilter::Avg) => FilterType::Avg,
        Some(PngFilter::Paeth) => FilterType::Paeth,
        Some(PngFilter::Adaptive) | None => FilterType::Adaptive,
    };

    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, compression, filter);
    match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => {
            encoder.write_image(image.as_bytes(), image.width(), image.height(), image.color())?
        }
        _ => {
            let rgba = image.to_rgba8();
            encoder.write_image(rgba.as_raw(), rgba.width(), rgba.height(), ColorType::Rgba8)?
        }
    }
    Ok(buffer)
}
