//! Bounded-box thumbnail generation.
//!
//! Decoding, resizing and encoding are CPU bound; async callers go through
//! [`Thumbnailer::render`], which runs the work on the blocking pool.

use bytes::Bytes;
use image::{
    ColorType, DynamicImage, ImageFormat, ImageOutputFormat, Rgb, RgbImage, imageops::FilterType,
    io::Reader as ImageReader,
};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MAX_WIDTH: u32 = 100;
pub const DEFAULT_MAX_HEIGHT: u32 = 100;

/// Quality used when re-encoding JPEG sources.
const JPEG_QUALITY: u8 = 85;

/// Output of the format every thumbnail falls back to.
const FALLBACK_FORMAT: ImageFormat = ImageFormat::Png;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("source is not a valid image: {0}")]
    Decode(String),
    #[error("failed to encode thumbnail: {0}")]
    Encode(String),
}

#[derive(Debug, Clone)]
pub struct ThumbnailResult {
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl ThumbnailResult {
    pub fn content_type(&self) -> &'static str {
        content_type_for(self.format)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Thumbnailer {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for Thumbnailer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIDTH, DEFAULT_MAX_HEIGHT)
    }
}

impl Thumbnailer {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
        }
    }

    /// Decode `raw`, shrink it into the bounding box and re-encode it in the
    /// source format, or PNG when that format cannot be written.
    pub fn make_thumbnail(&self, raw: &[u8]) -> Result<ThumbnailResult, ThumbnailError> {
        let reader = ImageReader::new(Cursor::new(raw))
            .with_guessed_format()
            .map_err(|err| ThumbnailError::Decode(err.to_string()))?;
        let source_format = reader.format();
        let img = reader
            .decode()
            .map_err(|err| ThumbnailError::Decode(err.to_string()))?;

        let (width, height) =
            target_dimensions(img.width(), img.height(), self.max_width, self.max_height);
        let resized = if (width, height) == (img.width(), img.height()) {
            img
        } else {
            img.resize_exact(width, height, FilterType::Lanczos3)
        };

        if let Some(format) = source_format.filter(|f| output_format(*f).is_some()) {
            match encode(&resized, format) {
                Ok(bytes) => {
                    return Ok(ThumbnailResult {
                        bytes,
                        format,
                        width,
                        height,
                    });
                }
                Err(err) => debug!("re-encoding as {:?} failed, falling back to PNG: {}", format, err),
            }
        }

        let bytes = encode(&resized, FALLBACK_FORMAT)?;
        Ok(ThumbnailResult {
            bytes,
            format: FALLBACK_FORMAT,
            width,
            height,
        })
    }

    pub async fn render(&self, raw: Bytes) -> Result<ThumbnailResult, ThumbnailError> {
        let thumbnailer = *self;
        tokio::task::spawn_blocking(move || thumbnailer.make_thumbnail(&raw))
            .await
            .map_err(|err| ThumbnailError::Encode(format!("thumbnail task failed: {}", err)))?
    }
}

/// Fit `width`×`height` into the box without upscaling. Integer math keeps
/// the floor exact; each side is at least one pixel.
pub fn target_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width.max(1), height.max(1));
    }
    let (w, h) = (u64::from(width), u64::from(height));
    let (mw, mh) = (u64::from(max_width), u64::from(max_height));

    // Width is the limiting side when mw / w <= mh / h.
    if mw * h <= mh * w {
        (max_width, ((h * mw) / w).max(1) as u32)
    } else {
        (((w * mh) / h).max(1) as u32, max_height)
    }
}

fn output_format(format: ImageFormat) -> Option<ImageOutputFormat> {
    match format {
        ImageFormat::Png => Some(ImageOutputFormat::Png),
        ImageFormat::Jpeg => Some(ImageOutputFormat::Jpeg(JPEG_QUALITY)),
        ImageFormat::Gif => Some(ImageOutputFormat::Gif),
        ImageFormat::Bmp => Some(ImageOutputFormat::Bmp),
        ImageFormat::Tiff => Some(ImageOutputFormat::Tiff),
        _ => None,
    }
}

pub fn content_type_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::WebP => "image/webp",
        _ => "application/octet-stream",
    }
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Bytes, ThumbnailError> {
    let target = output_format(format)
        .ok_or_else(|| ThumbnailError::Encode(format!("{:?} has no encoder", format)))?;
    let prepared = prepare_for(img, format);

    let mut buf = Cursor::new(Vec::new());
    prepared
        .write_to(&mut buf, target)
        .map_err(|err| ThumbnailError::Encode(err.to_string()))?;
    Ok(Bytes::from(buf.into_inner()))
}

/// Convert pixels into a layout the target encoder accepts.
fn prepare_for(img: &DynamicImage, format: ImageFormat) -> DynamicImage {
    match format {
        ImageFormat::Jpeg if img.color().has_alpha() => flatten_onto_white(img),
        ImageFormat::Jpeg => match img.color() {
            ColorType::L8 | ColorType::Rgb8 => img.clone(),
            _ => DynamicImage::ImageRgb8(img.to_rgb8()),
        },
        ImageFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => match img.color() {
            ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => img.clone(),
            _ => DynamicImage::ImageRgba8(img.to_rgba8()),
        },
    }
}

fn flatten_onto_white(img: &DynamicImage) -> DynamicImage {
    let rgba = img.to_rgba8();
    let rgb = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    });
    DynamicImage::ImageRgb8(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{
        GenericImageView, ImageBuffer, Rgba, RgbaImage,
        codecs::pnm::{PnmSubtype, SampleEncoding},
    };

    fn encoded(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn dimensions_fit_box_and_keep_aspect() {
        assert_eq!(target_dimensions(400, 200, 100, 100), (100, 50));
        assert_eq!(target_dimensions(200, 400, 100, 100), (50, 100));
        assert_eq!(target_dimensions(1000, 1, 100, 100), (100, 1));
        assert_eq!(target_dimensions(333, 1000, 100, 100), (33, 100));
    }

    #[test]
    fn small_images_are_never_upscaled() {
        assert_eq!(target_dimensions(40, 30, 100, 100), (40, 30));
        assert_eq!(target_dimensions(100, 100, 100, 100), (100, 100));
    }

    #[test]
    fn dimension_grid_respects_box_and_aspect() {
        for (w, h) in [(1, 1), (7, 3000), (3000, 7), (101, 99), (640, 480), (99, 1001)] {
            let (tw, th) = target_dimensions(w, h, 100, 100);
            assert!(tw >= 1 && th >= 1);
            assert!(tw <= 100 && th <= 100, "{}x{} -> {}x{}", w, h, tw, th);
            assert!(tw <= w && th <= h);
            // tw/th ≈ w/h to within one pixel on the derived side
            let expected_h = f64::from(tw) * f64::from(h) / f64::from(w);
            let expected_w = f64::from(th) * f64::from(w) / f64::from(h);
            assert!(
                (f64::from(th) - expected_h).abs() <= 1.0 || (f64::from(tw) - expected_w).abs() <= 1.0
            );
        }
    }

    #[test]
    fn png_source_stays_png() {
        let raw = encoded(400, 200, ImageOutputFormat::Png);
        let thumb = Thumbnailer::default().make_thumbnail(&raw).unwrap();
        assert_eq!(thumb.format, ImageFormat::Png);
        assert_eq!((thumb.width, thumb.height), (100, 50));
        assert_eq!(thumb.content_type(), "image/png");

        let decoded = image::load_from_memory(&thumb.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
    }

    #[test]
    fn jpeg_source_stays_jpeg() {
        let raw = encoded(150, 300, ImageOutputFormat::Jpeg(90));
        let thumb = Thumbnailer::default().make_thumbnail(&raw).unwrap();
        assert_eq!(thumb.format, ImageFormat::Jpeg);
        assert_eq!((thumb.width, thumb.height), (50, 100));
        assert_eq!(
            image::guess_format(&thumb.bytes).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn unwritable_source_format_falls_back_to_png() {
        let raw = encoded(
            20,
            10,
            ImageOutputFormat::Pnm(PnmSubtype::Pixmap(SampleEncoding::Binary)),
        );
        let thumb = Thumbnailer::default().make_thumbnail(&raw).unwrap();
        assert_eq!(thumb.format, ImageFormat::Png);
        assert_eq!((thumb.width, thumb.height), (20, 10));
        assert_eq!(image::guess_format(&thumb.bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = Thumbnailer::default()
            .make_thumbnail(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode(_)));
    }

    #[test]
    fn custom_box_is_honoured() {
        let raw = encoded(64, 64, ImageOutputFormat::Png);
        let thumb = Thumbnailer::new(16, 32).make_thumbnail(&raw).unwrap();
        assert_eq!((thumb.width, thumb.height), (16, 16));
    }

    #[test]
    fn transparent_pixels_flatten_to_white_for_jpeg() {
        let rgba: RgbaImage = ImageBuffer::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        let flat = flatten_onto_white(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(flat.to_rgb8().get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert!(!flat.color().has_alpha());
    }

    #[tokio::test]
    async fn render_runs_off_the_async_runtime() {
        let raw = Bytes::from(encoded(300, 300, ImageOutputFormat::Png));
        let thumb = Thumbnailer::default().render(raw).await.unwrap();
        assert_eq!((thumb.width, thumb.height), (100, 100));
    }
}
