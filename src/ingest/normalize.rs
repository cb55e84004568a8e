use std::borrow::Cow;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

/// Negotiated geometry of a captured buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BufferLayout {
    pub width: u32,
    pub height: u32,
    /// Bytes per line as reported by the driver. 0 means tightly packed.
    pub stride: u32,
    pub format: PixelFormat,
}

/// Convert one captured buffer to packed RGB24 of `width * height * 3` bytes.
pub(crate) fn normalize_to_rgb(pixels: &[u8], layout: BufferLayout) -> Result<Vec<u8>> {
    let BufferLayout { width, height, .. } = layout;
    match layout.format {
        PixelFormat::Rgb24 => Ok(packed_rows(pixels, layout, 3, "RGB")?.into_owned()),
        PixelFormat::Yuyv => {
            if width % 2 != 0 {
                return Err(anyhow!("YUYV frame width must be even, got {}", width));
            }
            let packed = packed_rows(pixels, layout, 2, "YUYV")?;
            Ok(yuyv_to_rgb(&packed, width, height))
        }
        PixelFormat::Mjpeg => mjpeg_to_rgb(pixels, width, height),
    }
}

fn plane_len(width: u32, height: u32, bytes_per_pixel: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(bytes_per_pixel))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// Strip per-line padding so rows are contiguous. Borrows when the buffer is
/// already packed.
fn packed_rows<'a>(
    pixels: &'a [u8],
    layout: BufferLayout,
    bytes_per_pixel: u32,
    label: &str,
) -> Result<Cow<'a, [u8]>> {
    let row = plane_len(layout.width, 1, bytes_per_pixel)?;
    let expected = plane_len(layout.width, layout.height, bytes_per_pixel)?;
    let stride = match layout.stride as usize {
        0 => row,
        stride if stride < row => {
            return Err(anyhow!(
                "{} stride {} is shorter than a {}-pixel row",
                label,
                stride,
                layout.width
            ))
        }
        stride => stride,
    };

    let height = layout.height as usize;
    let needed = match height {
        0 => 0,
        h => stride
            .checked_mul(h - 1)
            .and_then(|v| v.checked_add(row))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?,
    };
    if pixels.len() < needed {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            needed,
            pixels.len()
        ));
    }

    if stride == row {
        return Ok(Cow::Borrowed(&pixels[..expected]));
    }
    let mut packed = Vec::with_capacity(expected);
    for line in pixels.chunks(stride).take(height) {
        packed.extend_from_slice(&line[..row]);
    }
    Ok(Cow::Owned(packed))
}

fn yuyv_to_rgb(packed: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    // Y0 U Y1 V covers two pixels sharing chroma.
    for chunk in packed.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    rgb
}

fn mjpeg_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)
        .context("decode MJPG frame")?
        .into_rgb8();
    if decoded.dimensions() != (width, height) {
        return Err(anyhow!(
            "MJPG frame is {}x{}, expected {}x{}",
            decoded.width(),
            decoded.height(),
            width,
            height
        ));
    }
    Ok(decoded.into_raw())
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(width: u32, height: u32, stride: u32, format: PixelFormat) -> BufferLayout {
        BufferLayout {
            width,
            height,
            stride,
            format,
        }
    }

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![128u8, 128, 128, 128, 64, 128, 64, 128];
        let rgb = normalize_to_rgb(&yuyv, layout(4, 1, 0, PixelFormat::Yuyv))?;
        assert_eq!(rgb, vec![128, 128, 128, 128, 128, 128, 64, 64, 64, 64, 64, 64]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() -> Result<()> {
        let pixels = vec![1u8; 9];
        let rgb = normalize_to_rgb(&pixels, layout(1, 3, 0, PixelFormat::Rgb24))?;
        assert_eq!(rgb, pixels);
        assert!(normalize_to_rgb(&pixels, layout(2, 3, 0, PixelFormat::Rgb24)).is_err());
        Ok(())
    }

    #[test]
    fn padded_rgb_rows_are_repacked() -> Result<()> {
        // 2x2 frame, 6 bytes of pixels per row padded to 8
        let pixels = vec![
            1, 2, 3, 4, 5, 6, 0xEE, 0xEE, //
            7, 8, 9, 10, 11, 12, 0xEE, 0xEE,
        ];
        let rgb = normalize_to_rgb(&pixels, layout(2, 2, 8, PixelFormat::Rgb24))?;
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);

        // the last row may omit its padding
        let rgb = normalize_to_rgb(&pixels[..14], layout(2, 2, 8, PixelFormat::Rgb24))?;
        assert_eq!(rgb.len(), 12);
        Ok(())
    }

    #[test]
    fn padded_yuyv_rows_are_repacked() -> Result<()> {
        // 2x2 frame, 4 bytes per row padded to 6; second row is black
        let pixels = vec![128u8, 128, 128, 128, 0xEE, 0xEE, 0, 128, 0, 128, 0xEE, 0xEE];
        let rgb = normalize_to_rgb(&pixels, layout(2, 2, 6, PixelFormat::Yuyv))?;
        assert_eq!(rgb, vec![128, 128, 128, 128, 128, 128, 0, 0, 0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn stride_shorter_than_row_is_rejected() {
        let pixels = vec![0u8; 24];
        assert!(normalize_to_rgb(&pixels, layout(4, 2, 6, PixelFormat::Rgb24)).is_err());
    }

    #[test]
    fn mjpeg_frames_decode() -> Result<()> {
        let image = image::RgbImage::from_pixel(8, 6, image::Rgb([10, 200, 30]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90).encode_image(&image)?;

        let rgb = normalize_to_rgb(&jpeg, layout(8, 6, 0, PixelFormat::Mjpeg))?;
        assert_eq!(rgb.len(), 8 * 6 * 3);
        assert!(normalize_to_rgb(&jpeg, layout(16, 6, 0, PixelFormat::Mjpeg)).is_err());
        Ok(())
    }

    #[test]
    fn fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"NV12"), None);
    }
}
