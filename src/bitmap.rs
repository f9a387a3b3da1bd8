use anyhow::{bail, Context, Result};
use base64::Engine as _;
use eframe::egui::ColorImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSlice {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedSlice {
    pub fn to_color_image(&self) -> ColorImage {
        let width = self.width as usize;
        let height = self.height as usize;
        let expected = width.saturating_mul(height).saturating_mul(4);
        if self.rgba.len() == expected {
            return ColorImage::from_rgba_unmultiplied([width, height], &self.rgba);
        }

        // Short buffers are padded with black rather than rejected so a bad
        // frame never takes the viewport down.
        let mut padded = self.rgba.clone();
        padded.resize(expected, 0);
        ColorImage::from_rgba_unmultiplied([width, height], &padded)
    }
}

pub fn decode_bitmap(encoded: &str) -> Result<DecodedSlice> {
    let payload = strip_data_url_prefix(encoded.trim());
    if payload.is_empty() {
        bail!("Image service returned an empty bitmap");
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("Bitmap is not valid base64")?;
    let decoded = image::load_from_memory(&bytes)
        .context("Bitmap could not be decoded as an image")?
        .to_rgba8();

    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        bail!("Bitmap has no pixels ({width}x{height})");
    }

    Ok(DecodedSlice {
        width,
        height,
        rgba: decoded.into_raw(),
    })
}

fn strip_data_url_prefix(value: &str) -> &str {
    if value.len() >= 5 && value[..5].eq_ignore_ascii_case("data:") {
        if let Some((_, payload)) = value.split_once(',') {
            return payload;
        }
    }
    value
}
