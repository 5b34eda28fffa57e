//! Image encoding: `DynamicImage` → base64 PNG for the model payload.
//!
//! Vision APIs accept images as base64 data-URIs embedded in the JSON request
//! body. PNG is chosen over JPEG because it is lossless — node-label crispness
//! matters far more than payload size for transcription accuracy, and JPEG
//! artefacts around thin connector lines confuse vision models.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A model-ready image: base64 payload plus its MIME type.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

impl EncodedImage {
    /// Render as a `data:` URI for OpenAI-compatible request bodies.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Encode a tile (or whole page) as a base64 PNG.
pub fn encode_tile(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded tile → {} bytes base64", b64.len());

    Ok(EncodedImage {
        data: b64,
        mime_type: "image/png".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let data = encode_tile(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(b"\x89PNG\r\n\x1a\n"));
    }

    #[test]
    fn data_uri_has_expected_prefix() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])));
        let uri = encode_tile(&img).unwrap().to_data_uri();
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
