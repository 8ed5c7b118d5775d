//! Thumbnail payload decoding.
//!
//! | Encoding | Decode | Output |
//! |---|---|---|
//! | `embedded_base64` | strip `; ` prefixes, standard base64 | PNG bytes, verbatim |
//! | `mks_hex` | strip marker and `M10086 ;`, hex | RGB565 → RGB8 → PNG |
//!
//! Every failure is a [`DecodeError`]. The extraction engine treats any of
//! them exactly like a file without a thumbnail.

use crate::scanner::{Dimensions, GIMAGE_MARKER, MKS_SENTINEL, SIMAGE_MARKER, ThumbnailBlock};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded payload is not a PNG image")]
    NotPng,
    #[error("invalid hex payload: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("pixel data too short for {dimensions}: expected {expected} bytes, got {actual}")]
    DimensionMismatch {
        dimensions: Dimensions,
        expected: usize,
        actual: usize,
    },
    #[error("no ;;gimage: or ;simage: block among candidates")]
    NoKnownMarker,
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Decode an `embedded_base64` payload into PNG bytes.
///
/// Characters outside the base64 alphabet (line breaks, stray `;`) are
/// discarded before decoding.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let cleaned: String = payload
        .replace("; ", "")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();
    let bytes = STANDARD.decode(cleaned)?;
    match image::guess_format(&bytes) {
        Ok(ImageFormat::Png) => Ok(bytes),
        _ => Err(DecodeError::NotPng),
    }
}

/// Pick the `mks_hex` span to decode.
///
/// `;;gimage:` (200×200) always wins over `;simage:` (100×100), whatever the
/// payload sizes. Returns the implied dimensions and the span with its
/// marker stripped.
pub fn best_mks_block(blocks: &[ThumbnailBlock]) -> Option<(Dimensions, &str)> {
    [(GIMAGE_MARKER, 200), (SIMAGE_MARKER, 100)]
        .into_iter()
        .find_map(|(marker, side)| {
            blocks
                .iter()
                .find_map(|block| block.payload.strip_prefix(marker))
                .map(|rest| (Dimensions::square(side), rest))
        })
}

/// Decode the best `mks_hex` span among `blocks` into PNG bytes.
pub fn decode_mks(blocks: &[ThumbnailBlock]) -> Result<Vec<u8>, DecodeError> {
    let (dimensions, encoded) = best_mks_block(blocks).ok_or(DecodeError::NoKnownMarker)?;
    let hex_text: String = encoded
        .replace(MKS_SENTINEL, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let pixels = hex::decode(hex_text)?;
    let image = unpack_bgr565(&pixels, dimensions)?;
    encode_png(&image)
}

/// Unpack little-endian 16-bit pixels, red in the low five bits and blue in
/// the high five, into an 8-bit RGB image. Surplus trailing bytes are ignored.
fn unpack_bgr565(data: &[u8], dimensions: Dimensions) -> Result<RgbImage, DecodeError> {
    let expected = dimensions.width as usize * dimensions.height as usize * 2;
    if data.len() < expected {
        return Err(DecodeError::DimensionMismatch {
            dimensions,
            expected,
            actual: data.len(),
        });
    }

    let mut image = RgbImage::new(dimensions.width, dimensions.height);
    for (pixel, sample) in image.pixels_mut().zip(data.chunks_exact(2)) {
        let value = u16::from_le_bytes([sample[0], sample[1]]);
        *pixel = Rgb([
            expand(value & 0x1f, 31),
            expand((value >> 5) & 0x3f, 63),
            expand(value >> 11, 31),
        ]);
    }
    Ok(image)
}

/// Scale an n-bit channel sample to 0–255.
fn expand(sample: u16, max: u16) -> u8 {
    (u32::from(sample) * 255 / u32::from(max)) as u8
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, DecodeError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
