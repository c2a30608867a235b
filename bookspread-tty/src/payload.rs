use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bookspread_core::ImagePayload;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use png::{BitDepth, ColorType, Encoder};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not a base64 data uri")]
    NotDataUri,

    #[error("invalid base64 in payload")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not a readable image")]
    Image(#[from] image::ImageError),

    #[error("failed to encode page as png")]
    Encode(#[from] png::EncodingError),
}

/// A page ready for the kitty protocol: PNG bytes plus pixel size.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    pub png: Bytes,
}

pub fn decode_payload(payload: &ImagePayload) -> Result<PageImage, DecodeError> {
    let data = data_uri_body(payload.as_str())?;
    let raw = BASE64.decode(data.trim())?;
    let format = image::guess_format(&raw)?;
    let decoded = image::load_from_memory_with_format(&raw, format)?;

    let png = if format == ImageFormat::Png {
        Bytes::from(raw)
    } else {
        debug!(?format, "re-encoding page image as png");
        encode_png(&decoded)?
    };
    Ok(PageImage {
        width: decoded.width(),
        height: decoded.height(),
        png,
    })
}

fn data_uri_body(uri: &str) -> Result<&str, DecodeError> {
    let rest = uri.strip_prefix("data:").ok_or(DecodeError::NotDataUri)?;
    let (header, body) = rest.split_once(',').ok_or(DecodeError::NotDataUri)?;
    if !header.ends_with(";base64") {
        return Err(DecodeError::NotDataUri);
    }
    Ok(body)
}

fn encode_png(image: &DynamicImage) -> Result<Bytes, DecodeError> {
    let rgba = image.to_rgba8();
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, rgba.width(), rgba.height());
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgba.as_raw())?;
    writer.finish()?;
    Ok(Bytes::from(buffer))
}
