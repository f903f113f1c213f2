use std::io::Cursor;

use anyhow::Result;
use image::{ImageFormat, Luma};
use qrcode::QrCode;

/// Pixels per QR module.
const MODULE_PX: u32 = 10;

/// Encode `data` as a black-on-white QR code PNG with the standard 4-module
/// quiet zone.
pub fn render_png(data: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(data.as_bytes())?;
    let img = code
        .render::<Luma<u8>>()
        .module_dimensions(MODULE_PX, MODULE_PX)
        .build();

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
