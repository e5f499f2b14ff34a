//! BMP container writer for 1-bpp rasters.
//!
//! This layout is a wire contract consumed by embedded display clients:
//! 14-byte file header, 40-byte info header, two-entry BGRX palette
//! (black then white), pixel rows bottom-to-top, each row zero-padded to a
//! four-byte boundary. For the 800x480 canvas the output is exactly
//! 54 + 8 + 100 * 480 = 48 062 bytes.

use super::bitmap::Bitmap;

pub const FILE_HEADER_SIZE: usize = 14;
pub const INFO_HEADER_SIZE: usize = 40;
pub const PALETTE_SIZE: usize = 8;
pub const PIXEL_DATA_OFFSET: usize = FILE_HEADER_SIZE + INFO_HEADER_SIZE + PALETTE_SIZE;

/// Bytes per pixel row after padding to a four-byte boundary.
pub fn padded_row_bytes(width: usize) -> usize {
    (width.div_ceil(8) + 3) & !3
}

/// Total encoded file size for a canvas of the given dimensions.
pub fn file_size(width: usize, height: usize) -> usize {
    PIXEL_DATA_OFFSET + padded_row_bytes(width) * height
}

/// Serialize the canvas into a complete BMP file.
pub fn encode(bitmap: &Bitmap) -> Vec<u8> {
    let width = bitmap.width();
    let height = bitmap.height();
    let row_bytes = bitmap.row_bytes();
    let padded = padded_row_bytes(width);
    let total = file_size(width, height);

    let mut out = Vec::with_capacity(total);

    // File header
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // reserved
    out.extend_from_slice(&0u16.to_le_bytes()); // reserved
    out.extend_from_slice(&(PIXEL_DATA_OFFSET as u32).to_le_bytes());

    // Info header
    out.extend_from_slice(&(INFO_HEADER_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&1u16.to_le_bytes()); // bits per pixel
    out.extend_from_slice(&0u32.to_le_bytes()); // compression: none
    out.extend_from_slice(&((padded * height) as u32).to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes()); // x pixels per meter
    out.extend_from_slice(&0i32.to_le_bytes()); // y pixels per meter
    out.extend_from_slice(&2u32.to_le_bytes()); // palette colors used
    out.extend_from_slice(&0u32.to_le_bytes()); // important colors

    // Palette: index 0 black, index 1 white, BGR + reserved byte
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&[255, 255, 255, 0]);

    // Pixel data, bottom-up
    for y in (0..height).rev() {
        out.extend_from_slice(bitmap.row(y));
        out.resize(out.len() + (padded - row_bytes), 0);
    }

    debug_assert_eq!(out.len(), total);
    out
}

/// Parsed header fields, used by tests and the warm tier integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmpHeader {
    pub file_size: u32,
    pub pixel_offset: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bits_per_pixel: u16,
    pub compression: u32,
    pub palette_colors: u32,
}

/// Parse and sanity-check the fixed headers of an encoded raster. Returns
/// `None` for anything torn, truncated, or not produced by this writer.
pub fn parse_header(bytes: &[u8]) -> Option<BmpHeader> {
    if bytes.len() < PIXEL_DATA_OFFSET || &bytes[0..2] != b"BM" {
        return None;
    }
    let header = BmpHeader {
        file_size: u32::from_le_bytes(bytes[2..6].try_into().ok()?),
        pixel_offset: u32::from_le_bytes(bytes[10..14].try_into().ok()?),
        width: i32::from_le_bytes(bytes[18..22].try_into().ok()?),
        height: i32::from_le_bytes(bytes[22..26].try_into().ok()?),
        planes: u16::from_le_bytes(bytes[26..28].try_into().ok()?),
        bits_per_pixel: u16::from_le_bytes(bytes[28..30].try_into().ok()?),
        compression: u32::from_le_bytes(bytes[30..34].try_into().ok()?),
        palette_colors: u32::from_le_bytes(bytes[46..50].try_into().ok()?),
    };
    if header.file_size as usize != bytes.len() {
        return None;
    }
    if header.width <= 0 || header.height <= 0 {
        return None;
    }
    let expected = file_size(header.width as usize, header.height as usize);
    if expected != bytes.len() {
        return None;
    }
    Some(header)
}

/// True when the pixel at canvas coordinates (x, y), top-left origin, is black.
pub fn pixel_is_black(bytes: &[u8], x: usize, y: usize) -> Option<bool> {
    let header = parse_header(bytes)?;
    let (width, height) = (header.width as usize, header.height as usize);
    if x >= width || y >= height {
        return None;
    }
    let padded = padded_row_bytes(width);
    // Rows are stored bottom-up
    let row_start = header.pixel_offset as usize + (height - 1 - y) * padded;
    let byte = *bytes.get(row_start + x / 8)?;
    Some(byte & (0x80 >> (x % 8)) == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::bitmap::{Bitmap, Ink};

    #[test]
    fn canonical_canvas_encodes_to_contract_size() {
        let bitmap = Bitmap::new(800, 480);
        let bytes = encode(&bitmap);
        assert_eq!(bytes.len(), 48_062);
        assert_eq!(file_size(800, 480), 48_062);
    }

    #[test]
    fn header_fields_match_contract() {
        let bitmap = Bitmap::new(800, 480);
        let bytes = encode(&bitmap);
        let header = parse_header(&bytes).expect("valid header");
        assert_eq!(header.width, 800);
        assert_eq!(header.height, 480);
        assert_eq!(header.planes, 1);
        assert_eq!(header.bits_per_pixel, 1);
        assert_eq!(header.compression, 0);
        assert_eq!(header.palette_colors, 2);
        assert_eq!(header.pixel_offset, 62);
    }

    #[test]
    fn palette_is_black_then_white() {
        let bytes = encode(&Bitmap::new(8, 1));
        assert_eq!(&bytes[54..58], &[0, 0, 0, 0]);
        assert_eq!(&bytes[58..62], &[255, 255, 255, 0]);
    }

    #[test]
    fn rows_are_stored_bottom_up() {
        let mut bitmap = Bitmap::new(8, 2);
        // Black out only the top row of the canvas
        bitmap.fill_rect(0, 0, 8, 1, Ink::Black);
        let bytes = encode(&bitmap);
        // First stored row is the bottom canvas row (white = all bits set)
        assert_eq!(bytes[62], 0xFF);
        // Second stored row is the top canvas row (black = bits clear)
        assert_eq!(bytes[66], 0x00);
    }

    #[test]
    fn odd_width_rows_pad_to_four_bytes() {
        // 10 pixels -> 2 data bytes -> 4 bytes padded
        assert_eq!(padded_row_bytes(10), 4);
        let bitmap = Bitmap::new(10, 3);
        let bytes = encode(&bitmap);
        assert_eq!(bytes.len(), 62 + 4 * 3);
        assert!(parse_header(&bytes).is_some());
    }

    #[test]
    fn pixel_probe_round_trips_coordinates() {
        let mut bitmap = Bitmap::new(16, 8);
        bitmap.set(3, 2, Ink::Black);
        let bytes = encode(&bitmap);
        assert_eq!(pixel_is_black(&bytes, 3, 2), Some(true));
        assert_eq!(pixel_is_black(&bytes, 4, 2), Some(false));
        assert_eq!(pixel_is_black(&bytes, 3, 3), Some(false));
    }

    #[test]
    fn truncated_bytes_fail_header_parse() {
        let bytes = encode(&Bitmap::new(16, 8));
        assert!(parse_header(&bytes[..40]).is_none());
        assert!(parse_header(&bytes[..bytes.len() - 1]).is_none());
        let mut corrupt = bytes.clone();
        corrupt[0] = b'X';
        assert!(parse_header(&corrupt).is_none());
    }
}
