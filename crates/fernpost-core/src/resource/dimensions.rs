//! Image dimensions from file headers
//!
//! Only the header is inspected; the image is never decoded. Supports PNG,
//! GIF, JPEG and WebP.

/// Width and height of an image, both non-zero
pub(crate) fn from_header(bytes: &[u8]) -> Option<(u32, u32)> {
    png(bytes)
        .or_else(|| gif(bytes))
        .or_else(|| jpeg(bytes))
        .or_else(|| webp(bytes))
        .filter(|(width, height)| *width > 0 && *height > 0)
}

fn png(bytes: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
    if bytes.len() < 24 || &bytes[..8] != SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    Some((width, height))
}

fn gif(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 10 || (&bytes[..6] != b"GIF87a" && &bytes[..6] != b"GIF89a") {
        return None;
    }
    let width = u16::from_le_bytes([bytes[6], bytes[7]]);
    let height = u16::from_le_bytes([bytes[8], bytes[9]]);
    Some((u32::from(width), u32::from(height)))
}

fn jpeg(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }

    let mut i = 2;
    while i + 1 < bytes.len() {
        while i < bytes.len() && bytes[i] != 0xFF {
            i += 1;
        }
        while i < bytes.len() && bytes[i] == 0xFF {
            i += 1;
        }
        let marker = *bytes.get(i)?;
        i += 1;

        // End of image, start of scan
        if marker == 0xD9 || marker == 0xDA || i + 1 >= bytes.len() {
            return None;
        }
        let segment_len = usize::from(u16::from_be_bytes([bytes[i], bytes[i + 1]]));
        if segment_len < 2 {
            return None;
        }
        let payload = i + 2;
        let end = i.saturating_add(segment_len);
        if end > bytes.len() {
            return None;
        }

        if is_start_of_frame(marker) && segment_len >= 7 {
            let height = u16::from_be_bytes([bytes[payload + 1], bytes[payload + 2]]);
            let width = u16::from_be_bytes([bytes[payload + 3], bytes[payload + 4]]);
            return Some((u32::from(width), u32::from(height)));
        }
        i = end;
    }
    None
}

fn is_start_of_frame(marker: u8) -> bool {
    matches!(
        marker,
        0xC0 | 0xC1 | 0xC2 | 0xC3 | 0xC5 | 0xC6 | 0xC7 | 0xC9 | 0xCA | 0xCB | 0xCD | 0xCE | 0xCF
    )
}

fn webp(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 16 || &bytes[..4] != b"RIFF" || &bytes[8..12] != b"WEBP" {
        return None;
    }

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let tag = &bytes[offset..offset + 4];
        let chunk_len = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let payload = offset + 8;
        let end = payload.saturating_add(chunk_len);
        if end > bytes.len() {
            return None;
        }
        let data = &bytes[payload..end];

        match tag {
            b"VP8X" if chunk_len >= 10 => {
                let width = u24_le(&data[4..7]) + 1;
                let height = u24_le(&data[7..10]) + 1;
                return Some((width, height));
            }
            b"VP8L" if chunk_len >= 5 && data[0] == 0x2F => {
                let bits = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
                return Some(((bits & 0x3FFF) + 1, ((bits >> 14) & 0x3FFF) + 1));
            }
            b"VP8 " if chunk_len >= 10 => {
                if data[3..6] != [0x9D, 0x01, 0x2A] {
                    return None;
                }
                let width = u16::from_le_bytes([data[6], data[7]]) & 0x3FFF;
                let height = u16::from_le_bytes([data[8], data[9]]) & 0x3FFF;
                return Some((u32::from(width), u32::from(height)));
            }
            _ => {}
        }

        // Chunks are padded to an even length
        offset = end + (chunk_len & 1);
    }
    None
}

fn u24_le(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}
