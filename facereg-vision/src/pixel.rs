//! Raw capture buffer to packed RGB conversions.

use anyhow::Result;

/// Convert packed YUYV 4:2:2 to RGB24 (BT.601, full range).
pub fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = buffer_len(width, height, 2)?;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer: {} < {}", data.len(), expected);
    }
    let mut out = Vec::with_capacity(buffer_len(width, height, 3)?);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

/// Expand 8-bit greyscale (typical of IR sensors) to RGB24.
pub fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = buffer_len(width, height, 1)?;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer: {} < {}", data.len(), expected);
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

/// Byte length of a `width` x `height` image at `bytes_per_pixel`.
pub(crate) fn buffer_len(width: u32, height: u32, bytes_per_pixel: usize) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(bytes_per_pixel))
        .ok_or_else(|| anyhow::anyhow!("frame size {}x{} overflows", width, height))
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}
