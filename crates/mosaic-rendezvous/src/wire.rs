//! Length-prefixed framing
//!
//! A frame is a little-endian `u64` payload length followed by the payload.

use mosaic_types::{MosaicError, Result};
use std::io::{Read, Write};

/// Upper bound on a single frame, guards against reading a corrupt length
pub const MAX_FRAME_LEN: u64 = 1 << 34;

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer
        .write_all(&(payload.len() as u64).to_le_bytes())
        .and_then(|_| writer.write_all(payload))
        .and_then(|_| writer.flush())
        .map_err(|e| MosaicError::network(format!("send frame: {}", e)))
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 8];
    reader
        .read_exact(&mut len_buf)
        .map_err(|e| MosaicError::network(format!("recv frame length: {}", e)))?;

    let len = u64::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(MosaicError::network(format!(
            "frame length {} exceeds limit {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|e| MosaicError::network(format!("recv frame payload: {}", e)))?;
    Ok(payload)
}
