//! Length-prefixed framing: a big-endian `u32` byte count, then the JSON
//! encoded [`NetworkMessage`].

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, Result};
use crate::network::NetworkMessage;

/// Upper bound for a single frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub async fn write_frame(
    stream: &mut (impl AsyncWrite + Unpin),
    message: &NetworkMessage,
) -> Result<()> {
    let payload = message.encode()?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(AppError::protocol(format!(
            "{} message too large: {} bytes (max {})",
            message.kind(),
            payload.len(),
            MAX_FRAME_BYTES
        )));
    }

    let len = payload.len() as u32;
    stream
        .write_u32(len)
        .await
        .map_err(|e| AppError::transport(format!("write frame length: {e}")))?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| AppError::transport(format!("write frame payload: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| AppError::transport(format!("flush frame: {e}")))?;
    Ok(())
}

/// Read one frame. `Ok(None)` when the peer closed cleanly between frames.
pub async fn read_frame(stream: &mut (impl AsyncRead + Unpin)) -> Result<Option<NetworkMessage>> {
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(AppError::transport(format!("read frame length: {e}"))),
    };

    if len > MAX_FRAME_BYTES {
        return Err(AppError::protocol(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_BYTES})"
        )));
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| AppError::transport(format!("read frame payload: {e}")))?;

    NetworkMessage::decode(&payload).map(Some)
}
