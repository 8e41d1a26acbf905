//! Length-prefixed CBOR framing for [`RelayMsg`].
//!
//! Wire format: `u32` big-endian payload length, then the CBOR payload.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::relay::RelayMsg;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub fn encode_frame(msg: &RelayMsg) -> anyhow::Result<Bytes> {
    let payload = serde_cbor::to_vec(msg)?;
    if payload.len() > MAX_FRAME_LEN {
        anyhow::bail!(
            "frame of {} bytes exceeds the {MAX_FRAME_LEN} byte limit",
            payload.len()
        );
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

pub async fn write_frame<W>(send: &mut W, msg: &RelayMsg) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    send.write_all(&frame).await?;
    Ok(())
}

/// Read one frame. `None` when the stream ended cleanly between frames.
pub async fn read_frame<R>(recv: &mut R) -> anyhow::Result<Option<RelayMsg>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match recv.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("peer announced a {len} byte frame (limit {MAX_FRAME_LEN})");
    }

    let mut payload = vec![0u8; len];
    recv.read_exact(&mut payload).await?;
    Ok(Some(serde_cbor::from_slice(&payload)?))
}
