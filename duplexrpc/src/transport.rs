//! Length-delimited framing over any async byte stream: a thin `Encoder`/
//! `Decoder` pair rather than a full socket abstraction, since the frame's
//! own `size` field already doubles as its length prefix -- no need for
//! `tokio_util`'s `LengthDelimitedCodec` and its offset/adjustment knobs.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::header::HEADER_LEN;

/// Decodes/encodes whole RPC frames (header + payload) off an async byte
/// stream. A decoded item is the complete frame, header included, so
/// [`crate::connection::Connection`] can parse the header itself rather than
/// have the codec strip it.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Frame length, read from the first 4 bytes, once known -- `None`
    /// until a full header has arrived.
    next_len: Option<usize>,
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<BytesMut>> {
        let len = match self.next_len {
            Some(len) => len,
            None => {
                if src.len() < HEADER_LEN {
                    src.reserve(HEADER_LEN - src.len());
                    return Ok(None);
                }
                let len = u32::from_le_bytes(src[0..4].try_into().unwrap()) as usize;
                if len < HEADER_LEN {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "RPC frame shorter than its own header",
                    ));
                }
                self.next_len = Some(len);
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.next_len = None;
        Ok(Some(src.split_to(len)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> std::io::Result<()> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// A framed, bidirectional RPC byte stream.
pub type FrameTransport<IO> = Framed<IO, FrameCodec>;

/// Wrap an async byte stream so it yields/accepts whole RPC frames.
pub fn frame<IO>(io: IO) -> FrameTransport<IO>
where
    IO: AsyncRead + AsyncWrite,
{
    Framed::new(io, FrameCodec::default())
}
