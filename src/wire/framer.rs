use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::OverlayError;

use super::messages::AuthenticatedMessage;

/// Length-prefixed XDR message boundaries over a duplex byte stream
/// (section 2, "Framer"). The length header follows the RPC record-marking
/// convention the teacher inherited from stellar-core: the top bit marks
/// the last fragment of a record. Continuation fragments are never
/// produced or expected — every record is single-fragment.
pub struct Framer<S> {
    stream: S,
    max_frame_bytes: usize,
}

const LAST_RECORD_BIT: u32 = 0x8000_0000;
const LENGTH_MASK: u32 = 0x7fff_ffff;

impl<S> Framer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, max_frame_bytes: usize) -> Self {
        Framer {
            stream,
            max_frame_bytes,
        }
    }

    /// Reads one length-prefixed frame and decodes it as an
    /// `AuthenticatedMessage`. Returns the decoded message and its encoded
    /// byte length (for metrics and byte-axis credit accounting).
    pub async fn read_message(&mut self) -> Result<(AuthenticatedMessage, usize), OverlayError> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await?;
        let raw = u32::from_be_bytes(header);
        let len = (raw & LENGTH_MASK) as usize;

        if len > self.max_frame_bytes {
            return Err(OverlayError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;

        let message = serde_xdr::from_bytes(&body)
            .map_err(|e| OverlayError::Decode(format!("{:?}", e)))?;
        Ok((message, len))
    }

    /// Encodes an `AuthenticatedMessage` and writes it as one length-prefixed
    /// frame. Returns the number of encoded body bytes written.
    pub async fn write_message(&mut self, msg: &AuthenticatedMessage) -> Result<usize, OverlayError> {
        let body = serde_xdr::to_bytes(msg).map_err(|e| OverlayError::Encode(format!("{:?}", e)))?;

        if body.len() > self.max_frame_bytes {
            return Err(OverlayError::FrameTooLarge(body.len()));
        }

        let header = (body.len() as u32) | LAST_RECORD_BIT;
        self.stream.write_all(&header.to_be_bytes()).await?;
        self.stream.write_all(&body).await?;
        self.stream.flush().await?;
        Ok(body.len())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
