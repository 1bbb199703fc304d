//! Length-prefixed message framing.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! bincode-encoded [`Message`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Message, NetworkError};

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Encode `msg` into a complete frame
///
/// # Errors
/// Returns error if encoding fails or the body exceeds [`MAX_FRAME_LEN`]
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, NetworkError> {
    let body = bincode::serialize(msg).map_err(|e| NetworkError::Encode(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one framed message
///
/// # Errors
/// Returns error on encoding or I/O failure
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. `Ok(None)` means the peer closed between frames.
///
/// # Errors
/// Returns error on I/O failure, EOF inside a frame, an oversized length,
/// or an undecodable body
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, NetworkError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LEN_PREFIX];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut prefix[1..]).await?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body)
        .map(Some)
        .map_err(|e| NetworkError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn sample() -> Message {
        Message::new(7, vec![1, 2, 3, 0, 255])
    }

    #[tokio::test]
    async fn test_write_produces_frame() {
        let frame = encode_frame(&sample()).unwrap();
        assert_eq!(
            u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize,
            frame.len() - LEN_PREFIX
        );

        let mut mock = Builder::new().write(&frame).build();
        write_message(&mut mock, &sample()).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_then_clean_eof() {
        let frame = encode_frame(&sample()).unwrap();
        let mut mock = Builder::new().read(&frame).build();

        assert_eq!(read_message(&mut mock).await.unwrap(), Some(sample()));
        assert_eq!(read_message(&mut mock).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_reads() {
        let frame = encode_frame(&sample()).unwrap();
        let (head, tail) = frame.split_at(6);
        let mut mock = Builder::new().read(head).read(tail).build();
        assert_eq!(read_message(&mut mock).await.unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn test_eof_inside_frame() {
        let frame = encode_frame(&sample()).unwrap();
        let mut mock = Builder::new().read(&frame[..frame.len() - 1]).build();
        assert!(matches!(
            read_message(&mut mock).await,
            Err(NetworkError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length() {
        let mut mock = Builder::new().read(&[0xff, 0xff, 0xff, 0xff]).build();
        assert!(matches!(
            read_message(&mut mock).await,
            Err(NetworkError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_body() {
        let mut mock = Builder::new().read(&[0, 0, 0, 3, 0xde, 0xad, 0xbe]).build();
        assert!(matches!(
            read_message(&mut mock).await,
            Err(NetworkError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let msg = Message::new(0, Vec::new());
        let frame = encode_frame(&msg).unwrap();
        let mut mock = Builder::new().read(&frame).build();
        assert_eq!(read_message(&mut mock).await.unwrap(), Some(msg));
    }
}
