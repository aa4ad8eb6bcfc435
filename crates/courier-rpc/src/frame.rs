use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames above this size are a protocol error, not a transport error.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the size cap")]
    Oversize(usize),
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_SIZE {
        return Err(FrameError::Oversize(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(FrameError::Oversize(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, b"hello frames").await.unwrap();
        let body = read_frame(&mut b).await.unwrap();
        assert_eq!(body, b"hello frames");
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, b"one").await.unwrap();
        write_frame(&mut a, b"two").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), b"one");
        assert_eq!(read_frame(&mut b).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_oversize_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let huge = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &huge).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(FrameError::Oversize(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);

        tokio::io::AsyncWriteExt::write_all(&mut a, &0u32.to_be_bytes())
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(FrameError::Oversize(0))
        ));
    }
}
