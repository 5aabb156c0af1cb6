use crate::error::{TransferError, TransferResult};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::utils::create_unique_file;

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFile {
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Write an incoming payload into `save_folder`, chunk by chunk.
///
/// The destination is `save_folder/file_name`, or a numbered variant if the
/// name is taken. The byte count must match `expected_size` exactly. A
/// partial file is left behind on failure.
pub async fn receive_file<S, E>(
    stream: S,
    save_folder: &Path,
    file_name: &str,
    expected_size: u64,
    cancel: &CancellationToken,
) -> TransferResult<ReceivedFile>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    tokio::fs::create_dir_all(save_folder).await?;
    let (path, mut file) = create_unique_file(save_folder, file_name).await?;
    tracing::info!("Receiving {} ({} bytes) into {:?}", file_name, expected_size, path);

    let mut stream = std::pin::pin!(stream);
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(io::Error::other)?;

        written += chunk.len() as u64;
        if written > expected_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("received more than the announced {} bytes", expected_size),
            )
            .into());
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;

    if written != expected_size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended after {} of {} bytes", written, expected_size),
        )
        .into());
    }

    Ok(ReceivedFile {
        path,
        bytes_written: written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p))))
    }

    #[tokio::test]
    async fn test_receive_writes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let received = receive_file(
            chunks(vec![b"hello ", b"world"]),
            dir.path(),
            "greeting.txt",
            11,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(received.path, dir.path().join("greeting.txt"));
        assert_eq!(received.bytes_written, 11);
        assert_eq!(std::fs::read(&received.path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_short_stream_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = receive_file(
            chunks(vec![b"abc"]),
            dir.path(),
            "short.bin",
            10,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_stream_error_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer left")),
        ]);
        let err = receive_file(broken, dir.path(), "x.bin", 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[tokio::test]
    async fn test_cancelled_receive_stops() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = receive_file(stream::pending::<Result<Bytes, io::Error>>(), dir.path(), "x.bin", 10, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }
}
