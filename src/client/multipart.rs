//! Streaming `multipart/form-data` encoder.
//!
//! Parts are written into a bounded in-memory pipe whose reading half becomes
//! the HTTP request body, so a file is never held in memory as a whole and the
//! writer is throttled by how fast the transport consumes bytes.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

/// Chunks in flight between the writer and the transport
pub const PIPE_DEPTH: usize = 8;

pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
#[error("pipe closed by the reader")]
pub struct PipeClosed;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Closed(#[from] PipeClosed),

    #[error("failed to read part contents: {0}")]
    Source(#[source] io::Error),
}

/// Writing half of the pipe.
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

/// Creates a pipe holding at most `depth` chunks.
///
/// The stream ends when the writer is dropped. Dropping the stream makes every
/// later write fail with [`PipeClosed`].
pub fn pipe(depth: usize) -> (PipeWriter, impl Stream<Item = io::Result<Bytes>> + Send + 'static) {
    let (tx, rx) = mpsc::channel(depth);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (PipeWriter { tx }, stream)
}

impl PipeWriter {
    pub async fn write(&self, chunk: Bytes) -> Result<(), PipeClosed> {
        self.tx.send(Ok(chunk)).await.map_err(|_| PipeClosed)
    }

    /// Ends the stream with an error instead of a clean end of body.
    pub async fn abort(self, error: io::Error) {
        let _ = self.tx.send(Err(error)).await;
    }
}

pub struct MultipartWriter {
    pipe: PipeWriter,
    boundary: String,
}

impl MultipartWriter {
    pub fn new(pipe: PipeWriter) -> Self {
        Self {
            pipe,
            boundary: format!("image-manager-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", mime::MULTIPART_FORM_DATA, self.boundary)
    }

    /// Streams `reader` as a file part, returning the number of content bytes.
    pub async fn write_file<R>(
        &mut self,
        field: &str,
        file_name: &str,
        reader: R,
    ) -> Result<u64, WriteError>
    where
        R: AsyncRead + Unpin,
    {
        let head = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary,
            field,
            file_name,
            mime::APPLICATION_OCTET_STREAM
        );
        self.pipe.write(Bytes::from(head)).await?;

        let mut stream = ReaderStream::with_capacity(reader, CHUNK_SIZE);
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(WriteError::Source)?;
            written += chunk.len() as u64;
            self.pipe.write(chunk).await?;
        }

        self.pipe.write(Bytes::from_static(b"\r\n")).await?;
        Ok(written)
    }

    pub async fn write_field(&mut self, name: &str, value: &str) -> Result<(), WriteError> {
        let part = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            self.boundary, name, value
        );
        self.pipe.write(Bytes::from(part)).await?;
        Ok(())
    }

    /// Writes the closing delimiter and closes the pipe.
    pub async fn finish(self) -> Result<(), WriteError> {
        let closing = format!("--{}--\r\n", self.boundary);
        self.pipe.write(Bytes::from(closing)).await?;
        Ok(())
    }

    pub async fn abort(self, error: io::Error) {
        self.pipe.abort(error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn collect(stream: impl Stream<Item = io::Result<Bytes>>) -> io::Result<Vec<u8>> {
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        Ok(chunks.concat())
    }

    #[tokio::test]
    async fn test_encodes_parts_in_order() {
        let (pipe, body) = pipe(PIPE_DEPTH);
        let mut writer = MultipartWriter::new(pipe);
        let boundary = writer.boundary().to_string();
        assert_eq!(
            writer.content_type(),
            format!("multipart/form-data; boundary={}", boundary)
        );

        let reader = tokio::spawn(collect(body));

        let size = writer
            .write_file("file", "disk.iso", &b"iso bytes"[..])
            .await
            .unwrap();
        assert_eq!(size, 9);
        writer.write_field("checksum", "disk.iso:abc").await.unwrap();
        writer.finish().await.unwrap();

        let encoded = String::from_utf8(reader.await.unwrap().unwrap()).unwrap();
        let expected = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"disk.iso\"\r\nContent-Type: application/octet-stream\r\n\r\niso bytes\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"checksum\"\r\n\r\ndisk.iso:abc\r\n\
             --{b}--\r\n",
            b = boundary
        );
        assert_eq!(encoded, expected);
    }

    #[tokio::test]
    async fn test_large_file_is_chunked() {
        let (pipe, body) = pipe(2);
        let mut writer = MultipartWriter::new(pipe);
        let data = vec![7u8; CHUNK_SIZE * 3 + 10];

        let reader = tokio::spawn(async move {
            let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
            chunks.iter().map(|c| c.len()).max().unwrap()
        });

        let size = writer.write_file("file", "big.bin", &data[..]).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(size, data.len() as u64);
        assert!(reader.await.unwrap() <= CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_write_after_reader_dropped() {
        let (pipe, body) = pipe(1);
        drop(body);
        let mut writer = MultipartWriter::new(pipe);
        let err = writer
            .write_file("file", "disk.iso", &b"data"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Closed(_)));
    }

    #[tokio::test]
    async fn test_abort_surfaces_error_to_reader() {
        let (pipe, body) = pipe(PIPE_DEPTH);
        let writer = MultipartWriter::new(pipe);
        writer
            .abort(io::Error::new(io::ErrorKind::NotFound, "gone"))
            .await;

        let err = collect(body).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
