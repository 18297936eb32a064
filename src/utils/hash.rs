use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Computes the digest string used to verify artifacts end to end.
///
/// Both the receiver and the producer go through this seam so they always agree
/// on the algorithm and on the textual encoding of the result.
#[async_trait]
pub trait ChecksumProvider: Send + Sync {
    async fn checksum(&self, path: &Path) -> io::Result<String>;
}

/// SHA-256 of the file contents, lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Checksum;

#[async_trait]
impl ChecksumProvider for Sha256Checksum {
    async fn checksum(&self, path: &Path) -> io::Result<String> {
        let file = tokio::fs::File::open(path).await?;
        calculate_hash_from_reader(file).await
    }
}

pub fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub async fn calculate_hash_from_reader<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
