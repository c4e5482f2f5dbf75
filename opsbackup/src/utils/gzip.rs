//! Gzip helpers for artifact files.
//!
//! Compression of command output is handled by the executor; these cover
//! file-to-file compression (RDB snapshots), decompression before restore,
//! and the integrity check that replaces the scripts' `gzip -t`.

use crate::error::{OpsError, Result};
use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use std::path::Path;
use tokio::io::BufReader;

/// Gzip `src` into `dest`.
pub async fn compress_file(src: &Path, dest: &Path) -> Result<()> {
    let file = tokio::fs::File::open(src).await?;
    let mut encoder = GzipEncoder::new(BufReader::new(file));
    let mut out = tokio::fs::File::create(dest).await?;
    tokio::io::copy(&mut encoder, &mut out).await?;
    tokio::io::AsyncWriteExt::flush(&mut out).await?;
    Ok(())
}

/// Decompress `src` into `dest`.
pub async fn decompress_file(src: &Path, dest: &Path) -> Result<()> {
    let file = tokio::fs::File::open(src).await?;
    let mut decoder = GzipDecoder::new(BufReader::new(file));
    let mut out = tokio::fs::File::create(dest).await?;
    tokio::io::copy(&mut decoder, &mut out)
        .await
        .map_err(|e| OpsError::Verification(format!("{}: {e}", src.display())))?;
    tokio::io::AsyncWriteExt::flush(&mut out).await?;
    Ok(())
}

/// Decode the whole stream, discarding output. Fails on any corruption,
/// including a truncated trailer.
pub async fn check_integrity(path: &Path) -> Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut decoder = GzipDecoder::new(BufReader::new(file));
    let mut sink = tokio::io::sink();
    tokio::io::copy(&mut decoder, &mut sink)
        .await
        .map_err(|e| OpsError::Verification(format!("{}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compress_decompress_and_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("data.txt");
        let gz = dir.path().join("data.txt.gz");
        let back = dir.path().join("restored.txt");

        tokio::fs::write(&plain, b"row1\nrow2\nrow3\n").await.unwrap();
        compress_file(&plain, &gz).await.unwrap();

        check_integrity(&gz).await.unwrap();

        decompress_file(&gz, &back).await.unwrap();
        assert_eq!(
            tokio::fs::read(&back).await.unwrap(),
            b"row1\nrow2\nrow3\n"
        );
    }

    #[tokio::test]
    async fn test_integrity_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.gz");
        tokio::fs::write(&bogus, b"this is not gzip data").await.unwrap();

        let err = check_integrity(&bogus).await.unwrap_err();
        assert!(matches!(err, OpsError::Verification(_)));
    }

    #[tokio::test]
    async fn test_integrity_rejects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("data.txt");
        let gz = dir.path().join("data.txt.gz");

        tokio::fs::write(&plain, vec![7u8; 32 * 1024]).await.unwrap();
        compress_file(&plain, &gz).await.unwrap();

        let bytes = tokio::fs::read(&gz).await.unwrap();
        let truncated = dir.path().join("truncated.gz");
        tokio::fs::write(&truncated, &bytes[..bytes.len() / 2])
            .await
            .unwrap();

        assert!(check_integrity(&truncated).await.is_err());
    }
}
