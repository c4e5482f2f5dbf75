//! At-rest encryption of artifacts via `openssl enc`.
//!
//! AES-256-CBC with a key file, matching the format the existing recovery
//! runbooks and previously-written artifacts use. Encrypt removes the
//! plaintext on success; decrypt leaves the ciphertext in place.

use crate::error::Result;
use crate::exec::{CommandSpec, Executor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const OPENSSL_TIMEOUT_SECS: u64 = 600;

fn enc_spec(decrypt: bool, src: &Path, dest: &Path, key_file: &Path) -> CommandSpec {
    let mut spec = CommandSpec::new("openssl", Duration::from_secs(OPENSSL_TIMEOUT_SECS)).arg("enc");
    if decrypt {
        spec = spec.arg("-d");
    }
    spec.arg("-aes-256-cbc")
        .arg("-salt")
        .arg("-pbkdf2")
        .arg("-in")
        .arg(src.to_string_lossy().into_owned())
        .arg("-out")
        .arg(dest.to_string_lossy().into_owned())
        .arg("-pass")
        .arg(format!("file:{}", key_file.display()))
}

/// Encrypt `artifact` to `<artifact>.enc`, removing the plaintext.
/// Returns the ciphertext path, or the original path under dry-run.
pub async fn encrypt(executor: &Executor, artifact: &Path, key_file: &Path) -> Result<PathBuf> {
    let dest = PathBuf::from(format!("{}.enc", artifact.display()));
    let out = executor.run(&enc_spec(false, artifact, &dest, key_file)).await?;
    if out.skipped {
        return Ok(artifact.to_path_buf());
    }

    tokio::fs::remove_file(artifact).await?;
    info!(artifact = %dest.display(), "Artifact encrypted");
    Ok(dest)
}

/// Decrypt `artifact` (an `.enc` file) into `dest`.
pub async fn decrypt(
    executor: &Executor,
    artifact: &Path,
    dest: &Path,
    key_file: &Path,
) -> Result<()> {
    executor.run(&enc_spec(true, artifact, dest, key_file)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::which;

    #[test]
    fn test_spec_shape() {
        let spec = enc_spec(
            false,
            Path::new("/b/db.dump.gz"),
            Path::new("/b/db.dump.gz.enc"),
            Path::new("/etc/key"),
        );
        assert_eq!(spec.program, "openssl");
        assert_eq!(
            spec.args,
            vec![
                "enc",
                "-aes-256-cbc",
                "-salt",
                "-pbkdf2",
                "-in",
                "/b/db.dump.gz",
                "-out",
                "/b/db.dump.gz.enc",
                "-pass",
                "file:/etc/key"
            ]
        );

        let dec = enc_spec(
            true,
            Path::new("/b/db.dump.gz.enc"),
            Path::new("/b/db.dump.gz"),
            Path::new("/etc/key"),
        );
        assert_eq!(dec.args[1], "-d");
    }

    #[tokio::test]
    async fn test_round_trip_with_real_openssl() {
        if which("openssl").is_none() {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key");
        let plain = dir.path().join("artifact.gz");
        std::fs::write(&key, b"0123456789abcdef0123456789abcdef").unwrap();
        std::fs::write(&plain, b"dump contents").unwrap();

        let executor = Executor::new(false);
        let enc = encrypt(&executor, &plain, &key).await.unwrap();
        assert!(enc.ends_with("artifact.gz.enc"));
        assert!(!plain.exists());

        let restored = dir.path().join("restored.gz");
        decrypt(&executor, &enc, &restored, &key).await.unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), b"dump contents");
    }
}
