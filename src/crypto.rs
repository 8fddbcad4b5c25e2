//! Checksums, authenticated encryption and key derivation for artifacts.
//!
//! Grounded on the teacher's `encryption.rs`, narrowed to the single
//! algorithm pair this system commits to: SHA-256 for checksums and
//! AES-256-GCM with a PBKDF2-SHA256 derived key for encryption at rest
//! (spec.md §4.4 steps 4 and 6).

use std::io::{Read, Write};
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// SHA-256 a file, returning the lowercase hex digest.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 a byte slice, returning the lowercase hex digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write a `<artifact>.sha256` sidecar in the conventional
/// `"<hex>  <basename>\n"` format (spec.md §3).
pub fn write_sidecar(artifact: &Path, sidecar: &Path, hex_digest: &str) -> std::io::Result<()> {
    let basename = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    std::fs::write(sidecar, format!("{hex_digest}  {basename}\n"))
}

/// Parse a sidecar file, returning the hex digest it carries.
pub fn read_sidecar(sidecar: &Path) -> std::io::Result<String> {
    let contents = std::fs::read_to_string(sidecar)?;
    Ok(contents
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string())
}

/// Derive a 32-byte AES-256 key from a password using PBKDF2-HMAC-SHA256.
fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt a file in place: read `src`, write `salt ‖ nonce ‖ ciphertext‖tag`
/// to `dst`. `src` and `dst` may be the same path's sibling; the caller is
/// responsible for removing the plaintext afterwards (spec.md §4.4 step 6).
pub fn encrypt_file(src: &Path, dst: &Path, password: &str) -> CryptoResult<()> {
    let plaintext = std::fs::read(src).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(password, &salt);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = std::fs::File::create(dst).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    out.write_all(&salt).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    out.write_all(&nonce_bytes).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    out.write_all(&ciphertext).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(())
}

/// Decrypt a file written by [`encrypt_file`], returning the plaintext bytes.
pub fn decrypt_file(src: &Path, password: &str) -> CryptoResult<Vec<u8>> {
    let data = std::fs::read(src).map_err(|_| CryptoError::DecryptionFailed)?;
    decrypt_bytes(&data, password)
}

/// Decrypt an in-memory `salt ‖ nonce ‖ ciphertext‖tag` blob.
pub fn decrypt_bytes(data: &[u8], password: &str) -> CryptoResult<Vec<u8>> {
    if data.len() < SALT_LEN + NONCE_LEN {
        return Err(CryptoError::DecryptionFailed);
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&data[..SALT_LEN]);
    let nonce_bytes = &data[SALT_LEN..SALT_LEN + NONCE_LEN];
    let ciphertext = &data[SALT_LEN + NONCE_LEN..];

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("plain.dump");
        let enc = dir.path().join("plain.dump.enc");
        std::fs::write(&src, b"some dump bytes").unwrap();

        encrypt_file(&src, &enc, "s3cret").unwrap();
        let decrypted = decrypt_file(&enc, "s3cret").unwrap();
        assert_eq!(decrypted, b"some dump bytes");
    }

    #[test]
    fn decrypt_rejects_bit_flip() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("plain.dump");
        let enc = dir.path().join("plain.dump.enc");
        std::fs::write(&src, b"some dump bytes").unwrap();
        encrypt_file(&src, &enc, "s3cret").unwrap();

        let mut bytes = std::fs::read(&enc).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&enc, &bytes).unwrap();

        assert!(decrypt_file(&enc, "s3cret").is_err());
    }

    #[test]
    fn sidecar_round_trip() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("acct_20260101_000000.dump");
        let sidecar = dir.path().join("acct_20260101_000000.dump.sha256");
        std::fs::write(&artifact, b"dump contents").unwrap();

        let digest = sha256_file(&artifact).unwrap();
        write_sidecar(&artifact, &sidecar, &digest).unwrap();

        assert_eq!(read_sidecar(&sidecar).unwrap(), digest);
    }
}
