//! Legacy keystream cipher used by version 1 packages.
//!
//! Each output byte is `plaintext[i] ^ key[i % 32] ^ iv[i % 16]`, with a
//! fresh random IV prepended to the result. The transform is its own
//! inverse, so decryption runs the same loop.
//!
//! There is no integrity tag. Decrypting with the wrong key succeeds and
//! returns bytes of the correct length that are garbage.

use rand::RngCore;

use crate::keys::KEY_LENGTH;
use sealbox_common::{Error, Result};

/// Size of the per-blob IV (16 bytes).
pub const IV_SIZE: usize = 16;

/// Encrypt plaintext, returning `IV || ciphertext`.
///
/// A new random IV is drawn on every call, even for identical input.
pub fn encrypt(key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    encrypt_with_iv(key, &iv, plaintext)
}

/// Encrypt with a caller-chosen IV.
///
/// # Warning
/// Reusing an IV with the same key leaks the XOR of the two plaintexts.
pub fn encrypt_with_iv(key: &[u8; KEY_LENGTH], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(IV_SIZE + plaintext.len());
    result.extend_from_slice(iv);
    result.extend(apply(key, iv, plaintext));
    result
}

/// Decrypt an `IV || ciphertext` blob.
///
/// # Errors
/// - Returns `DecryptionFailure` if the blob is shorter than the IV
pub fn decrypt(key: &[u8; KEY_LENGTH], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_SIZE {
        return Err(Error::DecryptionFailure(format!(
            "Ciphertext too short: {} bytes, need at least {}",
            data.len(),
            IV_SIZE
        )));
    }

    let (iv, body) = data.split_at(IV_SIZE);
    Ok(apply(key, iv, body).collect())
}

fn apply<'a>(
    key: &'a [u8; KEY_LENGTH],
    iv: &'a [u8],
    input: &'a [u8],
) -> impl Iterator<Item = u8> + 'a {
    input
        .iter()
        .enumerate()
        .map(move |(i, byte)| byte ^ key[i % KEY_LENGTH] ^ iv[i % IV_SIZE])
}
