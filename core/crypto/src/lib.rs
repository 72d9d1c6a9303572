//! Cryptographic primitives for Sealbox.
//!
//! This module provides:
//! - Key derivation using PBKDF2-HMAC-SHA256 (100,000 iterations)
//! - The legacy keystream cipher used by version 1 packages
//! - Authenticated encryption using XChaCha20-Poly1305 for version 2 packages
//! - Secure key handling with automatic zeroization
//!
//! # Security Notes
//! - The keystream cipher has no integrity tag. Decrypting with a wrong key
//!   yields bytes of the right length and no error.
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod cipher;
pub mod kdf;
pub mod keys;
pub mod keystream;

pub use cipher::{CipherSuite, FileCipher, PackageKey};
pub use kdf::{derive_key, derive_key_with, KdfParams};
pub use keys::{DerivedKey, Salt, KEY_LENGTH, SALT_LENGTH};
