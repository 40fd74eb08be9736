//! whisper-crypto: the Whisper encrypted archive codec
//!
//! An archive carries a title, a body and attached media for a handful of
//! recipients, each identified only by an X25519 public key.
//!
//! Key hierarchy:
//! ```text
//! Sender PrivateKey (X25519, long-term)
//!   └── per recipient: ECDH(sender, recipient) ── AES-256-GCM ── wraps FileKey
//!         └── FileKey (per archive, 256-bit random)
//!               └── payload: 64 KiB chunks, each AES-256-GCM with a random 96-bit nonce
//! ```
//!
//! Wire format (integers little-endian):
//! ```text
//! "Whipser/1.0\n"                     12 bytes
//! sender public key                   32 bytes
//! recipient count                     u32
//!   wrapped FileKey                   u32 len || nonce || ct || tag
//! chunk frames (keyed by FileKey)     u32 len || nonce || ct || tag, len == 0 terminates
//!   title, content                    u32 len || UTF-8
//!   image count, images               u32 || (name, body)*
//!   video count, videos               u32 || (name, body)*
//! ```

pub mod aead;
pub mod archive;
pub mod error;
pub mod keys;
pub mod recipient;
pub mod stream;
pub mod wire;

pub use aead::{open, seal, FileKey};
pub use archive::{
    decode_archive, decode_from_reader, encode_archive, encode_to_writer, inspect_header,
    looks_like_archive, ArchiveHeader, ArchiveReader, ArchiveWriter, Message,
};
pub use error::{Error, ErrorCategory, Result};
pub use keys::{PrivateKey, PublicKey};
pub use recipient::{Identity, Recipient};
pub use stream::{StreamReader, StreamWriter};
pub use wire::{ReadExt, UniqueNames, WriteExt};

/// Size of every symmetric key, X25519 scalar and X25519 public key (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of an AES-GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Plaintext bytes sealed per chunk of the payload stream (64 KiB).
///
/// Part of format version 1.0; both ends must agree on it.
pub const CHUNK_SIZE: usize = 64 << 10;

/// Block size used when streaming attachment bodies to and from disk (1 MiB)
pub const IO_BLOCK_SIZE: usize = 1 << 20;

/// Magic bytes every archive starts with. The misspelling is part of the format.
pub const MAGIC: &[u8; 12] = b"Whipser/1.0\n";
