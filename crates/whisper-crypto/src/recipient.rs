//! Per-recipient wrapping of the file key
//!
//! The sender and each recipient agree on an X25519 shared secret, which is
//! used directly as an AES-256-GCM key to seal the 32 file-key bytes:
//! ```text
//! wrap = [12-byte nonce][32-byte encrypted file key][16-byte tag]
//! ```

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::aead::{open, seal, FileKey};
use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};

/// The length of a well-formed wrap entry.
pub const WRAPPED_KEY_SIZE: usize = crate::NONCE_SIZE + crate::KEY_SIZE + crate::TAG_SIZE;

/// Someone an archive is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Recipient {
    public_key: PublicKey,
}

impl Recipient {
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Seal `file_key` for this recipient.
    ///
    /// Fails with [`Error::InvalidKey`] if the recipient key is a low-order
    /// point, which would make the shared secret all zeros.
    pub fn wrap(&self, sender: &PrivateKey, file_key: &FileKey) -> Result<Vec<u8>> {
        let shared = sender.diffie_hellman(&self.public_key);
        if !shared.was_contributory() {
            return Err(Error::InvalidKey);
        }
        seal(shared.as_bytes(), file_key.as_bytes())
    }
}

impl From<PublicKey> for Recipient {
    fn from(public_key: PublicKey) -> Self {
        Self::new(public_key)
    }
}

/// The receiving side: a private key that can try to open wrap entries.
#[derive(Debug, Clone)]
pub struct Identity {
    private_key: PrivateKey,
}

impl Identity {
    pub fn new(private_key: PrivateKey) -> Self {
        Self { private_key }
    }

    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// Try to recover the file key from one wrap entry.
    ///
    /// `None` means the entry is not for this identity.
    pub fn unwrap(&self, sender: &PublicKey, wrapped: &[u8]) -> Option<FileKey> {
        let shared = self.private_key.diffie_hellman(sender);
        if !shared.was_contributory() {
            debug!("sender key yields a non-contributory shared secret");
            return None;
        }

        let plaintext = Zeroizing::new(open(shared.as_bytes(), wrapped).ok()?);
        match FileKey::from_slice(&plaintext) {
            Ok(key) => Some(key),
            Err(_) => {
                warn!(
                    len = plaintext.len(),
                    "wrap entry authenticated but does not hold a 32-byte key"
                );
                None
            }
        }
    }
}

impl From<PrivateKey> for Identity {
    fn from(private_key: PrivateKey) -> Self {
        Self::new(private_key)
    }
}
