//! Public key fingerprints.
//!
//! Lookups are keyed by a printable fingerprint. The resolver treats it as an
//! opaque string; this module only supplies the conversion from a key source.

use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use md5::Md5;
use sha2::{Digest, Sha256};

/// Anything that can be turned into a printable key fingerprint.
pub trait FingerprintSource {
    /// Returns the fingerprint string used in the lookup.
    fn fingerprint(&self) -> String;
}

impl FingerprintSource for str {
    fn fingerprint(&self) -> String {
        self.to_string()
    }
}

impl FingerprintSource for String {
    fn fingerprint(&self) -> String {
        self.clone()
    }
}

impl<T: FingerprintSource + ?Sized> FingerprintSource for &T {
    fn fingerprint(&self) -> String {
        (**self).fingerprint()
    }
}

/// Fingerprint rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintFormat {
    /// `SHA256:<base64 without padding>`, as printed by `ssh-keygen -l` and
    /// substituted for `%f` by sshd.
    #[default]
    Sha256Base64,
    /// Colon-separated lowercase hex of the SHA-256 digest.
    Sha256Hex,
    /// Colon-separated lowercase hex of the MD5 digest, without a prefix.
    /// The legacy OpenSSH fingerprint, as stored by older key tables.
    Md5Hex,
}

/// A parsed OpenSSH public key line (`<type> <base64> [comment]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSshPublicKey {
    key_type: String,
    blob: Vec<u8>,
    comment: Option<String>,
    format: FingerprintFormat,
}

impl OpenSshPublicKey {
    /// Parses a public key line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the line is not a well-formed key:
    /// missing fields, bad base64, or a blob whose embedded type disagrees
    /// with the declared one.
    pub fn parse(line: &str) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let key_type = fields
            .next()
            .ok_or_else(|| Error::InvalidInput("empty public key".to_string()))?;
        let encoded = fields.next().ok_or_else(|| {
            Error::InvalidInput(format!("public key of type '{key_type}' has no key data"))
        })?;
        let comment = {
            let rest: Vec<&str> = fields.collect();
            (!rest.is_empty()).then(|| rest.join(" "))
        };

        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| Error::InvalidInput(format!("public key data is not base64: {e}")))?;

        let embedded = embedded_key_type(&blob).ok_or_else(|| {
            Error::InvalidInput("public key blob is truncated".to_string())
        })?;
        if embedded != key_type.as_bytes() {
            return Err(Error::InvalidInput(format!(
                "public key type '{key_type}' does not match key data"
            )));
        }

        Ok(Self {
            key_type: key_type.to_string(),
            blob,
            comment,
            format: FingerprintFormat::default(),
        })
    }

    /// Selects the fingerprint rendering.
    #[must_use]
    pub const fn with_format(mut self, format: FingerprintFormat) -> Self {
        self.format = format;
        self
    }

    /// Returns the key type, e.g. `ssh-ed25519`.
    #[must_use]
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// Returns the key comment, if present.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// `SHA256:<base64>` fingerprint.
    #[must_use]
    pub fn sha256_base64(&self) -> String {
        format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&self.blob)))
    }

    /// Colon-separated hex SHA-256 fingerprint.
    #[must_use]
    pub fn sha256_hex(&self) -> String {
        colon_hex(&Sha256::digest(&self.blob))
    }

    /// Colon-separated hex MD5 fingerprint (`ssh-keygen -E md5 -l` without
    /// the `MD5:` prefix).
    #[must_use]
    pub fn md5_hex(&self) -> String {
        colon_hex(&Md5::digest(&self.blob))
    }
}

impl FingerprintSource for OpenSshPublicKey {
    fn fingerprint(&self) -> String {
        match self.format {
            FingerprintFormat::Sha256Base64 => self.sha256_base64(),
            FingerprintFormat::Sha256Hex => self.sha256_hex(),
            FingerprintFormat::Md5Hex => self.md5_hex(),
        }
    }
}

fn colon_hex(digest: &[u8]) -> String {
    digest
        .iter()
        .map(|byte| hex::encode([*byte]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Reads the length-prefixed key type at the start of a key blob.
fn embedded_key_type(blob: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = usize::try_from(u32::from_be_bytes(len_bytes)).ok()?;
    blob.get(4..4usize.checked_add(len)?)
}
