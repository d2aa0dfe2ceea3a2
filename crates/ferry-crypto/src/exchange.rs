//! Per-file session keys over an ephemeral X25519 exchange.
//!
//! The sender generates a fresh keypair for every file, performs
//! Diffie-Hellman with the recipient's long-term public key and uses the
//! result to wrap a random session key. Only the recipient private key can
//! unwrap it.
//!
//! ```text
//!  sender (ephemeral)                          recipient (long-term)
//!  ------------------                          ---------------------
//!  esk, epk = X25519 keygen
//!  ss   = DH(esk, rpk)                         ss   = DH(rsk, epk)
//!  kek  = HKDF(salt, ss, "key-wrap"||epk||rpk) kek  = HKDF(...)
//!  sk   = random 32 bytes
//!  wrap = AEAD(kek, nonce, sk, aad=header)     sk   = AEAD-open(kek, wrap)
//!                    --- EncryptionHeader --->
//! ```

use crate::aead::{AeadKey, NONCE_SIZE, Nonce};
use crate::kdf::{derive_wrap_key, labels};
use crate::keystore::{SealParams, open_private_key, seal_private_key};
use crate::random::{random_16, random_24, random_32};
use crate::{CryptoError, PUBLIC_KEY_SIZE};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Source of the passphrase protecting private keys.
pub trait PassphraseProvider: Send + Sync {
    /// Return the passphrase.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Passphrase` if no passphrase can be obtained.
    fn passphrase(&self) -> Result<Zeroizing<String>, CryptoError>;
}

/// Passphrase held in memory.
pub struct StaticPassphrase(Zeroizing<String>);

impl StaticPassphrase {
    /// Wrap a passphrase.
    #[must_use]
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(passphrase.into()))
    }
}

impl PassphraseProvider for StaticPassphrase {
    fn passphrase(&self) -> Result<Zeroizing<String>, CryptoError> {
        Ok(self.0.clone())
    }
}

impl fmt::Debug for StaticPassphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticPassphrase(..)")
    }
}

/// Encryption method recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionMethod {
    /// X25519 exchange, HKDF-BLAKE3 wrap key, XChaCha20-Poly1305 segments.
    X25519Blake3XChaCha20Poly1305,
}

impl EncryptionMethod {
    /// Return the numeric identifier for wire encoding.
    #[must_use]
    pub fn to_id(self) -> u8 {
        match self {
            EncryptionMethod::X25519Blake3XChaCha20Poly1305 => 0x01,
        }
    }

    /// Parse a method from its wire identifier.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::UnsupportedMethod` for unknown identifiers.
    pub fn from_id(id: u8) -> Result<Self, CryptoError> {
        match id {
            0x01 => Ok(EncryptionMethod::X25519Blake3XChaCha20Poly1305),
            other => Err(CryptoError::UnsupportedMethod(other)),
        }
    }

    /// Human-readable name as stored in delivery records.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EncryptionMethod::X25519Blake3XChaCha20Poly1305 => "x25519-blake3-xchacha20poly1305",
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 32-byte symmetric key for one file. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; 32]>);

impl SessionKey {
    /// Create from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Fixed-size header prepended to every encrypted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionHeader {
    /// Encryption method
    pub method: EncryptionMethod,
    /// Sender's ephemeral X25519 public key
    pub sender_public: [u8; 32],
    /// HKDF salt for the wrap key
    pub salt: [u8; 16],
    /// Nonce used to wrap the session key
    pub wrap_nonce: Nonce,
    /// Session key sealed under the wrap key (32 + 16 tag)
    pub wrapped_key: [u8; 48],
}

impl EncryptionHeader {
    /// Magic prefix.
    pub const MAGIC: &'static [u8; 8] = b"FERRYHD1";

    /// Serialized size in bytes.
    pub const SIZE: usize = 8 + 1 + PUBLIC_KEY_SIZE + 16 + NONCE_SIZE + 48;

    /// Length of the prefix authenticated as wrap AAD (magic, method, public key, salt).
    const AAD_LEN: usize = 8 + 1 + PUBLIC_KEY_SIZE + 16;

    /// Serialize to the fixed wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..8].copy_from_slice(Self::MAGIC);
        out[8] = self.method.to_id();
        out[9..41].copy_from_slice(&self.sender_public);
        out[41..57].copy_from_slice(&self.salt);
        out[57..81].copy_from_slice(self.wrap_nonce.as_bytes());
        out[81..].copy_from_slice(&self.wrapped_key);
        out
    }

    /// Parse from the fixed wire layout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeader` for wrong length or magic and
    /// `UnsupportedMethod` for unknown method identifiers.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != Self::SIZE {
            return Err(CryptoError::InvalidHeader("wrong length"));
        }
        if &bytes[..8] != Self::MAGIC {
            return Err(CryptoError::InvalidHeader("bad magic"));
        }
        let method = EncryptionMethod::from_id(bytes[8])?;

        let mut sender_public = [0u8; 32];
        sender_public.copy_from_slice(&bytes[9..41]);
        let mut salt = [0u8; 16];
        salt.copy_from_slice(&bytes[41..57]);
        let wrap_nonce =
            Nonce::from_slice(&bytes[57..81]).ok_or(CryptoError::InvalidHeader("bad nonce"))?;
        let mut wrapped_key = [0u8; 48];
        wrapped_key.copy_from_slice(&bytes[81..]);

        Ok(Self {
            method,
            sender_public,
            salt,
            wrap_nonce,
            wrapped_key,
        })
    }

    /// Read exactly one header from a stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeader("truncated")` if the stream ends early.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, CryptoError> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CryptoError::InvalidHeader("truncated"),
            _ => CryptoError::Io(e),
        })?;
        Self::from_bytes(&buf)
    }

    /// Write the header to a stream.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Io` on write failure.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), CryptoError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Digest of the serialized header, bound into every segment's AAD.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        blake3::derive_key(labels::HEADER_DIGEST, &self.to_bytes())
    }

    fn wrap_aad(&self) -> [u8; Self::AAD_LEN] {
        let mut aad = [0u8; Self::AAD_LEN];
        aad.copy_from_slice(&self.to_bytes()[..Self::AAD_LEN]);
        aad
    }
}

fn shared_secret(secret: &StaticSecret, public: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let shared = secret.diffie_hellman(&PublicKey::from(*public));
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }
    Ok(Zeroizing::new(*shared.as_bytes()))
}

/// Ephemeral sender keypair generator.
pub struct EphemeralKeyExchange;

impl EphemeralKeyExchange {
    /// Generate a fresh keypair and seal its private key.
    ///
    /// The keypair is used for exactly one file.
    ///
    /// # Errors
    ///
    /// Returns passphrase, key-derivation or random-generation failures.
    pub fn generate(
        provider: &dyn PassphraseProvider,
        params: &SealParams,
    ) -> Result<KeyPairHandle, CryptoError> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        let passphrase = provider.passphrase()?;
        let secret_bytes = Zeroizing::new(secret.to_bytes());
        let sealed = seal_private_key(&secret_bytes, &passphrase, params)?;

        Ok(KeyPairHandle {
            secret,
            public,
            sealed,
        })
    }
}

/// Single-use sender keypair.
pub struct KeyPairHandle {
    secret: StaticSecret,
    public: PublicKey,
    sealed: Vec<u8>,
}

impl KeyPairHandle {
    /// Public key bytes.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Private key sealed under the provider's passphrase.
    #[must_use]
    pub fn sealed_private_key(&self) -> &[u8] {
        &self.sealed
    }

    /// In-memory private key.
    #[must_use]
    pub fn private_key(&self) -> &StaticSecret {
        &self.secret
    }

    /// Derive a session key for `recipient_public` and build the header.
    ///
    /// Consumes the handle so the keypair cannot serve a second file.
    ///
    /// # Errors
    ///
    /// - `NonContributory` if the recipient key is low-order
    /// - `RandomFailed` / `EncryptionFailed` from the underlying primitives
    pub fn derive_session_key(
        self,
        recipient_public: &[u8; 32],
    ) -> Result<(SessionKey, EncryptionHeader), CryptoError> {
        let shared = shared_secret(&self.secret, recipient_public)?;
        let sender_public = self.public.to_bytes();

        let mut header = EncryptionHeader {
            method: EncryptionMethod::X25519Blake3XChaCha20Poly1305,
            sender_public,
            salt: random_16()?,
            wrap_nonce: Nonce::from_bytes(random_24()?),
            wrapped_key: [0u8; 48],
        };

        let kek = AeadKey::new(*derive_wrap_key(
            &shared,
            &header.salt,
            &sender_public,
            recipient_public,
        ));
        let session = SessionKey::from_bytes(random_32()?);

        let wrapped = kek.encrypt(&header.wrap_nonce, session.as_bytes(), &header.wrap_aad())?;
        header.wrapped_key.copy_from_slice(&wrapped);

        Ok((session, header))
    }
}

/// Long-term recipient keypair.
pub struct RecipientKey {
    secret: StaticSecret,
    public: PublicKey,
}

impl RecipientKey {
    /// Generate a new recipient keypair.
    ///
    /// # Errors
    ///
    /// Never fails with the OS RNG; the `Result` matches the other constructors.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self::from_secret(StaticSecret::random_from_rng(OsRng)))
    }

    /// Load from raw private key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    /// Open a sealed private key blob.
    ///
    /// # Errors
    ///
    /// Returns `SealedKey` on a malformed blob or wrong passphrase.
    pub fn from_sealed(blob: &[u8], provider: &dyn PassphraseProvider) -> Result<Self, CryptoError> {
        let passphrase = provider.passphrase()?;
        let bytes = open_private_key(blob, &passphrase)?;
        Ok(Self::from_bytes(*bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Seal the private key for storage.
    ///
    /// # Errors
    ///
    /// Returns passphrase, key-derivation or random-generation failures.
    pub fn seal(
        &self,
        provider: &dyn PassphraseProvider,
        params: &SealParams,
    ) -> Result<Vec<u8>, CryptoError> {
        let passphrase = provider.passphrase()?;
        let bytes = Zeroizing::new(self.secret.to_bytes());
        seal_private_key(&bytes, &passphrase, params)
    }

    /// Public key bytes.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Recover the session key from a header addressed to this keypair.
    ///
    /// # Errors
    ///
    /// - `NonContributory` if the embedded sender key is low-order
    /// - `DecryptionFailed` if the header was not addressed to this key or
    ///   was modified
    pub fn open_header(&self, header: &EncryptionHeader) -> Result<SessionKey, CryptoError> {
        let shared = shared_secret(&self.secret, &header.sender_public)?;
        let recipient_public = self.public.to_bytes();
        let kek = AeadKey::new(*derive_wrap_key(
            &shared,
            &header.salt,
            &header.sender_public,
            &recipient_public,
        ));

        let unwrapped = Zeroizing::new(kek.decrypt(
            &header.wrap_nonce,
            &header.wrapped_key,
            &header.wrap_aad(),
        )?);
        let key = AeadKey::from_slice(&unwrapped)?;
        Ok(SessionKey::from_bytes(*key.as_bytes()))
    }
}

/// Parse a hex-encoded X25519 public key.
///
/// # Errors
///
/// Returns `InvalidPublicKey` for malformed hex or wrong length.
pub fn parse_public_key(hex_str: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|_| CryptoError::InvalidPublicKey)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)
}
