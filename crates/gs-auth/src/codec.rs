//! At-rest protection for token strings.
//!
//! Every secret field an account carries goes through [`SecretCodec`] before
//! it crosses the persistence boundary. The codec prefers the injected
//! OS-native [`SecureStorage`] capability; when that is unavailable or its
//! call fails, it falls back to AES-256-GCM under a key derived from stable
//! machine identity. The two forms are distinguished on decrypt purely by
//! the `"FB:"` discriminator prefix, never by whichever capability happens
//! to be available at that moment.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::ZeroizeOnDrop;

use crate::errors::Result;

/// Discriminator carried by every fallback-encrypted blob
pub const FALLBACK_PREFIX: &str = "FB:";

/// Fallback cipher: AES-256-GCM with a 16-byte IV
type FallbackCipher = AesGcm<Aes256, U16>;

/// Native-path cipher: AES-256-GCM with the standard 12-byte nonce
#[cfg(feature = "keyring-support")]
type NativeCipher = AesGcm<Aes256, aes_gcm::aead::consts::U12>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// AES-256 key (32 bytes), zeroized on drop
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// OS-provided secure-storage capability.
///
/// Injected at codec construction so tests can substitute fakes without
/// touching process-wide state. Availability is a soft signal: the codec
/// re-asks on every call and treats a failed native call as a cue to fall
/// back, never as an error to surface.
pub trait SecureStorage: Send + Sync {
    fn is_available(&self) -> bool;
    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>>;
    fn decrypt(&self, blob: &[u8]) -> Result<String>;
}

/// Stand-in for hosts with no secure storage; forces the fallback path.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStorage;

impl SecureStorage for UnavailableStorage {
    fn is_available(&self) -> bool {
        false
    }

    fn encrypt(&self, _plaintext: &str) -> Result<Vec<u8>> {
        Err(crate::errors::AuthError::Crypto(
            "secure storage unavailable".to_string(),
        ))
    }

    fn decrypt(&self, _blob: &[u8]) -> Result<String> {
        Err(crate::errors::AuthError::Crypto(
            "secure storage unavailable".to_string(),
        ))
    }
}

/// Encrypts and decrypts opaque token strings for at-rest storage
pub struct SecretCodec {
    storage: Arc<dyn SecureStorage>,
    machine_key: EncryptionKey,
}

impl SecretCodec {
    /// Codec bound to the real machine identity of this host
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        let (hostname, username) = machine_identity();
        Self::with_identity(storage, &hostname, &username)
    }

    /// Codec with an explicit machine identity. The fallback key is a
    /// one-way hash of the identity, so the same identity always yields
    /// the same key.
    pub fn with_identity(storage: Arc<dyn SecureStorage>, hostname: &str, username: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(hostname.as_bytes());
        hasher.update(b"|");
        hasher.update(username.as_bytes());
        let machine_key = EncryptionKey::from_bytes(hasher.finalize().into());

        Self {
            storage,
            machine_key,
        }
    }

    /// Encrypt a plaintext value for storage.
    ///
    /// Empty input passes through unchanged. Availability of the native
    /// capability is re-checked on every call; a native failure falls
    /// through to the fallback instead of propagating.
    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() {
            return plaintext.to_string();
        }

        if self.storage.is_available() {
            match self.storage.encrypt(plaintext) {
                Ok(blob) => return hex_encode(&blob),
                Err(e) => debug!("native secure storage encrypt failed, falling back: {e}"),
            }
        }

        self.fallback_encrypt(plaintext)
    }

    /// Decrypt a stored value.
    ///
    /// Dispatches strictly on the `"FB:"` prefix. Anything that cannot be
    /// decrypted (malformed blob, failed native call, tampered ciphertext)
    /// is returned unchanged and treated as not-encrypted-by-us.
    pub fn decrypt(&self, blob: &str) -> String {
        if blob.is_empty() {
            return blob.to_string();
        }

        if let Some(body) = blob.strip_prefix(FALLBACK_PREFIX) {
            return self.fallback_decrypt(blob, body);
        }

        let Some(bytes) = hex_decode(blob) else {
            return blob.to_string();
        };
        match self.storage.decrypt(&bytes) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                debug!("native secure storage decrypt failed, passing value through: {e}");
                blob.to_string()
            }
        }
    }

    fn fallback_encrypt(&self, plaintext: &str) -> String {
        let cipher = FallbackCipher::new(self.machine_key.as_bytes().into());

        // Fresh IV per call; reuse under the same key is forbidden
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let sealed = match cipher.encrypt(Nonce::from_slice(&iv), plaintext.as_bytes()) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!("fallback encryption failed, storing value unprotected: {e}");
                return plaintext.to_string();
            }
        };
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        format!(
            "{FALLBACK_PREFIX}{}:{}:{}",
            hex_encode(&iv),
            hex_encode(tag),
            hex_encode(ciphertext)
        )
    }

    fn fallback_decrypt(&self, original: &str, body: &str) -> String {
        let segments: Vec<&str> = body.split(':').collect();
        let [iv_hex, tag_hex, ct_hex] = segments.as_slice() else {
            return original.to_string();
        };

        let parts = (hex_decode(iv_hex), hex_decode(tag_hex), hex_decode(ct_hex));
        let (Some(iv), Some(tag), Some(ciphertext)) = parts else {
            return original.to_string();
        };
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return original.to_string();
        }

        let cipher = FallbackCipher::new(self.machine_key.as_bytes().into());
        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        match cipher.decrypt(Nonce::from_slice(&iv), sealed.as_slice()) {
            Ok(plaintext) => match String::from_utf8(plaintext) {
                Ok(plaintext) => plaintext,
                Err(_) => original.to_string(),
            },
            Err(_) => {
                warn!("fallback blob failed authentication, passing value through");
                original.to_string()
            }
        }
    }
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec")
            .field("machine_key", &self.machine_key)
            .finish_non_exhaustive()
    }
}

fn machine_identity() -> (String, String) {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    (hostname, username)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Secure storage backed by a random 256-bit key held in the OS keyring.
///
/// The key lives in the platform credential service (macOS Keychain,
/// Windows Credential Manager, Linux Secret Service); values are sealed
/// with AES-256-GCM under it, nonce prepended. `is_available` probes the
/// keyring on every call since it can lock or unlock across OS sessions.
#[cfg(feature = "keyring-support")]
pub struct KeyringStorage {
    service: String,
    entry_name: String,
}

#[cfg(feature = "keyring-support")]
impl KeyringStorage {
    const NONCE_LEN: usize = 12;

    pub fn new() -> Self {
        Self {
            service: "glowstone-mc".to_string(),
            entry_name: "gs-auth:v1".to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.entry_name)
            .map_err(|e| crate::errors::AuthError::Keyring(format!("Failed to access keyring: {e}")))
    }

    fn load_or_create_key(&self) -> Result<EncryptionKey> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        use crate::errors::AuthError;

        let entry = self.entry()?;
        match entry.get_password() {
            Ok(key_b64) => {
                let key_bytes = STANDARD
                    .decode(key_b64)
                    .map_err(|_| AuthError::Keyring("Corrupt key in keyring".to_string()))?;
                let key: [u8; 32] = key_bytes
                    .try_into()
                    .map_err(|_| AuthError::Keyring("Wrong key length in keyring".to_string()))?;
                Ok(EncryptionKey::from_bytes(key))
            }
            Err(keyring::Error::NoEntry) => {
                let key = EncryptionKey::generate();
                entry
                    .set_password(&STANDARD.encode(key.as_bytes()))
                    .map_err(|e| AuthError::Keyring(format!("Failed to write to keyring: {e}")))?;
                debug!("Generated new storage key in OS keyring");
                Ok(key)
            }
            Err(e) => Err(AuthError::Keyring(format!(
                "Failed to read from keyring: {e}"
            ))),
        }
    }
}

#[cfg(feature = "keyring-support")]
impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "keyring-support")]
impl SecureStorage for KeyringStorage {
    fn is_available(&self) -> bool {
        match self.entry() {
            Ok(entry) => match entry.get_password() {
                // No key yet is fine; one is created on first encrypt
                Ok(_) | Err(keyring::Error::NoEntry) => true,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let key = self.load_or_create_key()?;
        let cipher = NativeCipher::new(key.as_bytes().into());

        let mut nonce = [0u8; Self::NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| crate::errors::AuthError::Crypto(format!("Encryption failed: {e}")))?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<String> {
        use crate::errors::AuthError;

        if blob.len() <= Self::NONCE_LEN {
            return Err(AuthError::Crypto("Blob too short".to_string()));
        }
        let (nonce, sealed) = blob.split_at(Self::NONCE_LEN);

        let key = self.load_or_create_key()?;
        let cipher = NativeCipher::new(key.as_bytes().into());

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| AuthError::Crypto("Decryption failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|_| AuthError::Crypto("Invalid UTF-8".to_string()))
    }
}
