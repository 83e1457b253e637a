//! File-backed key store.
//!
//! One JSON file per key under `<home>/keys/<name>.json`. The ed25519 seed
//! is sealed with XChaCha20-Poly1305 under a key derived from the
//! passphrase with Argon2id and a per-file random salt. A wrong passphrase
//! shows up as an authentication failure when opening the seed.
//!
//! Addresses are the first 20 bytes of SHA-256 over the public key.

use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signer, SigningKey};
use lg_api_gateway::ports::{KeyError, KeyManager};
use lg_api_gateway::{Address, KeyInfo, Signature, ADDRESS_LEN};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::Zeroizing;

pub const ALGO_ED25519: &str = "ed25519";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const MAX_NAME_LEN: usize = 64;

/// On-disk key record.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    name: String,
    algo: String,
    address: Address,
    pub_key: String,
    /// hex
    salt: String,
    /// hex
    nonce: String,
    /// hex, sealed 32-byte seed
    sealed_seed: String,
}

impl KeyFile {
    fn info(&self) -> KeyInfo {
        KeyInfo {
            name: self.name.clone(),
            address: self.address,
            pub_key: self.pub_key.clone(),
            algo: self.algo.clone(),
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy)]
pub struct KdfCost {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
        }
    }
}

impl KdfCost {
    /// Minimal cost, for tests only.
    pub const CHEAP: KdfCost = KdfCost {
        memory_kib: 256,
        iterations: 1,
    };
}

pub struct FileKeyStore {
    dir: PathBuf,
    kdf: Argon2<'static>,
    /// Serializes read-modify-write of key files.
    write_lock: Mutex<()>,
}

impl FileKeyStore {
    /// Open (creating if needed) the key directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KeyError> {
        Self::open_with(dir, KdfCost::default())
    }

    pub fn open_with(dir: impl Into<PathBuf>, cost: KdfCost) -> Result<Self, KeyError> {
        let params = Params::new(cost.memory_kib, cost.iterations, 1, Some(32))
            .map_err(|e| KeyError::Invalid(format!("key derivation parameters: {}", e)))?;
        let kdf = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| KeyError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        info!(dir = %dir.display(), "key store opened");
        Ok(Self {
            dir,
            kdf,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn load(&self, name: &str) -> Result<KeyFile, KeyError> {
        validate_name(name)?;
        let raw = match std::fs::read(self.path_of(name)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyError::KeyNotFound(name.to_string()))
            }
            Err(e) => return Err(KeyError::Unavailable(e.to_string())),
        };
        serde_json::from_slice(&raw)
            .map_err(|e| KeyError::Unavailable(format!("corrupt key file '{}': {}", name, e)))
    }

    fn store(&self, file: &KeyFile) -> Result<(), KeyError> {
        let raw = serde_json::to_vec_pretty(file).map_err(|e| KeyError::Unavailable(e.to_string()))?;
        let path = self.path_of(&file.name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(|e| KeyError::Unavailable(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| KeyError::Unavailable(e.to_string()))
    }

    fn derive_key(&self, passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeyError> {
        let mut key = Zeroizing::new([0u8; 32]);
        self.kdf
            .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
            .map_err(|e| KeyError::Unavailable(format!("key derivation failed: {}", e)))?;
        Ok(key)
    }

    fn seal(&self, name: &str, passphrase: &str, seed: &[u8; 32]) -> Result<(String, String, String), KeyError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = self.derive_key(passphrase, &salt)?;
        let cipher = XChaCha20Poly1305::new((&*key).into());
        let sealed = cipher
            .encrypt(XNonce::from_slice(&nonce), seed.as_slice())
            .map_err(|e| KeyError::Unavailable(format!("sealing '{}' failed: {}", name, e)))?;
        Ok((hex::encode(salt), hex::encode(nonce), hex::encode(sealed)))
    }

    fn open_seed(&self, file: &KeyFile, passphrase: &str) -> Result<SigningKey, KeyError> {
        let corrupt = |what: &str| KeyError::Unavailable(format!("corrupt {} in key '{}'", what, file.name));
        let salt = hex::decode(&file.salt).map_err(|_| corrupt("salt"))?;
        let nonce = hex::decode(&file.nonce).map_err(|_| corrupt("nonce"))?;
        let sealed = hex::decode(&file.sealed_seed).map_err(|_| corrupt("seed"))?;
        if nonce.len() != NONCE_LEN {
            return Err(corrupt("nonce"));
        }

        let key = self.derive_key(passphrase, &salt)?;
        let cipher = XChaCha20Poly1305::new((&*key).into());
        let seed = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(&nonce), sealed.as_slice())
                .map_err(|_| KeyError::InvalidPassphrase(file.name.clone()))?,
        );
        let seed: &[u8; 32] = seed.as_slice().try_into().map_err(|_| corrupt("seed"))?;
        Ok(SigningKey::from_bytes(seed))
    }
}

fn validate_name(name: &str) -> Result<(), KeyError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(KeyError::Invalid(format!("invalid key name '{}'", name)))
    }
}

/// First 20 bytes of SHA-256 over the public key.
pub fn address_of(pub_key: &[u8]) -> Address {
    let digest = Sha256::digest(pub_key);
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
    Address(bytes)
}

#[async_trait]
impl KeyManager for FileKeyStore {
    async fn list(&self) -> Result<Vec<KeyInfo>, KeyError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| KeyError::Unavailable(e.to_string()))?;
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| KeyError::Unavailable(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            keys.push(self.load(name)?.info());
        }
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn get(&self, name: &str) -> Result<KeyInfo, KeyError> {
        self.load(name).map(|file| file.info())
    }

    async fn create(
        &self,
        name: &str,
        passphrase: &str,
        algo: Option<&str>,
    ) -> Result<KeyInfo, KeyError> {
        validate_name(name)?;
        let algo = algo.unwrap_or(ALGO_ED25519);
        if algo != ALGO_ED25519 {
            return Err(KeyError::Invalid(format!("unsupported algorithm '{}'", algo)));
        }

        let _guard = self.write_lock.lock();
        if self.path_of(name).exists() {
            return Err(KeyError::KeyExists(name.to_string()));
        }

        let signing = SigningKey::generate(&mut OsRng);
        let seed = Zeroizing::new(signing.to_bytes());
        let pub_key = signing.verifying_key().to_bytes();
        let (salt, nonce, sealed_seed) = self.seal(name, passphrase, &seed)?;

        let file = KeyFile {
            name: name.to_string(),
            algo: algo.to_string(),
            address: address_of(&pub_key),
            pub_key: hex::encode(pub_key),
            salt,
            nonce,
            sealed_seed,
        };
        self.store(&file)?;
        info!(key = name, address = %file.address, "key created");
        Ok(file.info())
    }

    async fn update(&self, name: &str, old: &str, new: &str) -> Result<KeyInfo, KeyError> {
        let _guard = self.write_lock.lock();
        let mut file = self.load(name)?;
        let seed = Zeroizing::new(self.open_seed(&file, old)?.to_bytes());
        let (salt, nonce, sealed_seed) = self.seal(name, new, &seed)?;
        file.salt = salt;
        file.nonce = nonce;
        file.sealed_seed = sealed_seed;
        self.store(&file)?;
        info!(key = name, "key passphrase changed");
        Ok(file.info())
    }

    async fn delete(&self, name: &str, passphrase: &str) -> Result<(), KeyError> {
        let _guard = self.write_lock.lock();
        let file = self.load(name)?;
        self.open_seed(&file, passphrase)?;
        std::fs::remove_file(self.path_of(name)).map_err(|e| KeyError::Unavailable(e.to_string()))?;
        info!(key = name, "key deleted");
        Ok(())
    }

    async fn sign(
        &self,
        name: &str,
        passphrase: &str,
        payload: &[u8],
    ) -> Result<Signature, KeyError> {
        let file = self.load(name)?;
        let signing = self.open_seed(&file, passphrase)?;
        let signature = signing.sign(payload);
        Ok(Signature {
            algo: file.algo,
            pub_key: file.pub_key,
            signature: hex::encode(signature.to_bytes()),
        })
    }
}
