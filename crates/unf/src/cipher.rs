//! AES-128-CBC decryption of the backup container

use aes::Aes128;
use cbc::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockSizeUser, KeyIvInit};

use crate::{Result, UnfError};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Key shared by every controller of the appliance family (`bcyangkmluohmars`).
pub const UNF_KEY: [u8; 16] = *b"bcyangkmluohmars";

/// IV shared by every controller of the appliance family (`ubntenterpriseap`).
pub const UNF_IV: [u8; 16] = *b"ubntenterpriseap";

pub const BLOCK_SIZE: usize = 16;

/// Key/IV pair handed to [`decrypt`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CipherKey {
    key: [u8; 16],
    iv: [u8; 16],
}

impl CipherKey {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    pub fn appliance_default() -> Self {
        Self::new(UNF_KEY, UNF_IV)
    }

    /// Parse a key/IV pair from hex, e.g. a config override.
    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self> {
        Ok(Self::new(decode_16(key_hex, "key")?, decode_16(iv_hex, "iv")?))
    }

    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }
}

impl Default for CipherKey {
    fn default() -> Self {
        Self::appliance_default()
    }
}

fn decode_16(hex_str: &str, what: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(hex_str.trim()).map_err(|e| UnfError::Key(format!("{what}: {e}")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| UnfError::Key(format!("{what} must be 16 bytes, got {}", b.len())))
}

/// Decrypt block by block. Padding is left in place: the output is exactly as
/// long as the input.
pub fn decrypt(ciphertext: &[u8], key: &CipherKey) -> Result<Vec<u8>> {
    let block = Aes128CbcDec::block_size();
    if ciphertext.len() % block != 0 {
        return Err(UnfError::SizeMismatch {
            len: ciphertext.len(),
            block,
        });
    }

    let mut decryptor = Aes128CbcDec::new_from_slices(&key.key, &key.iv)
        .map_err(|e| UnfError::Key(e.to_string()))?;

    let mut plaintext = ciphertext.to_vec();
    for chunk in plaintext.chunks_exact_mut(block) {
        decryptor.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }

    Ok(plaintext)
}
