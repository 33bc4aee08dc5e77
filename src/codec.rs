//! Symmetric codec for everything the station writes to the outside world:
//! broadcast datagrams and exported roster files.
//!
//! Frames are `IV (16 bytes) || AES-256-CBC ciphertext` with PKCS#7 padding.
//! The key is derived once per process from a fixed passphrase with scrypt.
//! There is no MAC and no version byte; the format is fixed for the lifetime
//! of the protocol, and a corrupted frame may or may not be detected.

use std::sync::OnceLock;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use generic_array::GenericArray;
use thiserror::Error;
use typenum::{U16, U32};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// 256-bit cipher key.
type Key = GenericArray<u8, U32>;

/// CBC initialisation vector, one cipher block wide.
type Iv = GenericArray<u8, U16>;

/// Shared passphrase known to the station and every companion display.
const PASSPHRASE: &[u8] = b"perro salchicha gordo bachicha, toma solcito a la orilla del mar.";

/// Fixed salt for key derivation.
const SALT: &[u8] = b"salt";

/// scrypt cost parameters: N = 2^14, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Length of the IV prefix.
pub const IV_LEN: usize = 16;

/// Cipher block length.
pub const BLOCK_LEN: usize = 16;

/// The shortest input that can possibly be a frame: an IV and one padded block.
pub const MIN_FRAME_LEN: usize = IV_LEN + BLOCK_LEN;

/// Ways in which a frame can fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed frame: {0} bytes is shorter than the minimum of {MIN_FRAME_LEN}")]
    MalformedFrame(usize),
    #[error("Decryption failed: bad padding or ciphertext length")]
    DecryptionFailure,
}

/// Get the process-wide key, deriving it on first use.
fn key() -> &'static Key {
    static KEY: OnceLock<Key> = OnceLock::new();
    KEY.get_or_init(|| {
        let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
            .expect("constant scrypt parameters are valid");
        let mut key = Key::default();
        scrypt::scrypt(PASSPHRASE, SALT, &params, key.as_mut_slice())
            .expect("output length matches the parameters");
        key
    })
}

/// Encrypt `plaintext` under a freshly generated random IV.
/// Two calls with the same input never produce the same frame.
pub fn encrypt(plaintext: &[u8]) -> Vec<u8> {
    let iv: Iv = rand::random::<[u8; IV_LEN]>().into();
    let ciphertext = Aes256CbcEnc::new(key(), &iv).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut frame = Vec::with_capacity(IV_LEN + ciphertext.len());
    frame.extend_from_slice(&iv);
    frame.extend_from_slice(&ciphertext);
    frame
}

/// Decrypt a frame produced by [`encrypt`].
pub fn decrypt(frame: &[u8]) -> Result<Vec<u8>, CodecError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(CodecError::MalformedFrame(frame.len()));
    }
    let (iv, ciphertext) = frame.split_at(IV_LEN);
    Aes256CbcDec::new(key(), Iv::from_slice(iv))
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::DecryptionFailure)
}
