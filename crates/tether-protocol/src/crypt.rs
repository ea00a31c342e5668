//! AES/CFB8 session ciphers, enabled once login encryption is negotiated.
//! The 16-byte shared secret doubles as key and iv on both directions.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, generic_array::GenericArray};

pub struct Encryptor(cfb8::Encryptor<aes::Aes128>);

pub struct Decryptor(cfb8::Decryptor<aes::Aes128>);

impl Encryptor {
    #[must_use]
    pub fn new(secret: &[u8; 16]) -> Self {
        Self(cfb8::Encryptor::new(secret.into(), secret.into()))
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.chunks_mut(1) {
            self.0.encrypt_block_mut(GenericArray::from_mut_slice(byte));
        }
    }
}

impl Decryptor {
    #[must_use]
    pub fn new(secret: &[u8; 16]) -> Self {
        Self(cfb8::Decryptor::new(secret.into(), secret.into()))
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.chunks_mut(1) {
            self.0.decrypt_block_mut(GenericArray::from_mut_slice(byte));
        }
    }
}
