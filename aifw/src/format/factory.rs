// SPDX-FileCopyrightText: 2026 aifw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Factory images: the encrypted and doubly signed wrapper around a recovery
//! image.
//!
//! ```text
//! [outer verification header]
//!     [encryption header][ASCII IV + '\n']["Salted__" + salt][ciphertext]
//! [outer signature]
//! ```
//!
//! The ciphertext decrypts to `[inner verification header][recovery image]
//! [inner signature]`.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use tracing::debug;

use crate::{
    crypto::{self, AES_BLOCK_SIZE, SALT_SIZE},
    device::DeviceProfile,
    format::mh01::{self, HEADER_SIZE},
    util::NumBytes,
};

pub use crate::crypto::SIGNATURE_SIZE;

/// Hex encoded IV followed by a line feed.
pub const IV_ASCII_SIZE: usize = AES_BLOCK_SIZE * 2 + 1;

pub const SALT_MAGIC: [u8; 8] = *b"Salted__";

pub const SALT_TAG_SIZE: usize = SALT_MAGIC.len() + SALT_SIZE;

/// Salt used by the stock tooling when building factory images.
pub const DEFAULT_SALT: [u8; SALT_SIZE] = [0x65, 0xfc, 0x43, 0xbc, 0x67, 0xa3, 0x23, 0x35];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to parse {0} header")]
    Header(Layer, #[source] mh01::Error),
    #[error("{layer} block needs {needed}, but only {available} are available")]
    OutOfBounds {
        layer: Layer,
        needed: NumBytes<usize>,
        available: NumBytes<usize>,
    },
    #[error("Invalid ASCII IV: {0:?}")]
    InvalidIv(String),
    #[error("Encrypted data does not start with a {SALT_TAG_SIZE} byte salt tag")]
    InvalidSaltTag,
    #[error("{0} signature does not match the device public key")]
    SignatureMismatch(Layer),
    #[error("Device {0:?} has no private key for signing")]
    MissingPrivateKey(String),
    #[error("Device {0:?} has no public key loaded for verification")]
    MissingPublicKey(String),
    #[error("Failed to write debug output: {0:?}")]
    DebugOutput(String, #[source] io::Error),
    #[error("Failed to decrypt firmware payload")]
    Decrypt(#[source] crypto::Error),
    #[error("Cryptographic operation failed")]
    Crypto(#[from] crypto::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Nesting level of a block within a factory image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layer {
    /// Verification block wrapping the encrypted block.
    Outer,
    /// Encryption block.
    Encrypted,
    /// Verification block wrapping the recovery image.
    Inner,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outer => f.write_str("Outer"),
            Self::Encrypted => f.write_str("Encrypted"),
            Self::Inner => f.write_str("Inner"),
        }
    }
}

/// The bytes covered by the signature of a verification block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SignedRegion {
    /// The verification header and the payload.
    #[default]
    HeaderAndPayload,
    /// Only the payload. This is what stock firmware images use.
    PayloadOnly,
}

impl SignedRegion {
    fn select<'a>(self, block: &'a [u8]) -> &'a [u8] {
        match self {
            Self::HeaderAndPayload => block,
            Self::PayloadOnly => &block[HEADER_SIZE..],
        }
    }
}

#[derive(Clone, Debug)]
pub struct FactoryOptions {
    pub salt: [u8; SALT_SIZE],
    /// IV to encrypt with instead of the one derived from the salt.
    pub iv: Option<[u8; AES_BLOCK_SIZE]>,
    pub signed_region: SignedRegion,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            salt: DEFAULT_SALT,
            iv: None,
            signed_region: SignedRegion::default(),
        }
    }
}

/// Receiver for intermediate buffers produced while building a factory image.
pub trait DebugSink {
    fn write_file(&self, name: &str, data: &[u8]) -> io::Result<()>;
}

/// Writes debug buffers as files inside a directory.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DebugSink for DirectorySink {
    fn write_file(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let path = self.dir.join(name);
        debug!("Writing debug output: {path:?}");
        fs::write(path, data)
    }
}

fn write_debug(sink: Option<&dyn DebugSink>, name: &str, data: &[u8]) -> Result<()> {
    if let Some(sink) = sink {
        sink.write_file(name, data)
            .map_err(|e| Error::DebugOutput(name.to_owned(), e))?;
    }

    Ok(())
}

/// Build `[verification header][payload][signature]`.
pub fn build_signed_block(
    payload: &[u8],
    key: &RsaPrivateKey,
    region: SignedRegion,
    layer: Layer,
) -> Result<Vec<u8>> {
    let header =
        mh01::build_verification_header(payload.len()).map_err(|e| Error::Header(layer, e))?;

    let mut block = Vec::with_capacity(HEADER_SIZE + payload.len() + SIGNATURE_SIZE);
    block.extend_from_slice(&header);
    block.extend_from_slice(payload);

    let signature = crypto::sign(key, region.select(&block))?;
    block.extend_from_slice(&signature);

    Ok(block)
}

/// Verify a block produced by [`build_signed_block`] and return its payload.
/// Data after the signature is ignored.
pub fn open_signed_block<'a>(
    data: &'a [u8],
    key: &RsaPublicKey,
    region: SignedRegion,
    layer: Layer,
) -> Result<&'a [u8]> {
    let payload_len =
        mh01::parse_verification_header(data).map_err(|e| Error::Header(layer, e))? as usize;

    let signed_len = HEADER_SIZE + payload_len;
    let needed = signed_len + SIGNATURE_SIZE;
    if data.len() < needed {
        return Err(Error::OutOfBounds {
            layer,
            needed: NumBytes(needed),
            available: NumBytes(data.len()),
        });
    } else if data.len() > needed {
        debug!(
            "{layer} block: ignoring {} after signature",
            NumBytes(data.len() - needed),
        );
    }

    let (block, signature) = data[..needed].split_at(signed_len);
    if !crypto::verify(key, region.select(block), signature) {
        return Err(Error::SignatureMismatch(layer));
    }
    debug!("{layer} signature is valid");

    Ok(&block[HEADER_SIZE..])
}

/// AES-128-CBC encrypted payload in the salted OpenSSL format, preceded by
/// the hex encoded IV.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedBlock {
    pub salt: [u8; SALT_SIZE],
    pub iv: [u8; AES_BLOCK_SIZE],
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlock {
    /// Encrypt with the key derived from `passphrase` and `salt`. The IV is
    /// derived the same way unless `iv` is given.
    pub fn encrypt(
        plaintext: &[u8],
        passphrase: &str,
        salt: [u8; SALT_SIZE],
        iv: Option<[u8; AES_BLOCK_SIZE]>,
    ) -> Self {
        let (key, derived_iv) = crypto::derive_firmware_key(passphrase, &salt);
        let iv = iv.unwrap_or(derived_iv);

        debug!(
            "Encrypting {} with salt {} and IV {}",
            NumBytes(plaintext.len()),
            hex::encode(salt),
            hex::encode(iv),
        );

        let ciphertext = crypto::encrypt_aes128_cbc(plaintext, &key, &iv);

        Self {
            salt,
            iv,
            ciphertext,
        }
    }

    /// Decrypt with the key derived from `passphrase` and the embedded salt.
    /// The embedded IV is used as is.
    pub fn decrypt(&self, passphrase: &str) -> Result<Vec<u8>> {
        let (key, _) = crypto::derive_firmware_key(passphrase, &self.salt);

        crypto::decrypt_aes128_cbc(&self.ciphertext, &key, &self.iv).map_err(Error::Decrypt)
    }

    pub fn iv_ascii(&self) -> [u8; IV_ASCII_SIZE] {
        let mut buf = [b'\n'; IV_ASCII_SIZE];
        buf[..IV_ASCII_SIZE - 1].copy_from_slice(hex::encode(self.iv).as_bytes());
        buf
    }

    pub fn salt_tag(&self) -> [u8; SALT_TAG_SIZE] {
        let mut buf = [0u8; SALT_TAG_SIZE];
        buf[..SALT_MAGIC.len()].copy_from_slice(&SALT_MAGIC);
        buf[SALT_MAGIC.len()..].copy_from_slice(&self.salt);
        buf
    }

    /// Salt tag followed by the ciphertext. The encryption header's length
    /// field describes exactly these bytes.
    pub fn salted_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SALT_TAG_SIZE + self.ciphertext.len());
        buf.extend_from_slice(&self.salt_tag());
        buf.extend_from_slice(&self.ciphertext);
        buf
    }

    /// Serialize to `[encryption header][ASCII IV]["Salted__" + salt]
    /// [ciphertext]`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let salted = self.salted_data();
        let header = mh01::build_encryption_header(salted.len())
            .map_err(|e| Error::Header(Layer::Encrypted, e))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + IV_ASCII_SIZE + salted.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.iv_ascii());
        buf.extend_from_slice(&salted);

        Ok(buf)
    }

    /// Parse the output of [`Self::to_bytes`]. Data past the length given in
    /// the encryption header is ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let salted_len =
            mh01::parse_encryption_header(data).map_err(|e| Error::Header(Layer::Encrypted, e))?
                as usize;

        let needed = HEADER_SIZE + IV_ASCII_SIZE + salted_len;
        if data.len() < needed {
            return Err(Error::OutOfBounds {
                layer: Layer::Encrypted,
                needed: NumBytes(needed),
                available: NumBytes(data.len()),
            });
        } else if data.len() > needed {
            debug!(
                "Encrypted block: ignoring {} after ciphertext",
                NumBytes(data.len() - needed),
            );
        }

        let iv_ascii = &data[HEADER_SIZE..][..IV_ASCII_SIZE];
        let iv = parse_iv_ascii(iv_ascii)?;

        let salted = &data[HEADER_SIZE + IV_ASCII_SIZE..needed];
        if salted.len() < SALT_TAG_SIZE || !salted.starts_with(&SALT_MAGIC) {
            return Err(Error::InvalidSaltTag);
        }
        let (salt_tag, ciphertext) = salted.split_at(SALT_TAG_SIZE);
        let salt: [u8; SALT_SIZE] = salt_tag[SALT_MAGIC.len()..].try_into().unwrap();

        debug!(
            "Encrypted block: {} with salt {} and IV {}",
            NumBytes(ciphertext.len()),
            hex::encode(salt),
            hex::encode(iv),
        );

        Ok(Self {
            salt,
            iv,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

fn parse_iv_ascii(data: &[u8]) -> Result<[u8; AES_BLOCK_SIZE]> {
    let invalid = || Error::InvalidIv(String::from_utf8_lossy(data).into_owned());

    let Some(hex_digits) = data.strip_suffix(b"\n") else {
        return Err(invalid());
    };

    let mut iv = [0u8; AES_BLOCK_SIZE];
    hex::decode_to_slice(hex_digits, &mut iv).map_err(|_| invalid())?;

    Ok(iv)
}

/// Wrap a recovery image into a factory image for `device`.
///
/// Nothing is returned unless every step succeeds. If `debug_sink` is set,
/// intermediate buffers are written to it and a failed write aborts the
/// build.
pub fn create_factory_image(
    recovery: &[u8],
    device: &DeviceProfile,
    options: &FactoryOptions,
    debug_sink: Option<&dyn DebugSink>,
) -> Result<Vec<u8>> {
    let private_key_pem = device
        .private_key_pem
        .as_deref()
        .ok_or_else(|| Error::MissingPrivateKey(device.name.clone()))?;
    let key = crypto::read_pem_private_key(private_key_pem, &device.private_key_passphrase)?;

    let inner = build_signed_block(recovery, &key, options.signed_region, Layer::Inner)?;
    debug!("Inner block: {}", NumBytes(inner.len()));

    write_debug(debug_sink, "Sig1.bin", &inner[inner.len() - SIGNATURE_SIZE..])?;
    write_debug(debug_sink, "FW_and_Sig1.bin", &inner)?;

    let encrypted = EncryptedBlock::encrypt(&inner, &device.firmware_key, options.salt, options.iv);

    write_debug(debug_sink, "FWenc.bin", &encrypted.salted_data())?;
    write_debug(debug_sink, "IV.bin", &encrypted.iv_ascii())?;

    let outer = build_signed_block(
        &encrypted.to_bytes()?,
        &key,
        options.signed_region,
        Layer::Outer,
    )?;
    debug!("Outer block: {}", NumBytes(outer.len()));

    Ok(outer)
}

/// Verify and decrypt a factory image for `device`, returning the recovery
/// image. Each layer's signature is checked before the layer is parsed any
/// further.
pub fn decrypt_factory_image(
    factory: &[u8],
    device: &DeviceProfile,
    region: SignedRegion,
) -> Result<Vec<u8>> {
    let public_key_pem = device
        .public_key_pem
        .as_deref()
        .ok_or_else(|| Error::MissingPublicKey(device.name.clone()))?;
    let key = crypto::read_pem_public_key(public_key_pem)?;

    let encrypted = open_signed_block(factory, &key, region, Layer::Outer)?;
    let block = EncryptedBlock::parse(encrypted)?;
    let decrypted = block.decrypt(&device.firmware_key)?;
    let recovery = open_signed_block(&decrypted, &key, region, Layer::Inner)?;

    debug!("Recovery image: {}", NumBytes(recovery.len()));

    Ok(recovery.to_vec())
}
