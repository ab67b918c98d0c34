// SPDX-FileCopyrightText: 2026 aifw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Registry of supported devices and their key material.
//!
//! ```toml
//! [device.M32]
//! description = "D-Link EAGLE PRO AI AX3200 Mesh-System"
//! partition_magic = "DLK6E6010001"
//! firmware_key = "6b29f1d663a21b35fb45b69a42649f5e"
//! private_key = "keys/M32.key"
//! private_key_passphrase_env = "AIFW_M32_PASSPHRASE"
//! public_key = "keys/M32.pub"
//! ```
//!
//! Relative key paths are resolved against the directory containing the
//! registry file.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    crypto::{self, PassphraseSource},
    util,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Failed to parse device registry: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Unknown device {name:?}; available devices: {}", .available.join(", "))]
    UnknownDevice {
        name: String,
        available: Vec<String>,
    },
    #[error("Device {0:?} has an empty partition magic")]
    EmptyPartitionMagic(String),
    #[error("Device {0:?} sets more than one private key passphrase source")]
    ConflictingPassphrase(String),
    #[error("Failed to acquire private key passphrase for device {0:?}")]
    Passphrase(String, #[source] crypto::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// One `[device.<name>]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    #[serde(default)]
    pub description: String,
    pub partition_magic: String,
    pub firmware_key: String,
    pub private_key: Option<PathBuf>,
    pub private_key_passphrase: Option<String>,
    pub private_key_passphrase_env: Option<String>,
    pub private_key_passphrase_file: Option<PathBuf>,
    pub public_key: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    #[serde(default)]
    device: BTreeMap<String, DeviceConfig>,
}

/// Key material an operation needs from the registry. Anything not requested
/// is neither read from disk nor required to exist.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct KeyNeeds {
    pub private_key: bool,
    pub public_key: bool,
}

impl KeyNeeds {
    pub const NONE: Self = Self {
        private_key: false,
        public_key: false,
    };
    pub const PRIVATE: Self = Self {
        private_key: true,
        public_key: false,
    };
    pub const PUBLIC: Self = Self {
        private_key: false,
        public_key: true,
    };
}

/// Everything needed to process images for one device. Key material is
/// loaded up front so the pipelines never touch the filesystem.
#[derive(Clone)]
pub struct DeviceProfile {
    pub name: String,
    pub description: String,
    pub partition_magic: Vec<u8>,
    pub firmware_key: String,
    /// Only loaded for building factory images.
    pub private_key_pem: Option<String>,
    pub private_key_passphrase: String,
    /// Only loaded for decrypting factory images.
    pub public_key_pem: Option<String>,
}

impl fmt::Debug for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProfile")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("partition_magic", &self.partition_magic)
            .field("firmware_key", &"<redacted>")
            .field("private_key_pem", &self.private_key_pem.as_ref().map(|_| "<redacted>"))
            .field("private_key_passphrase", &"<redacted>")
            .field("public_key_pem", &self.public_key_pem)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct DeviceRegistry {
    base_dir: PathBuf,
    devices: BTreeMap<String, DeviceConfig>,
}

impl DeviceRegistry {
    /// Parse a registry from TOML. Relative key paths are resolved against
    /// `base_dir`.
    pub fn parse(data: &str, base_dir: &Path, source: &Path) -> Result<Self> {
        let file: RegistryFile =
            toml_edit::de::from_str(data).map_err(|e| Error::Parse(source.to_owned(), e))?;

        Ok(Self {
            base_dir: base_dir.to_owned(),
            devices: file.device,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;
        let registry = Self::parse(&data, util::parent_path(path), path)?;

        debug!("Loaded {} devices from {path:?}", registry.devices.len());

        Ok(registry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceConfig)> {
        self.devices.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn get(&self, name: &str) -> Result<&DeviceConfig> {
        self.devices.get(name).ok_or_else(|| Error::UnknownDevice {
            name: name.to_owned(),
            available: self.devices.keys().cloned().collect(),
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        let path = self.resolve(path);
        fs::read_to_string(&path).map_err(|e| Error::ReadFile(path, e))
    }

    fn passphrase_source(&self, name: &str, config: &DeviceConfig) -> Result<PassphraseSource> {
        let sources = [
            config
                .private_key_passphrase
                .clone()
                .map(PassphraseSource::Literal),
            config
                .private_key_passphrase_env
                .clone()
                .map(|v| PassphraseSource::EnvVar(OsString::from(v))),
            config
                .private_key_passphrase_file
                .as_deref()
                .map(|p| PassphraseSource::File(self.resolve(p))),
        ];

        let mut iter = sources.into_iter().flatten();
        let source = iter
            .next()
            .unwrap_or_else(|| PassphraseSource::Literal(String::new()));
        if iter.next().is_some() {
            return Err(Error::ConflictingPassphrase(name.to_owned()));
        }

        Ok(source)
    }

    /// Build the profile for `name`, loading only the key material listed in
    /// `needs`.
    pub fn profile(&self, name: &str, needs: KeyNeeds) -> Result<DeviceProfile> {
        let config = self.get(name)?;

        if config.partition_magic.is_empty() {
            return Err(Error::EmptyPartitionMagic(name.to_owned()));
        }

        let source = self.passphrase_source(name, config)?;

        let (private_key_pem, private_key_passphrase) = match &config.private_key {
            Some(p) if needs.private_key => {
                let pem = self.read_file(p)?;
                let passphrase = source
                    .acquire()
                    .map_err(|e| Error::Passphrase(name.to_owned(), e))?;
                (Some(pem), passphrase)
            }
            _ => (None, String::new()),
        };

        let public_key_pem = if needs.public_key {
            Some(self.read_file(&config.public_key)?)
        } else {
            None
        };

        debug!(
            "Loaded profile for {name}: private key: {}, public key: {}",
            private_key_pem.is_some(),
            public_key_pem.is_some(),
        );

        Ok(DeviceProfile {
            name: name.to_owned(),
            description: config.description.clone(),
            partition_magic: config.partition_magic.as_bytes().to_vec(),
            firmware_key: config.firmware_key.clone(),
            private_key_pem,
            private_key_passphrase,
            public_key_pem,
        })
    }
}
