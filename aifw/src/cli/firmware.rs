/*
 * SPDX-FileCopyrightText: 2026 aifw contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    ffi::OsStr,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use hex::FromHex;
use tempfile::NamedTempFile;

use crate::{
    cli::{status, warning},
    crypto::{AES_BLOCK_SIZE, SALT_SIZE},
    device::{DeviceRegistry, KeyNeeds},
    format::{
        factory::{self, DebugSink, DirectorySink, FactoryOptions, SignedRegion},
        mh01, partition,
    },
    util::{self, NumBytes},
};

const HEADING_FACTORY: &str = "Factory image options";

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Operation {
    /// Fix the data length and checksums in the partition headers of a
    /// recovery image.
    #[value(name = "UpdateFirmwareHeader", alias = "u")]
    UpdateFirmwareHeader,
    /// Build a factory image from a recovery image.
    #[value(name = "CreateFactoryImage", alias = "c")]
    CreateFactoryImage,
    /// Verify and decrypt a factory image into a recovery image.
    #[value(name = "DecryptFactoryImage", alias = "d")]
    DecryptFactoryImage,
}

impl Operation {
    /// Smallest input file the operation accepts.
    pub fn min_input_size(self) -> usize {
        match self {
            Self::UpdateFirmwareHeader => partition::HEADER_SIZE,
            // At least 1 KiB of payload.
            Self::CreateFactoryImage => 1024,
            // Both headers and signatures plus at least 1 KiB of payload.
            Self::DecryptFactoryImage => 2 * (factory::SIGNATURE_SIZE + mh01::HEADER_SIZE) + 1024,
        }
    }

    /// Key material to load from the device registry.
    pub fn key_needs(self) -> KeyNeeds {
        match self {
            Self::UpdateFirmwareHeader => KeyNeeds::NONE,
            Self::CreateFactoryImage => KeyNeeds::PRIVATE,
            Self::DecryptFactoryImage => KeyNeeds::PUBLIC,
        }
    }
}

fn parse_salt(s: &str) -> Result<[u8; SALT_SIZE], hex::FromHexError> {
    <[u8; SALT_SIZE]>::from_hex(s)
}

fn parse_iv(s: &str) -> Result<[u8; AES_BLOCK_SIZE], hex::FromHexError> {
    <[u8; AES_BLOCK_SIZE]>::from_hex(s)
}

#[derive(Debug, Args)]
pub struct FirmwareCli {
    /// Device name from the device registry.
    #[arg(required_unless_present = "list_devices")]
    pub device: Option<String>,

    /// Operation to perform.
    #[arg(required_unless_present = "list_devices", value_enum)]
    pub operation: Option<Operation>,

    /// Path to input image.
    #[arg(required_unless_present = "list_devices", value_parser)]
    pub input: Option<PathBuf>,

    /// Path to output image.
    #[arg(required_unless_present = "list_devices", value_parser)]
    pub output: Option<PathBuf>,

    /// Device registry.
    #[arg(long, value_name = "FILE", value_parser, default_value = "devices.toml")]
    pub devices: PathBuf,

    /// List the devices in the registry and exit.
    #[arg(long)]
    pub list_devices: bool,

    /// Write intermediate buffers to this directory.
    #[arg(long, value_name = "DIR", value_parser)]
    pub debug: Option<PathBuf>,

    /// Salt for the firmware encryption key (16 hex digits).
    #[arg(
        long,
        value_name = "HEX",
        value_parser = parse_salt,
        conflicts_with = "random_salt",
        help_heading = HEADING_FACTORY
    )]
    pub salt: Option<[u8; SALT_SIZE]>,

    /// Use a random salt instead of the fixed default.
    #[arg(long, help_heading = HEADING_FACTORY)]
    pub random_salt: bool,

    /// Encrypt with this IV (32 hex digits) instead of the derived one.
    #[arg(long, value_name = "HEX", value_parser = parse_iv, help_heading = HEADING_FACTORY)]
    pub iv: Option<[u8; AES_BLOCK_SIZE]>,

    /// Sign only the payloads, not the verification headers.
    ///
    /// Applies to both creating and decrypting factory images.
    #[arg(long)]
    pub sign_payload_only: bool,
}

impl FirmwareCli {
    fn signed_region(&self) -> SignedRegion {
        if self.sign_payload_only {
            SignedRegion::PayloadOnly
        } else {
            SignedRegion::HeaderAndPayload
        }
    }

    fn factory_options(&self) -> FactoryOptions {
        let salt = if self.random_salt {
            rand::random()
        } else {
            self.salt.unwrap_or(factory::DEFAULT_SALT)
        };

        FactoryOptions {
            salt,
            iv: self.iv,
            signed_region: self.signed_region(),
        }
    }
}

/// Write `data` to a temporary file next to `output` and move it into place
/// once everything has been written.
fn write_output(output: &Path, data: &[u8]) -> Result<()> {
    let mut temp_writer = NamedTempFile::with_prefix_in(
        output
            .file_name()
            .unwrap_or_else(|| OsStr::new("aifw.tmp")),
        util::parent_path(output),
    )
    .context("Failed to open temporary output file")?;
    let temp_path = temp_writer.path().to_owned();

    temp_writer
        .write_all(data)
        .with_context(|| format!("Failed to write output: {temp_path:?}"))?;

    // NamedTempFile forces 600 permissions on temp files because it's the safe
    // option for a shared /tmp. Since we're writing to the output file's
    // directory, just mimic umask.
    #[cfg(unix)]
    {
        use std::{fs::Permissions, os::unix::prelude::PermissionsExt};

        use rustix::{fs::Mode, process::umask};

        let mask = umask(Mode::empty());
        umask(mask);

        // Mac uses a 16-bit value.
        #[allow(clippy::useless_conversion)]
        let mode = u32::from(0o666 & !mask.bits());

        temp_writer
            .as_file()
            .set_permissions(Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions to {mode:o}: {temp_path:?}"))?;
    }

    temp_writer.persist(output).with_context(|| {
        format!("Failed to move temporary file to output path: {temp_path:?} -> {output:?}")
    })?;

    Ok(())
}

fn list_devices(registry: &DeviceRegistry) {
    for (name, config) in registry.iter() {
        if config.description.is_empty() {
            println!("{name}");
        } else {
            println!("{name:<8} {}", config.description);
        }
    }
}

pub fn firmware_main(cli: &FirmwareCli) -> Result<()> {
    let registry = DeviceRegistry::load(&cli.devices)
        .with_context(|| format!("Failed to load device registry: {:?}", cli.devices))?;

    if cli.list_devices {
        list_devices(&registry);
        return Ok(());
    }

    let (Some(name), Some(operation), Some(input), Some(output)) =
        (&cli.device, cli.operation, &cli.input, &cli.output)
    else {
        bail!("Device, operation, input, and output are required");
    };

    let device = registry
        .profile(name, operation.key_needs())
        .with_context(|| format!("Failed to load device: {name:?}"))?;

    let data = fs::read(input).with_context(|| format!("Failed to read input: {input:?}"))?;

    let min_size = operation.min_input_size();
    if data.len() < min_size {
        bail!(
            "Input {input:?} ({}) is smaller than {}",
            NumBytes(data.len()),
            NumBytes(min_size),
        );
    }

    if cli.debug.is_some() && operation != Operation::CreateFactoryImage {
        warning!("--debug has no effect for {operation:?}");
    }

    let result = match operation {
        Operation::UpdateFirmwareHeader => {
            status!("Updating partition headers for {}", device.name);

            let mut data = data;
            let patches = partition::patch_recovery_image(&mut data, &device.partition_magic)
                .context("Failed to update partition headers")?;
            let changed = patches.iter().filter(|p| p.changed()).count();

            status!("Updated {changed} of {} partition headers", patches.len());

            data
        }
        Operation::CreateFactoryImage => {
            status!("Creating factory image for {}", device.name);

            let sink = match &cli.debug {
                Some(dir) => {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("Failed to create directory: {dir:?}"))?;
                    Some(DirectorySink::new(dir))
                }
                None => None,
            };

            factory::create_factory_image(
                &data,
                &device,
                &cli.factory_options(),
                sink.as_ref().map(|s| s as &dyn DebugSink),
            )
            .context("Failed to create factory image")?
        }
        Operation::DecryptFactoryImage => {
            status!("Decrypting factory image for {}", device.name);

            factory::decrypt_factory_image(&data, &device, cli.signed_region())
                .context("Failed to decrypt factory image")?
        }
    };

    write_output(output, &result)?;

    status!("Wrote {}: {output:?}", NumBytes(result.len()));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_sizes() {
        assert_eq!(Operation::UpdateFirmwareHeader.min_input_size(), 80);
        assert_eq!(Operation::CreateFactoryImage.min_input_size(), 1024);
        assert_eq!(Operation::DecryptFactoryImage.min_input_size(), 1568);
    }

    #[test]
    fn key_needs() {
        assert_eq!(Operation::UpdateFirmwareHeader.key_needs(), KeyNeeds::NONE);
        assert!(Operation::CreateFactoryImage.key_needs().private_key);
        assert!(!Operation::CreateFactoryImage.key_needs().public_key);
        assert!(!Operation::DecryptFactoryImage.key_needs().private_key);
        assert!(Operation::DecryptFactoryImage.key_needs().public_key);
    }

    #[test]
    fn operation_aliases() {
        for (s, op) in [
            ("UpdateFirmwareHeader", Operation::UpdateFirmwareHeader),
            ("u", Operation::UpdateFirmwareHeader),
            ("CreateFactoryImage", Operation::CreateFactoryImage),
            ("c", Operation::CreateFactoryImage),
            ("DecryptFactoryImage", Operation::DecryptFactoryImage),
            ("d", Operation::DecryptFactoryImage),
        ] {
            assert_eq!(Operation::from_str(s, false).unwrap(), op);
        }

        assert!(Operation::from_str("x", false).is_err());
    }

    #[test]
    fn salt_and_iv_parsing() {
        assert_eq!(parse_salt("65FC43BC67A32335").unwrap(), factory::DEFAULT_SALT);
        assert!(parse_salt("65FC43BC67A323").is_err());
        assert_eq!(parse_iv("00112233445566778899aabbccddeeff").unwrap()[15], 0xff);
    }

    #[test]
    fn atomic_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        fs::write(&path, b"old contents").unwrap();
        write_output(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
