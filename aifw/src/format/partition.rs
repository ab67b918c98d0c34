// SPDX-FileCopyrightText: 2026 aifw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Partition headers inside a recovery image.
//!
//! A recovery image is a sequence of `[80 byte header][payload]` blocks. Each
//! header starts with a device specific magic string. The payload length is
//! not trusted: it is always recomputed from the distance to the next header
//! (or the end of the image) and written back together with both checksums.

use std::fmt;

use bstr::ByteSlice;
use memchr::memmem;
use thiserror::Error;
use tracing::{debug, info};

use crate::{format::checksum::checksum16, util::NumBytes};

pub const HEADER_SIZE: usize = 0x50;

/// Maximum number of partitions the bootloader accepts in one image.
pub const MAX_PARTITIONS: usize = 16;

const DATA_CHECKSUM_OFFSET: usize = 0x0e;
const LENGTH_OFFSET: usize = 0x2c;
const HEADER_CHECKSUM_OFFSET: usize = 0x4e;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Partition magic is empty")]
    EmptyMagic,
    #[error("No partition headers with magic {:?} found", .0.as_bstr())]
    NoPartitions(Vec<u8>),
    #[error("More than {MAX_PARTITIONS} partition headers found; next one at {0:#010x}")]
    TooManyPartitions(usize),
    #[error("Partition #{index} at {offset:#010x} spans {size}, which is smaller than its header")]
    PartitionTooSmall {
        index: usize,
        offset: usize,
        size: NumBytes<usize>,
    },
    #[error("Partition #{index} at {offset:#010x} ends past the image end ({image_size})")]
    OutOfBounds {
        index: usize,
        offset: usize,
        image_size: NumBytes<usize>,
    },
    #[error("Partition #{index} payload length {size} does not fit in 32 bits")]
    LengthTooLarge { index: usize, size: NumBytes<usize> },
}

type Result<T> = std::result::Result<T, Error>;

/// A header field before and after patching.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Update<T> {
    pub old: T,
    pub new: T,
}

impl<T: PartialEq> Update<T> {
    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

impl<T: fmt::Display + PartialEq> fmt::Display for Update<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changed() {
            write!(f, "{} -> {}", self.old, self.new)
        } else {
            write!(f, "{} (unchanged)", self.new)
        }
    }
}

/// What [`patch_partition`] did to one header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartitionPatch {
    pub index: usize,
    pub offset: usize,
    pub length: Update<u32>,
    pub data_checksum: Update<u16>,
    pub header_checksum: Update<u16>,
}

impl PartitionPatch {
    pub fn changed(&self) -> bool {
        self.length.changed() || self.data_checksum.changed() || self.header_checksum.changed()
    }
}

/// Find the offsets of all partition headers in `data`.
///
/// Every byte offset is a candidate, including ones that overlap a previous
/// match. A header must start at least [`HEADER_SIZE`] bytes before the end of
/// the image. Finding more than [`MAX_PARTITIONS`] headers is an error.
pub fn find_partitions(data: &[u8], magic: &[u8]) -> Result<Vec<usize>> {
    if magic.is_empty() {
        return Err(Error::EmptyMagic);
    }

    let finder = memmem::Finder::new(magic);
    let scan_end = data.len().saturating_sub(HEADER_SIZE);
    let mut offsets = vec![];
    let mut pos = 0;

    while pos < scan_end {
        let Some(i) = finder.find(&data[pos..]) else {
            break;
        };

        let offset = pos + i;
        if offset >= scan_end {
            break;
        } else if offsets.len() == MAX_PARTITIONS {
            return Err(Error::TooManyPartitions(offset));
        }

        debug!("Found partition header at {offset:#010x}");
        offsets.push(offset);
        pos = offset + 1;
    }

    if offsets.is_empty() {
        return Err(Error::NoPartitions(magic.to_vec()));
    }

    Ok(offsets)
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..][..2].try_into().unwrap())
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..][..4].try_into().unwrap())
}

/// Rewrite the length and both checksums of the partition occupying
/// `data[offset..end]`. Values that are already correct are left untouched.
pub fn patch_partition(
    data: &mut [u8],
    index: usize,
    offset: usize,
    end: usize,
) -> Result<PartitionPatch> {
    if end > data.len() || offset > end {
        return Err(Error::OutOfBounds {
            index,
            offset,
            image_size: NumBytes(data.len()),
        });
    }

    let partition = &mut data[offset..end];
    let Some(payload_size) = partition.len().checked_sub(HEADER_SIZE) else {
        return Err(Error::PartitionTooSmall {
            index,
            offset,
            size: NumBytes(partition.len()),
        });
    };
    let new_length = u32::try_from(payload_size).map_err(|_| Error::LengthTooLarge {
        index,
        size: NumBytes(payload_size),
    })?;

    let length = Update {
        old: read_u32(partition, LENGTH_OFFSET),
        new: new_length,
    };
    if length.changed() {
        partition[LENGTH_OFFSET..][..4].copy_from_slice(&length.new.to_le_bytes());
    }

    let data_checksum = Update {
        old: read_u16(partition, DATA_CHECKSUM_OFFSET),
        new: checksum16(&partition[HEADER_SIZE..], false),
    };
    if data_checksum.changed() {
        partition[DATA_CHECKSUM_OFFSET..][..2].copy_from_slice(&data_checksum.new.to_le_bytes());
    }

    // Must come last since it covers the two fields above.
    let header_checksum = Update {
        old: read_u16(partition, HEADER_CHECKSUM_OFFSET),
        new: checksum16(&partition[..HEADER_CHECKSUM_OFFSET], true),
    };
    if header_checksum.changed() {
        partition[HEADER_CHECKSUM_OFFSET..][..2]
            .copy_from_slice(&header_checksum.new.to_le_bytes());
    }

    let patch = PartitionPatch {
        index,
        offset,
        length,
        data_checksum,
        header_checksum,
    };

    for (name, update) in [
        ("data checksum", patch.data_checksum),
        ("header checksum", patch.header_checksum),
    ] {
        if update.changed() {
            info!(
                "Partition #{index}: updating {name} from {:#06x} to {:#06x}",
                update.old, update.new,
            );
        } else {
            debug!("Partition #{index}: {name} {:#06x} is correct", update.new);
        }
    }
    if length.changed() {
        info!("Partition #{index}: updating data length: {length}");
    } else {
        debug!("Partition #{index}: data length {} is correct", length.new);
    }

    Ok(patch)
}

/// Find every partition in `data` and patch its header in place.
pub fn patch_recovery_image(data: &mut [u8], magic: &[u8]) -> Result<Vec<PartitionPatch>> {
    let offsets = find_partitions(data, magic)?;
    let ends = offsets
        .iter()
        .skip(1)
        .copied()
        .chain(std::iter::once(data.len()))
        .collect::<Vec<_>>();

    offsets
        .iter()
        .zip(ends)
        .enumerate()
        .map(|(index, (&offset, end))| patch_partition(data, index, offset, end))
        .collect()
}

/// Owned variant of [`patch_recovery_image`] that returns the patched image.
pub fn update_header_in_recovery_image(mut data: Vec<u8>, magic: &[u8]) -> Result<Vec<u8>> {
    patch_recovery_image(&mut data, magic)?;
    Ok(data)
}
