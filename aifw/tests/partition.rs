/*
 * SPDX-FileCopyrightText: 2026 aifw contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use assert_matches::assert_matches;

use aifw::format::partition::{self, Update};

const MAGIC: &[u8] = b"DLK6E6010001";

const RECOVERY: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/data/recovery.bin",
));
const RECOVERY_UNPATCHED: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/data/recovery_unpatched.bin",
));

#[test]
fn patch_matches_reference() {
    let mut data = RECOVERY_UNPATCHED.to_vec();
    let patches = partition::patch_recovery_image(&mut data, MAGIC).unwrap();

    assert_eq!(data, RECOVERY);

    let offsets = patches.iter().map(|p| p.offset).collect::<Vec<_>>();
    assert_eq!(offsets, [0, 1080]);

    assert_eq!(patches[0].length, Update { old: 0, new: 1000 });
    assert_eq!(patches[0].data_checksum.new, 0x613a);
    assert_eq!(patches[0].header_checksum.new, 0xc05a);

    assert_eq!(patches[1].length, Update { old: 0, new: 888 });
    assert_eq!(patches[1].data_checksum.new, 0x766d);
    assert_eq!(patches[1].header_checksum.new, 0xab97);
}

#[test]
fn patched_image_is_unchanged() {
    let data = partition::update_header_in_recovery_image(RECOVERY.to_vec(), MAGIC).unwrap();
    assert_eq!(data, RECOVERY);

    let mut data = RECOVERY.to_vec();
    let patches = partition::patch_recovery_image(&mut data, MAGIC).unwrap();
    assert!(patches.iter().all(|p| !p.changed()));
}

#[test]
fn wrong_device_magic() {
    let result = partition::update_header_in_recovery_image(RECOVERY.to_vec(), b"DLK6E6110002");
    assert_matches!(result, Err(partition::Error::NoPartitions(_)));
}
