/*
 * SPDX-FileCopyrightText: 2026 aifw contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! aifw converts firmware for the D-Link AI router series between the
//! TFTP-flashable recovery image and the encrypted, signed factory image.
//!
//! Everything under [`format`] and [`crypto`] works on in-memory byte
//! buffers. Apart from [`format::factory::DirectorySink`], only [`device`] and
//! [`cli`] touch the filesystem.

pub mod cli;
pub mod crypto;
pub mod device;
pub mod format;
pub mod util;
