/*
 * SPDX-FileCopyrightText: 2026 aifw contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod checksum;
pub mod factory;
pub mod mh01;
pub mod partition;
