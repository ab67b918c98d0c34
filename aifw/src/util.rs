// SPDX-FileCopyrightText: 2026 aifw contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, path::Path};

use num_traits::PrimInt;

/// A small wrapper to format a number as a size in bytes.
#[derive(Clone, Copy)]
pub struct NumBytes<T: PrimInt>(pub T);

impl<T: PrimInt + fmt::Debug> fmt::Debug for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == T::one() {
            write!(f, "<{:?} byte>", self.0)
        } else {
            write!(f, "<{:?} bytes>", self.0)
        }
    }
}

impl<T: PrimInt + fmt::Debug> fmt::Display for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_bytes_plural() {
        assert_eq!(format!("{:?}", NumBytes(1u32)), "<1 byte>");
        assert_eq!(format!("{}", NumBytes(80usize)), "<80 bytes>");
    }

    #[test]
    fn parent_of_bare_file_name() {
        assert_eq!(parent_path(Path::new("devices.toml")), Path::new("."));
        assert_eq!(parent_path(Path::new("conf/devices.toml")), Path::new("conf"));
    }
}
