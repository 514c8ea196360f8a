use std::fmt;
use std::str::FromStr;

use super::error::StorageError;

/// `INV_WRITE` from libpq's `libpq-fs.h`.
pub(crate) const INV_WRITE: i32 = 0x0002_0000;
/// `INV_READ` from libpq's `libpq-fs.h`.
pub(crate) const INV_READ: i32 = 0x0004_0000;

/// How a large object is opened.
///
/// Parsed from the symbols `r` (read), `w` (write) and `b` (binary). Binary is
/// mandatory since the store never transforms payloads. Reading is always
/// granted, so `"wb"` and `"rwb"` are equivalent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OpenMode {
    write: bool,
}

impl OpenMode {
    pub const READ: Self = Self { write: false };
    pub const READ_WRITE: Self = Self { write: true };

    pub fn is_writable(self) -> bool {
        self.write
    }

    /// Capability flags passed to `lo_open`.
    pub(crate) fn open_flags(self) -> i32 {
        if self.write {
            INV_READ | INV_WRITE
        } else {
            INV_READ
        }
    }
}

impl FromStr for OpenMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| StorageError::InvalidMode {
            mode: s.to_string(),
            reason,
        };

        let mut binary = false;
        let mut write = false;
        for c in s.chars() {
            match c {
                'r' => {}
                'w' => write = true,
                'b' => binary = true,
                _ => return Err(invalid("only r, w and b are allowed")),
            }
        }
        if !binary {
            return Err(invalid("b must be specified"));
        }

        Ok(Self { write })
    }
}

impl TryFrom<&str> for OpenMode {
    type Error = StorageError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.write { "wb" } else { "rb" })
    }
}
