//! Flag sets for the engine's disk modes

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::os::raw::c_int;

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* const $flag:ident = $value:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(c_int);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: $name = $name($value); )*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn bits(self) -> c_int {
                self.0
            }

            pub const fn from_bits(bits: c_int) -> Self {
                $name(bits)
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub const fn without(self, other: Self) -> Self {
                $name(self.0 & !other.0)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                $name(self.0 & rhs.0)
            }
        }

        impl Not for $name {
            type Output = Self;

            fn not(self) -> Self {
                $name(!self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut set = f.debug_set();
                $(
                    if $value != 0 && self.contains($name::$flag) {
                        set.entry(&stringify!($flag));
                    }
                )*
                set.finish()
            }
        }
    };
}

flag_set! {
    /// `ARCHIVE_EXTRACT_*` options for the write-to-disk mode
    pub struct ExtractFlags {
        const OWNER = 0x0001;
        const PERM = 0x0002;
        const TIME = 0x0004;
        const NO_OVERWRITE = 0x0008;
        const UNLINK = 0x0010;
        const ACL = 0x0020;
        const FFLAGS = 0x0040;
        const XATTR = 0x0080;
        /// Refuse to write through symlinks
        const SECURE_SYMLINKS = 0x0100;
        /// Reject `..` path segments
        const SECURE_NODOTDOT = 0x0200;
        const NO_AUTODIR = 0x0400;
        const NO_OVERWRITE_NEWER = 0x0800;
        const SPARSE = 0x1000;
        const MAC_METADATA = 0x2000;
        const NO_HFS_COMPRESSION = 0x4000;
        const HFS_COMPRESSION_FORCED = 0x8000;
        /// Reject absolute paths
        const SECURE_NOABSOLUTEPATHS = 0x10000;
        const CLEAR_NOCHANGE_FFLAGS = 0x20000;
        const SAFE_WRITES = 0x40000;
        /// No absolute paths, no `..`, no writing through symlinks
        const PREVENT_ESCAPE = 0x10000 | 0x0200 | 0x0100;
    }
}

impl Default for ExtractFlags {
    fn default() -> Self {
        ExtractFlags::PREVENT_ESCAPE
    }
}

flag_set! {
    /// `ARCHIVE_READDISK_*` behaviour for the read-from-disk mode
    pub struct ReadDiskFlags {
        const RESTORE_ATIME = 0x0001;
        const HONOR_NODUMP = 0x0002;
        const MAC_COPYFILE = 0x0004;
        const NO_TRAVERSE_MOUNTS = 0x0008;
        const NO_XATTR = 0x0010;
        const NO_ACL = 0x0020;
        const NO_FFLAGS = 0x0040;
        const NO_SPARSE = 0x0080;
    }
}

impl Default for ReadDiskFlags {
    fn default() -> Self {
        ReadDiskFlags::empty()
    }
}
