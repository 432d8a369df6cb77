//! libarchive binding
//!
//! The engine is loaded at runtime. Mandatory symbols are resolved into
//! [`Api`] when the library is opened; symbols that only exist in newer
//! releases land in [`OptionalApi`] as `Option`s. The loaded [`Engine`] lives
//! in a process-wide `OnceLock` and is never mutated afterwards.

#![allow(non_camel_case_types)]

use crate::error::{ArchiveError, Result};
use crate::registry::Capabilities;
use libloading::Library;
use std::ffi::CStr;
use std::ops::Deref;
use std::os::raw::{c_char, c_int, c_long, c_uint, c_void};
use std::sync::OnceLock;
use tracing::{debug, info};

pub const ARCHIVE_EOF: c_int = 1;
pub const ARCHIVE_OK: c_int = 0;
pub const ARCHIVE_RETRY: c_int = -10;
pub const ARCHIVE_WARN: c_int = -20;
pub const ARCHIVE_FAILED: c_int = -25;
pub const ARCHIVE_FATAL: c_int = -30;

pub const AE_IFMT: u32 = 0o170000;
pub const AE_IFREG: u32 = 0o100000;
pub const AE_IFLNK: u32 = 0o120000;
pub const AE_IFSOCK: u32 = 0o140000;
pub const AE_IFCHR: u32 = 0o020000;
pub const AE_IFBLK: u32 = 0o060000;
pub const AE_IFDIR: u32 = 0o040000;
pub const AE_IFIFO: u32 = 0o010000;

/// Environment variable naming the libarchive shared object to load
pub const LIBRARY_ENV: &str = "LIBARCHIVE";

/// `struct archive`
#[repr(C)]
pub struct archive {
    _private: [u8; 0],
}

/// `struct archive_entry`
#[repr(C)]
pub struct archive_entry {
    _private: [u8; 0],
}

#[cfg(unix)]
pub type mode_t = libc::mode_t;
#[cfg(not(unix))]
pub type mode_t = u16;

pub type time_t = libc::time_t;
pub type la_int64_t = i64;
pub type la_ssize_t = isize;

pub type OpenCallback = unsafe extern "C" fn(*mut archive, *mut c_void) -> c_int;
pub type ReadCallback =
    unsafe extern "C" fn(*mut archive, *mut c_void, *mut *const c_void) -> la_ssize_t;
pub type SeekCallback =
    unsafe extern "C" fn(*mut archive, *mut c_void, la_int64_t, c_int) -> la_int64_t;
pub type WriteCallback =
    unsafe extern "C" fn(*mut archive, *mut c_void, *const c_void, usize) -> la_ssize_t;
pub type CloseCallback = unsafe extern "C" fn(*mut archive, *mut c_void) -> c_int;

/// `archive_read_support_*` and `archive_write_set_format_*` / `add_filter_*`
pub type SupportFn = unsafe extern "C" fn(*mut archive) -> c_int;

/// `archive_set_error` is variadic and cannot go through the table macro
pub type SetErrorFn = unsafe extern "C" fn(*mut archive, c_int, *const c_char, ...);

macro_rules! engine_api {
    (
        $(#[$meta:meta])*
        pub struct $api:ident {
            $( fn $name:ident($($arg:ty),* $(,)?) $(-> $ret:ty)?; )*
        }
    ) => {
        $(#[$meta])*
        pub struct $api {
            $( pub $name: unsafe extern "C" fn($($arg),*) $(-> $ret)?, )*
        }

        impl $api {
            unsafe fn load(lib: &Library) -> std::result::Result<Self, libloading::Error> {
                Ok($api {
                    $(
                        $name: *lib.get::<unsafe extern "C" fn($($arg),*) $(-> $ret)?>(
                            concat!("archive_", stringify!($name), "\0").as_bytes(),
                        )?,
                    )*
                })
            }
        }
    };
}

macro_rules! optional_api {
    (
        $(#[$meta:meta])*
        pub struct $api:ident {
            $( fn $name:ident($($arg:ty),* $(,)?) $(-> $ret:ty)?; )*
        }
    ) => {
        $(#[$meta])*
        pub struct $api {
            $( pub $name: Option<unsafe extern "C" fn($($arg),*) $(-> $ret)?>, )*
        }

        impl $api {
            unsafe fn load(lib: &Library) -> Self {
                $api {
                    $(
                        $name: lib
                            .get::<unsafe extern "C" fn($($arg),*) $(-> $ret)?>(
                                concat!("archive_", stringify!($name), "\0").as_bytes(),
                            )
                            .ok()
                            .map(|sym| *sym),
                    )*
                }
            }
        }
    };
}

engine_api! {
    /// Symbols every supported libarchive (3.x) exports
    pub struct Api {
        fn version_number() -> c_int;
        fn version_string() -> *const c_char;

        fn errno(*mut archive) -> c_int;
        fn error_string(*mut archive) -> *const c_char;
        fn format_name(*mut archive) -> *const c_char;
        fn filter_count(*mut archive) -> c_int;
        fn filter_name(*mut archive, c_int) -> *const c_char;
        fn filter_bytes(*mut archive, c_int) -> la_int64_t;

        fn entry_new() -> *mut archive_entry;
        fn entry_free(*mut archive_entry);
        fn entry_clear(*mut archive_entry) -> *mut archive_entry;
        fn entry_clone(*mut archive_entry) -> *mut archive_entry;
        fn entry_pathname(*mut archive_entry) -> *const c_char;
        fn entry_copy_pathname(*mut archive_entry, *const c_char);
        fn entry_update_pathname_utf8(*mut archive_entry, *const c_char) -> c_int;
        fn entry_sourcepath(*mut archive_entry) -> *const c_char;
        fn entry_symlink(*mut archive_entry) -> *const c_char;
        fn entry_copy_symlink(*mut archive_entry, *const c_char);
        fn entry_update_symlink_utf8(*mut archive_entry, *const c_char) -> c_int;
        fn entry_hardlink(*mut archive_entry) -> *const c_char;
        fn entry_copy_hardlink(*mut archive_entry, *const c_char);
        fn entry_update_hardlink_utf8(*mut archive_entry, *const c_char) -> c_int;
        fn entry_size(*mut archive_entry) -> la_int64_t;
        fn entry_size_is_set(*mut archive_entry) -> c_int;
        fn entry_set_size(*mut archive_entry, la_int64_t);
        fn entry_unset_size(*mut archive_entry);
        fn entry_filetype(*mut archive_entry) -> mode_t;
        fn entry_set_filetype(*mut archive_entry, c_uint);
        fn entry_mode(*mut archive_entry) -> mode_t;
        fn entry_set_mode(*mut archive_entry, mode_t);
        fn entry_perm(*mut archive_entry) -> mode_t;
        fn entry_set_perm(*mut archive_entry, mode_t);
        fn entry_strmode(*mut archive_entry) -> *const c_char;
        fn entry_uid(*mut archive_entry) -> la_int64_t;
        fn entry_set_uid(*mut archive_entry, la_int64_t);
        fn entry_gid(*mut archive_entry) -> la_int64_t;
        fn entry_set_gid(*mut archive_entry, la_int64_t);
        fn entry_uname(*mut archive_entry) -> *const c_char;
        fn entry_copy_uname(*mut archive_entry, *const c_char);
        fn entry_gname(*mut archive_entry) -> *const c_char;
        fn entry_copy_gname(*mut archive_entry, *const c_char);
        fn entry_atime(*mut archive_entry) -> time_t;
        fn entry_atime_nsec(*mut archive_entry) -> c_long;
        fn entry_atime_is_set(*mut archive_entry) -> c_int;
        fn entry_set_atime(*mut archive_entry, time_t, c_long);
        fn entry_unset_atime(*mut archive_entry);
        fn entry_mtime(*mut archive_entry) -> time_t;
        fn entry_mtime_nsec(*mut archive_entry) -> c_long;
        fn entry_mtime_is_set(*mut archive_entry) -> c_int;
        fn entry_set_mtime(*mut archive_entry, time_t, c_long);
        fn entry_unset_mtime(*mut archive_entry);
        fn entry_ctime(*mut archive_entry) -> time_t;
        fn entry_ctime_nsec(*mut archive_entry) -> c_long;
        fn entry_ctime_is_set(*mut archive_entry) -> c_int;
        fn entry_set_ctime(*mut archive_entry, time_t, c_long);
        fn entry_unset_ctime(*mut archive_entry);
        fn entry_birthtime(*mut archive_entry) -> time_t;
        fn entry_birthtime_nsec(*mut archive_entry) -> c_long;
        fn entry_birthtime_is_set(*mut archive_entry) -> c_int;
        fn entry_set_birthtime(*mut archive_entry, time_t, c_long);
        fn entry_unset_birthtime(*mut archive_entry);

        fn read_new() -> *mut archive;
        fn read_close(*mut archive) -> c_int;
        fn read_free(*mut archive) -> c_int;
        fn read_open_fd(*mut archive, c_int, usize) -> c_int;
        fn read_open_filename(*mut archive, *const c_char, usize) -> c_int;
        fn read_open_memory(*mut archive, *const c_void, usize) -> c_int;
        fn read_set_seek_callback(*mut archive, Option<SeekCallback>) -> c_int;
        fn read_open(
            *mut archive,
            *mut c_void,
            Option<OpenCallback>,
            Option<ReadCallback>,
            Option<CloseCallback>,
        ) -> c_int;
        fn read_next_header2(*mut archive, *mut archive_entry) -> c_int;
        fn read_data(*mut archive, *mut c_void, usize) -> la_ssize_t;
        fn read_data_block(*mut archive, *mut *const c_void, *mut usize, *mut la_int64_t) -> c_int;

        fn read_disk_new() -> *mut archive;
        fn read_disk_set_behavior(*mut archive, c_int) -> c_int;
        fn read_disk_set_standard_lookup(*mut archive) -> c_int;
        fn read_disk_set_symlink_logical(*mut archive) -> c_int;
        fn read_disk_set_symlink_physical(*mut archive) -> c_int;
        fn read_disk_open(*mut archive, *const c_char) -> c_int;
        fn read_disk_descend(*mut archive) -> c_int;

        fn write_new() -> *mut archive;
        fn write_close(*mut archive) -> c_int;
        fn write_fail(*mut archive) -> c_int;
        fn write_free(*mut archive) -> c_int;
        fn write_set_options(*mut archive, *const c_char) -> c_int;
        fn write_get_bytes_per_block(*mut archive) -> c_int;
        fn write_set_bytes_per_block(*mut archive, c_int) -> c_int;
        fn write_set_bytes_in_last_block(*mut archive, c_int) -> c_int;
        fn write_open(
            *mut archive,
            *mut c_void,
            Option<OpenCallback>,
            Option<WriteCallback>,
            Option<CloseCallback>,
        ) -> c_int;
        fn write_open_fd(*mut archive, c_int) -> c_int;
        fn write_open_filename(*mut archive, *const c_char) -> c_int;
        fn write_header(*mut archive, *mut archive_entry) -> c_int;
        fn write_data(*mut archive, *const c_void, usize) -> la_ssize_t;
        fn write_data_block(*mut archive, *const c_void, usize, la_int64_t) -> la_ssize_t;
        fn write_finish_entry(*mut archive) -> c_int;

        fn write_disk_new() -> *mut archive;
        fn write_disk_set_options(*mut archive, c_int) -> c_int;
    }
}

optional_api! {
    /// Symbols added after 3.0
    pub struct OptionalApi {
        fn entry_pathname_utf8(*mut archive_entry) -> *const c_char;
        fn entry_symlink_utf8(*mut archive_entry) -> *const c_char;
        fn entry_hardlink_utf8(*mut archive_entry) -> *const c_char;
        fn read_add_passphrase(*mut archive, *const c_char) -> c_int;
        fn write_set_passphrase(*mut archive, *const c_char) -> c_int;
    }
}

/// A loaded libarchive
pub struct Engine {
    api: Api,
    pub optional: OptionalApi,
    pub set_error: SetErrorFn,
    pub capabilities: Capabilities,
    version: String,
    path: String,
    _lib: Library,
}

impl Deref for Engine {
    type Target = Api;

    fn deref(&self) -> &Api {
        &self.api
    }
}

impl Engine {
    fn open(path: &str) -> std::result::Result<Self, String> {
        // SAFETY: loading libarchive runs no initialisers beyond its own
        // static constructors; symbol types mirror archive.h / archive_entry.h.
        unsafe {
            let lib = Library::new(path).map_err(|e| e.to_string())?;
            let api = Api::load(&lib).map_err(|e| format!("{}: {}", path, e))?;
            let set_error = *lib
                .get::<SetErrorFn>(b"archive_set_error\0")
                .map_err(|e| format!("{}: {}", path, e))?;
            let optional = OptionalApi::load(&lib);
            let capabilities = Capabilities::probe(&lib);
            let version = cstr_lossy((api.version_string)()).unwrap_or_default();

            Ok(Engine {
                api,
                optional,
                set_error,
                capabilities,
                version,
                path: path.to_string(),
                _lib: lib,
            })
        }
    }

    fn load() -> std::result::Result<Self, String> {
        let candidates: Vec<String> = match std::env::var(LIBRARY_ENV) {
            Ok(path) if !path.is_empty() => vec![path],
            _ => default_candidates().iter().map(|s| s.to_string()).collect(),
        };

        let mut failures = Vec::new();
        for candidate in &candidates {
            match Engine::open(candidate) {
                Ok(engine) => {
                    info!(
                        "Loaded {} from {} ({} read formats, {} write formats)",
                        engine.version,
                        engine.path,
                        engine.capabilities.read_formats().count(),
                        engine.capabilities.write_formats().count()
                    );
                    return Ok(engine);
                }
                Err(e) => {
                    debug!("Could not load libarchive candidate {}: {}", candidate, e);
                    failures.push(e);
                }
            }
        }

        Err(failures.join("; "))
    }

    /// `archive_version_string()`, e.g. "libarchive 3.7.2"
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn version_number(&self) -> i32 {
        unsafe { (self.api.version_number)() }
    }

    /// Path or soname the library was opened from
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn default_candidates() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &[
            "libarchive.13.dylib",
            "libarchive.dylib",
            "/opt/homebrew/opt/libarchive/lib/libarchive.13.dylib",
            "/usr/local/opt/libarchive/lib/libarchive.13.dylib",
        ]
    } else if cfg!(windows) {
        &["archive.dll", "libarchive.dll"]
    } else {
        &["libarchive.so.13", "libarchive.so"]
    }
}

static ENGINE: OnceLock<std::result::Result<Engine, String>> = OnceLock::new();

/// The process-wide engine, loaded on first use
pub fn engine() -> Result<&'static Engine> {
    ENGINE
        .get_or_init(Engine::load)
        .as_ref()
        .map_err(|e| ArchiveError::EngineUnavailable(e.clone()))
}

/// Borrow a C string returned by the engine
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string that stays valid
/// while the returned slice is used.
pub(crate) unsafe fn cstr_bytes<'a>(ptr: *const c_char) -> Option<&'a [u8]> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_bytes())
    }
}

/// # Safety
/// Same contract as [`cstr_bytes`].
pub(crate) unsafe fn cstr_lossy(ptr: *const c_char) -> Option<String> {
    cstr_bytes(ptr).map(|b| String::from_utf8_lossy(b).into_owned())
}
