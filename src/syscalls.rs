/*
 * pathchase: safe symlink chasing on Linux
 * Copyright (C) 2019-2024 Aleksa Sarai <cyphar@cyphar.com>
 * Copyright (C) 2019-2024 SUSE LLC
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU Lesser General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
 * or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
 * for more details.
 *
 * You should have received a copy of the GNU Lesser General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

// We need to permit unsafe code because we are interacting with libc APIs.
#![allow(unsafe_code)]

use crate::{
    flags::{AccessMode, OpenFlags},
    utils::FdExt,
};

use std::{
    ffi::{CStr, OsString},
    fmt,
    io::Error as IOError,
    mem::MaybeUninit,
    os::unix::{
        ffi::OsStringExt,
        io::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    },
    path::{Path, PathBuf},
    ptr,
};

use libc::c_int;
use rustix::{
    fs::{self as rustix_fs, Access, AtFlags, Mode, OFlags, StatFs},
    io::Errno,
    process as rustix_process,
};

/// The `AT_FDCWD` marker, as a [`BorrowedFd`].
pub(crate) const AT_FDCWD: BorrowedFd<'static> = rustix_fs::CWD;

/// A file descriptor value that is guaranteed to be invalid, for testing
/// error paths.
#[cfg(test)]
pub(crate) const BADFD: BorrowedFd<'static> =
    // SAFETY: -EBADF is never a valid fd, and BorrowedFd only forbids -1.
    unsafe { BorrowedFd::borrow_raw(-libc::EBADF) };

/// A file descriptor number plus the path it had when a syscall failed.
///
/// Only used to render syscall arguments in error messages. The number is
/// most likely closed (or reused) by the time anyone reads it.
#[derive(Clone, Debug)]
pub(crate) struct FrozenFd(c_int, Option<PathBuf>);

impl From<BorrowedFd<'_>> for FrozenFd {
    fn from(fd: BorrowedFd<'_>) -> Self {
        // Display only, so the unchecked /proc lookup is fine.
        Self(fd.as_raw_fd(), fd.as_unsafe_path_unchecked().ok())
    }
}

impl fmt::Display for FrozenFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            libc::AT_FDCWD => write!(f, "[AT_FDCWD]")?,
            fd => write!(f, "[{fd}]")?,
        };
        match &self.1 {
            Some(path) => write!(f, "{path:?}")?,
            None => write!(f, "<unknown>")?,
        };
        Ok(())
    }
}

/// Failure of one of the syscall wrappers below, carrying the arguments that
/// were passed. These end up boxed inside [`crate::error::Error`].
#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("openat({dirfd}, {path:?}, 0x{flags:x}, 0o{mode:o})")]
    Openat {
        dirfd: FrozenFd,
        path: PathBuf,
        flags: OpenFlags,
        mode: u32,
        source: IOError,
    },

    #[error("readlinkat({dirfd}, {path:?})")]
    Readlinkat {
        dirfd: FrozenFd,
        path: PathBuf,
        source: IOError,
    },

    #[error("fstatat({dirfd}, {path:?}, 0x{flags:x})")]
    Fstatat {
        dirfd: FrozenFd,
        path: PathBuf,
        flags: u32,
        source: IOError,
    },

    #[error("fstatfs({fd})")]
    Fstatfs { fd: FrozenFd, source: IOError },

    #[error("faccessat({dirfd}, {path:?}, 0o{mode:o}, 0x{flags:x})")]
    Faccessat {
        dirfd: FrozenFd,
        path: PathBuf,
        mode: c_int,
        flags: u32,
        source: IOError,
    },

    #[error("getcwd()")]
    Getcwd { source: IOError },
}

impl Error {
    pub(crate) fn root_cause(&self) -> &IOError {
        match self {
            Error::Openat { source, .. } => source,
            Error::Readlinkat { source, .. } => source,
            Error::Fstatat { source, .. } => source,
            Error::Fstatfs { source, .. } => source,
            Error::Faccessat { source, .. } => source,
            Error::Getcwd { source, .. } => source,
        }
    }
}

/// `openat(2)` with `O_CLOEXEC | O_NOCTTY` always set.
pub(crate) fn openat_follow<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: OpenFlags,
    mode: u32,
) -> Result<OwnedFd, Error> {
    let (dirfd, path) = (dirfd.as_fd(), path.as_ref());
    let flags = flags | OpenFlags::O_CLOEXEC | OpenFlags::O_NOCTTY;

    rustix_fs::openat(
        dirfd,
        path,
        OFlags::from_bits_retain(flags.bits() as _),
        Mode::from_bits_retain(mode as _),
    )
    .map_err(|errno| Error::Openat {
        dirfd: dirfd.into(),
        path: path.into(),
        flags,
        mode,
        source: errno.into(),
    })
}

/// Wrapper for `openat(2)` which auto-sets `O_CLOEXEC | O_NOCTTY | O_NOFOLLOW`.
pub(crate) fn openat<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: OpenFlags,
    mode: u32,
) -> Result<OwnedFd, Error> {
    openat_follow(dirfd, path, flags | OpenFlags::O_NOFOLLOW, mode)
}

/// Wrapper for `readlinkat(2)`.
pub(crate) fn readlinkat<Fd: AsFd, P: AsRef<Path>>(dirfd: Fd, path: P) -> Result<PathBuf, Error> {
    let (dirfd, path) = (dirfd.as_fd(), path.as_ref());

    rustix_fs::readlinkat(dirfd, path, Vec::new())
        .map(|target| OsString::from_vec(target.into_bytes()).into())
        .map_err(|errno| Error::Readlinkat {
            dirfd: dirfd.into(),
            path: path.into(),
            source: errno.into(),
        })
}

/// Wrapper for `fstatat(2)`.
pub(crate) fn fstatat<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: AtFlags,
) -> Result<rustix_fs::Stat, Error> {
    let (dirfd, path) = (dirfd.as_fd(), path.as_ref());

    rustix_fs::statat(dirfd, path, flags).map_err(|errno| Error::Fstatat {
        dirfd: dirfd.into(),
        path: path.into(),
        flags: flags.bits() as _,
        source: errno.into(),
    })
}

/// Wrapper for `fstatfs(2)`.
pub(crate) fn fstatfs<Fd: AsFd>(fd: Fd) -> Result<StatFs, Error> {
    let fd = fd.as_fd();

    rustix_fs::fstatfs(fd).map_err(|errno| Error::Fstatfs {
        fd: fd.into(),
        source: errno.into(),
    })
}

/// Wrapper for `faccessat(2)`. rustix uses `faccessat2(2)` when `flags` is
/// non-empty, which is not available on older kernels.
pub(crate) fn faccessat<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    mode: AccessMode,
    flags: AtFlags,
) -> Result<(), Error> {
    let (dirfd, path) = (dirfd.as_fd(), path.as_ref());

    rustix_fs::accessat(
        dirfd,
        path,
        Access::from_bits_retain(mode.bits() as _),
        flags,
    )
    .map_err(|errno: Errno| Error::Faccessat {
        dirfd: dirfd.into(),
        path: path.into(),
        mode: mode.bits(),
        flags: flags.bits() as _,
        source: errno.into(),
    })
}

pub(crate) fn getcwd() -> Result<PathBuf, Error> {
    rustix_process::getcwd(Vec::new())
        .map(|cwd| OsString::from_vec(cwd.into_bytes()).into())
        .map_err(|errno| Error::Getcwd {
            source: errno.into(),
        })
}

pub(crate) fn getpid() -> u32 {
    rustix_process::getpid().as_raw_nonzero().get() as u32
}

/// Look up the name of the given user with `getpwuid_r(3)`. Returns `None`
/// if there is no such user (or the lookup failed for any other reason).
pub(crate) fn getpwuid_name(uid: u32) -> Option<String> {
    // Large enough for any sane passwd entry. We retry with a bigger buffer
    // on ERANGE.
    let mut buffer = vec![0 as libc::c_char; 1024];
    loop {
        let mut pwd = MaybeUninit::<libc::passwd>::uninit();
        let mut result: *mut libc::passwd = ptr::null_mut();

        // SAFETY: Obviously safe-to-use libc function. buffer is valid for
        //         buffer.len() bytes and outlives every use of pwd.
        let ret = unsafe {
            libc::getpwuid_r(
                uid,
                pwd.as_mut_ptr(),
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        match ret {
            0 if result.is_null() => return None,
            0 => {
                // SAFETY: getpwuid_r succeeded so pwd is initialised, and
                //         pw_name points to a NUL-terminated string inside
                //         buffer.
                let name = unsafe { CStr::from_ptr(pwd.assume_init().pw_name) };
                return Some(name.to_string_lossy().into_owned());
            }
            libc::ERANGE if buffer.len() < 1 << 20 => {
                let new_len = buffer.len() * 2;
                buffer.resize(new_len, 0);
            }
            _ => return None,
        }
    }
}
