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

#![forbid(unsafe_code)]

//! Verified access to `/proc`, used to re-open `O_PATH` handles and to look
//! up the path of a file descriptor.

use crate::{
    error::{Error, ErrorExt, ErrorImpl},
    flags::{AccessMode, OpenFlags},
    syscalls,
};

use std::{
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    path::{Path, PathBuf},
};

use once_cell::sync::OnceCell;
use rustix::fs::{self as rustix_fs, AtFlags};

/// A handle to a verified `procfs` mount.
///
/// The handle is opened once and every file opened through it is checked to
/// still be on `procfs`, which protects against an attacker mounting a
/// different filesystem on top of `/proc` (or on top of one of its
/// subdirectories) after the handle was created.
///
/// All subpaths are relative to `/proc/thread-self`, since file descriptor
/// magic-links are per-thread if another thread unshared its file table.
#[derive(Debug)]
pub(crate) struct ProcfsHandle {
    inner: OwnedFd,
}

static GLOBAL_PROCFS_HANDLE: OnceCell<ProcfsHandle> = OnceCell::new();

impl ProcfsHandle {
    pub(crate) fn new() -> Result<Self, Error> {
        let inner = syscalls::openat(
            syscalls::AT_FDCWD,
            "/proc",
            OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
            0,
        )
        .map_err(|err| ErrorImpl::RawOsError {
            operation: "open /proc handle".into(),
            source: err,
        })?;
        Self::check_is_procfs(&inner)?;
        Ok(Self { inner })
    }

    /// Get the process-wide `procfs` handle, opening it on first use.
    pub(crate) fn global() -> Result<&'static Self, Error> {
        GLOBAL_PROCFS_HANDLE.get_or_try_init(Self::new)
    }

    fn check_is_procfs(fd: impl AsFd) -> Result<(), Error> {
        let fs_type = syscalls::fstatfs(fd.as_fd())
            .map_err(|err| ErrorImpl::RawOsError {
                operation: "fstatfs proc handle".into(),
                source: err,
            })?
            .f_type;
        if fs_type != rustix_fs::PROC_SUPER_MAGIC {
            Err(ErrorImpl::SafetyViolation {
                description: format!(
                    "/proc is not procfs (f_type is 0x{:X}, not 0x{:X})",
                    fs_type,
                    rustix_fs::PROC_SUPER_MAGIC,
                )
                .into(),
            })?
        }
        Ok(())
    }

    fn open_base(&self) -> Result<OwnedFd, Error> {
        let fd = syscalls::openat_follow(
            &self.inner,
            "thread-self",
            OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
            0,
        )
        .map_err(|err| ErrorImpl::RawOsError {
            operation: "open /proc/thread-self".into(),
            source: err,
        })?;
        Self::check_is_procfs(&fd)?;
        Ok(fd)
    }

    /// Open a regular (non-magic-link) `procfs` path as an `O_PATH` handle.
    pub(crate) fn open<P: AsRef<Path>>(&self, subpath: P) -> Result<OwnedFd, Error> {
        let base = self.open_base()?;
        let fd = syscalls::openat(&base, subpath, OpenFlags::O_PATH, 0).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "open procfs path".into(),
                source: err,
            }
        })?;
        Self::check_is_procfs(&fd)?;
        Ok(fd)
    }

    /// Open a `procfs` magic-link (such as `fd/$n`) and follow it.
    ///
    /// The parent directory of the magic-link is opened without following
    /// any symlinks and verified to be on `procfs`, and only the final
    /// component is followed.
    pub(crate) fn open_follow<P: AsRef<Path>>(
        &self,
        subpath: P,
        flags: OpenFlags,
    ) -> Result<OwnedFd, Error> {
        let subpath = subpath.as_ref();
        let (parent, trailing) = match (subpath.parent(), subpath.file_name()) {
            (Some(parent), Some(trailing)) => (parent, trailing),
            _ => Err(ErrorImpl::InvalidArgument {
                name: "path".into(),
                description: "procfs magic-link path has no final component".into(),
            })?,
        };

        let parent = self.open(parent)?;
        syscalls::openat_follow(&parent, trailing, flags, 0)
            .map_err(|err| {
                Error::from(ErrorImpl::RawOsError {
                    operation: "open final magiclink component".into(),
                    source: err,
                })
            })
            .with_wrap(|| format!("open procfs magic-link {subpath:?}"))
    }

    /// Do a `readlink` of a `procfs` magic-link.
    pub(crate) fn readlink<P: AsRef<Path>>(&self, subpath: P) -> Result<PathBuf, Error> {
        let link = self.open(subpath)?;
        syscalls::readlinkat(&link, "").map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "read procfs magiclink".into(),
                source: err,
            }
            .into()
        })
    }

    /// `faccessat(2)` through a `procfs` magic-link, which checks the
    /// permissions of the link target.
    pub(crate) fn access_follow<P: AsRef<Path>>(
        &self,
        subpath: P,
        mode: AccessMode,
    ) -> Result<(), Error> {
        let base = self.open_base()?;
        syscalls::faccessat(&base, subpath, mode, AtFlags::empty()).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "access procfs magiclink".into(),
                source: err,
            }
            .into()
        })
    }
}

impl AsFd for ProcfsHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}
