/*
 * pathchase: safe symlink chasing on Linux
 * Copyright (C) 2019-2024 Aleksa Sarai <cyphar@cyphar.com>
 * Copyright (C) 2019-2024 SUSE LLC
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option) any
 * later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU Lesser General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![forbid(unsafe_code)]

use crate::{
    error::{Error, ErrorImpl},
    flags::OpenFlags,
    utils::{FdExt, Metadata},
};

use std::{
    fs::File,
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    path::PathBuf,
};

/// An `O_PATH` handle to the inode a path was chased to.
///
/// A [`Handle`] pins the resolved inode, so it can be "re-opened" to get an
/// actual [`File`] without racing against a concurrent rename or symlink
/// swap of the path that was resolved.
///
/// # Safety
///
/// The path of a [`Handle`] (see [`Handle::as_unsafe_path`]) is only a
/// snapshot. Do not resolve it again with plain path-based syscalls, since
/// that undoes all of the protection [`Handle`] offers.
#[derive(Debug)]
pub struct Handle {
    inner: OwnedFd,
}

impl Handle {
    /// Wrap an [`OwnedFd`] into a [`Handle`].
    ///
    /// The file descriptor should be an `O_PATH` descriptor produced by
    /// pathchase (possibly after a round-trip through [`OwnedFd`]). This is
    /// not `unsafe`, but code that relies on the [`Handle`] having been
    /// chased safely can be misled by an arbitrary descriptor.
    #[inline]
    pub fn from_fd(fd: impl Into<OwnedFd>) -> Self {
        Self { inner: fd.into() }
    }

    /// Create a copy of an existing [`Handle`].
    ///
    /// The new handle is completely independent from the original, but
    /// references the same underlying file.
    pub fn try_clone(&self) -> Result<Self, Error> {
        self.inner
            .try_clone()
            .map_err(|err| {
                ErrorImpl::OsError {
                    operation: "clone handle".into(),
                    source: err,
                }
                .into()
            })
            .map(Self::from_fd)
    }

    /// "Upgrade" the handle to a usable [`File`] handle.
    ///
    /// This new [`File`] handle is suitable for reading and writing. This does
    /// not consume the original handle (allowing for it to be used many times).
    ///
    /// The [`File`] handle will be opened with `O_NOCTTY` and `O_CLOEXEC` set,
    /// regardless of whether those flags are present in the `flags` argument.
    ///
    /// Handles to symlinks (which you get from [`ChaseFlags::NOFOLLOW`]) cannot
    /// be re-opened and fail with `ELOOP`.
    ///
    /// [`ChaseFlags::NOFOLLOW`]: crate::flags::ChaseFlags::NOFOLLOW
    pub fn reopen(&self, flags: OpenFlags) -> Result<File, Error> {
        self.inner.reopen(flags).map(File::from)
    }

    /// `fstat(2)` the handle. Unlike [`File::metadata`] this works for
    /// handles to symlinks.
    pub fn metadata(&self) -> Result<Metadata, Error> {
        self.inner.metadata()
    }

    /// The path the handle refers to, as seen through `/proc/thread-self/fd`.
    ///
    /// This is only a snapshot (the inode may have been moved since) and must
    /// not be used for anything other than diagnostics.
    pub fn as_unsafe_path(&self) -> Result<PathBuf, Error> {
        self.inner.as_unsafe_path()
    }
}

impl From<OwnedFd> for Handle {
    fn from(fd: OwnedFd) -> Self {
        Self::from_fd(fd)
    }
}

impl From<Handle> for OwnedFd {
    /// Unwrap a [`Handle`] to reveal the underlying [`OwnedFd`].
    ///
    /// **Note**: This method is primarily intended to allow for file
    /// descriptor passing or otherwise transmitting file descriptor
    /// information. If you want to get a [`File`] handle for general use,
    /// please use [`Handle::reopen`] instead.
    #[inline]
    fn from(handle: Handle) -> Self {
        handle.inner
    }
}

impl AsFd for Handle {
    /// Access the underlying file descriptor for a [`Handle`].
    ///
    /// **Note**: This method is primarily intended to allow for tests and
    /// other code to check the status of the underlying [`OwnedFd`] without
    /// having to use [`OwnedFd::from`]. It is not safe to use this
    /// [`BorrowedFd`] directly to do filesystem operations. Please use the
    /// provided [`Handle`] methods.
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}
