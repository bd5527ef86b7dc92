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

use crate::{
    error::{Error, ErrorExt, ErrorImpl},
    flags::OpenFlags,
    procfs::ProcfsHandle,
    syscalls,
};

use std::{
    fmt, fs,
    io::Error as IOError,
    os::unix::{
        fs::MetadataExt,
        io::{AsFd, AsRawFd, OwnedFd},
    },
    path::PathBuf,
};

use rustix::fs::{self as rustix_fs, AtFlags};

/// Metadata about an inode, as returned by `fstat(2)`.
///
/// The fields are accessible through [`MetadataExt`].
#[derive(Clone)]
pub struct Metadata(rustix_fs::Stat);

impl Metadata {
    /// The `S_IFMT` bits of the mode.
    pub fn file_type(&self) -> u32 {
        self.mode() & libc::S_IFMT
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == libc::S_IFREG
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("dev", &self.dev())
            .field("ino", &self.ino())
            .field("mode", &format_args!("0o{:o}", self.mode()))
            .field("uid", &self.uid())
            .field("gid", &self.gid())
            .finish_non_exhaustive()
    }
}

impl From<rustix_fs::Stat> for Metadata {
    fn from(stat: rustix_fs::Stat) -> Self {
        Self(stat)
    }
}

// The field types of the stat buffer vary between architectures and rustix
// backends.
#[allow(clippy::unnecessary_cast)]
impl MetadataExt for Metadata {
    fn dev(&self) -> u64 {
        self.0.st_dev as u64
    }

    fn ino(&self) -> u64 {
        self.0.st_ino as u64
    }

    fn mode(&self) -> u32 {
        self.0.st_mode as u32
    }

    fn nlink(&self) -> u64 {
        self.0.st_nlink as u64
    }

    fn uid(&self) -> u32 {
        self.0.st_uid as u32
    }

    fn gid(&self) -> u32 {
        self.0.st_gid as u32
    }

    fn rdev(&self) -> u64 {
        self.0.st_rdev as u64
    }

    fn size(&self) -> u64 {
        self.0.st_size as u64
    }

    fn atime(&self) -> i64 {
        self.0.st_atime as i64
    }

    fn atime_nsec(&self) -> i64 {
        self.0.st_atime_nsec as i64
    }

    fn mtime(&self) -> i64 {
        self.0.st_mtime as i64
    }

    fn mtime_nsec(&self) -> i64 {
        self.0.st_mtime_nsec as i64
    }

    fn ctime(&self) -> i64 {
        self.0.st_ctime as i64
    }

    fn ctime_nsec(&self) -> i64 {
        self.0.st_ctime_nsec as i64
    }

    fn blksize(&self) -> u64 {
        self.0.st_blksize as u64
    }

    fn blocks(&self) -> u64 {
        self.0.st_blocks as u64
    }
}

pub(crate) trait FdExt: AsFd {
    /// Equivalent to [`File::metadata`], except that the handle may be an
    /// `O_PATH` handle to a symlink.
    ///
    /// [`File::metadata`]: std::fs::File::metadata
    fn metadata(&self) -> Result<Metadata, Error>;

    /// Re-open a file descriptor with new flags.
    ///
    /// `O_DIRECTORY` reopens go through `openat(fd, ".")`, everything else
    /// goes through the `/proc/thread-self/fd/$n` magic-link.
    fn reopen(&self, flags: OpenFlags) -> Result<OwnedFd, Error>;

    /// `readlink(/proc/thread-self/fd/$n)`. The answer can be stale by the
    /// time it is returned, so it is only good for diagnostics and tests.
    fn as_unsafe_path(&self) -> Result<PathBuf, Error>;

    /// [`FdExt::as_unsafe_path`] against the host `/proc`, without checking
    /// that it is a real procfs. Only for error messages and tests.
    fn as_unsafe_path_unchecked(&self) -> Result<PathBuf, Error>;
}

/// `fd/$n` for real descriptors and `cwd` for `AT_FDCWD`.
fn proc_subpath<Fd: AsRawFd>(fd: Fd) -> Result<String, Error> {
    let fd = fd.as_raw_fd();
    if fd == libc::AT_FDCWD {
        Ok("cwd".to_string())
    } else if fd >= 0 {
        Ok(format!("fd/{fd}"))
    } else {
        Err(ErrorImpl::InvalidArgument {
            name: "fd".into(),
            description: "must be positive or AT_FDCWD".into(),
        })?
    }
}

impl<Fd: AsFd> FdExt for Fd {
    fn metadata(&self) -> Result<Metadata, Error> {
        let stat = syscalls::fstatat(
            self.as_fd(),
            "",
            AtFlags::EMPTY_PATH | AtFlags::SYMLINK_NOFOLLOW,
        )
        .map_err(|err| ErrorImpl::RawOsError {
            operation: "get fd metadata".into(),
            source: err,
        })?;
        Ok(Metadata(stat))
    }

    fn reopen(&self, mut flags: OpenFlags) -> Result<OwnedFd, Error> {
        let fd = self.as_fd();

        // A NOFOLLOW handle to a symlink has nothing to reopen. Going through
        // the magic-link would open whatever the symlink points at instead.
        if fd.as_raw_fd() != libc::AT_FDCWD && self.metadata()?.is_symlink() {
            return Err(Error::from(ErrorImpl::OsError {
                operation: "reopen".into(),
                source: IOError::from_raw_os_error(libc::ELOOP),
            })
            .wrap("symlink file handles cannot be reopened"));
        }

        // O_NOFOLLOW would stop us at the magic-link itself.
        flags.remove(OpenFlags::O_NOFOLLOW);

        // Directories can be reopened without going through procfs at all.
        if flags.contains(OpenFlags::O_DIRECTORY) || fd.as_raw_fd() == libc::AT_FDCWD {
            return syscalls::openat(fd, ".", flags | OpenFlags::O_DIRECTORY, 0).map_err(|err| {
                ErrorImpl::RawOsError {
                    operation: "reopen directory".into(),
                    source: err,
                }
                .into()
            });
        }

        ProcfsHandle::global()?.open_follow(proc_subpath(fd)?, flags)
    }

    fn as_unsafe_path(&self) -> Result<PathBuf, Error> {
        ProcfsHandle::global()?.readlink(proc_subpath(self.as_fd())?)
    }

    fn as_unsafe_path_unchecked(&self) -> Result<PathBuf, Error> {
        // Used while formatting syscall errors, so no ProcfsHandle here.
        let fd_path = PathBuf::from("/proc/thread-self").join(proc_subpath(self.as_fd())?);
        fs::read_link(&fd_path).map_err(|err| {
            ErrorImpl::OsError {
                operation: format!("readlink fd magic-link {fd_path:?}").into(),
                source: err,
            }
            .into()
        })
    }
}
