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

//! Helpers that chase a path and then do something with the result.
//!
//! When none of the features that need a userspace chase are requested (no
//! root, no returned path, no [`ChaseFlags::SAFE`] or
//! [`ChaseFlags::NO_AUTOFS`]) these do a single direct syscall instead.

use crate::{
    chase::{Chased, Chaser},
    error::{Error, ErrorImpl},
    flags::{AccessMode, ChaseFlags, OpenFlags, Want},
    procfs::ProcfsHandle,
    syscalls,
    utils::{path_is_empty_or_root, Metadata},
    Handle,
};

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Error as IOError, Read, Write},
    os::unix::{
        ffi::OsStrExt,
        io::{AsFd, AsRawFd, OwnedFd},
    },
    path::{Path, PathBuf},
    str::FromStr,
};

use rustix::fs::{AtFlags, Dir};

impl Chaser {
    fn check_opener_flags(&self) -> Result<(), Error> {
        if self
            .flags
            .intersects(ChaseFlags::NONEXISTENT | ChaseFlags::STEP)
        {
            Err(ErrorImpl::InvalidArgument {
                name: "flags".into(),
                description: "NONEXISTENT and STEP cannot be used when opening".into(),
            })?
        }
        Ok(())
    }

    fn can_skip_chase(&self, root: Option<&Path>, want: Want) -> bool {
        root.map_or(true, |root| path_is_empty_or_root(root.as_os_str().as_bytes()))
            && !want.contains(Want::PATH)
            && !self
                .flags
                .intersects(ChaseFlags::SAFE | ChaseFlags::NO_AUTOFS)
    }

    fn nofollow_oflags(&self) -> OpenFlags {
        if self.flags.contains(ChaseFlags::NOFOLLOW) {
            OpenFlags::O_NOFOLLOW
        } else {
            OpenFlags::empty()
        }
    }

    fn nofollow_atflags(&self) -> AtFlags {
        if self.flags.contains(ChaseFlags::NOFOLLOW) {
            AtFlags::SYMLINK_NOFOLLOW
        } else {
            AtFlags::empty()
        }
    }

    /// Chase to a handle (and possibly a path).
    fn chase_handle<P: AsRef<Path>>(
        &self,
        path: P,
        root: Option<&Path>,
        want: Want,
    ) -> Result<(Handle, Option<PathBuf>), Error> {
        let Chased { handle, path, .. } = self.resolve(path, root, want | Want::HANDLE)?;
        let handle = handle.ok_or_else(|| ErrorImpl::InternalError {
            description: "chase did not return the requested handle".into(),
        })?;
        Ok((handle, path))
    }

    /// Chase `path` (see [`Chaser::resolve`]) and open the result with
    /// `oflags`.
    ///
    /// Only [`Want::PATH`] is meaningful in `want`. If `oflags` contains
    /// `O_PATH` and [`ChaseFlags::NOFOLLOW`] left us with a handle to a
    /// symlink, that handle is returned as-is. Re-opening a symlink handle
    /// with any other flags fails with `ELOOP`.
    pub fn resolve_and_open<P: AsRef<Path>>(
        &self,
        path: P,
        root: Option<&Path>,
        oflags: OpenFlags,
        want: Want,
    ) -> Result<(File, Option<PathBuf>), Error> {
        self.check_opener_flags()?;
        let path = path.as_ref();

        if self.can_skip_chase(root, want) {
            let mode = if oflags.intersects(OpenFlags::O_CREAT | OpenFlags::O_TMPFILE) {
                0o666
            } else {
                0
            };
            let file = syscalls::openat_follow(
                syscalls::AT_FDCWD,
                path,
                oflags | self.nofollow_oflags(),
                mode,
            )
            .map_err(|err| ErrorImpl::RawOsError {
                operation: "open path".into(),
                source: err,
            })?;
            return Ok((file.into(), None));
        }

        let (handle, chased_path) = self.chase_handle(path, root, want)?;
        if oflags.contains(OpenFlags::O_PATH) && handle.metadata()?.is_symlink() {
            return Ok((OwnedFd::from(handle).into(), chased_path));
        }
        Ok((handle.reopen(oflags)?, chased_path))
    }

    /// Chase `path` (see [`Chaser::resolve`]) and open it as a directory
    /// stream.
    ///
    /// Only [`Want::PATH`] is meaningful in `want`.
    pub fn resolve_and_opendir<P: AsRef<Path>>(
        &self,
        path: P,
        root: Option<&Path>,
        want: Want,
    ) -> Result<(Dir, Option<PathBuf>), Error> {
        self.check_opener_flags()?;
        let path = path.as_ref();
        let oflags = OpenFlags::O_RDONLY | OpenFlags::O_DIRECTORY;

        let (fd, chased_path) = if self.can_skip_chase(root, want) {
            let fd = syscalls::openat_follow(
                syscalls::AT_FDCWD,
                path,
                oflags | self.nofollow_oflags(),
                0,
            )
            .map_err(|err| ErrorImpl::RawOsError {
                operation: "open directory".into(),
                source: err,
            })?;
            (fd, None)
        } else {
            let (handle, chased_path) = self.chase_handle(path, root, want)?;
            (OwnedFd::from(handle.reopen(oflags)?), chased_path)
        };

        let dir = Dir::new(fd).map_err(|errno| ErrorImpl::OsError {
            operation: "create directory stream".into(),
            source: errno.into(),
        })?;
        Ok((dir, chased_path))
    }

    /// Chase `path` (see [`Chaser::resolve`]) and `fstat(2)` the result.
    ///
    /// With [`Want::HANDLE`] the `O_PATH` handle used for the `fstat(2)` is
    /// returned as well.
    pub fn resolve_and_stat<P: AsRef<Path>>(
        &self,
        path: P,
        root: Option<&Path>,
        want: Want,
    ) -> Result<(Metadata, Option<PathBuf>, Option<Handle>), Error> {
        self.check_opener_flags()?;
        let path = path.as_ref();

        if self.can_skip_chase(root, want) && !want.contains(Want::HANDLE) {
            let stat = syscalls::fstatat(syscalls::AT_FDCWD, path, self.nofollow_atflags())
                .map_err(|err| ErrorImpl::RawOsError {
                    operation: "stat path".into(),
                    source: err,
                })?;
            return Ok((stat.into(), None, None));
        }

        let (handle, chased_path) = self.chase_handle(path, root, want)?;
        let meta = handle.metadata()?;
        Ok((
            meta,
            chased_path,
            want.contains(Want::HANDLE).then_some(handle),
        ))
    }

    /// Chase `path` (see [`Chaser::resolve`]) and check whether the result is
    /// accessible with `mode`, like `access(2)`.
    ///
    /// With [`Want::HANDLE`] the `O_PATH` handle that was checked is returned as
    /// well.
    pub fn resolve_and_access<P: AsRef<Path>>(
        &self,
        path: P,
        root: Option<&Path>,
        mode: AccessMode,
        want: Want,
    ) -> Result<(Option<PathBuf>, Option<Handle>), Error> {
        self.check_opener_flags()?;
        let path = path.as_ref();

        if self.can_skip_chase(root, want) && !want.contains(Want::HANDLE) {
            syscalls::faccessat(syscalls::AT_FDCWD, path, mode, self.nofollow_atflags()).map_err(
                |err| ErrorImpl::RawOsError {
                    operation: "access path".into(),
                    source: err,
                },
            )?;
            return Ok((None, None));
        }

        let (handle, chased_path) = self.chase_handle(path, root, want)?;
        access_fd(&handle, mode)?;
        Ok((chased_path, want.contains(Want::HANDLE).then_some(handle)))
    }

    /// Chase `path` (see [`Chaser::resolve`]) and open it as a buffered
    /// stream, with `fopen(3)`-style mode string (see [`FopenMode`]).
    ///
    /// Only [`Want::PATH`] is meaningful in `want`.
    pub fn resolve_and_fopen<P: AsRef<Path>>(
        &self,
        path: P,
        root: Option<&Path>,
        mode: &str,
        want: Want,
    ) -> Result<(FileStream, Option<PathBuf>), Error> {
        let mode: FopenMode = mode.parse()?;
        let (file, chased_path) = self.resolve_and_open(path, root, mode.open_flags(), want)?;
        Ok((FileStream::new(file, mode), chased_path))
    }
}

/// `access(2)` on an `O_PATH` handle.
fn access_fd(fd: impl AsFd, mode: AccessMode) -> Result<(), Error> {
    let fd = fd.as_fd();
    match syscalls::faccessat(fd, "", mode, AtFlags::EMPTY_PATH) {
        Ok(()) => Ok(()),
        // Older kernels have no faccessat2(2), so check through the procfs
        // magic-link instead.
        Err(err)
            if matches!(
                err.root_cause().raw_os_error(),
                Some(libc::ENOSYS) | Some(libc::EINVAL)
            ) =>
        {
            ProcfsHandle::global()?.access_follow(format!("fd/{}", fd.as_raw_fd()), mode)
        }
        Err(err) => Err(ErrorImpl::RawOsError {
            operation: "access handle".into(),
            source: err,
        })?,
    }
}

/// A parsed `fopen(3)`-style mode string.
///
/// The mode starts with one of `r`, `r+`, `w`, `w+`, `a` or `a+` (with the
/// same meaning as for `fopen(3)`) and can be followed by any of these
/// modifiers:
///
/// * `e`: `O_CLOEXEC` (which pathchase always sets anyway).
/// * `x`: `O_EXCL`.
/// * `m`: accepted and ignored.
///
/// Anything else is rejected.
///
/// ```
/// # use pathchase::{flags::OpenFlags, FopenMode};
/// let mode: FopenMode = "w+x".parse()?;
/// assert_eq!(
///     mode.open_flags(),
///     OpenFlags::O_RDWR | OpenFlags::O_CREAT | OpenFlags::O_TRUNC | OpenFlags::O_EXCL,
/// );
/// assert!("rb".parse::<FopenMode>().is_err());
/// # Ok::<(), pathchase::error::Error>(())
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FopenMode {
    flags: OpenFlags,
}

impl FopenMode {
    /// The `open(2)` flags equivalent to this mode.
    pub fn open_flags(&self) -> OpenFlags {
        self.flags
    }
}

impl FromStr for FopenMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        const BASE_MODES: &[(&str, OpenFlags)] = &[
            ("r+", OpenFlags::O_RDWR),
            ("r", OpenFlags::O_RDONLY),
            (
                "w+",
                OpenFlags::O_RDWR.union(OpenFlags::O_CREAT).union(OpenFlags::O_TRUNC),
            ),
            (
                "w",
                OpenFlags::O_WRONLY.union(OpenFlags::O_CREAT).union(OpenFlags::O_TRUNC),
            ),
            (
                "a+",
                OpenFlags::O_RDWR.union(OpenFlags::O_CREAT).union(OpenFlags::O_APPEND),
            ),
            (
                "a",
                OpenFlags::O_WRONLY.union(OpenFlags::O_CREAT).union(OpenFlags::O_APPEND),
            ),
        ];

        let invalid = |description: String| ErrorImpl::InvalidArgument {
            name: "mode".into(),
            description: description.into(),
        };

        let (mut flags, modifiers) = BASE_MODES
            .iter()
            .find_map(|(prefix, flags)| mode.strip_prefix(prefix).map(|rest| (*flags, rest)))
            .ok_or_else(|| invalid(format!("unknown fopen mode {mode:?}")))?;

        for modifier in modifiers.chars() {
            match modifier {
                'e' => flags.insert(OpenFlags::O_CLOEXEC),
                'x' => flags.insert(OpenFlags::O_EXCL),
                'm' => {}
                c => Err(invalid(format!("unknown fopen mode modifier {c:?} in {mode:?}")))?,
            }
        }
        Ok(Self { flags })
    }
}

/// A buffered stream returned by [`Chaser::resolve_and_fopen`].
///
/// Read-only modes are wrapped in a [`BufReader`], write-only modes in a
/// [`BufWriter`] and update (`+`) modes use the [`File`] directly. Using a
/// stream in a direction its mode does not allow fails with `EBADF`, just
/// like it would for a `FILE *`.
#[derive(Debug)]
pub enum FileStream {
    Read(BufReader<File>),
    Write(BufWriter<File>),
    Update(File),
}

impl FileStream {
    fn new(file: File, mode: FopenMode) -> Self {
        let flags = mode.open_flags();
        match (flags.wants_read(), flags.wants_write()) {
            (true, true) => Self::Update(file),
            (true, false) => Self::Read(BufReader::new(file)),
            (false, _) => Self::Write(BufWriter::new(file)),
        }
    }

    /// Get back the underlying [`File`], flushing any buffered writes first.
    /// Data buffered by a [`FileStream::Read`] stream is discarded.
    pub fn into_file(self) -> io::Result<File> {
        match self {
            Self::Read(reader) => Ok(reader.into_inner()),
            Self::Write(writer) => writer.into_inner().map_err(|err| err.into_error()),
            Self::Update(file) => Ok(file),
        }
    }
}

fn bad_direction() -> IOError {
    IOError::from_raw_os_error(libc::EBADF)
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Read(reader) => reader.read(buf),
            Self::Update(file) => file.read(buf),
            Self::Write(_) => Err(bad_direction()),
        }
    }
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Write(writer) => writer.write(buf),
            Self::Update(file) => file.write(buf),
            Self::Read(_) => Err(bad_direction()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Write(writer) => writer.flush(),
            Self::Update(file) => file.flush(),
            Self::Read(_) => Ok(()),
        }
    }
}

/// Shorthand for [`Chaser::resolve_and_open`] with the given flags.
pub fn resolve_and_open<P: AsRef<Path>>(
    path: P,
    root: Option<&Path>,
    flags: ChaseFlags,
    oflags: OpenFlags,
    want: Want,
) -> Result<(File, Option<PathBuf>), Error> {
    Chaser::new(flags).resolve_and_open(path, root, oflags, want)
}

/// Shorthand for [`Chaser::resolve_and_opendir`] with the given flags.
pub fn resolve_and_opendir<P: AsRef<Path>>(
    path: P,
    root: Option<&Path>,
    flags: ChaseFlags,
    want: Want,
) -> Result<(Dir, Option<PathBuf>), Error> {
    Chaser::new(flags).resolve_and_opendir(path, root, want)
}

/// Shorthand for [`Chaser::resolve_and_stat`] with the given flags.
pub fn resolve_and_stat<P: AsRef<Path>>(
    path: P,
    root: Option<&Path>,
    flags: ChaseFlags,
    want: Want,
) -> Result<(Metadata, Option<PathBuf>, Option<Handle>), Error> {
    Chaser::new(flags).resolve_and_stat(path, root, want)
}

/// Shorthand for [`Chaser::resolve_and_access`] with the given flags.
pub fn resolve_and_access<P: AsRef<Path>>(
    path: P,
    root: Option<&Path>,
    flags: ChaseFlags,
    mode: AccessMode,
    want: Want,
) -> Result<(Option<PathBuf>, Option<Handle>), Error> {
    Chaser::new(flags).resolve_and_access(path, root, mode, want)
}

/// Shorthand for [`Chaser::resolve_and_fopen`] with the given flags.
pub fn resolve_and_fopen<P: AsRef<Path>>(
    path: P,
    root: Option<&Path>,
    flags: ChaseFlags,
    mode: &str,
    want: Want,
) -> Result<(FileStream, Option<PathBuf>), Error> {
    Chaser::new(flags).resolve_and_fopen(path, root, mode, want)
}
