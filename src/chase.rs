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

//! Symlink chasing, with and without a confinement root.

use crate::{
    error::{Error, ErrorImpl},
    flags::{ChaseFlags, OpenFlags, Want},
    syscalls,
    utils::{self, path_is_empty_or_root},
    Handle,
};

use std::{
    ffi::OsString,
    os::unix::{
        ffi::{OsStrExt, OsStringExt},
        io::AsFd,
    },
    path::{Path, PathBuf},
};

/// Userspace chase state machine.
mod imp;

/// Privilege-transition and autofs checks.
pub(crate) mod checks;

/// Default number of symlinks a single chase may expand.
///
/// The budget is decremented before every expansion and the chase fails with
/// `ELOOP` once it hits zero, so at most `MAX_SYMLINK_FOLLOWS - 1` symlinks
/// are followed.
pub const MAX_SYMLINK_FOLLOWS: u32 = 32;

/// The configuration of a chase.
///
/// This is the primary structure used to configure how paths are chased.
/// [`Chaser::default`] has no flags set and the [`MAX_SYMLINK_FOLLOWS`]
/// symlink budget.
///
/// # Invalid combinations
///
/// The following are rejected with [`ErrorKind::InvalidArgument`] before any
/// file descriptor is opened:
///
/// * [`ChaseFlags::NONEXISTENT`] or [`ChaseFlags::STEP`] together with
///   [`Want::HANDLE`] (there may be nothing to return a handle to).
/// * [`ChaseFlags::WARN`] when running as PID 1.
/// * A `max_symlinks` of `0`.
///
/// [`ErrorKind::InvalidArgument`]: crate::error::ErrorKind::InvalidArgument
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Chaser {
    /// Flags controlling the chase.
    pub flags: ChaseFlags,
    /// Symlink budget of a single chase.
    pub max_symlinks: u32,
}

impl Default for Chaser {
    fn default() -> Self {
        Self {
            flags: ChaseFlags::empty(),
            max_symlinks: MAX_SYMLINK_FOLLOWS,
        }
    }
}

/// The outcome of a chase.
#[derive(Debug)]
pub struct Chased {
    /// The normalized path, if [`Want::PATH`] was requested.
    pub path: Option<PathBuf>,
    /// An `O_PATH` handle to the resolved inode, if [`Want::HANDLE`] was
    /// requested.
    pub handle: Option<Handle>,
    /// Whether the whole path exists. Only ever `false` with
    /// [`ChaseFlags::NONEXISTENT`].
    pub exists: bool,
    /// Whether the path was fully normalized. Only ever `false` with
    /// [`ChaseFlags::STEP`].
    pub complete: bool,
}

impl Chaser {
    /// Create a new [`Chaser`] with the given flags and the default symlink
    /// budget.
    pub fn new(flags: ChaseFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }

    /// Override the symlink budget.
    pub fn with_max_symlinks(self, max_symlinks: u32) -> Self {
        Self {
            max_symlinks,
            ..self
        }
    }

    pub(crate) fn validate(&self, want: Want) -> Result<(), Error> {
        if want.contains(Want::HANDLE) {
            if self.flags.contains(ChaseFlags::NONEXISTENT) {
                Err(ErrorImpl::InvalidArgument {
                    name: "flags".into(),
                    description: "NONEXISTENT cannot be combined with a handle".into(),
                })?
            }
            if self.flags.contains(ChaseFlags::STEP) {
                Err(ErrorImpl::InvalidArgument {
                    name: "flags".into(),
                    description: "STEP cannot be combined with a handle".into(),
                })?
            }
        }
        if self.flags.contains(ChaseFlags::WARN) && syscalls::getpid() == 1 {
            Err(ErrorImpl::InvalidArgument {
                name: "flags".into(),
                description: "WARN cannot be used by PID 1".into(),
            })?
        }
        if self.max_symlinks == 0 {
            Err(ErrorImpl::InvalidArgument {
                name: "max_symlinks".into(),
                description: "symlink budget must be at least 1".into(),
            })?
        }
        Ok(())
    }

    /// Chase `path` starting at `dirfd`.
    ///
    /// `path` is always interpreted relative to `dirfd`, even if it is
    /// absolute. Where absolute symlinks (and `..` at the top of the tree)
    /// lead depends on [`ChaseFlags::AT_RESOLVE_IN_ROOT`]: with it they stay
    /// inside `dirfd`, without it they go to the host root.
    ///
    /// If `dirfd` is [`AT_FDCWD`] (and [`ChaseFlags::AT_RESOLVE_IN_ROOT`] is
    /// not set), an absolute `path` is chased from the host root and produces
    /// an absolute path, and a relative `path` is chased from the current
    /// directory and produces a path relative to it. An empty result is
    /// reported as `.`.
    ///
    /// [`AT_FDCWD`]: crate::AT_FDCWD
    pub fn resolve_at<Fd: AsFd, P: AsRef<Path>>(
        &self,
        dirfd: Fd,
        path: P,
        want: Want,
    ) -> Result<Chased, Error> {
        self.validate(want)?;
        if self.flags.contains(ChaseFlags::PREFIX_ROOT) {
            Err(ErrorImpl::InvalidArgument {
                name: "flags".into(),
                description: "PREFIX_ROOT can only be used with a root".into(),
            })?
        }
        imp::resolve_at(self, dirfd.as_fd(), path.as_ref(), want)
    }

    /// Chase `path` confined to `root`.
    ///
    /// A `root` of `None`, `""` or `/` means there is no confinement, and this
    /// is equivalent to [`Chaser::resolve_at`] with [`AT_FDCWD`]. Otherwise
    /// the root is made absolute and simplified (without resolving any of its
    /// symlinks), and absolute symlinks found while chasing are resolved
    /// relative to it.
    ///
    /// Unless [`ChaseFlags::PREFIX_ROOT`] is set, `path` must already be inside
    /// `root` (after being made absolute), or the chase fails with
    /// [`ErrorKind::OutsideRoot`]. With [`ChaseFlags::PREFIX_ROOT`] the two are
    /// joined first. Either way the returned path includes the root.
    ///
    /// [`AT_FDCWD`]: crate::AT_FDCWD
    /// [`ErrorKind::OutsideRoot`]: crate::error::ErrorKind::OutsideRoot
    pub fn resolve<P: AsRef<Path>>(
        &self,
        path: P,
        root: Option<&Path>,
        want: Want,
    ) -> Result<Chased, Error> {
        let path = path.as_ref();
        self.validate(want)?;
        if path.as_os_str().is_empty() {
            Err(ErrorImpl::InvalidArgument {
                name: "path".into(),
                description: "cannot chase an empty path".into(),
            })?
        }

        let mut chaser = *self;
        chaser.flags.remove(ChaseFlags::PREFIX_ROOT);

        let root = match root {
            Some(root) if !path_is_empty_or_root(root.as_os_str().as_bytes()) => {
                utils::path_simplify(utils::path_make_absolute_cwd(root)?)
            }
            // A root of "" or "/" is equivalent to no root at all.
            _ => return imp::resolve_at(&chaser, syscalls::AT_FDCWD, path, want),
        };
        // Spellings like "/." only become "/" after simplification.
        if root == Path::new("/") {
            return imp::resolve_at(&chaser, syscalls::AT_FDCWD, path, want);
        }

        let absolute = if self.flags.contains(ChaseFlags::PREFIX_ROOT) {
            let mut joined = root.as_os_str().as_bytes().to_vec();
            utils::path_extend(&mut joined, path.as_os_str().as_bytes())?;
            PathBuf::from(OsString::from_vec(joined))
        } else {
            utils::path_make_absolute_cwd(path)?
        };

        let inner = match utils::path_startswith(&absolute, &root) {
            Some(inner) => inner,
            None => {
                if self.flags.contains(ChaseFlags::WARN) {
                    log::warn!("Specified path {absolute:?} is outside of specified root directory {root:?}, refusing to resolve.");
                } else {
                    log::debug!("Specified path {absolute:?} is outside of specified root directory {root:?}, refusing to resolve.");
                }
                Err(ErrorImpl::OutsideRoot {
                    path: absolute.clone(),
                    root: root.clone(),
                })?
            }
        };

        let rootfd = syscalls::openat_follow(
            syscalls::AT_FDCWD,
            &root,
            OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
            0,
        )
        .map_err(|err| ErrorImpl::RawOsError {
            operation: "open root directory".into(),
            source: err,
        })?;

        chaser.flags.insert(ChaseFlags::AT_RESOLVE_IN_ROOT);
        let mut chased = imp::resolve_at(&chaser, rootfd.as_fd(), inner, want)?;
        chased.path = chased
            .path
            .map(|inner| prefix_root(&root, &inner))
            .transpose()?;
        Ok(chased)
    }
}

/// Put `root` back in front of a path chased inside of it.
fn prefix_root(root: &Path, inner: &Path) -> Result<PathBuf, Error> {
    let inner = inner.as_os_str().as_bytes();
    if inner.is_empty() || inner == b"." {
        return Ok(root.to_path_buf());
    }
    let mut path = root.as_os_str().as_bytes().to_vec();
    utils::path_extend(&mut path, inner)?;
    Ok(OsString::from_vec(path).into())
}

/// Shorthand for [`Chaser::resolve_at`] with the given flags.
pub fn resolve_at<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: ChaseFlags,
    want: Want,
) -> Result<Chased, Error> {
    Chaser::new(flags).resolve_at(dirfd, path, want)
}

/// Shorthand for [`Chaser::resolve`] with the given flags.
pub fn resolve<P: AsRef<Path>>(
    path: P,
    root: Option<&Path>,
    flags: ChaseFlags,
    want: Want,
) -> Result<Chased, Error> {
    Chaser::new(flags).resolve(path, root, want)
}
