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

//! Safety checks applied to every step of a chase: privilege transitions
//! (for [`ChaseFlags::SAFE`]) and autofs mountpoints (for
//! [`ChaseFlags::NO_AUTOFS`]).

use crate::{
    error::{Error, ErrorImpl},
    flags::ChaseFlags,
    syscalls,
    utils::{FdExt, Metadata},
};

use std::{
    os::unix::{fs::MetadataExt, io::AsFd},
    path::{Path, PathBuf},
};

/// `AUTOFS_SUPER_MAGIC` from `<linux/magic.h>`.
pub(crate) const AUTOFS_SUPER_MAGIC: i64 = 0x0187;

/// Is the step from `a` into `b` an unsafe transition?
///
/// Leaving a directory owned by root is always fine. Otherwise we must stay
/// within the same owner, so that an unprivileged user cannot point us at
/// something they do not own and make us believe it is trustworthy.
pub(crate) fn unsafe_transition(a: &Metadata, b: &Metadata) -> bool {
    a.uid() != 0 && a.uid() != b.uid()
}

// Only used in diagnostics, so failure just means "we don't know".
fn unsafe_path_of(fd: impl AsFd) -> PathBuf {
    fd.as_fd()
        .as_unsafe_path()
        .unwrap_or_else(|_| PathBuf::from("n/a"))
}

fn owner_name(uid: u32) -> String {
    syscalls::getpwuid_name(uid).unwrap_or_else(|| uid.to_string())
}

/// Fail with [`ErrorImpl::UnsafeTransition`] if stepping from `from` (whose
/// last-observed metadata is `from_meta`) into `to` is unsafe.
pub(crate) fn check_transition<F: AsFd, T: AsFd>(
    from: F,
    from_meta: &Metadata,
    to: T,
    to_meta: &Metadata,
    path: &Path,
    flags: ChaseFlags,
) -> Result<(), Error> {
    if !unsafe_transition(from_meta, to_meta) {
        return Ok(());
    }

    let (from_path, to_path) = (unsafe_path_of(from), unsafe_path_of(to));
    let (from_owner, to_owner) = (owner_name(from_meta.uid()), owner_name(to_meta.uid()));
    if flags.contains(ChaseFlags::WARN) {
        log::warn!(
            "Detected unsafe path transition {from_path:?} (owned by {from_owner}) -> {to_path:?} (owned by {to_owner}) during canonicalization of {path:?}."
        );
    }
    Err(ErrorImpl::UnsafeTransition {
        from: from_path,
        from_owner,
        to: to_path,
        to_owner,
        path: path.into(),
    }
    .into())
}

/// Does `fd` reference an autofs mountpoint?
pub(crate) fn is_autofs_mountpoint(fd: impl AsFd) -> Result<bool, Error> {
    let statfs = syscalls::fstatfs(fd.as_fd()).map_err(|err| ErrorImpl::RawOsError {
        operation: "check filesystem type".into(),
        source: err,
    })?;
    // The type of f_type differs between libcs.
    #[allow(clippy::unnecessary_cast)]
    Ok(statfs.f_type as i64 == AUTOFS_SUPER_MAGIC)
}

/// Fail with [`ErrorImpl::AutofsMountPoint`] if `fd` is an autofs mountpoint.
pub(crate) fn check_autofs<Fd: AsFd>(fd: Fd, path: &Path, flags: ChaseFlags) -> Result<(), Error> {
    if !is_autofs_mountpoint(fd.as_fd())? {
        return Ok(());
    }

    let mountpoint = unsafe_path_of(fd);
    if flags.contains(ChaseFlags::WARN) {
        log::warn!("Detected autofs mount point {mountpoint:?} during canonicalization of {path:?}.");
    }
    Err(ErrorImpl::AutofsMountPoint {
        mountpoint,
        path: path.into(),
    }
    .into())
}
