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

//! The chase works on two pieces of path text: `done` holds the components
//! that have already been verified (with symlinks, `.` and `..` processed),
//! and `todo` holds what is still left to look at. Every iteration moves one
//! component from `todo` to `done`, and we always hold an `O_PATH` handle to
//! the inode `done` refers to. Each component is looked up relative to that
//! handle with `O_NOFOLLOW`, so no part of the path that has already been
//! checked is ever resolved again from a string.
//!
//! Symlinks are expanded by replacing `todo` with the link target followed by
//! whatever was left of `todo`. Absolute targets restart at the root handle
//! (and `..` at the top of the tree is ignored), which is how
//! `RESOLVE_IN_ROOT` is emulated. Without a root the host's `/` plays that
//! part and `done` becomes absolute.

use crate::{
    chase::{checks, Chased, Chaser},
    error::{Error, ErrorExt, ErrorImpl},
    flags::{ChaseFlags, OpenFlags, Want},
    syscalls,
    utils::{self, FdExt, Metadata, Todo},
    Handle,
};

use std::{
    ffi::OsString,
    os::unix::{
        ffi::{OsStrExt, OsStringExt},
        io::{AsRawFd, BorrowedFd, OwnedFd},
    },
    path::{Path, PathBuf},
};

/// How the result of the chase should be presented.
#[derive(Debug)]
enum Output {
    /// `done` is relative to the starting directory (or absolute against the
    /// host root) and is returned as-is.
    AsIs,
    /// `done` is absolute, but the caller gave a path relative to the current
    /// directory at the time the chase started and gets a relative path back.
    RelativeTo(PathBuf),
}

fn open_host_root() -> Result<OwnedFd, Error> {
    syscalls::openat(
        syscalls::AT_FDCWD,
        "/",
        OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
        0,
    )
    .map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "open host root".into(),
            source: err,
        }
        .into()
    })
}

fn build_path(done: Vec<u8>, output: &Output, rest: &Path) -> PathBuf {
    let done = PathBuf::from(OsString::from_vec(done));
    let done = match output {
        Output::AsIs => done,
        Output::RelativeTo(cwd) => utils::path_make_relative(cwd, &done),
    };

    let path = match (done.as_os_str().as_bytes(), rest.as_os_str().is_empty()) {
        (_, true) => done,
        (b"" | b".", false) => rest.to_path_buf(),
        (_, false) => done.join(rest),
    };
    if path.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        path
    }
}

pub(super) fn resolve_at(
    chaser: &Chaser,
    dirfd: BorrowedFd<'_>,
    path: &Path,
    want: Want,
) -> Result<Chased, Error> {
    let flags = chaser.flags;
    let path = if path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        path
    };

    // If the caller only wants a handle and none of the features that need a
    // userspace walk are requested, the kernel can do the whole lookup.
    if want == Want::HANDLE
        && !flags.intersects(
            ChaseFlags::AT_RESOLVE_IN_ROOT
                | ChaseFlags::NONEXISTENT
                | ChaseFlags::NO_AUTOFS
                | ChaseFlags::SAFE
                | ChaseFlags::STEP,
        )
    {
        let mut oflags = OpenFlags::O_PATH;
        if flags.contains(ChaseFlags::NOFOLLOW) {
            oflags.insert(OpenFlags::O_NOFOLLOW);
        }
        let handle = syscalls::openat_follow(dirfd, path, oflags, 0).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "open path handle".into(),
                source: err,
            }
        })?;
        return Ok(Chased {
            path: None,
            handle: Some(Handle::from_fd(handle)),
            exists: true,
            complete: true,
        });
    }

    let in_root = flags.contains(ChaseFlags::AT_RESOLVE_IN_ROOT);
    // Relative to the current directory with the host root as the boundary.
    let cwd_mode = !in_root && dirfd.as_raw_fd() == libc::AT_FDCWD;

    // The boundary used for absolute symlinks.
    let root = if in_root {
        dirfd
            .reopen(OpenFlags::O_PATH | OpenFlags::O_DIRECTORY)
            .wrap("reopen root directory")?
    } else {
        open_host_root()?
    };

    let (mut current, mut done, output) = if cwd_mode && path.is_absolute() {
        (open_host_root()?, b"/".to_vec(), Output::AsIs)
    } else if cwd_mode {
        // Track the absolute path of the current directory so that ".." and
        // absolute symlinks work on the real host path, and turn the result
        // back into a relative path at the end.
        let cwd = syscalls::getcwd().map_err(|err| ErrorImpl::RawOsError {
            operation: "get current directory".into(),
            source: err,
        })?;
        let current = dirfd
            .reopen(OpenFlags::O_PATH | OpenFlags::O_DIRECTORY)
            .wrap("open current directory")?;
        let done = cwd.as_os_str().as_bytes().to_vec();
        (current, done, Output::RelativeTo(cwd))
    } else {
        let current = dirfd
            .reopen(OpenFlags::O_PATH | OpenFlags::O_DIRECTORY)
            .wrap("reopen starting directory")?;
        (current, Vec::new(), Output::AsIs)
    };

    let mut previous: Option<Metadata> = if flags.contains(ChaseFlags::SAFE) {
        Some(current.metadata().wrap("fstat starting directory")?)
    } else {
        None
    };

    let append_trail_slash = flags.contains(ChaseFlags::TRAIL_SLASH) && {
        let bytes = path.as_os_str().as_bytes();
        bytes.ends_with(b"/") || bytes.ends_with(b"/.")
    };

    let mut todo = Todo::new(path)?;
    let mut symlink_budget = chaser.max_symlinks;
    let mut exists = true;

    let stepped = loop {
        let part = match todo.next_component()? {
            Some(part) => part,
            None => {
                if append_trail_slash && !done.is_empty() && !done.ends_with(b"/") {
                    utils::path_extend(&mut done, b"/")?;
                }
                break false;
            }
        };

        if part.as_bytes() == b".." {
            // Going up from the top of the tree does nothing, just like the
            // kernel does for "/..". Above a plain starting directory we
            // have to keep the ".." in the path instead.
            let at_top = match done.as_slice() {
                b"" => in_root,
                done => utils::path_is_empty_or_root(done),
            };
            if at_top {
                continue;
            }
            utils::path_pop_component(&mut done)?;

            if flags.contains(ChaseFlags::STEP) {
                break true;
            }

            let parent = syscalls::openat(&current, "..", OpenFlags::O_PATH, 0).map_err(|err| {
                ErrorImpl::RawOsError {
                    operation: "open parent directory".into(),
                    source: err,
                }
            })?;
            if let Some(prev) = previous.as_mut() {
                let meta = parent.metadata().wrap("fstat parent directory")?;
                checks::check_transition(&current, prev, &parent, &meta, path, flags)?;
                *prev = meta;
            }
            current = parent;
            continue;
        }

        let next = match syscalls::openat(&current, &part, OpenFlags::O_PATH, 0) {
            Ok(next) => next,
            Err(err)
                if err.root_cause().raw_os_error() == Some(libc::ENOENT)
                    && flags.contains(ChaseFlags::NONEXISTENT)
                    && (todo.is_empty() || utils::path_is_safe(todo.remaining())) =>
            {
                // Whatever is left does not exist yet, but it contains no ".."
                // so it can only ever refer to something below "done".
                utils::path_extend(&mut done, part.as_bytes())?;
                while let Some(part) = todo.next_component()? {
                    utils::path_extend(&mut done, part.as_bytes())?;
                }
                if append_trail_slash {
                    utils::path_extend(&mut done, b"/")?;
                }
                exists = false;
                break false;
            }
            Err(err) => Err(ErrorImpl::RawOsError {
                operation: "open next component of chase".into(),
                source: err,
            })?,
        };

        let meta = next.metadata().wrap("fstat next component")?;
        if let Some(prev) = previous.as_mut() {
            checks::check_transition(&current, prev, &next, &meta, path, flags)?;
            *prev = meta.clone();
        }
        if flags.contains(ChaseFlags::NO_AUTOFS) {
            checks::check_autofs(&next, path, flags)?;
        }

        if meta.is_symlink() && !(flags.contains(ChaseFlags::NOFOLLOW) && todo.is_empty()) {
            symlink_budget -= 1;
            if symlink_budget == 0 {
                Err(ErrorImpl::TooManySymlinks { path: path.into() })?
            }

            let target = syscalls::readlinkat(&next, "").map_err(|err| ErrorImpl::RawOsError {
                operation: "read symlink".into(),
                source: err,
            })?;
            if target.as_os_str().is_empty() {
                Err(ErrorImpl::InvalidArgument {
                    name: "symlink".into(),
                    description: format!("symlink {part:?} has an empty target").into(),
                })?
            }

            if target.is_absolute() {
                // Restart from the root, but keep walking the rest of the
                // path from there.
                current = root
                    .reopen(OpenFlags::O_PATH | OpenFlags::O_DIRECTORY)
                    .wrap("reopen root for absolute symlink")?;
                if let Some(prev) = previous.as_mut() {
                    let root_meta = current.metadata().wrap("fstat root directory")?;
                    checks::check_transition(&next, prev, &current, &root_meta, path, flags)?;
                    *prev = root_meta;
                }
                done = if in_root { Vec::new() } else { b"/".to_vec() };
            }

            todo.expand(&target)?;

            if flags.contains(ChaseFlags::STEP) {
                break true;
            }
            continue;
        }

        // An ordinary component, so we can go one level down.
        utils::path_extend(&mut done, part.as_bytes())?;
        current = next;
    };

    let rest = if stepped { todo.remaining() } else { Path::new("") };
    Ok(Chased {
        path: want
            .contains(Want::PATH)
            .then(|| build_path(done, &output, rest)),
        handle: want
            .contains(Want::HANDLE)
            .then(|| Handle::from_fd(current)),
        exists,
        complete: !stepped,
    })
}
