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

//! pathchase canonicalizes untrusted paths on Linux by walking them one
//! component at a time, holding an `O_PATH` handle to every directory it has
//! already verified.
//!
//! Every component (regular names, `.`, `..` and symlinks) is resolved by
//! hand, which makes it possible to:
//!
//! * Confine resolution to a directory tree, so that absolute symlinks and
//!   `..` components cannot escape it (emulating [`chroot(2)`] semantics
//!   without needing privileges).
//! * Refuse to cross from a directory owned by one unprivileged user into a
//!   directory owned by another ([`ChaseFlags::SAFE`]).
//! * Refuse to cross into (and thus trigger) an autofs mountpoint
//!   ([`ChaseFlags::NO_AUTOFS`]).
//! * Tolerate a missing final component, or trace the resolution one
//!   normalization step at a time.
//!
//! The entry points are [`resolve_at`] and [`resolve`], which return a
//! normalized path and/or an `O_PATH` [`Handle`], plus a series of
//! "resolve-then-use" helpers ([`resolve_and_open`], [`resolve_and_opendir`],
//! [`resolve_and_stat`], [`resolve_and_access`] and [`resolve_and_fopen`]).
//! All of them are shorthands for the same methods on a [`Chaser`], which can
//! be used to tweak the resolution policy.
//!
//! # Assumptions
//!
//! A working `/proc` mount is required in order to re-open `O_PATH` handles
//! with real access modes. pathchase verifies that `/proc` is actually a
//! `procfs` instance before using it.
//!
//! # Examples
//!
//! ```
//! # use std::path::Path;
//! # use pathchase::{ChaseFlags, Want, OpenFlags};
//! # fn main() -> Result<(), pathchase::error::Error> {
//! let (root_path, unsafe_path) = ("/path/to/image", "/etc/os-release");
//! # let root_path = "/";
//! # let unsafe_path = "/proc/self/comm";
//! // Absolute symlinks inside the image resolve inside the image.
//! let (file, path) = pathchase::resolve_and_open(
//!     unsafe_path,
//!     Some(Path::new(root_path)),
//!     ChaseFlags::PREFIX_ROOT,
//!     OpenFlags::O_RDONLY,
//!     Want::PATH,
//! )?;
//! # let _ = (file, path);
//! # Ok(())
//! # }
//! ```
//!
//! [`chroot(2)`]: http://man7.org/linux/man-pages/man2/chroot.2.html

// pathchase only supports Linux.
#![cfg(target_os = "linux")]

#[macro_use]
extern crate bitflags;

// `Handle` implementation.
mod handle;
#[doc(inline)]
pub use handle::*;

// The symlink chasing implementation.
mod chase;
#[doc(inline)]
pub use chase::{resolve, resolve_at, Chased, Chaser, MAX_SYMLINK_FOLLOWS};

// "resolve-then-use" helpers.
mod openers;
#[doc(inline)]
pub use openers::*;

// `Error` definitions.
pub mod error;

pub mod flags;
#[doc(inline)]
pub use flags::*;

mod procfs;

// Internally used helpers.
mod syscalls;
mod utils;
pub use utils::Metadata;

/// Marker for "the current working directory" when passed as a starting
/// directory to [`resolve_at`].
pub const AT_FDCWD: std::os::unix::io::BorrowedFd<'static> = syscalls::AT_FDCWD;
