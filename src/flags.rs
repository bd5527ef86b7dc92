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

//! Bit-flags used by pathchase.

bitflags! {
    /// `open(2)` flags, with the same values as `libc`'s `O_*` constants.
    ///
    /// The low two bits are the access mode, which is a number rather than a
    /// set of bits (`O_RDONLY` is zero). Check it through
    /// [`OpenFlags::access_mode`] or [`OpenFlags::wants_read`] instead of
    /// `contains`.
    ///
    /// ```
    /// # use pathchase::flags::OpenFlags;
    /// assert!(OpenFlags::O_WRONLY.contains(OpenFlags::O_RDONLY));
    /// assert!(!OpenFlags::O_WRONLY.wants_read());
    /// assert_eq!((OpenFlags::O_PATH | OpenFlags::O_RDWR).access_mode(), None);
    /// ```
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct OpenFlags: libc::c_int {
        const O_RDONLY = libc::O_RDONLY;
        const O_WRONLY = libc::O_WRONLY;
        const O_RDWR = libc::O_RDWR;
        const O_PATH = libc::O_PATH;

        const O_CLOEXEC = libc::O_CLOEXEC;
        const O_NOCTTY = libc::O_NOCTTY;
        const O_NOFOLLOW = libc::O_NOFOLLOW;
        const O_DIRECTORY = libc::O_DIRECTORY;

        const O_CREAT = libc::O_CREAT;
        // Includes O_DIRECTORY.
        const O_TMPFILE = libc::O_TMPFILE;
        const O_EXCL = libc::O_EXCL;
        const O_TRUNC = libc::O_TRUNC;
        const O_APPEND = libc::O_APPEND;
        const O_NONBLOCK = libc::O_NONBLOCK;

        // Anything else the caller passes through is kept as-is.
        const _ = !0;
    }
}

impl OpenFlags {
    /// The `O_ACCMODE` part of the flags, or `None` for `O_PATH`.
    #[inline]
    pub fn access_mode(self) -> Option<libc::c_int> {
        (!self.contains(OpenFlags::O_PATH)).then(|| self.bits() & libc::O_ACCMODE)
    }

    /// Whether a file opened with these flags is readable.
    #[inline]
    pub fn wants_read(self) -> bool {
        matches!(self.access_mode(), Some(libc::O_RDONLY | libc::O_RDWR))
    }

    /// Whether opening with these flags can modify the filesystem. This
    /// includes `O_CREAT` and `O_TRUNC` regardless of the access mode. `O_PATH`
    /// ignores all of them.
    #[inline]
    pub fn wants_write(self) -> bool {
        match self.access_mode() {
            None => false,
            Some(libc::O_WRONLY | libc::O_RDWR) => true,
            Some(_) => self.intersects(OpenFlags::O_CREAT | OpenFlags::O_TRUNC),
        }
    }
}

bitflags! {
    /// Flags controlling how a path is chased.
    ///
    /// All of the flags can be combined freely, with the exception of the
    /// combinations listed in [`Chaser`]'s documentation.
    ///
    /// [`Chaser`]: crate::Chaser
    #[derive(Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct ChaseFlags: u32 {
        /// Tolerate a missing final component. The missing part of the path
        /// is appended to the resolved path as-is, as long as it does not
        /// contain any `..` components.
        const NONEXISTENT = 1 << 0;
        /// Do not follow a symlink in the final component.
        const NOFOLLOW = 1 << 1;
        /// Fail with [`ErrorKind::UnsafeTransition`] if resolution crosses
        /// from a directory owned by an unprivileged user into a directory
        /// owned by a different user.
        ///
        /// [`ErrorKind::UnsafeTransition`]: crate::error::ErrorKind::UnsafeTransition
        const SAFE = 1 << 2;
        /// Keep a trailing `/` (or `/.`) of the input path in the result.
        const TRAIL_SLASH = 1 << 3;
        /// Only do a single normalization step (one `..` or one symlink) and
        /// return the partially-normalized path.
        const STEP = 1 << 4;
        /// Fail with [`ErrorKind::AutofsMountPoint`] rather than triggering
        /// an autofs mount.
        ///
        /// [`ErrorKind::AutofsMountPoint`]: crate::error::ErrorKind::AutofsMountPoint
        const NO_AUTOFS = 1 << 5;
        /// Log a warning whenever [`SAFE`] or [`NO_AUTOFS`] trip. Cannot be
        /// used by PID 1.
        ///
        /// [`SAFE`]: Self::SAFE
        /// [`NO_AUTOFS`]: Self::NO_AUTOFS
        const WARN = 1 << 6;
        /// Resolve absolute symlinks (and `..` at the top of the tree)
        /// relative to the starting directory rather than the host root.
        /// [`resolve`] sets this automatically when given a root.
        ///
        /// [`resolve`]: crate::resolve
        const AT_RESOLVE_IN_ROOT = 1 << 7;
        /// Join the root and the path before resolving, rather than requiring
        /// the path to already be inside the root.
        const PREFIX_ROOT = 1 << 8;
    }
}

bitflags! {
    /// Which outputs the caller wants from a resolution.
    #[derive(Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct Want: u8 {
        /// The normalized path.
        const PATH = 1 << 0;
        /// An `O_PATH` [`Handle`] to the resolved inode.
        ///
        /// [`Handle`]: crate::Handle
        const HANDLE = 1 << 1;
    }
}

bitflags! {
    /// Wrapper for the underlying `libc`'s `*_OK` flags, as used by
    /// `access(2)`. An empty set is equivalent to `F_OK`.
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct AccessMode: libc::c_int {
        const R_OK = libc::R_OK;
        const W_OK = libc::W_OK;
        const X_OK = libc::X_OK;
    }
}

impl AccessMode {
    /// Equivalent to `F_OK` (only check for existence).
    pub const F_OK: Self = Self::empty();
}
