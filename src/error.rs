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

//! Error types for pathchase.

use crate::syscalls::Error as SyscallError;

use std::{borrow::Cow, collections::TryReserveError, io::Error as IOError, path::PathBuf};

/// Opaque error type for pathchase.
///
/// If you wish to do non-trivial error handling with pathchase errors, use
/// [`Error::kind`] to get an [`ErrorKind`] you can handle programmatically.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] Box<ErrorImpl>);

impl<E: Into<ErrorImpl>> From<E> for Error {
    #[doc(hidden)]
    fn from(err: E) -> Self {
        Self(Box::new(err.into()))
    }
}

impl Error {
    /// Get the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// Shorthand for [`ErrorKind::errno`] on [`Error::kind`].
    pub fn errno(&self) -> Option<i32> {
        self.kind().errno()
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ErrorImpl {
    #[error("invalid {name} argument: {description}")]
    InvalidArgument {
        name: Cow<'static, str>,
        description: Cow<'static, str>,
    },

    #[error("out of memory while growing {what}")]
    OutOfMemory {
        what: Cow<'static, str>,
        source: TryReserveError,
    },

    #[error("too many levels of symbolic links while resolving {path:?}")]
    TooManySymlinks { path: PathBuf },

    #[error("unsafe path transition {from:?} (owned by {from_owner}) -> {to:?} (owned by {to_owner}) while resolving {path:?}")]
    UnsafeTransition {
        from: PathBuf,
        from_owner: String,
        to: PathBuf,
        to_owner: String,
        path: PathBuf,
    },

    #[error("autofs mount point {mountpoint:?} encountered while resolving {path:?}")]
    AutofsMountPoint { mountpoint: PathBuf, path: PathBuf },

    #[error("path {path:?} is outside of root directory {root:?}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("violation of safety requirement: {description}")]
    SafetyViolation { description: Cow<'static, str> },

    #[error("internal error: {description}")]
    InternalError { description: Cow<'static, str> },

    #[error("{operation} failed")]
    OsError {
        operation: Cow<'static, str>,
        source: IOError,
    },

    #[error("{operation} failed")]
    RawOsError {
        operation: Cow<'static, str>,
        source: SyscallError,
    },

    #[error("{context}")]
    Wrapped {
        context: Cow<'static, str>,
        source: Box<ErrorImpl>,
    },
}

/// Underlying error class for pathchase errors.
///
/// This is similar in concept to [`std::io::ErrorKind`]. Every kind other than
/// [`ErrorKind::InternalError`] has a C errno equivalent, available through
/// [`ErrorKind::errno`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The provided arguments were invalid (conflicting flags, an empty path,
    /// a malformed path component, an empty symlink target, ...).
    InvalidArgument,
    /// Memory could not be allocated while building the resolved path.
    OutOfMemory,
    /// The symlink budget was exhausted. This usually means there is a symlink
    /// loop.
    TooManySymlinks,
    /// A required path component does not exist.
    NotFound,
    /// [`ChaseFlags::SAFE`] was set and resolution crossed from a directory
    /// owned by one unprivileged user into one owned by another.
    ///
    /// [`ChaseFlags::SAFE`]: crate::flags::ChaseFlags::SAFE
    UnsafeTransition,
    /// [`ChaseFlags::NO_AUTOFS`] was set and resolution hit an autofs
    /// mountpoint.
    ///
    /// [`ChaseFlags::NO_AUTOFS`]: crate::flags::ChaseFlags::NO_AUTOFS
    AutofsMountPoint,
    /// The path is not inside the requested root directory.
    OutsideRoot,
    /// pathchase encountered a state where the safety of the operation could
    /// not be guaranteed (such as `/proc` not being a real procfs).
    SafetyViolation,
    /// Some internal error occurred. For more information, see the string
    /// description of the original [`Error`].
    InternalError,
    /// The underlying error came from a system call. The provided value is the
    /// numerical value of the `errno` number, if available.
    OsError(Option<i32>),
}

impl ErrorImpl {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::TooManySymlinks { .. } => ErrorKind::TooManySymlinks,
            Self::UnsafeTransition { .. } => ErrorKind::UnsafeTransition,
            Self::AutofsMountPoint { .. } => ErrorKind::AutofsMountPoint,
            Self::OutsideRoot { .. } => ErrorKind::OutsideRoot,
            Self::SafetyViolation { .. } => ErrorKind::SafetyViolation,
            Self::InternalError { .. } => ErrorKind::InternalError,
            Self::OsError { source, .. } => ErrorKind::from_errno(source.raw_os_error()),
            Self::RawOsError { source, .. } => {
                ErrorKind::from_errno(source.root_cause().raw_os_error())
            }
            Self::Wrapped { source, .. } => source.kind(),
        }
    }
}

impl ErrorKind {
    // Missing files get their own kind, since callers handle them very
    // differently from other syscall failures.
    fn from_errno(errno: Option<i32>) -> Self {
        match errno {
            Some(libc::ENOENT) => Self::NotFound,
            Some(libc::ELOOP) => Self::TooManySymlinks,
            errno => Self::OsError(errno),
        }
    }

    /// Return a C-like errno for the [`ErrorKind`].
    ///
    /// Aside from fetching the errno represented by standard
    /// [`ErrorKind::OsError`] errors, pure-Rust errors are also mapped to C
    /// errno values where appropriate.
    pub fn errno(&self) -> Option<i32> {
        match self {
            ErrorKind::InvalidArgument => Some(libc::EINVAL),
            ErrorKind::OutOfMemory => Some(libc::ENOMEM),
            ErrorKind::TooManySymlinks => Some(libc::ELOOP),
            ErrorKind::NotFound => Some(libc::ENOENT),
            ErrorKind::UnsafeTransition => Some(libc::ENOLINK),
            ErrorKind::AutofsMountPoint => Some(libc::EREMOTE),
            ErrorKind::OutsideRoot => Some(libc::ECHRNG),
            ErrorKind::SafetyViolation => Some(libc::EXDEV),
            ErrorKind::OsError(errno) => *errno,
            ErrorKind::InternalError => None,
        }
    }
}

// Private trait necessary to work around the "orphan trait" restriction.
pub(crate) trait ErrorExt: Sized {
    /// Wrap a `Result<..., Error>` with an additional context string.
    fn wrap<S: Into<String>>(self, context: S) -> Self {
        self.with_wrap(|| context.into())
    }

    /// Wrap a `Result<..., Error>` with an additional context string created by
    /// a closure.
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String;
}

impl ErrorExt for ErrorImpl {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        Self::Wrapped {
            context: context_fn().into(),
            source: self.into(),
        }
    }
}

impl ErrorExt for Error {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        Self(Box::new((*self.0).with_wrap(context_fn)))
    }
}

impl<T, E: ErrorExt> ErrorExt for Result<T, E> {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| err.with_wrap(context_fn))
    }
}
