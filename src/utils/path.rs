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
    error::{Error, ErrorImpl},
    syscalls,
};

use std::{
    ffi::{OsStr, OsString},
    os::unix::ffi::{OsStrExt, OsStringExt},
    path::{Component, Path, PathBuf},
};

/// Maximum length of a single path component.
pub(crate) const NAME_MAX: usize = 255;

/// Maximum length of a whole path accepted by [`path_is_safe`].
const PATH_MAX: usize = 4096;

/// Skip any run of `/` separators and `.` components at the start of `path`.
/// The returned slice is either empty or starts with a real component.
fn skip_slash_or_dot(mut path: &[u8]) -> &[u8] {
    loop {
        match path {
            [b'/', rest @ ..] => path = rest,
            [b'.'] => path = &[],
            [b'.', b'/', rest @ ..] => path = rest,
            _ => return path,
        }
    }
}

/// Split the first real component off `path`, returning the component and the
/// unconsumed remainder (which, if non-empty, starts with a `/`).
fn split_component(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let path = skip_slash_or_dot(path);
    if path.is_empty() {
        return None;
    }
    let end = memchr::memchr(b'/', path).unwrap_or(path.len());
    Some(path.split_at(end))
}

fn check_component(component: &[u8]) -> Result<(), Error> {
    if component.len() > NAME_MAX {
        Err(ErrorImpl::InvalidArgument {
            name: "path".into(),
            description: format!(
                "path component {:?} is longer than NAME_MAX ({NAME_MAX} bytes)",
                OsStr::from_bytes(component)
            )
            .into(),
        })?
    }
    if memchr::memchr(b'\0', component).is_some() {
        Err(ErrorImpl::InvalidArgument {
            name: "path".into(),
            description: "path component contains a nul byte".into(),
        })?
    }
    Ok(())
}

fn try_reserve(buf: &mut Vec<u8>, additional: usize, what: &'static str) -> Result<(), Error> {
    buf.try_reserve(additional).map_err(|err| {
        ErrorImpl::OutOfMemory {
            what: what.into(),
            source: err,
        }
        .into()
    })
}

/// The part of a path that has not been resolved yet.
///
/// Components are consumed from the front. When a symlink is expanded the
/// whole buffer is replaced by the link target followed by whatever was still
/// left to do.
#[derive(Debug)]
pub(crate) struct Todo {
    buf: Vec<u8>,
    pos: usize,
}

impl Todo {
    pub(crate) fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().as_os_str().as_bytes();
        let mut buf = Vec::new();
        try_reserve(&mut buf, path.len(), "unresolved path")?;
        buf.extend_from_slice(path);
        Ok(Self { buf, pos: 0 })
    }

    /// Consume and return the next component. `..` is returned like any
    /// other component. The separators and `.` components that follow it are
    /// consumed too, so afterwards [`Todo::remaining`] either starts with a
    /// real component or is empty.
    pub(crate) fn next_component(&mut self) -> Result<Option<OsString>, Error> {
        let (component, rest) = match split_component(&self.buf[self.pos..]) {
            Some(split) => split,
            None => {
                self.pos = self.buf.len();
                return Ok(None);
            }
        };
        check_component(component)?;

        let new_pos = self.buf.len() - skip_slash_or_dot(rest).len();
        let component = OsStr::from_bytes(component).to_os_string();
        self.pos = new_pos;
        Ok(Some(component))
    }

    /// Everything that has not been consumed yet.
    pub(crate) fn remaining(&self) -> &Path {
        Path::new(OsStr::from_bytes(skip_slash_or_dot(&self.buf[self.pos..])))
    }

    /// Whether there are no components left. A trailing `/` or `/.` after the
    /// last component does not count.
    pub(crate) fn is_empty(&self) -> bool {
        self.remaining().as_os_str().is_empty()
    }

    /// Replace the buffer with `target` followed by the unconsumed suffix.
    pub(crate) fn expand<P: AsRef<Path>>(&mut self, target: P) -> Result<(), Error> {
        let target = target.as_ref().as_os_str().as_bytes();
        let remaining = &self.buf[self.pos..];

        let mut buf = Vec::new();
        try_reserve(&mut buf, target.len() + remaining.len() + 1, "unresolved path")?;
        buf.extend_from_slice(target);
        path_extend(&mut buf, remaining)?;

        self.buf = buf;
        self.pos = 0;
        Ok(())
    }
}

/// Append `part` to `buf`, inserting a single `/` between them unless `buf`
/// is empty or one of the two sides already has a separator there. An empty
/// `part` is a no-op.
pub(crate) fn path_extend(buf: &mut Vec<u8>, part: &[u8]) -> Result<(), Error> {
    if part.is_empty() {
        return Ok(());
    }
    let need_slash = matches!(buf.last(), Some(c) if *c != b'/') && part[0] != b'/';

    try_reserve(buf, part.len() + need_slash as usize, "resolved path")?;
    if need_slash {
        buf.push(b'/');
    }
    buf.extend_from_slice(part);
    Ok(())
}

/// Move a resolved path one level up.
///
/// `a/b` becomes `a`, `/a` becomes `/` and a single relative component becomes
/// the empty path. If there is nothing left to strip (the path is empty, the
/// root or already ends in `..`) a literal `..` is appended instead.
pub(crate) fn path_pop_component(buf: &mut Vec<u8>) -> Result<(), Error> {
    let trimmed_len = buf.iter().rposition(|c| *c != b'/').map_or(0, |idx| idx + 1);
    let trimmed = &buf[..trimmed_len];

    let last = match memchr::memrchr(b'/', trimmed) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    if trimmed.is_empty() || last == b".." {
        return path_extend(buf, b"..");
    }

    let new_len = match memchr::memrchr(b'/', trimmed) {
        // "a" -> ""
        None => 0,
        Some(idx) => match trimmed[..idx].iter().rposition(|c| *c != b'/') {
            // "a/b" -> "a"
            Some(end) => end + 1,
            // "/a" -> "/"
            None => 1,
        },
    };
    buf.truncate(new_len);
    Ok(())
}

/// Is the path either empty or (some spelling of) `/`?
pub(crate) fn path_is_empty_or_root(path: &[u8]) -> bool {
    path.iter().all(|c| *c == b'/')
}

/// Whether a not-yet-resolved suffix may be appended verbatim to a resolved
/// path. It must be a valid path and must not contain any `..` components.
pub(crate) fn path_is_safe(path: &Path) -> bool {
    let path = path.as_os_str().as_bytes();
    if path.is_empty() || path.len() >= PATH_MAX || memchr::memchr(b'\0', path).is_some() {
        return false;
    }
    path.split(|c| *c == b'/')
        .filter(|part| !part.is_empty())
        .all(|part| part.len() <= NAME_MAX && part != b"..")
}

/// Component-aware prefix check.
///
/// Returns the part of `path` after `prefix`, starting at the next real
/// component (so any trailing `/` of `path` is kept). Repeated separators and
/// `.` components are ignored on both sides. Both paths must agree on being
/// absolute.
pub(crate) fn path_startswith<'a>(path: &'a Path, prefix: &Path) -> Option<&'a Path> {
    let mut path = path.as_os_str().as_bytes();
    let mut prefix = prefix.as_os_str().as_bytes();
    if (path.first() == Some(&b'/')) != (prefix.first() == Some(&b'/')) {
        return None;
    }
    loop {
        let want = match split_component(prefix) {
            None => return Some(Path::new(OsStr::from_bytes(skip_slash_or_dot(path)))),
            Some((want, rest)) => {
                prefix = rest;
                want
            }
        };
        match split_component(path) {
            Some((got, rest)) if got == want => path = rest,
            _ => return None,
        }
    }
}

/// Compute the relative path that leads from the directory `from` to `to`.
/// Both paths must be absolute. A trailing `/` on `to` is kept.
pub(crate) fn path_make_relative(from: &Path, to: &Path) -> PathBuf {
    let mut from_iter = from.components();
    let mut to_iter = to.components();
    loop {
        match (from_iter.clone().next(), to_iter.clone().next()) {
            (Some(a), Some(b)) if a == b => {
                from_iter.next();
                to_iter.next();
            }
            _ => break,
        }
    }

    let mut relative = PathBuf::new();
    from_iter.for_each(|_| relative.push(".."));
    to_iter.for_each(|c| relative.push(c));
    if relative.as_os_str().is_empty() {
        return PathBuf::from(".");
    }
    if to.as_os_str().as_bytes().ends_with(b"/") {
        let mut relative = relative.into_os_string().into_vec();
        relative.push(b'/');
        return OsString::from_vec(relative).into();
    }
    relative
}

/// Make `path` absolute against the current working directory (without
/// resolving anything).
pub(crate) fn path_make_absolute_cwd<P: AsRef<Path>>(path: P) -> Result<PathBuf, Error> {
    let path = path.as_ref();
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = syscalls::getcwd().map_err(|err| ErrorImpl::RawOsError {
        operation: "get current directory".into(),
        source: err,
    })?;
    Ok(cwd.join(path))
}

/// Drop duplicate separators, `.` components and any trailing `/`. No
/// symlinks or `..` components are resolved.
pub(crate) fn path_simplify<P: AsRef<Path>>(path: P) -> PathBuf {
    path.as_ref()
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
