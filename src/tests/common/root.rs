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

use std::{fs, os::unix::fs as unixfs, path::Path};

use anyhow::{Context, Error};
use rustix::fs::{self as rustix_fs, OFlags};
use tempfile::TempDir;

macro_rules! create_inode {
    (@do $path:expr, chmod $mode:expr) => {
        // fchmodat(AT_SYMLINK_NOFOLLOW) is EOPNOTSUPP, so this follows.
        rustix_fs::chmodat(rustix_fs::CWD, $path, $mode.into(), rustix_fs::AtFlags::empty())
            .with_context(|| format!("chmod 0o{:o} {}", $mode, $path.display()))?;
    };

    (@do $path:expr, chown $uid:literal : $gid:literal) => {
        rustix_fs::chownat(
            rustix_fs::CWD,
            $path,
            // SAFETY: literal ids, never -1.
            Some(unsafe { ::rustix::process::Uid::from_raw($uid) }),
            Some(unsafe { ::rustix::process::Gid::from_raw($gid) }),
            rustix_fs::AtFlags::SYMLINK_NOFOLLOW,
        )
        .with_context(|| format!("chown {}:{} {}", $uid, $gid, $path.display()))?;
    };

    ($path:expr => dir $(,{$($extra:tt)*})*) => {
        rustix_fs::mkdir($path, 0o755.into())
            .with_context(|| format!("mkdir {}", $path.display()))?;
        $(
            create_inode!(@do $path, $($extra)*);
        )*
    };
    ($path:expr => file $(,{$($extra:tt)*})*) => {
        rustix_fs::open($path, OFlags::CREATE, 0o644.into())
            .with_context(|| format!("mkfile {}", $path.display()))?;
        $(
            create_inode!(@do $path, $($extra)*);
        )*
    };
    ($path:expr => symlink -> $target:expr $(,{$($extra:tt)*})*) => {
        unixfs::symlink($target, $path)
            .with_context(|| format!("symlink {} -> {}", $path.display(), $target))?;
        $(
            create_inode!(@do $path, $($extra)*);
        )*
    };
}

macro_rules! create_tree {
    // Each entry is `"sub/path" => (dir | file | symlink -> "target", {extra}...)`
    // and missing parents are created as plain directories.
    ($($subpath:expr => $(#[$meta:meta])* ($($inner:tt)*));+ $(;)*) => {
        {
            let tree = TempDir::new()?;
            $(
                $(#[$meta])*
                {
                    let base: &Path = tree.path();
                    let path = base.join($subpath.trim_start_matches('/'));
                    let parent = path.parent().unwrap_or(base);
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create parents of {}", path.display()))?;
                    create_inode!(&path => $($inner)*);
                }
            )*
            tree
        }
    }
}

pub(crate) fn create_basic_tree() -> Result<TempDir, Error> {
    Ok(create_tree! {
        // Basic inodes.
        "a" => (dir);
        "b/c/d/e/f" => (dir);
        "b/c/file" => (file);
        "e" => (symlink -> "/b/c/d/e");
        "b-file" => (symlink -> "b/c/file");
        "root-link1" => (symlink -> "/");
        "root-link2" => (symlink -> "/..");
        "root-link3" => (symlink -> "/../../../../..");
        "escape-link1" => (symlink -> "../../../../../../../../../../target");
        "escape-link2" => (symlink -> "/../../../../../../../../../../target");
        // Dangling symlinks.
        "a-fake1" => (symlink -> "a/fake");
        "a-fake2" => (symlink -> "a/fake/foo/bar/..");
        "a-fake3" => (symlink -> "a/fake/../../b");
        // Non-lexical symlinks.
        "target" => (dir);
        "link1/target_abs" => (symlink -> "/target");
        "link1/target_rel" => (symlink -> "../target");
        "link2/link1_abs" => (symlink -> "/link1");
        "link2/link1_rel" => (symlink -> "../link1");
        "link3/target_abs" => (symlink -> "/link2/link1_rel/target_rel");
        "link3/target_rel" => (symlink -> "../link2/link1_rel/target_rel");
        "link3/deep_dangling1" => (symlink -> "../link2/link1_rel/target_rel/nonexist");
        "link3/deep_dangling2" => (symlink -> "../link2/link1_abs/target_abs/nonexist");
        // Symlink loops.
        "loop/basic-loop1" => (symlink -> "basic-loop1");
        "loop/basic-loop2" => (symlink -> "/loop/basic-loop2");
        "loop/basic-loop3" => (symlink -> "../loop/basic-loop3");
        "loop/a/link" => (symlink -> "../b/link");
        "loop/b/link" => (symlink -> "/loop/c/link");
        "loop/c/link" => (symlink -> "/loop/d/link");
        "loop/d" => (symlink -> "e");
        "loop/e/link" => (symlink -> "../a/link");
        "loop/link" => (symlink -> "a/link");
        // A chain of five symlinks.
        "chain/1" => (symlink -> "2");
        "chain/2" => (symlink -> "3");
        "chain/3" => (symlink -> "/chain/4");
        "chain/4" => (symlink -> "../chain/5");
        "chain/5" => (symlink -> "target");
        "chain/target" => (file);
        // An OS image with an absolute symlink that must stay inside it.
        "img/etc/localtime" => (symlink -> "/usr/share/zoneinfo/UTC");
        "img/usr/share/zoneinfo/UTC" => (file);
        // A symlink between two directories with the same owner.
        "safe/a/link" => (symlink -> "/safe/b");
        "safe/b/f" => (file);
        // A directory owned by an unprivileged user, with inodes owned by
        // both that user and root.
        "tmpfs-other" => #[cfg(feature = "_test_as_root")] (dir, {chown 12345:12345}, {chmod 0o1777});
        "tmpfs-other/root-file" => #[cfg(feature = "_test_as_root")] (file);
        "tmpfs-other/owned-file" => #[cfg(feature = "_test_as_root")] (file, {chown 12345:12345});
        "tmpfs-other/link-owned" => #[cfg(feature = "_test_as_root")] (symlink -> "owned-file", {chown 12345:12345});
        "tmpfs-other/link-abs" => #[cfg(feature = "_test_as_root")] (symlink -> "/b", {chown 12345:12345});
    })
}
