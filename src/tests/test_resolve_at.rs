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
    error::ErrorKind,
    flags::{ChaseFlags, Want},
    resolve_at,
    tests::common as tests_common,
    Chaser, AT_FDCWD,
};

use std::{
    fs::{self, File},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use anyhow::Error;
use pretty_assertions::assert_eq;

fn check_handle(handle_root: &Path, expected: &str, chased: &crate::Chased) -> Result<(), Error> {
    if let Some(handle) = &chased.handle {
        let expected: PathBuf = Path::new(expected).components().collect();
        let want = fs::symlink_metadata(handle_root.join(&expected))?;
        let got = handle.metadata()?;
        assert_eq!(
            (got.dev(), got.ino()),
            (want.dev(), want.ino()),
            "handle should refer to {expected:?}"
        );
    }
    Ok(())
}

macro_rules! resolve_at_tests {
    // resolve_at_tests! {
    //     abc("dir", "path", [FLAG, ...]) => Ok(("expected", exists, complete));
    //     xyz("dir", "path", [FLAG, ...]) => Err(ErrorKind::...);
    // }
    ($($test_name:ident ($dir:literal, $path:literal, [$($flag:ident),*]) => $expected:expr);* $(;)?) => {
        paste::paste! {
            $(
                #[test]
                fn [<resolve_at_ $test_name>]() -> Result<(), Error> {
                    let root_dir = tests_common::create_basic_tree()?;
                    let dir = root_dir.path().join($dir);
                    let dirfd = File::open(&dir)?;

                    let flags = ChaseFlags::empty() $(| ChaseFlags::$flag)*;
                    let want = if flags.intersects(ChaseFlags::NONEXISTENT | ChaseFlags::STEP) {
                        Want::PATH
                    } else {
                        Want::PATH | Want::HANDLE
                    };
                    let expected: Result<(&str, bool, bool), ErrorKind> = $expected;

                    let result = resolve_at(&dirfd, $path, flags, want);
                    tests_common::check_err(&result, &expected)?;
                    if let (Ok(chased), Ok((path, exists, complete))) = (&result, &expected) {
                        assert_eq!(
                            chased.path.as_ref().map(|p| p.as_os_str()),
                            Some(Path::new(path).as_os_str()),
                            "chasing {:?} with {:?}", $path, flags,
                        );
                        assert_eq!(chased.exists, *exists, "exists of {:?}", $path);
                        assert_eq!(chased.complete, *complete, "complete of {:?}", $path);
                        assert_eq!(chased.handle.is_some(), want.contains(Want::HANDLE));
                        check_handle(&dir, path, chased)?;
                    }
                    Ok(())
                }
            )*
        }
    };
}

resolve_at_tests! {
    // Plain lookups inside the root.
    in_root_empty(".", "", [AT_RESOLVE_IN_ROOT]) => Ok((".", true, true));
    in_root_slash(".", "/", [AT_RESOLVE_IN_ROOT]) => Ok((".", true, true));
    in_root_dir(".", "a", [AT_RESOLVE_IN_ROOT]) => Ok(("a", true, true));
    in_root_abs_dir(".", "/a", [AT_RESOLVE_IN_ROOT]) => Ok(("a", true, true));
    in_root_file(".", "b/c/file", [AT_RESOLVE_IN_ROOT]) => Ok(("b/c/file", true, true));
    in_root_dots(".", "./b/./c//./file", [AT_RESOLVE_IN_ROOT]) => Ok(("b/c/file", true, true));
    in_root_not_dir(".", "b/c/file/foo", [AT_RESOLVE_IN_ROOT]) => Err(ErrorKind::OsError(Some(libc::ENOTDIR)));
    in_root_missing(".", "a/nonexistent", [AT_RESOLVE_IN_ROOT]) => Err(ErrorKind::NotFound);
    // Symlinks.
    in_root_rel_symlink(".", "b-file", [AT_RESOLVE_IN_ROOT]) => Ok(("b/c/file", true, true));
    in_root_abs_symlink(".", "e", [AT_RESOLVE_IN_ROOT]) => Ok(("b/c/d/e", true, true));
    in_root_abs_symlink_child(".", "e/f", [AT_RESOLVE_IN_ROOT]) => Ok(("b/c/d/e/f", true, true));
    in_root_root_link1(".", "root-link1", [AT_RESOLVE_IN_ROOT]) => Ok((".", true, true));
    in_root_root_link2(".", "root-link2", [AT_RESOLVE_IN_ROOT]) => Ok((".", true, true));
    in_root_root_link3(".", "root-link3", [AT_RESOLVE_IN_ROOT]) => Ok((".", true, true));
    in_root_nonlexical_abs(".", "link3/target_abs", [AT_RESOLVE_IN_ROOT]) => Ok(("target", true, true));
    in_root_nonlexical_rel(".", "link3/target_rel", [AT_RESOLVE_IN_ROOT]) => Ok(("target", true, true));
    in_root_deep_dangling(".", "link3/deep_dangling1", [AT_RESOLVE_IN_ROOT]) => Err(ErrorKind::NotFound);
    in_root_image_localtime("img", "etc/localtime", [AT_RESOLVE_IN_ROOT]) => Ok(("usr/share/zoneinfo/UTC", true, true));
    // ".." never leaves the root.
    in_root_dotdot(".", "..", [AT_RESOLVE_IN_ROOT]) => Ok((".", true, true));
    in_root_dotdot_many(".", "../../../../b/c/file", [AT_RESOLVE_IN_ROOT]) => Ok(("b/c/file", true, true));
    in_root_dotdot_after_dirs(".", "b/c/../../../../target", [AT_RESOLVE_IN_ROOT]) => Ok(("target", true, true));
    in_root_escape_link1(".", "escape-link1", [AT_RESOLVE_IN_ROOT]) => Ok(("target", true, true));
    in_root_escape_link2(".", "escape-link2", [AT_RESOLVE_IN_ROOT]) => Ok(("target", true, true));
    in_root_dotdot_subdir("b", "../../../c/file", [AT_RESOLVE_IN_ROOT]) => Ok(("c/file", true, true));
    // Loops.
    in_root_basic_loop1(".", "loop/basic-loop1", [AT_RESOLVE_IN_ROOT]) => Err(ErrorKind::TooManySymlinks);
    in_root_basic_loop2(".", "loop/basic-loop2", [AT_RESOLVE_IN_ROOT]) => Err(ErrorKind::TooManySymlinks);
    in_root_basic_loop3(".", "loop/basic-loop3", [AT_RESOLVE_IN_ROOT]) => Err(ErrorKind::TooManySymlinks);
    in_root_complex_loop(".", "loop/link", [AT_RESOLVE_IN_ROOT]) => Err(ErrorKind::TooManySymlinks);
    in_root_chain(".", "chain/1", [AT_RESOLVE_IN_ROOT]) => Ok(("chain/target", true, true));
    // NOFOLLOW only applies to the last component.
    nofollow_symlink(".", "b-file", [AT_RESOLVE_IN_ROOT, NOFOLLOW]) => Ok(("b-file", true, true));
    nofollow_loop(".", "loop/basic-loop1", [AT_RESOLVE_IN_ROOT, NOFOLLOW]) => Ok(("loop/basic-loop1", true, true));
    nofollow_intermediate(".", "e/f", [AT_RESOLVE_IN_ROOT, NOFOLLOW]) => Ok(("b/c/d/e/f", true, true));
    nofollow_plain(".", "b/c/file", [AT_RESOLVE_IN_ROOT, NOFOLLOW]) => Ok(("b/c/file", true, true));
    nofollow_trailing_slash(".", "b-file/", [AT_RESOLVE_IN_ROOT, NOFOLLOW]) => Ok(("b-file", true, true));
    nofollow_trailing_dot(".", "b-file/.", [AT_RESOLVE_IN_ROOT, NOFOLLOW]) => Ok(("b-file", true, true));
    nofollow_trailing_slashes(".", "b-file//./", [AT_RESOLVE_IN_ROOT, NOFOLLOW]) => Ok(("b-file", true, true));
    // NONEXISTENT tolerates a missing suffix without "..".
    nonexistent_exists(".", "b/c/file", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("b/c/file", true, true));
    nonexistent_last(".", "a/missing", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("a/missing", false, true));
    nonexistent_deep(".", "a/missing/deeper/file", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("a/missing/deeper/file", false, true));
    nonexistent_trailing_slash(".", "a/missing/", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("a/missing", false, true));
    nonexistent_trailing_dot(".", "a/missing/.", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("a/missing", false, true));
    nonexistent_double_slash(".", "a/missing//x", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("a/missing/x", false, true));
    nonexistent_inner_dot(".", "a/missing/./x/", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("a/missing/x", false, true));
    nonexistent_dangling(".", "a-fake1", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("a/fake", false, true));
    nonexistent_deep_dangling1(".", "link3/deep_dangling1", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("target/nonexist", false, true));
    nonexistent_deep_dangling2(".", "link3/deep_dangling2", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Ok(("target/nonexist", false, true));
    nonexistent_dotdot(".", "a/missing/../x", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Err(ErrorKind::NotFound);
    nonexistent_dangling_dotdot1(".", "a-fake2", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Err(ErrorKind::NotFound);
    nonexistent_dangling_dotdot2(".", "a-fake3", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Err(ErrorKind::NotFound);
    nonexistent_not_dir(".", "b/c/file/foo", [AT_RESOLVE_IN_ROOT, NONEXISTENT]) => Err(ErrorKind::OsError(Some(libc::ENOTDIR)));
    // TRAIL_SLASH.
    trail_slash_dir(".", "a/", [AT_RESOLVE_IN_ROOT, TRAIL_SLASH]) => Ok(("a/", true, true));
    trail_slash_dot(".", "a/.", [AT_RESOLVE_IN_ROOT, TRAIL_SLASH]) => Ok(("a/", true, true));
    trail_slash_symlink(".", "e/", [AT_RESOLVE_IN_ROOT, TRAIL_SLASH]) => Ok(("b/c/d/e/", true, true));
    trail_slash_none(".", "a", [AT_RESOLVE_IN_ROOT, TRAIL_SLASH]) => Ok(("a", true, true));
    trail_slash_ignored(".", "a/", [AT_RESOLVE_IN_ROOT]) => Ok(("a", true, true));
    trail_slash_nonexistent(".", "a/missing/", [AT_RESOLVE_IN_ROOT, NONEXISTENT, TRAIL_SLASH]) => Ok(("a/missing/", false, true));
    trail_slash_nonexistent_deep(".", "a/missing//x/.", [AT_RESOLVE_IN_ROOT, NONEXISTENT, TRAIL_SLASH]) => Ok(("a/missing/x/", false, true));
    // STEP stops after the first symlink or "..".
    step_plain(".", "b/c/file", [AT_RESOLVE_IN_ROOT, STEP]) => Ok(("b/c/file", true, true));
    step_rel_symlink(".", "b-file", [AT_RESOLVE_IN_ROOT, STEP]) => Ok(("b/c/file", true, false));
    step_abs_symlink(".", "e/f", [AT_RESOLVE_IN_ROOT, STEP]) => Ok(("b/c/d/e/f", true, false));
    step_nested_symlink(".", "link3/target_rel", [AT_RESOLVE_IN_ROOT, STEP]) => Ok(("link3/../link2/link1_rel/target_rel", true, false));
    step_dotdot(".", "b/../a", [AT_RESOLVE_IN_ROOT, STEP]) => Ok(("a", true, false));
    step_clamped_dotdot(".", "../a", [AT_RESOLVE_IN_ROOT, STEP]) => Ok(("a", true, true));
    // Without a root, ".." can go above the starting directory and absolute
    // symlinks go to the host root.
    host_rel_symlink(".", "b-file", []) => Ok(("b/c/file", true, true));
    host_dotdot("a", "..", []) => Ok(("..", true, true));
    host_dotdot_symlink("a", "../b-file", []) => Ok(("../b/c/file", true, true));
    host_root_link1(".", "root-link1", []) => Ok(("/", true, true));
    host_root_link2(".", "root-link2", []) => Ok(("/", true, true));
    host_root_link3(".", "root-link3", []) => Ok(("/", true, true));
    // There are no autofs mounts in a temporary directory.
    no_autofs(".", "link3/target_abs", [AT_RESOLVE_IN_ROOT, NO_AUTOFS]) => Ok(("target", true, true));
    // Everything in the tree has the same owner.
    safe_same_owner(".", "safe/a/link/f", [AT_RESOLVE_IN_ROOT, SAFE]) => Ok(("safe/b/f", true, true));
    // PREFIX_ROOT needs a root to prefix.
    prefix_root_without_root(".", "a", [PREFIX_ROOT]) => Err(ErrorKind::InvalidArgument);
}

#[test]
fn resolve_at_invalid_want() -> Result<(), Error> {
    let root_dir = tests_common::create_basic_tree()?;
    let dirfd = File::open(root_dir.path())?;

    for flags in [ChaseFlags::NONEXISTENT, ChaseFlags::STEP] {
        let result = resolve_at(&dirfd, "a", flags, Want::HANDLE);
        tests_common::check_err(&result, &Err::<(), _>(ErrorKind::InvalidArgument))?;
        let result = resolve_at(&dirfd, "a", flags, Want::PATH | Want::HANDLE);
        tests_common::check_err(&result, &Err::<(), _>(ErrorKind::InvalidArgument))?;
    }
    Ok(())
}

#[test]
fn resolve_at_handle_only() -> Result<(), Error> {
    let root_dir = tests_common::create_basic_tree()?;
    let dirfd = File::open(root_dir.path())?;

    let chased = resolve_at(&dirfd, "b-file", ChaseFlags::empty(), Want::HANDLE)?;
    assert_eq!(chased.path, None, "no path was asked for");
    check_handle(root_dir.path(), "b/c/file", &chased)?;

    let chased = resolve_at(&dirfd, "b-file", ChaseFlags::NOFOLLOW, Want::HANDLE)?;
    let handle = chased.handle.expect("HANDLE was requested");
    assert!(
        handle.metadata()?.is_symlink(),
        "NOFOLLOW handle should be the symlink itself"
    );
    Ok(())
}

#[test]
fn resolve_at_symlink_budget() -> Result<(), Error> {
    let root_dir = tests_common::create_basic_tree()?;
    let dirfd = File::open(root_dir.path())?;
    let chaser = Chaser::new(ChaseFlags::AT_RESOLVE_IN_ROOT);

    // "chain/1" needs five symlink expansions.
    let chased = chaser
        .with_max_symlinks(6)
        .resolve_at(&dirfd, "chain/1", Want::PATH)?;
    assert_eq!(chased.path, Some(PathBuf::from("chain/target")));

    let result = chaser
        .with_max_symlinks(5)
        .resolve_at(&dirfd, "chain/1", Want::PATH);
    tests_common::check_err(&result, &Err::<(), _>(ErrorKind::TooManySymlinks))?;

    let result = chaser
        .with_max_symlinks(0)
        .resolve_at(&dirfd, "a", Want::PATH);
    tests_common::check_err(&result, &Err::<(), _>(ErrorKind::InvalidArgument))?;
    Ok(())
}

#[test]
fn resolve_at_step_until_complete() -> Result<(), Error> {
    let root_dir = tests_common::create_basic_tree()?;
    let dirfd = File::open(root_dir.path())?;
    let chaser = Chaser::new(ChaseFlags::AT_RESOLVE_IN_ROOT | ChaseFlags::STEP);

    let mut path = PathBuf::from("link3/target_abs");
    let mut steps = 0;
    loop {
        let chased = chaser.resolve_at(&dirfd, &path, Want::PATH)?;
        path = chased.path.expect("PATH was requested");
        if chased.complete {
            break;
        }
        steps += 1;
        assert!(steps < 10, "stepping {path:?} did not converge");
    }
    assert_eq!(path, PathBuf::from("target"));
    assert_eq!(steps, 5, "one step per symlink and per \"..\"");
    Ok(())
}

#[test]
fn resolve_at_cwd_relative() -> Result<(), Error> {
    // Tests are run from the crate root.
    let chased = resolve_at(AT_FDCWD, "src/../src/lib.rs", ChaseFlags::empty(), Want::PATH)?;
    assert_eq!(chased.path, Some(PathBuf::from("src/lib.rs")));

    let chased = resolve_at(AT_FDCWD, ".", ChaseFlags::empty(), Want::PATH)?;
    assert_eq!(chased.path, Some(PathBuf::from(".")));

    let chased = resolve_at(AT_FDCWD, "src/..", ChaseFlags::empty(), Want::PATH)?;
    assert_eq!(chased.path, Some(PathBuf::from(".")));

    let chased = resolve_at(AT_FDCWD, "..", ChaseFlags::empty(), Want::PATH)?;
    assert_eq!(chased.path, Some(PathBuf::from("..")));
    Ok(())
}

#[test]
fn resolve_at_cwd_absolute() -> Result<(), Error> {
    let root_dir = tests_common::create_basic_tree()?;
    let root = root_dir.path().canonicalize()?;

    let chased = resolve_at(
        AT_FDCWD,
        root.join("b-file"),
        ChaseFlags::empty(),
        Want::PATH | Want::HANDLE,
    )?;
    assert_eq!(chased.path, Some(root.join("b/c/file")));
    check_handle(&root, "b/c/file", &chased)?;

    // An already-resolved absolute path comes back unchanged.
    let resolved = root.join("b/c/d/e/f");
    let chased = resolve_at(AT_FDCWD, &resolved, ChaseFlags::empty(), Want::PATH)?;
    assert_eq!(chased.path, Some(resolved));

    let chased = resolve_at(
        AT_FDCWD,
        root.join("root-link2/../.."),
        ChaseFlags::empty(),
        Want::PATH,
    )?;
    assert_eq!(chased.path, Some(PathBuf::from("/")));

    let chased = resolve_at(
        AT_FDCWD,
        root.join("a/missing"),
        ChaseFlags::NONEXISTENT,
        Want::PATH,
    )?;
    assert_eq!(chased.path, Some(root.join("a/missing")));
    assert!(!chased.exists, "a/missing does not exist");
    Ok(())
}
