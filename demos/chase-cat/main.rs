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

/*
 * File: demos/chase-cat/main.rs
 *
 * Chase a path inside a root directory (the way a chroot would see it) and
 * print the contents of whatever it ends up at.
 */

use pathchase::{ChaseFlags, Want};

use std::{
    io::{prelude::*, BufReader},
    path::Path,
};

use anyhow::{Context, Error};
use clap::{Arg, ArgAction, Command};

fn main() -> Result<(), Error> {
    let m = Command::new("chase-cat")
        // MSRV(1.67): Use clap::crate_authors!.
        .author("Aleksa Sarai <cyphar@cyphar.com>")
        .version(clap::crate_version!())
        .arg(Arg::new("root").value_name("ROOT").required(true))
        .arg(Arg::new("path").value_name("PATH").required(true))
        .arg(
            Arg::new("safe")
                .long("safe")
                .action(ArgAction::SetTrue)
                .help("refuse to follow paths across unsafe ownership changes"),
        )
        .arg(
            Arg::new("no-autofs")
                .long("no-autofs")
                .action(ArgAction::SetTrue)
                .help("refuse to trigger autofs mounts"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("print the resolved path to stderr"),
        )
        .about("print a file as seen from inside ROOT")
        .get_matches();

    let root = m
        .get_one::<String>("root")
        .context("required root argument not provided")?;
    let path = m
        .get_one::<String>("path")
        .context("required path argument not provided")?;

    // No log backend is installed here, so WARN would go nowhere. The
    // returned error already names the offending inodes.
    let mut flags = ChaseFlags::PREFIX_ROOT;
    if m.get_flag("safe") {
        flags |= ChaseFlags::SAFE;
    }
    if m.get_flag("no-autofs") {
        flags |= ChaseFlags::NO_AUTOFS;
    }

    let (stream, resolved) =
        pathchase::resolve_and_fopen(path, Some(Path::new(root)), flags, "re", Want::PATH)
            .with_context(|| format!("chase {path:?} in root {root:?}"))?;
    if m.get_flag("verbose") {
        if let Some(resolved) = resolved {
            eprintln!("{}", resolved.display());
        }
    }

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        println!("{}", line.context("read lines")?);
    }
    Ok(())
}
