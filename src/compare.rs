/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::io;

use log::debug;

use crate::{handle::FileHandle, sync::SyncOptions};

/// The two independent verdicts on a sync candidate: is its data already
/// right, are its attributes already right. `meta_ok` is never true while
/// `data_ok` is false, a full re-copy refreshes the metadata anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub data_ok: bool,
    pub meta_ok: bool,
}

/// Compare `cand` against `src` under the given options. Undefined if either
/// file does not exist.
///
/// Policy short-circuit: a candidate whose ctime is newer than the source's
/// ctime postdates every change to the source and is taken as current
/// without any further inspection.
///
/// Stripe geometry is not compared, it cannot change on an existing file.
pub fn compare_files(
    src: &mut FileHandle,
    cand: &mut FileHandle,
    opts: &SyncOptions,
) -> io::Result<Comparison> {
    let s = *src.stat()?;
    let c = *cand.stat()?;
    if c.ctime > s.ctime {
        debug!("'{}' ctime newer than source, taken as current", cand);
        return Ok(Comparison {
            data_ok: true,
            meta_ok: true,
        });
    }

    let mut data_ok = true;
    if s.size != c.size {
        debug!("'{}' size mismatch", cand);
        data_ok = false;
    } else if opts.synctimes && s.mtime != c.mtime {
        debug!("'{}' mtime mismatch", cand);
        data_ok = false;
    } else if s.mtime > c.mtime {
        debug!("'{}' older than source", cand);
        data_ok = false;
    } else if opts.pre_checksums && src.md5()? != cand.md5()? {
        debug!("'{}' checksum mismatch", cand);
        data_ok = false;
    }

    let mut meta_ok = data_ok;
    if data_ok {
        if opts.syncowner && s.uid != c.uid {
            meta_ok = false;
        }
        if opts.syncgroup && s.gid != c.gid {
            meta_ok = false;
        }
        if opts.syncperms && s.mode != c.mode {
            meta_ok = false;
        }
        if opts.synctimes && s.atime != c.atime {
            meta_ok = false;
        }
    }
    Ok(Comparison { data_ok, meta_ok })
}
