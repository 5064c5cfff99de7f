/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info};
use siphasher::sip128::SipHasher13;
use thiserror::Error;

use crate::{
    command::{CommandWrapper, RunCommandError},
    compare::compare_files,
    config::ToolConfig,
    handle::{FileHandle, StatInfo},
    layout::{LayoutBackend, LayoutError},
    stripe::StripeLayout,
};

/// Block size handed to the block copy tool for oversized files.
const BLOCK_COPY_BS: u64 = 4 * 1024 * 1024;

/// Lines of block-copy stderr tolerated as progress noise (records in/out).
/// Heuristic, the tool has no quiet mode that drops them.
const BLOCK_COPY_NOISE_LINES: usize = 2;

/// Knobs for one sync call. `tmpbase` is required and must be absolute;
/// everything else defaults to the least invasive behavior with post-copy
/// verification on.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Directory the tmp-pool tree is created under.
    pub tmpbase: PathBuf,
    /// Preserve the tmp-pool hardlink after a successful sync so later
    /// hardlinks of the same source reuse the copy.
    pub keeptmp: bool,
    pub synctimes: bool,
    pub syncperms: bool,
    pub syncowner: bool,
    pub syncgroup: bool,
    /// Force checksum comparison even when size and mtime agree.
    pub pre_checksums: bool,
    /// Verify source and target checksums after a data copy.
    pub post_checksums: bool,
}

impl SyncOptions {
    pub fn new<P: Into<PathBuf>>(tmpbase: P) -> Self {
        Self {
            tmpbase: tmpbase.into(),
            keeptmp: false,
            synctimes: false,
            syncperms: false,
            syncowner: false,
            syncgroup: false,
            pre_checksums: false,
            post_checksums: true,
        }
    }
}

/// What a sync call actually did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncAction {
    pub data_copy: bool,
    pub meta_update: bool,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("tmpbase must be an absolute path")]
    TmpBase,
    #[error("cannot resolve file id for '{path}': {source}")]
    Source {
        path: PathBuf,
        source: LayoutError,
    },
    #[error("cannot inspect '{path}': {source}")]
    Inspect { path: PathBuf, source: io::Error },
    #[error("unable to create tmpdir '{path}': {source}")]
    TmpDir { path: PathBuf, source: io::Error },
    #[error("setstripe failed for '{path}': {source}")]
    Layout {
        path: PathBuf,
        source: LayoutError,
    },
    #[error("sync of '{src}' -> '{dst}' failed: {source}")]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        source: RunCommandError,
    },
    #[error("errors during sync of '{src}' -> '{dst}': {stderr}")]
    CopyOutput {
        src: PathBuf,
        dst: PathBuf,
        stderr: String,
    },
    #[error("hardlink '{src}' -> '{dst}' failed: {source}")]
    Link {
        src: PathBuf,
        dst: PathBuf,
        source: io::Error,
    },
    #[error("unable to delete '{path}': {source}")]
    Unlink { path: PathBuf, source: io::Error },
    #[error(
        "checksum mismatch between '{src}' and '{dst}': {src_md5} != {dst_md5}"
    )]
    ChecksumMismatch {
        src: PathBuf,
        dst: PathBuf,
        src_md5: String,
        dst_md5: String,
    },
}

/// Stripe-aware sync of single files and directory inodes.
///
/// Data lands in a tmp-pool entry keyed by the source file id and the target
/// is hardlinked to it, so all hardlinks of one source share at most one
/// physical copy on the target filesystem. Pre-existing tmp and target files
/// in any state of divergence are inspected and reconciled with the minimum
/// work: never transfer data that is already there, prefer hardlinks to
/// copies, unify tmp and target under one inode.
pub struct SyncEngine<'a> {
    config: &'a ToolConfig,
    backend: &'a dyn LayoutBackend,
}

impl<'a> SyncEngine<'a> {
    pub fn new(config: &'a ToolConfig, backend: &'a dyn LayoutBackend) -> Self {
        Self { config, backend }
    }

    /// Tmp-pool entry for a source id: a 5-hex fan-out directory under
    /// `tmpbase`, then the id verbatim as leaf name. Every hardlink of the
    /// source resolves to the same entry.
    pub fn tmp_path(&self, tmpbase: &Path, src_id: &str) -> PathBuf {
        let hash = SipHasher13::new().hash(src_id.as_bytes());
        let bytes = hash.as_bytes();
        let fan = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) & 0xf_ffff;
        tmpbase.join(format!("{:05x}", fan)).join(src_id)
    }

    /// Make `tgt` a correct copy of `src`, routing any data transfer through
    /// the tmp pool. Returns the tmp handle (even when the entry was not
    /// kept) and what was done.
    pub fn syncfile(
        &self,
        src: &mut FileHandle,
        tgt: &mut FileHandle,
        opts: &SyncOptions,
    ) -> Result<(FileHandle, SyncAction), SyncError> {
        if !opts.tmpbase.is_absolute() {
            return Err(SyncError::TmpBase);
        }
        let src_id = self.file_id(src)?;
        let tmp_path = self.tmp_path(&opts.tmpbase, &src_id);
        let tmpdir = tmp_path.parent().unwrap_or(&opts.tmpbase).to_path_buf();
        let mut tmp = FileHandle::new(&tmp_path);
        debug!("tmp path '{}'", tmp);

        let mut action = SyncAction::default();
        let mut do_mktmpdir = false;
        let mut do_setlayout: Option<(PathBuf, StripeLayout)> = None;
        let mut do_copy: Option<PathBuf> = None;
        let mut do_hardlink: Option<(PathBuf, PathBuf)> = None;
        let mut do_verify = false;

        let mut tmp_exists = self.exists(&mut tmp)?;
        let (mut tmp_data_ok, mut tmp_meta_ok) = (false, false);
        if tmp_exists {
            debug!("tmp exists, comparing tmp to src");
            let cmp = self.compare(src, &mut tmp, opts)?;
            (tmp_data_ok, tmp_meta_ok) = (cmp.data_ok, cmp.meta_ok);
        }
        let mut tgt_exists = self.exists(tgt)?;
        let (mut tgt_data_ok, mut tgt_meta_ok) = (false, false);
        if tgt_exists {
            debug!("tgt exists, comparing tgt to src");
            let cmp = self.compare(src, tgt, opts)?;
            (tgt_data_ok, tgt_meta_ok) = (cmp.data_ok, cmp.meta_ok);
        }

        if tmp_exists && tgt_exists {
            debug!("tmp and tgt exist");
            if self.file_id(&mut tmp)? == self.file_id(tgt)? {
                debug!("tmp and tgt are same file");
                if tmp_data_ok {
                    if !tmp_meta_ok {
                        debug!("tmp needs metadata update");
                        action.meta_update = true;
                        do_copy = Some(tmp_path.clone());
                    }
                } else {
                    debug!("tmp not ok, unset all");
                    self.unlink(&mut tmp)?;
                    self.unlink(tgt)?;
                    (tmp_exists, tmp_data_ok, tmp_meta_ok) = (false, false, false);
                    (tgt_exists, tgt_data_ok, tgt_meta_ok) = (false, false, false);
                }
            } else {
                debug!("tmp and tgt are different files");
                // keep whichever copy is good, to avoid a data transfer
                if tmp_data_ok {
                    debug!("tmp data ok, unset tgt vars");
                    self.unlink(tgt)?;
                    (tgt_exists, tgt_data_ok, tgt_meta_ok) = (false, false, false);
                } else if tgt_data_ok {
                    debug!("tgt data ok, unset tmp vars");
                    self.unlink(&mut tmp)?;
                    (tmp_exists, tmp_data_ok, tmp_meta_ok) = (false, false, false);
                } else {
                    debug!("neither tmp nor tgt are ok, unset both");
                    self.unlink(&mut tmp)?;
                    self.unlink(tgt)?;
                    (tmp_exists, tmp_data_ok, tmp_meta_ok) = (false, false, false);
                    (tgt_exists, tgt_data_ok, tgt_meta_ok) = (false, false, false);
                }
            }
        }

        if tmp_exists != tgt_exists {
            if tmp_exists {
                debug!("tmp exists, tgt doesnt");
                if tmp_data_ok {
                    debug!("tmp data ok, tgt needs hardlink");
                    do_hardlink = Some((tmp_path.clone(), tgt.path().to_path_buf()));
                    if !tmp_meta_ok {
                        debug!("tmp needs meta update");
                        action.meta_update = true;
                        do_copy = Some(tmp_path.clone());
                    }
                } else {
                    debug!("tmp not ok, unset tmp vars");
                    self.unlink(&mut tmp)?;
                    tmp_exists = false;
                }
            } else {
                debug!("tgt exists, tmp doesnt");
                if tgt_data_ok {
                    debug!("tgt data ok");
                    if opts.keeptmp {
                        debug!("keeptmp=true, tmp needs hardlink");
                        do_mktmpdir = true;
                        do_hardlink = Some((tgt.path().to_path_buf(), tmp_path.clone()));
                    } else {
                        debug!("keeptmp=false, no action needed");
                    }
                    if !tgt_meta_ok {
                        debug!("tgt needs metadata update");
                        action.meta_update = true;
                        do_copy = Some(tgt.path().to_path_buf());
                    }
                } else {
                    debug!("tgt not ok, unset tgt vars");
                    self.unlink(tgt)?;
                    tgt_exists = false;
                }
            }
        }

        if !(tmp_exists || tgt_exists) {
            debug!("neither tmp nor tgt exist");
            action.data_copy = true;
            action.meta_update = true;
            do_verify = true;
            let src_regular = self
                .stat(src)?
                .is_regular();
            let dst = if opts.keeptmp {
                do_mktmpdir = true;
                do_hardlink = Some((tmp_path.clone(), tgt.path().to_path_buf()));
                tmp_path.clone()
            } else {
                debug!("keeptmp is false, skipping tmpfile creation");
                tgt.path().to_path_buf()
            };
            if src_regular {
                let path = src.path().to_path_buf();
                let layout = src
                    .stripe_layout(self.backend)
                    .map_err(|v| SyncError::Layout { path, source: v })?
                    .clone();
                if !layout.is_null() {
                    do_setlayout = Some((dst.clone(), layout));
                }
            }
            do_copy = Some(dst);
        }

        if do_mktmpdir {
            debug!("create tmpdir '{}'", tmpdir.display());
            // racing creators are fine, create_dir_all absorbs "exists"
            fs::create_dir_all(&tmpdir).map_err(|v| SyncError::TmpDir {
                path: tmpdir.clone(),
                source: v,
            })?;
        }
        if let Some((dst, layout)) = &do_setlayout {
            debug!("setstripe (create) '{}'", dst.display());
            self.backend
                .set_layout(
                    dst,
                    nonzero(layout.count),
                    nonzero(layout.size),
                    None,
                )
                .map_err(|v| SyncError::Layout {
                    path: dst.clone(),
                    source: v,
                })?;
        }
        if let Some(dst) = &do_copy {
            if action.data_copy {
                let stat = self.stat(src)?;
                if stat.is_regular() && stat.size > self.config.rsync_max_size {
                    self.run_block_copy(src.path(), dst)?;
                }
            }
            self.run_copy_tool(src.path(), dst, opts)?;
            info!("synced '{}' -> '{}'", src, dst.display());
        }
        if let Some((link_src, link_dst)) = &do_hardlink {
            debug!("hardlink {} <- {}", link_src.display(), link_dst.display());
            fs::hard_link(link_src, link_dst).map_err(|v| SyncError::Link {
                src: link_src.clone(),
                dst: link_dst.clone(),
                source: v,
            })?;
        }
        if !opts.keeptmp {
            debug!("unlink tmpfile '{}'", tmp);
            self.unlink(&mut tmp)?;
        }
        tmp.invalidate();
        tgt.invalidate();
        if do_verify && opts.post_checksums {
            let src_md5 = self.md5(src)?;
            let tgt_md5 = self.md5(tgt)?;
            if src_md5 != tgt_md5 {
                return Err(SyncError::ChecksumMismatch {
                    src: src.path().to_path_buf(),
                    dst: tgt.path().to_path_buf(),
                    src_md5,
                    dst_md5: tgt_md5,
                });
            }
        }
        Ok((tmp, action))
    }

    /// Sync a directory inode without recursing. The copy tool gets the
    /// target's parent (trailing separator) so it creates or updates the
    /// directory under it; the source leaf name must match the target's.
    pub fn syncdir(
        &self,
        src: &FileHandle,
        tgt: &FileHandle,
        opts: &SyncOptions,
    ) -> Result<(), SyncError> {
        let mut cmd = CommandWrapper::new(&self.config.rsync_path);
        cmd.arg("-X").arg("-A").arg("--super").arg("-d");
        self.push_option_flags(&mut cmd, opts);
        cmd.arg(src.path());
        let mut parent = tgt.parent().as_os_str().to_owned();
        parent.push("/");
        cmd.arg(&parent);
        let output = cmd.output().map_err(|v| SyncError::Copy {
            src: src.path().to_path_buf(),
            dst: tgt.path().to_path_buf(),
            source: v,
        })?;
        if !output.stderr.trim().is_empty() {
            return Err(SyncError::CopyOutput {
                src: src.path().to_path_buf(),
                dst: tgt.path().to_path_buf(),
                stderr: output.stderr,
            });
        }
        info!("synced dir '{}' -> '{}'", src, tgt);
        Ok(())
    }

    fn push_option_flags(&self, cmd: &mut CommandWrapper, opts: &SyncOptions) {
        if opts.synctimes {
            cmd.arg("-t");
        }
        if opts.syncperms {
            cmd.arg("-p");
        }
        if opts.syncowner {
            cmd.arg("-o");
        }
        if opts.syncgroup {
            cmd.arg("-g");
        }
    }

    fn run_copy_tool(&self, src: &Path, dst: &Path, opts: &SyncOptions) -> Result<(), SyncError> {
        let mut cmd = CommandWrapper::new(&self.config.rsync_path);
        cmd.arg("--compress-level=0")
            .arg("-l")
            .arg("-A")
            .arg("-X")
            .arg("--super")
            .arg("--inplace")
            .arg("--specials");
        self.push_option_flags(&mut cmd, opts);
        cmd.arg(src).arg(dst);
        let output = cmd.output().map_err(|v| SyncError::Copy {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            source: v,
        })?;
        // the tool exits zero on some partial failures; anything on stderr
        // counts as one
        if !output.stderr.trim().is_empty() {
            return Err(SyncError::CopyOutput {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    fn run_block_copy(&self, src: &Path, dst: &Path) -> Result<(), SyncError> {
        debug!(
            "block copy '{}' -> '{}' bs={}",
            src.display(),
            dst.display(),
            BLOCK_COPY_BS
        );
        let mut cmd = CommandWrapper::new(&self.config.dd_path);
        cmd.arg(format!("bs={}", BLOCK_COPY_BS))
            .arg(format!("if={}", src.display()))
            .arg(format!("of={}", dst.display()))
            .arg("status=noxfer");
        let output = cmd.output().map_err(|v| SyncError::Copy {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            source: v,
        })?;
        if output.stderr.lines().count() > BLOCK_COPY_NOISE_LINES {
            return Err(SyncError::CopyOutput {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    fn exists(&self, handle: &mut FileHandle) -> Result<bool, SyncError> {
        handle.exists().map_err(|v| SyncError::Inspect {
            path: handle.path().to_path_buf(),
            source: v,
        })
    }

    fn stat(&self, handle: &mut FileHandle) -> Result<StatInfo, SyncError> {
        let path = handle.path().to_path_buf();
        handle
            .stat()
            .map(|v| *v)
            .map_err(move |v| SyncError::Inspect { path, source: v })
    }

    fn md5(&self, handle: &mut FileHandle) -> Result<String, SyncError> {
        let path = handle.path().to_path_buf();
        handle
            .md5()
            .map(str::to_owned)
            .map_err(move |v| SyncError::Inspect { path, source: v })
    }

    fn file_id(&self, handle: &mut FileHandle) -> Result<String, SyncError> {
        let path = handle.path().to_path_buf();
        handle
            .file_id(self.backend)
            .map(str::to_owned)
            .map_err(move |v| SyncError::Source { path, source: v })
    }

    fn compare(
        &self,
        src: &mut FileHandle,
        cand: &mut FileHandle,
        opts: &SyncOptions,
    ) -> Result<crate::compare::Comparison, SyncError> {
        let path = cand.path().to_path_buf();
        compare_files(src, cand, opts).map_err(move |v| SyncError::Inspect { path, source: v })
    }

    /// Remove a path, absorbing "already gone"; the handle caches are
    /// dropped either way.
    fn unlink(&self, handle: &mut FileHandle) -> Result<(), SyncError> {
        match fs::remove_file(handle.path()) {
            Ok(()) => {}
            Err(v) if v.kind() == io::ErrorKind::NotFound => {}
            Err(v) => {
                return Err(SyncError::Unlink {
                    path: handle.path().to_path_buf(),
                    source: v,
                })
            }
        }
        handle.invalidate();
        Ok(())
    }
}

fn nonzero(v: u64) -> Option<u64> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}
