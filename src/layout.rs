/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    fs::{self, OpenOptions},
    io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use log::debug;
use thiserror::Error;

use crate::{
    command::{CommandWrapper, RunCommandError},
    config::ToolConfig,
    stripe::{StripeInfoError, StripeLayout, NO_STRIPE_MARKER},
};

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("layout tool failed: {0}")]
    Command(#[from] RunCommandError),
    #[error("cannot parse stripe info for '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: StripeInfoError,
    },
    #[error("cannot stat '{path}': {source}")]
    Stat { path: PathBuf, source: io::Error },
    #[error("stripe already set for '{path}'")]
    AlreadySet { path: PathBuf },
    #[error("file ids are not enumerable on this backend")]
    Unsupported,
}

impl LayoutError {
    pub fn is_already_set(&self) -> bool {
        match self {
            LayoutError::AlreadySet { .. } => true,
            LayoutError::Command(err) => err.is_already_exists(),
            _ => false,
        }
    }
}

/// Seam between the engine and the filesystem's notion of file identity and
/// data placement. File ids are opaque strings: every hardlink of a file
/// maps to the same id, and no two files on one filesystem share an id.
pub trait LayoutBackend {
    fn path_to_id(&self, path: &Path) -> Result<String, LayoutError>;
    /// All hardlink paths of `id`, relative to the filesystem mounted at
    /// `mount`.
    fn id_to_paths(&self, mount: &Path, id: &str) -> Result<Vec<PathBuf>, LayoutError>;
    fn get_layout(&self, path: &Path) -> Result<StripeLayout, LayoutError>;
    /// Write a layout. Valid only for directories and paths that do not
    /// exist yet; the file is created as a side effect.
    fn set_layout(
        &self,
        path: &Path,
        count: Option<u64>,
        size: Option<u64>,
        offset: Option<i64>,
    ) -> Result<(), LayoutError>;
}

/// Backend that shells out to the platform layout utility (`lfs` on Lustre).
pub struct LfsTool {
    lfs_path: PathBuf,
}

impl LfsTool {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            lfs_path: config.lfs_path.clone(),
        }
    }
}

impl LayoutBackend for LfsTool {
    fn path_to_id(&self, path: &Path) -> Result<String, LayoutError> {
        let mut cmd = CommandWrapper::new(&self.lfs_path);
        cmd.arg("path2fid").arg(path);
        let output = cmd.output()?;
        Ok(output.stdout.trim().to_owned())
    }

    fn id_to_paths(&self, mount: &Path, id: &str) -> Result<Vec<PathBuf>, LayoutError> {
        let mut cmd = CommandWrapper::new(&self.lfs_path);
        cmd.arg("fid2path").arg(mount).arg(id);
        let output = cmd.output()?;
        Ok(output.stdout.split_whitespace().map(PathBuf::from).collect())
    }

    fn get_layout(&self, path: &Path) -> Result<StripeLayout, LayoutError> {
        let mut cmd = CommandWrapper::new(&self.lfs_path);
        cmd.arg("getstripe");
        if fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false) {
            cmd.arg("-d");
        }
        cmd.arg(path);
        let output = cmd.output()?;
        if output.stdout.contains(NO_STRIPE_MARKER) || output.stderr.contains(NO_STRIPE_MARKER) {
            debug!("'{}' has no stripe info", path.display());
            return Ok(StripeLayout::null());
        }
        StripeLayout::try_parse(&output.stdout).map_err(|v| LayoutError::Parse {
            path: path.to_path_buf(),
            source: v,
        })
    }

    fn set_layout(
        &self,
        path: &Path,
        count: Option<u64>,
        size: Option<u64>,
        offset: Option<i64>,
    ) -> Result<(), LayoutError> {
        debug!(
            "setstripe '{}' count={:?} size={:?} offset={:?}",
            path.display(),
            count,
            size,
            offset
        );
        let mut cmd = CommandWrapper::new(&self.lfs_path);
        cmd.arg("setstripe");
        if let Some(count) = count {
            cmd.arg("-c").arg(count.to_string());
        }
        if let Some(size) = size {
            cmd.arg("-S").arg(size.to_string());
        }
        if let Some(offset) = offset {
            cmd.arg("-i").arg(offset.to_string());
        }
        cmd.arg(path);
        cmd.output()?;
        Ok(())
    }
}

/// Backend for filesystems without stripe support: file identity is the
/// device/inode pair, layouts are always null, and presetting a layout just
/// pre-creates the file.
pub struct PlainBackend;

impl LayoutBackend for PlainBackend {
    fn path_to_id(&self, path: &Path) -> Result<String, LayoutError> {
        let meta = fs::symlink_metadata(path).map_err(|v| LayoutError::Stat {
            path: path.to_path_buf(),
            source: v,
        })?;
        Ok(format!("{:#x}:{:#x}", meta.dev(), meta.ino()))
    }

    fn id_to_paths(&self, _mount: &Path, _id: &str) -> Result<Vec<PathBuf>, LayoutError> {
        Err(LayoutError::Unsupported)
    }

    fn get_layout(&self, _path: &Path) -> Result<StripeLayout, LayoutError> {
        Ok(StripeLayout::null())
    }

    fn set_layout(
        &self,
        path: &Path,
        _count: Option<u64>,
        _size: Option<u64>,
        _offset: Option<i64>,
    ) -> Result<(), LayoutError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(()),
            Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Err(LayoutError::AlreadySet {
                path: path.to_path_buf(),
            }),
            Err(v) => Err(LayoutError::Stat {
                path: path.to_path_buf(),
                source: v,
            }),
        }
    }
}
