/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{env, path::PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const RSYNC_PATH_ENV: &str = "PYLUTRSYNCPATH";
pub const LFS_PATH_ENV: &str = "PYLUTLFSPATH";
pub const RSYNC_MAX_SIZE_ENV: &str = "PYLUTRSYNCMAXSIZE";

const DEFAULT_RSYNC_PATH: &str = "/usr/bin/rsync";
const DEFAULT_LFS_PATH: &str = "/usr/bin/lfs";
const DEFAULT_DD_PATH: &str = "/bin/dd";
/// 512 MiB, files above this get the block-copy pre-pass
const DEFAULT_RSYNC_MAX_SIZE: u64 = 512 * 1024 * 1024;

/// Paths to the external tools the engine drives, plus the size threshold
/// above which a data copy is bulk-transferred with the block copy tool
/// before the rsync pass.
#[derive(Deserialize, Clone, Debug)]
pub struct ToolConfig {
    #[serde(default = "default_rsync_path")]
    pub rsync_path: PathBuf,
    #[serde(default = "default_lfs_path")]
    pub lfs_path: PathBuf,
    #[serde(default = "default_dd_path")]
    pub dd_path: PathBuf,
    #[serde(default = "default_rsync_max_size")]
    pub rsync_max_size: u64,
}

fn default_rsync_path() -> PathBuf {
    PathBuf::from(DEFAULT_RSYNC_PATH)
}

fn default_lfs_path() -> PathBuf {
    PathBuf::from(DEFAULT_LFS_PATH)
}

fn default_dd_path() -> PathBuf {
    PathBuf::from(DEFAULT_DD_PATH)
}

fn default_rsync_max_size() -> u64 {
    DEFAULT_RSYNC_MAX_SIZE
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            rsync_path: default_rsync_path(),
            lfs_path: default_lfs_path(),
            dd_path: default_dd_path(),
            rsync_max_size: default_rsync_max_size(),
        }
    }
}

impl ToolConfig {
    /// Build a configuration from the process environment, falling back to
    /// the defaults for any variable that is not set.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = ToolConfig::default();
        if let Ok(v) = env::var(RSYNC_PATH_ENV) {
            config.rsync_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var(LFS_PATH_ENV) {
            config.lfs_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var(RSYNC_MAX_SIZE_ENV) {
            config.rsync_max_size = v
                .parse()
                .with_context(|| format!("failed to parse {} value '{}'", RSYNC_MAX_SIZE_ENV, v))?;
        }
        Ok(config)
    }
}
