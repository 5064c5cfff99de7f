/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to tool configuration file in TOML format; environment
    /// variables are used when omitted
    #[arg(long)]
    pub config_path: Option<String>,

    /// Path to log4rs configuration file
    #[arg(long, default_value_t = String::from("./log4rs.yml"))]
    pub log_config: String,

    /// Use inode+device file ids instead of the platform layout tool
    /// (for filesystems without stripe support)
    #[arg(long, default_value_t = false)]
    pub plain: bool,

    #[clap(subcommand)]
    pub mode: Mode,
}

#[derive(Debug, PartialEq, Clone, Subcommand)]
#[clap(rename_all = "kebab_case")]
pub enum Mode {
    /// Sync a single file through the tmp pool
    File {
        /// Source path
        source: String,
        /// Target path
        target: String,
        /// Absolute path the tmp pool is created under
        #[arg(short = 'b', long)]
        tmpbase: String,
        /// Keep the tmp-pool hardlink so further hardlinks of this source
        /// reuse the copy
        #[arg(short, long, default_value_t = false)]
        keeptmp: bool,
        /// Sync file times
        #[arg(short, long, default_value_t = false)]
        times: bool,
        /// Sync file permissions
        #[arg(short, long, default_value_t = false)]
        perms: bool,
        /// Sync file owner
        #[arg(short, long, default_value_t = false)]
        owner: bool,
        /// Sync file group
        #[arg(short, long, default_value_t = false)]
        group: bool,
        /// Compare checksums before trusting size and mtime
        #[arg(long, default_value_t = false)]
        pre_checksums: bool,
        /// Skip checksum verification after a data copy
        #[arg(long, default_value_t = false)]
        no_post_checksums: bool,
    },
    /// Sync a directory inode, without recursing
    Dir {
        /// Source directory
        source: String,
        /// Target directory (its leaf name must match the source's)
        target: String,
        /// Sync directory times
        #[arg(short, long, default_value_t = false)]
        times: bool,
        /// Sync directory permissions
        #[arg(short, long, default_value_t = false)]
        perms: bool,
        /// Sync directory owner
        #[arg(short, long, default_value_t = false)]
        owner: bool,
        /// Sync directory group
        #[arg(short, long, default_value_t = false)]
        group: bool,
    },
}
