/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use args::{Args, Mode};
use stripesync::{
    FileHandle, LayoutBackend, LfsTool, PlainBackend, SyncEngine, SyncOptions, ToolConfig,
};

mod args;

fn main() {
    let status = run();
    if let Err(ref err) = status {
        error!("{:?}", err);
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    log4rs::init_file(&args.log_config, Default::default())
        .with_context(|| "failed to init logger")?;
    info!("init logger");

    let config = match &args.config_path {
        Some(path) => {
            info!("read configuration from '{}'", path);
            let config =
                fs::read_to_string(path).with_context(|| "failed to read configuration file")?;
            toml::from_str(&config).with_context(|| "failed to parse configuration")?
        }
        None => ToolConfig::from_env().with_context(|| "failed to read configuration")?,
    };

    let backend: Box<dyn LayoutBackend> = if args.plain {
        Box::new(PlainBackend)
    } else {
        Box::new(LfsTool::new(&config))
    };
    let engine = SyncEngine::new(&config, backend.as_ref());

    match args.mode {
        Mode::File {
            source,
            target,
            tmpbase,
            keeptmp,
            times,
            perms,
            owner,
            group,
            pre_checksums,
            no_post_checksums,
        } => {
            let opts = SyncOptions {
                keeptmp,
                synctimes: times,
                syncperms: perms,
                syncowner: owner,
                syncgroup: group,
                pre_checksums,
                post_checksums: !no_post_checksums,
                ..SyncOptions::new(tmpbase)
            };
            let mut src = FileHandle::new(source);
            let mut tgt = FileHandle::new(target);
            let (tmp, action) = engine
                .syncfile(&mut src, &mut tgt, &opts)
                .with_context(|| format!("failed to sync '{}' -> '{}'", src, tgt))?;
            info!(
                "done: data_copy={} meta_update={} tmp='{}'",
                action.data_copy, action.meta_update, tmp
            );
        }
        Mode::Dir {
            source,
            target,
            times,
            perms,
            owner,
            group,
        } => {
            let opts = SyncOptions {
                synctimes: times,
                syncperms: perms,
                syncowner: owner,
                syncgroup: group,
                ..SyncOptions::new("/")
            };
            let src = FileHandle::new(source);
            let tgt = FileHandle::new(target);
            engine
                .syncdir(&src, &tgt, &opts)
                .with_context(|| format!("failed to sync dir '{}' -> '{}'", src, tgt))?;
            info!("done");
        }
    }
    Ok(())
}
