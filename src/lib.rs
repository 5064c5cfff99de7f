/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod command;
pub mod compare;
pub mod config;
pub mod handle;
pub mod layout;
pub mod stripe;
pub mod sync;


pub use config::ToolConfig;
pub use handle::FileHandle;
pub use layout::{LayoutBackend, LfsTool, PlainBackend};
pub use stripe::StripeLayout;
pub use sync::{SyncAction, SyncEngine, SyncError, SyncOptions};
