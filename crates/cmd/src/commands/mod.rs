// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod fetch;
pub mod formats;
pub mod latest;
pub mod metadata;
pub mod resolve;
pub mod show;

pub use fetch::fetch_command;
pub use formats::formats_command;
pub use latest::latest_command;
pub use metadata::metadata_command;
pub use resolve::resolve_command;
pub use show::show_command;
