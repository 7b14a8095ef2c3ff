// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Logging for the Taiga client crates
//!
//! Usage:
//! - Set TAIGA_LOG=off (default) - no logs
//! - Set TAIGA_LOG=info - cache misses, downloads, conversions
//! - Set TAIGA_LOG=debug - cache hits and HTTP requests as well

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable that selects the minimum log level.
pub const LOG_ENV: &str = "TAIGA_LOG";

static INIT: Once = Once::new();

fn level_from_name(name: &str) -> Option<Option<emit::Level>> {
    match name {
        "off" => Some(None),
        "debug" => Some(Some(emit::Level::Debug)),
        "info" => Some(Some(emit::Level::Info)),
        "warn" => Some(Some(emit::Level::Warn)),
        "error" => Some(Some(emit::Level::Error)),
        _ => None,
    }
}

/// Initialize diagnostics based on the TAIGA_LOG environment variable
///
/// Call once at application startup. Later calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let name = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());

        let (level, unknown) = match level_from_name(name.as_str()) {
            Some(None) => return,
            Some(Some(level)) => (level, false),
            None => (emit::Level::Info, true),
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if unknown {
            emit::warn!("unknown {var} value {name}, using info", var: LOG_ENV, name: name.as_str());
        }

        // The runtime lives for the rest of the process.
        std::mem::forget(rt);
    });
}

/// Log basic operations (downloads, conversions, cache misses)
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (cache hits, request URLs, record counts)
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable problems (corrupt cache records, retries)
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that abort an operation
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
