//! # pulse-settings
//!
//! Configuration management with layered sources for the Pulse hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PulseSettings::default()`]
//! 2. **User file**: `~/.pulse/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PULSE_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to the server; there is no global
//! settings singleton.
//!
//! # Usage
//!
//! ```no_run
//! use pulse_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("ping period: {}s", settings.websocket.ping_period_secs);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
