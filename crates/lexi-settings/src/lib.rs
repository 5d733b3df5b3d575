//! # lexi-settings
//!
//! Layered configuration for the LexiDoc server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** from [`LexiSettings::default()`]
//! 2. **User file** `~/.lexi/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `LEXI_*` and `ANTHROPIC_API_KEY`
//!
//! ```no_run
//! use lexi_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, parse_bool, parse_f64_range,
    parse_u16_range, parse_usize_range, settings_path, validate,
};
pub use types::*;
