//! Shared types, error model, and configuration for overdrive2opus.
//!
//! This crate is the foundation depended on by all other overdrive2opus crates.
//! It provides:
//! - [`ConvertError`], the unified error type
//! - Domain types ([`BookMetadata`], [`TrackMetadata`], [`Chapter`], [`Speed`])
//! - Timestamp helpers ([`format_timestamp`], [`parse_timestamp`])
//! - Configuration ([`AppConfig`], [`EncodeDefaults`], config loading)

pub mod config;
pub mod error;
pub mod time;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EncodeDefaults, NoiseModelConfig, ToolsConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_tools,
};
pub use error::{ConvertError, Result};
pub use time::{format_timestamp, parse_timestamp};
pub use types::{BookMetadata, Chapter, Loudness, Speed, TrackMetadata, TrackTags};
