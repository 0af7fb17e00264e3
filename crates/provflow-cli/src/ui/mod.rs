//! # CLI UI Module
//!
//! Styling and formatting layer for provflow output.
//!
//! - `color`: color mode detection and terminal width
//! - `style`: message prefixes and styling functions
//! - `format`: small text formatters (time, truncation, counts)
//! - `table`: step, plan and activity tables with comfy-table
//! - `progress`: spinner shown while steps execute

pub mod color;
pub mod format;
pub mod progress;
pub mod style;
pub mod table;

pub use color::ColorMode;
pub use progress::{Progress, ProgressMode};
pub use style::{MessageType, Style};
