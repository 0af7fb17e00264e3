//! Message styling for CLI output.
//!
//! | Prefix | Meaning | Color |
//! |--------|---------|-------|
//! | `[ok]` | Success | Green |
//! | `[err]` | Error | Red |
//! | `[warn]` | Warning | Yellow |
//! | `[info]` | Information | Blue |
//! | `[hint]` | Suggestion | Cyan |
//! | `[skip]` | Skipped | Dim |

use owo_colors::OwoColorize;

use super::color::ColorMode;

/// Message severity/type for CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Operation completed successfully
    Ok,
    /// Operation failed
    Err,
    /// Succeeded with caveats
    Warn,
    /// Neutral status
    Info,
    /// Actionable next step
    Hint,
    /// Intentionally not processed
    Skip,
}

impl MessageType {
    /// Returns the prefix text for this message type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ok => "[ok]",
            Self::Err => "[err]",
            Self::Warn => "[warn]",
            Self::Info => "[info]",
            Self::Hint => "[hint]",
            Self::Skip => "[skip]",
        }
    }
}

/// Main styling interface for CLI output.
#[derive(Debug, Clone)]
pub struct Style {
    color_mode: ColorMode,
}

impl Style {
    /// Create a Style with an explicit color mode.
    pub fn new(color_mode: ColorMode) -> Self {
        Self { color_mode }
    }

    /// Check if colors are enabled.
    pub fn colors_enabled(&self) -> bool {
        self.color_mode.is_enabled()
    }

    /// Format a message with a type prefix, e.g. `[ok] Done`.
    pub fn message(&self, msg_type: MessageType, text: &str) -> String {
        let prefix = msg_type.prefix();
        if self.colors_enabled() {
            let colored_prefix = match msg_type {
                MessageType::Ok => prefix.green().to_string(),
                MessageType::Err => prefix.red().to_string(),
                MessageType::Warn => prefix.yellow().to_string(),
                MessageType::Info => prefix.blue().to_string(),
                MessageType::Hint => prefix.cyan().to_string(),
                MessageType::Skip => prefix.dimmed().to_string(),
            };
            format!("{} {}", colored_prefix, text)
        } else {
            format!("{} {}", prefix, text)
        }
    }

    /// Detail line under a message, indented to align with its text.
    pub fn message_detail(&self, label: &str, value: &str) -> String {
        format!("     {}: {}", label, value)
    }

    /// Section header.
    pub fn section(&self, title: &str) -> String {
        if self.colors_enabled() {
            title.bold().to_string()
        } else {
            title.to_string()
        }
    }

    /// Error with optional cause and hint lines.
    pub fn error_with_context(&self, msg: &str, cause: Option<&str>, hint: Option<&str>) -> String {
        let mut output = self.message(MessageType::Err, msg);

        if let Some(cause_text) = cause {
            output.push('\n');
            output.push_str(&format!("      Cause: {}", cause_text));
        }

        if let Some(hint_text) = hint {
            output.push('\n');
            output.push_str(&format!("      Hint: {}", hint_text));
        }

        output
    }

    /// List item with a marker; `+` is green, `-` red, `!` yellow.
    pub fn list_item(&self, marker: &str, text: &str) -> String {
        let styled = if self.colors_enabled() {
            match marker {
                "+" => marker.green().to_string(),
                "-" => marker.red().to_string(),
                "!" => marker.yellow().to_string(),
                _ => marker.to_string(),
            }
        } else {
            marker.to_string()
        };
        format!("  {} {}", styled, text)
    }

    /// `Key: value` with a dimmed key.
    pub fn key_value(&self, key: &str, value: &str) -> String {
        if self.colors_enabled() {
            format!("{}: {}", key.dimmed(), value)
        } else {
            format!("{}: {}", key, value)
        }
    }

    /// Revision or activity id, first 8 chars in yellow.
    pub fn revision(&self, rev: &str) -> String {
        let short = if rev.len() > 8 { &rev[..8] } else { rev };
        if self.colors_enabled() {
            short.yellow().to_string()
        } else {
            short.to_string()
        }
    }

    /// A project path, in cyan.
    pub fn file_path(&self, path: &str) -> String {
        if self.colors_enabled() {
            path.cyan().to_string()
        } else {
            path.to_string()
        }
    }

    /// A workflow name, in bold.
    pub fn plan_name(&self, name: &str) -> String {
        if self.colors_enabled() {
            name.bold().to_string()
        } else {
            name.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_prefix() {
        assert_eq!(MessageType::Ok.prefix(), "[ok]");
        assert_eq!(MessageType::Err.prefix(), "[err]");
        assert_eq!(MessageType::Warn.prefix(), "[warn]");
        assert_eq!(MessageType::Info.prefix(), "[info]");
        assert_eq!(MessageType::Hint.prefix(), "[hint]");
        assert_eq!(MessageType::Skip.prefix(), "[skip]");
    }

    #[test]
    fn test_message_no_color() {
        let style = Style::new(ColorMode::Never);
        assert_eq!(style.message(MessageType::Ok, "Up to date"), "[ok] Up to date");
        assert_eq!(style.message_detail("Steps", "2"), "     Steps: 2");
    }

    #[test]
    fn test_error_with_context() {
        let style = Style::new(ColorMode::Never);
        let output = style.error_with_context("Update failed", Some("exit 1"), Some("Fix the step"));
        assert!(output.contains("[err] Update failed"));
        assert!(output.contains("Cause: exit 1"));
        assert!(output.contains("Hint: Fix the step"));
    }

    #[test]
    fn test_list_item_and_revision() {
        let style = Style::new(ColorMode::Never);
        assert_eq!(style.list_item("!", "b.txt"), "  ! b.txt");
        assert_eq!(style.revision("abc12345def67890"), "abc12345");
        assert_eq!(style.revision("short"), "short");
    }
}
