//! Color mode detection for CLI output.
//!
//! Respects the `NO_COLOR` environment variable and TTY detection.
//! See https://no-color.org/ for the NO_COLOR standard.

use std::io::IsTerminal;

/// Color output mode for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Always use colors, even when output is not a TTY.
    Always,
    /// Never use colors.
    Never,
    /// Detect from TTY and `NO_COLOR`.
    #[default]
    Auto,
}

impl ColorMode {
    /// Parse a `--color` value: "always", "never" or "auto".
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Check if colors should be used based on current mode.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal(),
        }
    }
}

/// Current terminal width, or 80 when it cannot be determined.
pub fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_mode_parse() {
        assert_eq!(ColorMode::parse("always"), Some(ColorMode::Always));
        assert_eq!(ColorMode::parse("NEVER"), Some(ColorMode::Never));
        assert_eq!(ColorMode::parse("auto"), Some(ColorMode::Auto));
        assert_eq!(ColorMode::parse("sometimes"), None);
    }

    #[test]
    fn test_explicit_modes() {
        assert!(ColorMode::Always.is_enabled());
        assert!(!ColorMode::Never.is_enabled());
    }
}
