//! Spinner shown while workflow steps execute.
//!
//! Hidden when stderr is not a TTY, with `--quiet`, or with `--json`.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress feedback mode based on output context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Interactive TTY: animated spinner
    Interactive,
    /// Non-TTY or quiet: final results only
    Quiet,
    /// Machine-readable output: nothing at all
    Silent,
}

impl ProgressMode {
    /// Detect the mode from flags and terminal state.
    pub fn detect(quiet: bool, json: bool) -> Self {
        if json {
            Self::Silent
        } else if quiet || !atty::is(atty::Stream::Stderr) {
            Self::Quiet
        } else {
            Self::Interactive
        }
    }

    /// Whether animated output is shown.
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Interactive)
    }
}

const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// An indeterminate spinner wrapping indicatif.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    /// Start a spinner with `message`.
    pub fn spinner(message: &str, mode: ProgressMode) -> Self {
        if !mode.is_interactive() {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars(SPINNER_CHARS)
            .template("{spinner:.cyan} {msg} ({elapsed})")
        {
            bar.set_style(style);
        }
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    /// Clear the spinner line.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_is_silent() {
        assert_eq!(ProgressMode::detect(false, true), ProgressMode::Silent);
        assert_eq!(ProgressMode::detect(true, false), ProgressMode::Quiet);
    }

    #[test]
    fn test_hidden_spinner() {
        let progress = Progress::spinner("Running", ProgressMode::Quiet);
        progress.finish();
    }
}
