//! Download progress bars
//!
//! Consistent indicatif styling for transfers. Only used when the caller
//! asks for progress (the `depot` binary on a terminal).

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Standard spinner characters
const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Standard tick interval for spinners
const TICK_INTERVAL_MS: u64 = 80;

/// Transfers smaller than this finish too quickly to be worth a bar (1MB)
pub const PROGRESS_THRESHOLD: u64 = 1024 * 1024;

/// Create a spinner progress bar with standard styling.
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("     {spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(SPINNER_CHARS),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(TICK_INTERVAL_MS));
    pb
}

/// Progress for a transfer of possibly unknown length.
///
/// Returns a byte bar when the length is known, a spinner otherwise.
/// Returns `None` for transfers below [`PROGRESS_THRESHOLD`].
pub fn for_transfer(message: &str, total_bytes: Option<u64>) -> Option<ProgressBar> {
    match total_bytes {
        Some(len) if len < PROGRESS_THRESHOLD => None,
        Some(len) => {
            let pb = create_spinner(message);
            upgrade_to_bytes(&pb, len);
            Some(pb)
        }
        None => Some(create_spinner(message)),
    }
}

/// Upgrade a spinner to a byte progress bar when content length becomes known.
pub fn upgrade_to_bytes(pb: &ProgressBar, total_bytes: u64) {
    pb.set_length(total_bytes);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("     {spinner:.cyan} [{bar:30.cyan/dim}] {bytes}/{total_bytes} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸━"),
    );
}

/// RAII guard that clears a progress bar when dropped.
///
/// Keeps a failed transfer from leaving a half-drawn bar behind.
pub struct ProgressGuard(Option<ProgressBar>);

impl ProgressGuard {
    pub fn new(pb: Option<ProgressBar>) -> Self {
        Self(pb)
    }

    pub fn set_position(&self, pos: u64) {
        if let Some(pb) = &self.0 {
            pb.set_position(pos);
        }
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        if let Some(pb) = &self.0 {
            pb.finish_and_clear();
        }
    }
}
