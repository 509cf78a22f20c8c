//! Terminal progress display for exports
//!
//! Shows an export's percent complete and remaining time as a progress bar.

use indicatif::{ProgressBar, ProgressStyle};

use crate::export::{CancelReason, ExportListener};

/// Listener that drives a progress bar
///
/// The bar can be disabled (quiet mode, non-interactive output); the
/// listener then only prints the terminal message.
pub struct BarListener {
    /// Progress bar (optional, can be disabled)
    bar: Option<ProgressBar>,
    file_name: String,
}

impl BarListener {
    /// Create a new listener
    ///
    /// # Arguments
    /// * `file_name` - Download name shown next to the bar
    /// * `enable_bar` - Whether to display a progress bar
    pub fn new(file_name: impl Into<String>, enable_bar: bool) -> Self {
        let file_name = file_name.into();
        let bar = enable_bar.then(|| {
            let bar = ProgressBar::new(100);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            bar.set_style(style);
            bar.set_message(file_name.clone());
            bar
        });

        Self { bar, file_name }
    }

    fn finish_with(&self, message: String) {
        match &self.bar {
            Some(bar) => bar.finish_with_message(message),
            None => println!("{}", message),
        }
    }
}

/// Render an ETA the way the progress message shows it
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        None => String::new(),
        Some(secs) if secs >= 3600 => {
            format!("{}h {:02}m left", secs / 3600, (secs % 3600) / 60)
        }
        Some(secs) if secs >= 60 => format!("{}m {:02}s left", secs / 60, secs % 60),
        Some(secs) => format!("{}s left", secs),
    }
}

impl ExportListener for BarListener {
    fn on_progress(&self, percent: u32, eta_seconds: Option<u64>) {
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(percent));
            let eta = format_eta(eta_seconds);
            if eta.is_empty() {
                bar.set_message(self.file_name.clone());
            } else {
                bar.set_message(format!("{} ({})", self.file_name, eta));
            }
        }
    }

    fn on_finished(&self) {
        self.finish_with(format!("Exported {}", self.file_name));
    }

    fn on_canceled(&self, reason: &CancelReason) {
        match &self.bar {
            Some(bar) => bar.abandon_with_message(format!("Export canceled: {}", reason)),
            None => eprintln!("Export canceled: {}", reason),
        }
    }

    fn on_download_started(&self, download: Option<&str>) {
        if let (Some(bar), Some(download)) = (&self.bar, download) {
            bar.println(format!("Downloading {}", download));
        }
    }
}
