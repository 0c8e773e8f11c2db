//! Terminal progress bars for the catalog import.

use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use ingestor_core::{ProgressHandle, ProgressSink};

const BAR_TEMPLATE: &str = "{prefix:>15} [{bar:40}] {pos}/{len} ({elapsed})";

/// One indicatif bar per catalog level, stacked in a [`MultiProgress`].
pub(crate) struct TerminalProgress {
    multi: MultiProgress,
    bars: Mutex<Vec<ProgressBar>>,
}

impl TerminalProgress {
    pub(crate) fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(Vec::new()),
        }
    }

    fn with_bar(&self, handle: ProgressHandle, f: impl FnOnce(&ProgressBar)) {
        let Ok(bars) = self.bars.lock() else {
            return;
        };
        if let Some(bar) = bars.get(handle.0) {
            f(bar);
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn new_bar(&self, label: &str, total: u64) -> ProgressHandle {
        let bar = self.multi.add(ProgressBar::new(total));
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(label.to_string());

        match self.bars.lock() {
            Ok(mut bars) => {
                bars.push(bar);
                ProgressHandle(bars.len() - 1)
            }
            Err(_) => ProgressHandle(usize::MAX),
        }
    }

    fn increment(&self, handle: ProgressHandle) {
        self.with_bar(handle, |bar| bar.inc(1));
    }

    fn set_total(&self, handle: ProgressHandle, total: u64) {
        self.with_bar(handle, |bar| bar.set_length(total));
    }

    fn finish(&self, handle: ProgressHandle) {
        self.with_bar(handle, ProgressBar::finish);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_progress_tracks_bars_independently() {
        let progress = TerminalProgress::with_target(ProgressDrawTarget::hidden());
        let groups = progress.new_bar("groups", 0);
        let types = progress.new_bar("types", 2);
        assert_ne!(groups, types);

        progress.set_total(groups, 3);
        progress.increment(groups);
        progress.increment(types);
        progress.increment(types);
        progress.finish(types);

        let bars = progress.bars.lock().unwrap();
        assert_eq!(bars[groups.0].length(), Some(3));
        assert_eq!(bars[groups.0].position(), 1);
        assert!(bars[types.0].is_finished());
    }

    #[test]
    fn test_terminal_progress_ignores_unknown_handle() {
        let progress = TerminalProgress::with_target(ProgressDrawTarget::hidden());
        progress.increment(ProgressHandle(42));
        progress.finish(ProgressHandle(42));
    }
}
