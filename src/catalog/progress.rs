//! Progress reporting seam for the catalog import.

/// Opaque handle to one progress bar of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressHandle(pub usize);

/// Receives progress of a long-running import. Purely observational.
pub trait ProgressSink: Send + Sync {
    /// Opens a new bar with an initial total.
    fn new_bar(&self, label: &str, total: u64) -> ProgressHandle;

    /// Advances a bar by one.
    fn increment(&self, handle: ProgressHandle);

    /// Replaces a bar's total, e.g. once child counts become known.
    fn set_total(&self, handle: ProgressHandle, total: u64);

    /// Marks a bar as done.
    fn finish(&self, handle: ProgressHandle);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn new_bar(&self, _label: &str, _total: u64) -> ProgressHandle {
        ProgressHandle(0)
    }

    fn increment(&self, _handle: ProgressHandle) {}

    fn set_total(&self, _handle: ProgressHandle, _total: u64) {}

    fn finish(&self, _handle: ProgressHandle) {}
}
