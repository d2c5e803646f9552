use parley_core::Event;

/// Observer notified of every event the runtime processes.
///
/// Called synchronously from the processing loop, so implementations should
/// return quickly.
pub trait EventWatcher: Send + Sync {
    /// An event is about to be processed
    fn on_event(&self, event: &Event);
}

/// Watcher logging each event at debug level
#[derive(Debug, Default)]
pub struct LoggingWatcher;

impl EventWatcher for LoggingWatcher {
    fn on_event(&self, event: &Event) {
        tracing::debug!(event = %event.name, uid = %event.uid, "Event processed");
    }
}
