//! Progress listener that records events.

use crate::updater::ProgressListener;
use std::sync::Mutex;

/// One recorded progress event.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    /// `title_changed`
    Title(String),
    /// `status_changed`
    Status(String),
    /// `value_changed`
    Value(f64),
    /// `completed`
    Completed,
}

/// Collects every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far.
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().expect("listener poisoned").clone()
    }

    /// Titles so far.
    pub fn titles(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Title(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Progress values so far, excluding indeterminate markers.
    pub fn values(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Value(v) if v >= 0.0 => Some(v),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ListenerEvent) {
        self.events.lock().expect("listener poisoned").push(event);
    }
}

impl ProgressListener for RecordingListener {
    fn title_changed(&self, title: &str) {
        self.push(ListenerEvent::Title(title.to_string()));
    }

    fn status_changed(&self, status: &str) {
        self.push(ListenerEvent::Status(status.to_string()));
    }

    fn value_changed(&self, value: f64) {
        self.push(ListenerEvent::Value(value));
    }

    fn completed(&self) {
        self.push(ListenerEvent::Completed);
    }
}
