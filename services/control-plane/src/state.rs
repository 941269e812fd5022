//! Application state shared across request handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use compute_events::QueueStatusSnapshot;
use tokio::sync::watch;

use crate::handoff::HandoffQueue;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
/// Handlers never touch scheduler state directly: writes go through the
/// hand-off queue and reads come from published snapshots.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    handoff: HandoffQueue,
    queue_status: watch::Receiver<QueueStatusSnapshot>,
    resource_classes: Option<BTreeSet<String>>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// `resource_classes` restricts accepted submissions; `None` accepts any
    /// class.
    pub fn new(
        handoff: HandoffQueue,
        queue_status: watch::Receiver<QueueStatusSnapshot>,
        resource_classes: Option<BTreeSet<String>>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                handoff,
                queue_status,
                resource_classes,
            }),
        }
    }

    pub fn handoff(&self) -> &HandoffQueue {
        &self.inner.handoff
    }

    /// Latest published queue availability.
    pub fn queue_status(&self) -> QueueStatusSnapshot {
        self.inner.queue_status.borrow().clone()
    }

    pub fn accepts_class(&self, class: &str) -> bool {
        self.inner
            .resource_classes
            .as_ref()
            .is_none_or(|classes| classes.contains(class))
    }
}
