//! One-shot advisory notices raised by successful mutations.

use tokio::sync::broadcast;

const NOTICE_CAPACITY: usize = 32;

/// Advisory side effect of a mutation. Never affects data correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A flow linked to an asset changed; the asset's balance may need a
    /// manual adjustment.
    AdjustAccountBalance { asset_id: String },
}

/// Fan-out channel for [`Notice`]s.
#[derive(Debug, Clone)]
pub struct Notices {
    sender: broadcast::Sender<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// Deliver `notice` to current subscribers. Having none is not an error.
    pub(crate) fn emit(&self, notice: Notice) -> usize {
        self.sender.send(notice).unwrap_or(0)
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}
