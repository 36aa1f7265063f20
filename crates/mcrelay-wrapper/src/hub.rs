//! Console fan-out with a rolling history
//!
//! Every output line is appended to a bounded history and pushed to each live
//! subscriber. A new subscriber first receives the history, then live lines, with
//! no gap or duplicate between the two.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Lines kept for replay to newly attached consoles
pub const DEFAULT_HISTORY_LINES: usize = 1000;

/// Live lines a subscriber may fall behind by before it is dropped
const LIVE_HEADROOM: usize = 1024;

struct HubState {
    history: VecDeque<String>,
    subscribers: HashMap<Uuid, mpsc::Sender<String>>,
}

pub struct ConsoleHub {
    history_limit: usize,
    state: Mutex<HubState>,
}

impl Default for ConsoleHub {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LINES)
    }
}

impl ConsoleHub {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit,
            state: Mutex::new(HubState {
                history: VecDeque::with_capacity(history_limit),
                subscribers: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a console. The returned receiver yields the history, then live output.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let mut state = self.lock();

        let (tx, rx) = mpsc::channel(self.history_limit + LIVE_HEADROOM);
        for line in &state.history {
            // Capacity covers the full history, so this cannot fail
            let _ = tx.try_send(line.clone());
        }
        state.subscribers.insert(id, tx);

        debug!(%id, replayed = state.history.len(), "Console subscribed");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        if self.lock().subscribers.remove(id).is_some() {
            debug!(%id, "Console unsubscribed");
        }
    }

    /// Record a line and push it to every subscriber.
    ///
    /// Subscribers that are closed or full are dropped.
    pub fn publish(&self, line: String) {
        let mut state = self.lock();

        if self.history_limit > 0 {
            if state.history.len() == self.history_limit {
                state.history.pop_front();
            }
            state.history.push_back(line.clone());
        }

        state.subscribers.retain(|id, tx| match tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(e) => {
                info!(%id, "Dropping console subscriber: {}", e);
                false
            }
        });
    }

    /// Publish every line from `output` until it closes
    pub async fn pump(&self, mut output: mpsc::UnboundedReceiver<String>) {
        while let Some(line) = output.recv().await {
            self.publish(line);
        }
        debug!("Console output closed");
    }

    pub fn history(&self) -> Vec<String> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
