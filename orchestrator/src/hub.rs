//! Per-job subscriber fan-out with ordered delivery and bounded backfill.
//!
//! Sequenced messages are suppressed unless strictly newer than the last
//! broadcast for the job, so a resumed run can never redeliver work clients
//! already saw. Delivered sequenced messages are retained for a finite window
//! so a reconnecting client can catch up before going live.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use codemap_types::JobId;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::wire::WireMessage;

const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

struct Retained {
    sequence: u64,
    at: Instant,
    message: WireMessage,
}

#[derive(Default)]
struct JobChannel {
    subscribers: Vec<mpsc::UnboundedSender<WireMessage>>,
    last_broadcast: u64,
    retained: VecDeque<Retained>,
}

impl JobChannel {
    fn prune(&mut self, retention: Duration) {
        while self
            .retained
            .front()
            .is_some_and(|r| r.at.elapsed() >= retention)
        {
            self.retained.pop_front();
        }
    }
}

pub struct SubscriberHub {
    retention: Duration,
    state: Mutex<HashMap<JobId, JobChannel>>,
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl SubscriberHub {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a subscriber to a job. The handshake message is delivered
    /// first, then every retained message newer than `last_seen`, then the
    /// live feed.
    pub fn subscribe(
        &self,
        job: JobId,
        last_seen: u64,
        handshake: WireMessage,
    ) -> mpsc::UnboundedReceiver<WireMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        let channel = state.entry(job).or_default();
        channel.prune(self.retention);

        let _ = tx.send(handshake);
        for retained in &channel.retained {
            if retained.sequence > last_seen {
                let _ = tx.send(retained.message.clone());
            }
        }
        channel.subscribers.push(tx);
        rx
    }

    /// Deliver a message to every live subscriber of a job. Returns whether
    /// the message was delivered; a stale sequence is suppressed.
    pub fn publish(&self, job: JobId, message: WireMessage) -> bool {
        let mut state = self.state.lock().unwrap();
        let channel = state.entry(job).or_default();

        if let Some(sequence) = message.sequence() {
            if sequence <= channel.last_broadcast {
                tracing::debug!(
                    %job,
                    sequence,
                    last_broadcast = channel.last_broadcast,
                    "suppressing stale sequenced message"
                );
                return false;
            }
            channel.last_broadcast = sequence;
            channel.prune(self.retention);
            channel.retained.push_back(Retained {
                sequence,
                at: Instant::now(),
                message: message.clone(),
            });
        }

        channel.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        true
    }

    #[must_use]
    pub fn last_broadcast(&self, job: JobId) -> u64 {
        self.state
            .lock()
            .unwrap()
            .get(&job)
            .map_or(0, |c| c.last_broadcast)
    }

    /// Drop the job's channel: subscribers see end-of-stream, retained
    /// history is discarded.
    pub fn close_job(&self, job: JobId) {
        self.state.lock().unwrap().remove(&job);
    }

    /// Close everything. Safe to call more than once.
    pub fn dispose(&self) {
        self.state.lock().unwrap().clear();
    }
}
