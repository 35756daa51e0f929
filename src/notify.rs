//! Notification bus for real-time job events.
//!
//! Events are addressed to per-job and per-owner channels. Delivery is
//! at-most-once: subscribers only see events published after they joined,
//! and a subscriber that falls behind the channel capacity skips events.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::error::{Result, SubforgeError};
use crate::job::{JobId, JobStatus};

/// A channel subscribers can join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Channel {
    Job(JobId),
    Owner(String),
}

/// Messages published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    #[serde(rename = "job:update", rename_all = "camelCase")]
    Update {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtitle_ref: Option<String>,
    },
    #[serde(rename = "job:export", rename_all = "camelCase")]
    Export { job_id: JobId, url: String },
    #[serde(rename = "job:deleted", rename_all = "camelCase")]
    Deleted { job_id: JobId, reason: String },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Update { job_id, .. }
            | JobEvent::Export { job_id, .. }
            | JobEvent::Deleted { job_id, .. } => *job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Update { .. } => "job:update",
            JobEvent::Export { .. } => "job:export",
            JobEvent::Deleted { .. } => "job:deleted",
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    channels: Arc<[Channel]>,
    event: JobEvent,
}

/// Broadcasts job events to subscribers.
#[derive(Clone)]
pub struct NotificationBus {
    sender: Arc<broadcast::Sender<Envelope>>,
}

impl NotificationBus {
    /// Creates a new bus with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes an event to the given channels. Returns the number of live subscriptions.
    pub fn publish(&self, channels: &[Channel], event: JobEvent) -> usize {
        debug!(kind = event.kind(), job_id = %event.job_id(), "Publishing job event");
        let envelope = Envelope {
            channels: channels.into(),
            event,
        };
        // No active receivers is fine
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Publishes to the job's channel and its owner's channel.
    pub fn publish_job(&self, job_id: JobId, owner_id: &str, event: JobEvent) -> usize {
        self.publish(
            &[Channel::Job(job_id), Channel::Owner(owner_id.to_string())],
            event,
        )
    }

    /// Joins the channels for a job id and/or an owner id.
    pub fn subscribe(&self, job_id: Option<JobId>, owner_id: Option<&str>) -> Result<Subscription> {
        let mut channels = HashSet::new();
        if let Some(job_id) = job_id {
            channels.insert(Channel::Job(job_id));
        }
        if let Some(owner_id) = owner_id {
            channels.insert(Channel::Owner(owner_id.to_string()));
        }
        if channels.is_empty() {
            return Err(SubforgeError::Validation(
                "a subscription needs a job id or an owner id".to_string(),
            ));
        }

        Ok(Subscription {
            receiver: self.sender.subscribe(),
            channels,
        })
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A subscriber's view of the bus, filtered to the channels it joined.
pub struct Subscription {
    receiver: broadcast::Receiver<Envelope>,
    channels: HashSet<Channel>,
}

impl Subscription {
    pub fn channels(&self) -> &HashSet<Channel> {
        &self.channels
    }

    fn wants(&self, envelope: &Envelope) -> bool {
        envelope.channels.iter().any(|c| self.channels.contains(c))
    }

    /// Waits for the next matching event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if self.wants(&envelope) => return Some(envelope.event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagged behind, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event that is already queued.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if self.wants(&envelope) => return Some(envelope.event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagged behind, {} events skipped", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
