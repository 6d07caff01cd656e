use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::reservation::ReservationStatus;
use crate::metrics::NOTIFICATION_EMIT_FAILURES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum EventType {
    ReservationCreated,
    ReservationConfirmed,
    ReservationRejected,
    ReservationCompleted,
    ReservationCancelled,
}

impl EventType {
    /// Event announcing that a reservation entered `status`.
    pub fn for_status(status: ReservationStatus) -> Self {
        match status {
            ReservationStatus::Pending => EventType::ReservationCreated,
            ReservationStatus::Confirmed => EventType::ReservationConfirmed,
            ReservationStatus::Rejected => EventType::ReservationRejected,
            ReservationStatus::Completed => EventType::ReservationCompleted,
            ReservationStatus::Cancelled => EventType::ReservationCancelled,
        }
    }
}

/// Notification about a reservation, addressed to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationEvent {
    pub event_type: EventType,
    pub reservation_id: Uuid,
    pub recipient_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl ReservationEvent {
    pub fn new(event_type: EventType, reservation_id: Uuid, recipient_id: Uuid) -> Self {
        Self {
            event_type,
            reservation_id,
            recipient_id,
            occurred_at: Utc::now(),
        }
    }
}

/// Fire-and-forget handle onto the notification channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<ReservationEvent>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<ReservationEvent>) -> Self {
        Self { sender }
    }

    /// Creates a sender and the receiver end to hand to [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReservationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Queues an event without waiting. A full or closed channel drops the
    /// event; the caller's state change has already committed.
    pub fn emit(&self, event: ReservationEvent) {
        if let Err(e) = self.sender.try_send(event) {
            NOTIFICATION_EMIT_FAILURES.inc();
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(event) => ("channel full", event),
                mpsc::error::TrySendError::Closed(event) => ("channel closed", event),
            };
            warn!(
                reservation_id = %event.reservation_id,
                event_type = %event.event_type,
                "Dropping notification: {}",
                reason
            );
        }
    }
}

/// Delivery side of notifications (push, email, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &ReservationEvent) -> Result<(), String>;
}

/// Default sink: records each notification in the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn deliver(&self, event: &ReservationEvent) -> Result<(), String> {
        info!(
            reservation_id = %event.reservation_id,
            recipient_id = %event.recipient_id,
            event_type = %event.event_type,
            "Notification"
        );
        Ok(())
    }
}

/// Drains the channel into `sink` until every sender is dropped.
pub async fn process_events(
    mut rx: mpsc::Receiver<ReservationEvent>,
    sink: Arc<dyn NotificationSink>,
) {
    info!("Starting notification processing loop");

    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.deliver(&event).await {
            error!(
                "Failed to deliver notification: reservation_id={}, event_type={}, error={}",
                event.reservation_id, event.event_type, e
            );
        }
    }

    warn!("Notification processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<ReservationEvent>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, event: &ReservationEvent) -> Result<(), String> {
            self.seen.lock().await.push(event.clone());
            if event.event_type == EventType::ReservationRejected {
                return Err("sink offline".to_string());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_reach_the_sink_in_order() {
        let (sender, rx) = EventSender::channel(8);
        let sink = Arc::new(RecordingSink::default());

        let first = ReservationEvent::new(EventType::ReservationCreated, Uuid::new_v4(), Uuid::new_v4());
        let second = ReservationEvent::new(EventType::ReservationRejected, Uuid::new_v4(), Uuid::new_v4());
        let third = ReservationEvent::new(EventType::ReservationConfirmed, Uuid::new_v4(), Uuid::new_v4());
        sender.emit(first.clone());
        sender.emit(second.clone());
        sender.emit(third.clone());
        drop(sender);

        process_events(rx, sink.clone()).await;

        let seen = sink.seen.lock().await;
        assert_eq!(*seen, vec![first, second, third]);
    }

    #[tokio::test]
    async fn full_channel_drops_without_error() {
        let (sender, mut rx) = EventSender::channel(1);
        let before = NOTIFICATION_EMIT_FAILURES.get();

        sender.emit(ReservationEvent::new(EventType::ReservationCreated, Uuid::new_v4(), Uuid::new_v4()));
        sender.emit(ReservationEvent::new(EventType::ReservationCancelled, Uuid::new_v4(), Uuid::new_v4()));

        assert!(NOTIFICATION_EMIT_FAILURES.get() > before);
        let kept = rx.recv().await.unwrap();
        assert_eq!(kept.event_type, EventType::ReservationCreated);
    }

    #[tokio::test]
    async fn closed_channel_drops_without_error() {
        let (sender, rx) = EventSender::channel(4);
        drop(rx);
        sender.emit(ReservationEvent::new(EventType::ReservationCompleted, Uuid::new_v4(), Uuid::new_v4()));
    }

    #[test]
    fn each_status_maps_to_an_event() {
        assert_eq!(
            EventType::for_status(ReservationStatus::Confirmed),
            EventType::ReservationConfirmed
        );
        assert_eq!(
            EventType::for_status(ReservationStatus::Cancelled),
            EventType::ReservationCancelled
        );
    }
}
