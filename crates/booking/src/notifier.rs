//! Post-commit delivery of [`PaymentCompleted`] to listeners.
//!
//! The payment path only ever calls [`PaymentPublisher::publish`], which
//! never blocks and never fails. A [`NotificationWorker`] task drains the
//! channel and hands each event to every registered [`PaymentListener`].

use async_trait::async_trait;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

use crate::Result;
use crate::events::PaymentCompleted;

/// Sending half of the notification channel.
#[derive(Debug, Clone)]
pub struct PaymentPublisher {
    sender: Sender<PaymentCompleted>,
}

impl PaymentPublisher {
    /// Creates a bounded channel holding at most `buffer` undelivered events.
    pub fn channel(buffer: usize) -> (Self, Receiver<PaymentCompleted>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }

    /// Hands `event` to the worker without waiting.
    ///
    /// A full or closed channel drops the event with a warning.
    pub fn publish(&self, event: PaymentCompleted) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                metrics::counter!("notifications_dropped_total", "reason" => "full").increment(1);
                tracing::warn!(payment_id = %event.payment_id, "notification channel full; event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                metrics::counter!("notifications_dropped_total", "reason" => "closed")
                    .increment(1);
                tracing::warn!(payment_id = %event.payment_id, "notification worker gone; event dropped");
            }
        }
    }
}

/// Reacts to completed payments.
///
/// Listeners run after the payment has committed; an error is logged and
/// counted but never reaches the payer.
#[async_trait]
pub trait PaymentListener: Send + Sync {
    /// Returns the name of this listener.
    fn name(&self) -> &'static str;

    async fn on_payment_completed(&self, event: &PaymentCompleted) -> Result<()>;
}

/// Drains the notification channel and fans events out to listeners.
pub struct NotificationWorker {
    receiver: Receiver<PaymentCompleted>,
    listeners: Vec<Box<dyn PaymentListener>>,
}

impl NotificationWorker {
    pub fn new(receiver: Receiver<PaymentCompleted>) -> Self {
        Self {
            receiver,
            listeners: Vec::new(),
        }
    }

    /// Registers a listener with this worker.
    pub fn register(&mut self, listener: Box<dyn PaymentListener>) {
        self.listeners.push(listener);
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers events until every publisher has been dropped and the channel
    /// is drained.
    pub async fn run(mut self) {
        tracing::info!(listeners = self.listeners.len(), "notification worker started");
        while let Some(event) = self.receiver.recv().await {
            self.dispatch(&event).await;
        }
        tracing::info!("notification worker stopped");
    }

    /// Delivers one event to every listener, in registration order.
    #[tracing::instrument(skip(self, event), fields(payment_id = %event.payment_id))]
    pub async fn dispatch(&self, event: &PaymentCompleted) {
        for listener in &self.listeners {
            if let Err(e) = listener.on_payment_completed(event).await {
                metrics::counter!("notification_failures_total", "listener" => listener.name())
                    .increment(1);
                tracing::error!(listener = listener.name(), error = %e, "listener failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use common::{Money, PaymentId, ReservationId, ScheduleId, UserId};

    use super::*;
    use crate::BookingError;

    struct Counting {
        seen: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PaymentListener for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn on_payment_completed(&self, _event: &PaymentCompleted) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BookingError::ReservationNotFound(ReservationId::new(0)));
            }
            Ok(())
        }
    }

    fn event(id: i64) -> PaymentCompleted {
        PaymentCompleted {
            payment_id: PaymentId::new(id),
            user_id: UserId::new(1),
            reservation_id: ReservationId::new(id),
            schedule_id: ScheduleId::new(1),
            amount: Money::from_minor(10_000),
            idempotency_token: format!("token-{id}"),
            approved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_the_others() {
        let (publisher, receiver) = PaymentPublisher::channel(8);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut worker = NotificationWorker::new(receiver);
        worker.register(Box::new(Counting {
            seen: first.clone(),
            fail: true,
        }));
        worker.register(Box::new(Counting {
            seen: second.clone(),
            fail: false,
        }));
        assert_eq!(worker.listener_count(), 2);

        publisher.publish(event(1));
        publisher.publish(event(2));
        drop(publisher);
        worker.run().await;

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn publish_never_blocks_when_full_or_closed() {
        let (publisher, receiver) = PaymentPublisher::channel(1);

        publisher.publish(event(1));
        publisher.publish(event(2));
        drop(receiver);
        publisher.publish(event(3));
    }
}
