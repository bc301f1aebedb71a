// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process fan-out of renewal events.
//!
//! Request, device and renewal events share one tokio broadcast channel.
//! Nothing here is persisted; the daemon's audit logger and tests are the
//! only consumers.

use crate::domain::events::{DeviceEvent, RenewalEvent, RequestEvent};
use crate::domain::request::RequestId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{trace, warn};

const DEFAULT_BUFFER: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Request(RequestEvent),
    Device(DeviceEvent),
    Renewal(RenewalEvent),
}

impl DomainEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Device(_) => "device",
            Self::Renewal(_) => "renewal",
        }
    }
}

/// Cloneable handle; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// `capacity` bounds how far a receiver may fall behind before it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_BUFFER)
    }

    pub fn publish_request_event(&self, event: RequestEvent) {
        self.emit(DomainEvent::Request(event));
    }

    pub fn publish_device_event(&self, event: DeviceEvent) {
        self.emit(DomainEvent::Device(event));
    }

    pub fn publish_renewal_event(&self, event: RenewalEvent) {
        self.emit(DomainEvent::Renewal(event));
    }

    // A send with no receivers is not an error for us.
    fn emit(&self, event: DomainEvent) {
        let kind = event.kind();
        let delivered = self.sender.send(event).unwrap_or_default();
        trace!(kind, delivered, "renewal event emitted");
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            inner: self.sender.subscribe(),
        }
    }

    /// Receiver that only yields events about `request_id`.
    pub fn subscribe_request(&self, request_id: RequestId) -> RequestEventReceiver {
        RequestEventReceiver {
            inner: self.subscribe(),
            request_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn lagged(skipped: u64) -> EventBusError {
    warn!(skipped, "event subscriber fell behind");
    EventBusError::Lagged(skipped)
}

pub struct EventReceiver {
    inner: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.inner.recv().await.map_err(|e| match e {
            RecvError::Closed => EventBusError::Closed,
            RecvError::Lagged(n) => lagged(n),
        })
    }

    /// Non-blocking; `Empty` when nothing is queued.
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.inner.try_recv().map_err(|e| match e {
            TryRecvError::Empty => EventBusError::Empty,
            TryRecvError::Closed => EventBusError::Closed,
            TryRecvError::Lagged(n) => lagged(n),
        })
    }
}

pub struct RequestEventReceiver {
    inner: EventReceiver,
    request_id: RequestId,
}

impl RequestEventReceiver {
    pub async fn recv(&mut self) -> Result<RequestEvent, EventBusError> {
        loop {
            match self.inner.recv().await? {
                DomainEvent::Request(event) if event.request_id() == self.request_id => {
                    return Ok(event)
                }
                _ => continue,
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("renewal event channel closed")]
    Closed,

    #[error("no renewal event queued")]
    Empty,

    #[error("subscriber missed {0} renewal events")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::organization::OrgId;
    use crate::domain::renewal::PaymentToken;
    use chrono::Utc;

    fn rejected(request_id: RequestId) -> RequestEvent {
        RequestEvent::RequestRejected {
            request_id,
            rejected_by: OrgId::new(),
            rejected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn approval_reaches_subscriber_once() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let request_id = RequestId::new();

        bus.publish_request_event(RequestEvent::RequestApproved {
            request_id,
            approved_by: OrgId::new(),
            approved_at: Utc::now(),
        });

        let DomainEvent::Request(event) = rx.recv().await.unwrap() else {
            panic!("expected a request event");
        };
        assert_eq!(event.request_id(), request_id);
        assert!(matches!(rx.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn request_receiver_skips_other_requests() {
        let bus = EventBus::new(10);
        let watched = RequestId::new();
        let mut rx = bus.subscribe_request(watched);

        bus.publish_device_event(DeviceEvent::DeviceRemoved {
            device_id: crate::domain::device::DeviceId::new(),
            removed_by: OrgId::new(),
            last_status: crate::domain::device::DeviceStatus::Expired,
            removed_at: Utc::now(),
        });
        bus.publish_request_event(rejected(RequestId::new()));
        bus.publish_request_event(rejected(watched));

        assert_eq!(rx.recv().await.unwrap().request_id(), watched);
    }

    #[tokio::test]
    async fn slow_subscriber_reports_lag() {
        let bus = EventBus::new(2);
        let mut fast = bus.subscribe();
        let mut slow = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        for n in 0..4 {
            bus.publish_renewal_event(RenewalEvent::BulkRenewalReplayed {
                payment_token: PaymentToken::new(format!("tok_{}", n)),
                replayed_at: Utc::now(),
            });
        }

        assert!(matches!(slow.try_recv(), Err(EventBusError::Lagged(2))));
        assert!(slow.try_recv().is_ok());
        assert!(matches!(fast.recv().await, Err(EventBusError::Lagged(2))));
    }
}
