//! Notification fan-out.
//!
//! Every notification flows through one [`Notifier`]: a durable row in the
//! `notifications` table plus a single broadcast onto the WebSocket channel.
//! A [`DedupWindow`] in front of the channel suppresses redeliveries of the
//! same logical event within the window, keyed by `(ticket, kind, message)`,
//! so retried requests do not storm connected clients. Distinct events of the
//! same kind (say two different status transitions) always pass through.
//! Persistence is best-effort: a failed insert is logged and surfaced as a
//! response warning, never as a request failure.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::{DbHandle, NewNotification};
use crate::models::{Notification, Ticket};
use crate::ws::{WsMessage, broadcast_message};

/// Suppression window for repeated events on the same ticket.
const DEDUP_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TicketCreated,
    TicketStatusChanged,
    TicketUpdated,
    TicketDeleted,
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TicketCreated => "ticket_created",
            Self::TicketStatusChanged => "ticket_status_changed",
            Self::TicketUpdated => "ticket_updated",
            Self::TicketDeleted => "ticket_deleted",
            Self::Info => "info",
        }
    }
}

// ── Dedup window ─────────────────────────────────────────────────────

/// Tracks recently emitted events. `observe` returns `true` when the event is
/// fresh and should be emitted, `false` when the identical event was already
/// emitted within the TTL. The key carries the event's rendered detail, so
/// only true redeliveries match; two different transitions on the same ticket
/// are distinct events and both pass.
pub struct DedupWindow {
    ttl: Duration,
    seen: HashMap<(Option<i64>, NotificationKind, String), Instant>,
}

impl DedupWindow {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
        }
    }

    pub fn observe(&mut self, ticket_id: Option<i64>, kind: NotificationKind, detail: &str) -> bool {
        let now = Instant::now();
        self.seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        let key = (ticket_id, kind, detail.to_string());
        match self.seen.get(&key) {
            Some(_) => false,
            None => {
                self.seen.insert(key, now);
                true
            }
        }
    }
}

// ── Notifier ─────────────────────────────────────────────────────────

/// The single authoritative emitter of notification side effects.
#[derive(Clone)]
pub struct Notifier {
    db: DbHandle,
    tx: broadcast::Sender<String>,
    dedup: std::sync::Arc<Mutex<DedupWindow>>,
}

impl Notifier {
    pub fn new(db: DbHandle, tx: broadcast::Sender<String>) -> Self {
        Self {
            db,
            tx,
            dedup: std::sync::Arc::new(Mutex::new(DedupWindow::new(DEDUP_TTL))),
        }
    }

    pub fn with_ttl(db: DbHandle, tx: broadcast::Sender<String>, ttl: Duration) -> Self {
        Self {
            db,
            tx,
            dedup: std::sync::Arc::new(Mutex::new(DedupWindow::new(ttl))),
        }
    }

    /// Emit a ticket lifecycle notification: insert the durable row, then
    /// broadcast `NotificationCreated` plus the ticket event itself. Returns
    /// warnings for any best-effort step that failed.
    pub async fn emit(
        &self,
        kind: NotificationKind,
        title: String,
        message: String,
        ticket_id: Option<i64>,
        user_identifier: Option<String>,
        event: Option<WsMessage>,
    ) -> Vec<String> {
        let mut warnings = Vec::new();

        let fresh = {
            let mut dedup = match self.dedup.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            dedup.observe(ticket_id, kind, &message)
        };
        if !fresh {
            tracing::debug!(?kind, ?ticket_id, "suppressed duplicate notification");
            return warnings;
        }

        let payload = NewNotification {
            title,
            message,
            kind: Some(kind.as_str().to_string()),
            ticket_id,
            user_identifier,
        };
        match self
            .db
            .call(move |db| db.create_notification(payload))
            .await
        {
            Ok(notification) => {
                broadcast_message(&self.tx, &WsMessage::NotificationCreated { notification });
            }
            Err(e) => {
                tracing::warn!(?kind, "failed to persist notification: {}", e);
                warnings.push(format!("Failed to create notification: {}", e));
            }
        }

        if let Some(event) = event {
            broadcast_message(&self.tx, &event);
        }
        warnings
    }

    pub async fn ticket_created(&self, ticket: &Ticket) -> Vec<String> {
        self.emit(
            NotificationKind::TicketCreated,
            "New ticket created".to_string(),
            format!("Ticket #{}: {}", ticket.id, ticket.subject),
            Some(ticket.id),
            ticket.user_identifier.clone(),
            Some(WsMessage::TicketCreated {
                ticket: ticket.clone(),
            }),
        )
        .await
    }

    pub async fn ticket_status_changed(
        &self,
        ticket: &Ticket,
        from_status: &str,
        to_status: &str,
    ) -> Vec<String> {
        self.emit(
            NotificationKind::TicketStatusChanged,
            "Ticket status changed".to_string(),
            format!(
                "Ticket #{} moved from {} to {}",
                ticket.id, from_status, to_status
            ),
            Some(ticket.id),
            ticket.user_identifier.clone(),
            Some(WsMessage::TicketStatusChanged {
                ticket_id: ticket.id,
                subject: ticket.subject.clone(),
                from_status: from_status.to_string(),
                to_status: to_status.to_string(),
            }),
        )
        .await
    }

    pub async fn ticket_deleted(&self, ticket_id: i64, subject: &str) -> Vec<String> {
        self.emit(
            NotificationKind::TicketDeleted,
            "Ticket deleted".to_string(),
            format!("Ticket #{}: {}", ticket_id, subject),
            Some(ticket_id),
            None,
            Some(WsMessage::TicketDeleted { ticket_id }),
        )
        .await
    }
}

// ── Client-side feed reducer ─────────────────────────────────────────

/// Events a feed consumer derives from the broadcast stream.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Created(Notification),
    Marked { ids: Vec<i64>, read: bool },
    Removed(Vec<i64>),
    Cleared,
}

impl FeedEvent {
    /// Map a broadcast message onto a feed event, if it affects the feed.
    pub fn from_ws(msg: &WsMessage) -> Option<Self> {
        match msg {
            WsMessage::NotificationCreated { notification } => {
                Some(Self::Created(notification.clone()))
            }
            WsMessage::NotificationsRead { ids, read } => Some(Self::Marked {
                ids: ids.clone(),
                read: *read,
            }),
            WsMessage::NotificationsDeleted { ids } => Some(Self::Removed(ids.clone())),
            WsMessage::NotificationsCleared { .. } => Some(Self::Cleared),
            _ => None,
        }
    }
}

/// Single-writer in-memory view of the notification feed. All mutation goes
/// through [`NotificationFeed::apply`], so the unread count can never drift
/// from the item list.
#[derive(Debug, Default)]
pub struct NotificationFeed {
    items: Vec<Notification>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Created(n) => {
                // Newest first; re-delivery of an id already present is a no-op.
                if !self.items.iter().any(|i| i.id == n.id) {
                    self.items.insert(0, n);
                }
            }
            FeedEvent::Marked { ids, read } => {
                for item in self.items.iter_mut().filter(|i| ids.contains(&i.id)) {
                    item.read = read;
                    if !read {
                        item.read_at = None;
                    }
                }
            }
            FeedEvent::Removed(ids) => {
                self.items.retain(|i| !ids.contains(&i.id));
            }
            FeedEvent::Cleared => self.items.clear(),
        }
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|i| !i.read).count()
    }
}
