//! Live counters driven by push subscriptions.
//!
//! A single `LiveSession` task owns the `CounterBook`. Everything that can
//! change a counter arrives as a message: user switches, push events,
//! explicit refreshes, "screen viewed" actions, completed count reads and
//! finished mark writes.
//! Push payloads are never applied directly; each one only schedules a fresh
//! server-side count.

use crate::backend::Backend;
use crate::counters::{CounterBook, CounterKind, CounterSnapshot, MarkTicket, ReadTicket};
use crate::errors::{Error, Result};
use crate::metrics::{MARK_WRITE_FAILURES_TOTAL, PUSH_EVENTS_TOTAL, STALE_PUSH_EVENTS_TOTAL};
use crate::model::UserId;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Tables that emit per-user insert events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushTable {
    Notifications,
    ActivityLogs,
}

impl PushTable {
    pub const ALL: [PushTable; 2] = [PushTable::Notifications, PushTable::ActivityLogs];

    pub fn as_str(self) -> &'static str {
        match self {
            PushTable::Notifications => "notifications",
            PushTable::ActivityLogs => "activity_logs",
        }
    }

    pub fn counter(self) -> CounterKind {
        match self {
            PushTable::Notifications => CounterKind::Notifications,
            PushTable::ActivityLogs => CounterKind::Activity,
        }
    }
}

/// An inserted row delivered by the push channel.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub table: PushTable,
    pub user_id: UserId,
    pub payload: serde_json::Value,
}

/// Opens and closes the per-user push subscriptions.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn subscribe(&self, user: UserId) -> Result<()>;

    async fn unsubscribe(&self, user: UserId) -> Result<()>;
}

#[derive(Debug)]
pub enum Command {
    SetUser(Option<UserId>),
    Refresh(CounterKind),
    View(CounterKind),
    Push(PushEvent),
}

/// Cloneable front end of a running `LiveSession`.
#[derive(Debug, Clone)]
pub struct LiveHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<CounterSnapshot>,
}

impl LiveHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| Error::ChannelSend)
    }

    pub async fn set_user(&self, user: Option<UserId>) -> Result<()> {
        self.send(Command::SetUser(user)).await
    }

    pub async fn refresh(&self, kind: CounterKind) -> Result<()> {
        self.send(Command::Refresh(kind)).await
    }

    pub async fn view(&self, kind: CounterKind) -> Result<()> {
        self.send(Command::View(kind)).await
    }

    pub async fn push(&self, event: PushEvent) -> Result<()> {
        self.send(Command::Push(event)).await
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        *self.snapshot.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<CounterSnapshot> {
        self.snapshot.clone()
    }
}

pub struct LiveSession {
    backend: Arc<dyn Backend>,
    subscriber: Box<dyn Subscriber>,
    book: CounterBook,
    commands: mpsc::Receiver<Command>,
    reads_tx: mpsc::Sender<(ReadTicket, Result<u64>)>,
    reads_rx: mpsc::Receiver<(ReadTicket, Result<u64>)>,
    marks_tx: mpsc::Sender<(MarkTicket, Result<()>)>,
    marks_rx: mpsc::Receiver<(MarkTicket, Result<()>)>,
    snapshot: watch::Sender<CounterSnapshot>,
}

impl LiveSession {
    pub fn new(backend: Arc<dyn Backend>, subscriber: Box<dyn Subscriber>, capacity: usize) -> (Self, LiveHandle) {
        let (commands_tx, commands) = mpsc::channel(capacity.max(1));
        let (reads_tx, reads_rx) = mpsc::channel(capacity.max(1));
        let (marks_tx, marks_rx) = mpsc::channel(capacity.max(1));
        let (snapshot, snapshot_rx) = watch::channel(CounterSnapshot::default());

        let session = Self {
            backend,
            subscriber,
            book: CounterBook::new(),
            commands,
            reads_tx,
            reads_rx,
            marks_tx,
            marks_rx,
            snapshot,
        };
        let handle = LiveHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        };
        (session, handle)
    }

    /// Runs until every `LiveHandle` is dropped.
    pub async fn run(mut self) {
        info!("Live session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some((ticket, result)) = self.reads_rx.recv() => {
                    self.book.apply_read(ticket, result);
                    self.publish();
                }
                Some((ticket, result)) = self.marks_rx.recv() => {
                    self.on_marked(ticket, result);
                    self.publish();
                }
            }
        }

        if let Some(user) = self.book.user_id() {
            if let Err(e) = self.subscriber.unsubscribe(user).await {
                warn!("Failed to unsubscribe {} on shutdown: {}", user, e);
            }
        }
        info!("Live session stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SetUser(user) => self.switch_user(user).await,
            Command::Refresh(kind) => self.spawn_read(kind),
            Command::View(kind) => self.view(kind),
            Command::Push(event) => self.on_push(event),
        }
        self.publish();
    }

    async fn switch_user(&mut self, next: Option<UserId>) {
        let current = self.book.user_id();
        if next == current && self.book.generation() > 0 {
            return;
        }

        // The old subscription must be torn down before a new one is requested,
        // otherwise both would trigger refreshes for a while.
        if let Some(prev) = current {
            if let Err(e) = self.subscriber.unsubscribe(prev).await {
                warn!("Failed to unsubscribe {}: {}", prev, e);
            }
        }

        match next {
            None => {
                self.book.end_session();
                info!("No active session, counters pinned to zero");
            }
            Some(user) => {
                let generation = self.book.begin_session(user);
                info!("Tracking counters for {} (generation {})", user, generation);
                if let Err(e) = self.subscriber.subscribe(user).await {
                    error!("Failed to subscribe to push events for {}: {}", user, e);
                }
                for kind in CounterKind::ALL {
                    self.spawn_read(kind);
                }
            }
        }
    }

    fn on_push(&mut self, event: PushEvent) {
        PUSH_EVENTS_TOTAL.inc();
        if !self.book.accepts_push(event.user_id) {
            STALE_PUSH_EVENTS_TOTAL.inc();
            debug!("Ignoring {} event for inactive user {}", event.table.as_str(), event.user_id);
            return;
        }
        debug!("New {} row for {}, refreshing", event.table.as_str(), event.user_id);
        self.spawn_read(event.table.counter());
    }

    fn spawn_read(&mut self, kind: CounterKind) {
        let Some(ticket) = self.book.issue_read(kind) else {
            return;
        };
        let backend = Arc::clone(&self.backend);
        let tx = self.reads_tx.clone();
        tokio::spawn(async move {
            let result = backend.count(kind, ticket.user_id).await;
            // The session may have shut down; nothing left to update then.
            let _ = tx.send((ticket, result)).await;
        });
    }

    /// Zeroes the counter immediately and writes the change in the background.
    fn view(&mut self, kind: CounterKind) {
        let Some(ticket) = self.book.view(kind) else {
            return;
        };
        let backend = Arc::clone(&self.backend);
        let tx = self.marks_tx.clone();
        tokio::spawn(async move {
            let result = backend.mark_seen(kind, ticket.user_id).await;
            let _ = tx.send((ticket, result)).await;
        });
    }

    /// A failed write is logged and the local zero stands. A committed one
    /// invalidates reads issued while it was pending and reads again.
    fn on_marked(&mut self, ticket: MarkTicket, result: Result<()>) {
        if let Err(e) = result {
            MARK_WRITE_FAILURES_TOTAL.inc();
            error!("Failed to mark {:?} as seen for {}: {}", ticket.kind, ticket.user_id, e);
            return;
        }
        debug!("Marked {:?} as seen for {}", ticket.kind, ticket.user_id);
        if self.book.mark_committed(ticket) {
            self.spawn_read(ticket.kind);
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.book.snapshot());
    }
}
