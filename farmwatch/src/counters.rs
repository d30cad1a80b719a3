//! Unread-notification and unviewed-activity counters.
//!
//! `CounterBook` is plain state owned by the live session task. Every read is
//! issued as a `ReadTicket` stamped with the session generation and a
//! per-counter epoch; results whose ticket no longer matches are dropped, so a
//! late response for a previous user or a read that raced a "view" can never
//! overwrite newer state. Tickets also carry a sequence number so that reads
//! completing out of order never roll a counter back. A committed mark write
//! bumps the epoch again, dropping reads that ran while the write was pending.

use crate::errors::Result;
use crate::metrics::{COUNT_READ_FAILURES_TOTAL, STALE_READS_TOTAL};
use crate::model::UserId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Notifications,
    Activity,
}

impl CounterKind {
    pub const ALL: [CounterKind; 2] = [CounterKind::Notifications, CounterKind::Activity];
}

impl std::str::FromStr for CounterKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "notifications" => Ok(CounterKind::Notifications),
            "activity" => Ok(CounterKind::Activity),
            other => Err(format!("unknown counter: {}", other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "count", rename_all = "snake_case")]
pub enum Counter {
    #[default]
    Unknown,
    Loading,
    Settled(u64),
}

impl Counter {
    pub fn value(self) -> u64 {
        match self {
            Counter::Settled(n) => n,
            Counter::Unknown | Counter::Loading => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTicket {
    pub user_id: UserId,
    pub kind: CounterKind,
    generation: u64,
    epoch: u64,
    seq: u64,
}

/// Issued by `view`; handed back once the server-side mark write finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkTicket {
    pub user_id: UserId,
    pub kind: CounterKind,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadApplied {
    Settled(u64),
    Stale,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub user_id: Option<UserId>,
    pub notifications: Counter,
    pub activity: Counter,
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    counter: Counter,
    epoch: u64,
    issued: u64,
    applied: u64,
}

#[derive(Debug, Default)]
pub struct CounterBook {
    user_id: Option<UserId>,
    generation: u64,
    notifications: Slot,
    activity: Slot,
}

impl CounterBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn slot_mut(&mut self, kind: CounterKind) -> &mut Slot {
        match kind {
            CounterKind::Notifications => &mut self.notifications,
            CounterKind::Activity => &mut self.activity,
        }
    }

    fn slot(&self, kind: CounterKind) -> &Slot {
        match kind {
            CounterKind::Notifications => &self.notifications,
            CounterKind::Activity => &self.activity,
        }
    }

    pub fn counter(&self, kind: CounterKind) -> Counter {
        self.slot(kind).counter
    }

    /// Starts tracking `user`. Returns the new generation.
    pub fn begin_session(&mut self, user: UserId) -> u64 {
        self.generation += 1;
        self.user_id = Some(user);
        for kind in CounterKind::ALL {
            self.slot_mut(kind).counter = Counter::Unknown;
        }
        debug!("Counter session {} started for {}", self.generation, user);
        self.generation
    }

    /// Without a session both counters are pinned to zero.
    pub fn end_session(&mut self) -> u64 {
        self.generation += 1;
        self.user_id = None;
        for kind in CounterKind::ALL {
            self.slot_mut(kind).counter = Counter::Settled(0);
        }
        self.generation
    }

    pub fn accepts_push(&self, user: UserId) -> bool {
        self.user_id == Some(user)
    }

    /// Marks `kind` as loading and returns the ticket its result must present.
    pub fn issue_read(&mut self, kind: CounterKind) -> Option<ReadTicket> {
        let user_id = self.user_id?;
        let generation = self.generation;
        let slot = self.slot_mut(kind);
        // A settled value stays visible while a refresh is in flight.
        if !matches!(slot.counter, Counter::Settled(_)) {
            slot.counter = Counter::Loading;
        }
        slot.issued += 1;
        Some(ReadTicket {
            user_id,
            kind,
            generation,
            epoch: slot.epoch,
            seq: slot.issued,
        })
    }

    fn is_current(&self, ticket: &ReadTicket) -> bool {
        self.user_id == Some(ticket.user_id)
            && self.generation == ticket.generation
            && self.slot(ticket.kind).epoch == ticket.epoch
            && self.slot(ticket.kind).applied < ticket.seq
    }

    /// Applies a finished read. Failures count as zero.
    pub fn apply_read(&mut self, ticket: ReadTicket, result: Result<u64>) -> ReadApplied {
        if !self.is_current(&ticket) {
            STALE_READS_TOTAL.inc();
            debug!("Discarding stale {:?} read for {}", ticket.kind, ticket.user_id);
            return ReadApplied::Stale;
        }

        let count = match result {
            Ok(n) => n,
            Err(e) => {
                COUNT_READ_FAILURES_TOTAL.inc();
                warn!("Failed to read {:?} count for {}: {}", ticket.kind, ticket.user_id, e);
                0
            }
        };

        let slot = self.slot_mut(ticket.kind);
        slot.counter = Counter::Settled(count);
        slot.applied = ticket.seq;
        ReadApplied::Settled(count)
    }

    /// Optimistically zeroes `kind`. Reads issued before this call are
    /// invalidated.
    pub fn view(&mut self, kind: CounterKind) -> Option<MarkTicket> {
        let generation = self.generation;
        let user = self.user_id;
        let slot = self.slot_mut(kind);
        slot.epoch += 1;
        slot.counter = Counter::Settled(0);
        user.map(|user_id| MarkTicket {
            user_id,
            kind,
            generation,
        })
    }

    /// Records a committed mark write. Reads issued while it was in flight may
    /// have counted rows it has since cleared, so they are invalidated and the
    /// caller should read again. Returns false when the session has moved on.
    pub fn mark_committed(&mut self, ticket: MarkTicket) -> bool {
        if self.user_id != Some(ticket.user_id) || self.generation != ticket.generation {
            return false;
        }
        self.slot_mut(ticket.kind).epoch += 1;
        true
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            user_id: self.user_id,
            notifications: self.counter(CounterKind::Notifications),
            activity: self.counter(CounterKind::Activity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn test_initial_read_settles() {
        let mut book = CounterBook::new();
        let user = UserId::new();
        book.begin_session(user);

        let ticket = book.issue_read(CounterKind::Notifications).unwrap();
        assert_eq!(book.counter(CounterKind::Notifications), Counter::Loading);
        assert_eq!(book.apply_read(ticket, Ok(4)), ReadApplied::Settled(4));
        assert_eq!(book.counter(CounterKind::Notifications), Counter::Settled(4));
        assert_eq!(book.counter(CounterKind::Activity), Counter::Unknown);
    }

    #[test]
    fn test_no_session_forces_zero_and_issues_nothing() {
        let mut book = CounterBook::new();
        book.end_session();
        assert!(book.issue_read(CounterKind::Activity).is_none());
        assert_eq!(book.snapshot().notifications, Counter::Settled(0));
        assert_eq!(book.snapshot().activity, Counter::Settled(0));
    }

    #[test]
    fn test_read_error_fails_open_to_zero() {
        let mut book = CounterBook::new();
        book.begin_session(UserId::new());
        let ticket = book.issue_read(CounterKind::Activity).unwrap();
        let applied = book.apply_read(ticket, Err(Error::Validation("boom".into())));
        assert_eq!(applied, ReadApplied::Settled(0));
    }

    #[test]
    fn test_view_zeroes_regardless_of_prior_value() {
        for prior in [0u64, 1, 17, u64::MAX] {
            let mut book = CounterBook::new();
            book.begin_session(UserId::new());
            let ticket = book.issue_read(CounterKind::Notifications).unwrap();
            book.apply_read(ticket, Ok(prior));

            book.view(CounterKind::Notifications);
            assert_eq!(book.counter(CounterKind::Notifications), Counter::Settled(0));
        }
    }

    #[test]
    fn test_read_issued_before_view_is_discarded() {
        let mut book = CounterBook::new();
        book.begin_session(UserId::new());
        let in_flight = book.issue_read(CounterKind::Notifications).unwrap();

        book.view(CounterKind::Notifications);
        assert_eq!(book.apply_read(in_flight, Ok(9)), ReadApplied::Stale);
        assert_eq!(book.counter(CounterKind::Notifications).value(), 0);
    }

    #[test]
    fn test_read_racing_mark_write_is_discarded_after_commit() {
        let mut book = CounterBook::new();
        book.begin_session(UserId::new());
        let mark = book.view(CounterKind::Notifications).unwrap();

        let during_write = book.issue_read(CounterKind::Notifications).unwrap();
        assert_eq!(book.apply_read(during_write, Ok(5)), ReadApplied::Settled(5));

        assert!(book.mark_committed(mark));
        let after = book.issue_read(CounterKind::Notifications).unwrap();
        assert_eq!(book.apply_read(after, Ok(0)), ReadApplied::Settled(0));
        assert_eq!(book.counter(CounterKind::Notifications), Counter::Settled(0));
    }

    #[test]
    fn test_mark_commit_for_previous_session_is_ignored() {
        let mut book = CounterBook::new();
        book.begin_session(UserId::new());
        let mark = book.view(CounterKind::Activity).unwrap();
        book.begin_session(UserId::new());
        assert!(!book.mark_committed(mark));
    }

    #[test]
    fn test_late_response_for_previous_user_is_discarded() {
        let mut book = CounterBook::new();
        let alice = UserId::new();
        let bob = UserId::new();

        book.begin_session(alice);
        let alice_read = book.issue_read(CounterKind::Activity).unwrap();

        book.begin_session(bob);
        let bob_read = book.issue_read(CounterKind::Activity).unwrap();

        assert_eq!(book.apply_read(alice_read, Ok(12)), ReadApplied::Stale);
        assert_eq!(book.apply_read(bob_read, Ok(3)), ReadApplied::Settled(3));
        assert_eq!(book.snapshot().user_id, Some(bob));
    }

    #[test]
    fn test_same_user_new_generation_discards_old_reads() {
        let mut book = CounterBook::new();
        let user = UserId::new();
        book.begin_session(user);
        let old = book.issue_read(CounterKind::Notifications).unwrap();
        book.end_session();
        book.begin_session(user);
        assert_eq!(book.apply_read(old, Ok(5)), ReadApplied::Stale);
    }

    #[test]
    fn test_push_only_accepted_for_active_user() {
        let mut book = CounterBook::new();
        let user = UserId::new();
        assert!(!book.accepts_push(user));
        book.begin_session(user);
        assert!(book.accepts_push(user));
        assert!(!book.accepts_push(UserId::new()));
    }

    #[test]
    fn test_settled_value_stays_visible_during_refresh() {
        let mut book = CounterBook::new();
        book.begin_session(UserId::new());
        let first = book.issue_read(CounterKind::Notifications).unwrap();
        book.apply_read(first, Ok(2));

        let refresh = book.issue_read(CounterKind::Notifications).unwrap();
        assert_eq!(book.counter(CounterKind::Notifications), Counter::Settled(2));
        book.apply_read(refresh, Ok(5));
        assert_eq!(book.counter(CounterKind::Notifications), Counter::Settled(5));
    }

    #[test]
    fn test_out_of_order_completion_does_not_roll_back() {
        let mut book = CounterBook::new();
        book.begin_session(UserId::new());
        let older = book.issue_read(CounterKind::Activity).unwrap();
        let newer = book.issue_read(CounterKind::Activity).unwrap();

        assert_eq!(book.apply_read(newer, Ok(3)), ReadApplied::Settled(3));
        assert_eq!(book.apply_read(older, Ok(2)), ReadApplied::Stale);
        assert_eq!(book.counter(CounterKind::Activity), Counter::Settled(3));
    }

    #[test]
    fn test_kind_parses_from_path_segment() {
        assert_eq!("activity".parse::<CounterKind>().unwrap(), CounterKind::Activity);
        assert!("likes".parse::<CounterKind>().is_err());
    }
}
