//! Event-log consumer.
//!
//! The consumer polls batches from an [`EventLog`], hands each event to the
//! [`NotificationDispatcher`] and commits offsets once every event up to the
//! commit point is settled.
//!
//! [`StoreEventLog`] is the production log: an outbox table written in the
//! same transaction as the state change that raised the event.
//! [`InMemoryEventLog`] serves tests and single-process tools.
//!
//! Within a batch, events that share a recipient run one after another in log
//! order; events with disjoint recipients run concurrently. Redelivery after a
//! crash is harmless because the dispatcher records each (event, recipient)
//! delivery in the same transaction as the notification.

use crate::dispatcher::NotificationDispatcher;
use crate::error::NotifyError;
use crate::event::EventEnvelope;
use agora_core::{Clock, UserId};
use agora_store::{Database, StoredDeadLetter};
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Position in the log.
    pub offset: u64,
    /// Encoded [`EventEnvelope`].
    pub payload: Vec<u8>,
}

/// A record that could not be handled, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// The record.
    pub record: LogRecord,
    /// Why it was set aside.
    pub reason: String,
}

/// A durable, ordered log of encoded events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Returns up to `max` records after the last committed offset.
    ///
    /// Records are redelivered until committed.
    async fn poll(&self, max: usize) -> Result<Vec<LogRecord>, NotifyError>;

    /// Commits every record up to and including `offset`.
    async fn commit(&self, offset: u64) -> Result<(), NotifyError>;

    /// Sets a record aside so it no longer blocks the log.
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), NotifyError>;

    /// Records appended but not yet committed.
    async fn backlog(&self) -> Result<usize, NotifyError>;
}

#[derive(Debug, Default)]
struct LogState {
    pending: VecDeque<LogRecord>,
    next_offset: u64,
    committed: Option<u64>,
    dead: Vec<DeadLetter>,
}

/// An [`EventLog`] held in memory.
///
/// Committed records are dropped, so memory tracks the backlog rather than
/// everything ever appended.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    state: Mutex<LogState>,
}

impl InMemoryEventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an encoded record, returning its offset.
    pub fn append(&self, payload: Vec<u8>) -> u64 {
        let mut state = self.state.lock();
        let offset = state.next_offset;
        state.next_offset += 1;
        state.pending.push_back(LogRecord { offset, payload });
        offset
    }

    /// Encodes and appends an event.
    pub fn publish(&self, envelope: &EventEnvelope) -> Result<u64, NotifyError> {
        Ok(self.append(envelope.encode()?))
    }

    /// The last committed offset, if any.
    #[must_use]
    pub fn committed(&self) -> Option<u64> {
        self.state.lock().committed
    }

    /// Records not yet committed.
    #[must_use]
    pub fn lag(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Dead letters so far.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead.clone()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn poll(&self, max: usize) -> Result<Vec<LogRecord>, NotifyError> {
        let state = self.state.lock();
        Ok(state.pending.iter().take(max).cloned().collect())
    }

    async fn commit(&self, offset: u64) -> Result<(), NotifyError> {
        let mut state = self.state.lock();
        if offset >= state.next_offset {
            return Err(NotifyError::Log(format!("offset {offset} past end of log")));
        }
        while state.pending.front().is_some_and(|record| record.offset <= offset) {
            state.pending.pop_front();
        }
        state.committed = state.committed.max(Some(offset));
        Ok(())
    }

    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), NotifyError> {
        self.state.lock().dead.push(letter);
        Ok(())
    }

    async fn backlog(&self) -> Result<usize, NotifyError> {
        Ok(self.lag())
    }
}

/// An [`EventLog`] kept in the database's `event_log` outbox table.
///
/// Survives restarts; committed records are deleted.
#[derive(Debug, Clone)]
pub struct StoreEventLog {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl StoreEventLog {
    /// Creates a log over `db`.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Encodes and appends an event in its own transaction.
    ///
    /// Handlers that change state should instead append with
    /// [`agora_store::Transaction::append_event`] inside their own
    /// transaction.
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<u64, NotifyError> {
        let payload = envelope.encode()?;
        let now = self.clock.now();
        let position = self
            .db
            .run_tx(move |tx| Box::pin(async move { tx.append_event(&payload, now).await }))
            .await?;
        Ok(offset(position))
    }

    /// Dead letters so far.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, NotifyError> {
        let letters = self.db.connection().await?.dead_letters().await?;
        Ok(letters
            .into_iter()
            .map(|letter| DeadLetter {
                record: LogRecord {
                    offset: offset(letter.position),
                    payload: letter.payload,
                },
                reason: letter.reason,
            })
            .collect())
    }
}

fn offset(position: i64) -> u64 {
    u64::try_from(position).unwrap_or_default()
}

fn position(offset: u64) -> Result<i64, NotifyError> {
    i64::try_from(offset).map_err(|_| NotifyError::Log(format!("offset {offset} out of range")))
}

#[async_trait]
impl EventLog for StoreEventLog {
    async fn poll(&self, max: usize) -> Result<Vec<LogRecord>, NotifyError> {
        let events = self.db.connection().await?.pending_events(max).await?;
        Ok(events
            .into_iter()
            .map(|event| LogRecord {
                offset: offset(event.position),
                payload: event.payload,
            })
            .collect())
    }

    async fn commit(&self, offset: u64) -> Result<(), NotifyError> {
        let through = position(offset)?;
        let dropped = self
            .db
            .run_tx(move |tx| Box::pin(async move { tx.commit_events(through).await }))
            .await?;
        tracing::trace!(through, dropped, "event log committed");
        Ok(())
    }

    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), NotifyError> {
        let letter = StoredDeadLetter {
            position: position(letter.record.offset)?,
            payload: letter.record.payload,
            reason: letter.reason,
        };
        let now = self.clock.now();
        self.db
            .run_tx(move |tx| Box::pin(async move { tx.dead_letter_event(&letter, now).await }))
            .await?;
        Ok(())
    }

    async fn backlog(&self) -> Result<usize, NotifyError> {
        Ok(self.db.connection().await?.event_backlog().await?)
    }
}

/// Polling and retry knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Records per poll.
    pub batch_size: usize,
    /// Sleep when the log is drained.
    pub poll_interval: Duration,
    /// Attempts per event before a transient failure stalls its lane.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Retry delay ceiling.
    pub backoff_max: Duration,
}

impl ConsumerSettings {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(250),
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
        }
    }
}

/// Outcome of one poll-and-handle round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records polled.
    pub polled: usize,
    /// Records handled successfully.
    pub handled: usize,
    /// Records set aside as permanently failing.
    pub dead_lettered: usize,
    /// Records left for redelivery after transient failures.
    pub stalled: usize,
    /// Offset committed at the end of the round.
    pub committed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Handled,
    DeadLettered,
    Stalled,
}

/// Drives a dispatcher from an event log.
pub struct Consumer {
    log: Arc<dyn EventLog>,
    dispatcher: NotificationDispatcher,
    settings: ConsumerSettings,
    backlog: AtomicUsize,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Consumer {
    /// Creates a consumer.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        dispatcher: NotificationDispatcher,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            log,
            dispatcher,
            settings,
            backlog: AtomicUsize::new(0),
        }
    }

    /// Uncommitted records as of the end of the last round.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    async fn refresh_backlog(&self) {
        match self.log.backlog().await {
            Ok(pending) => self.backlog.store(pending, Ordering::Relaxed),
            Err(err) => tracing::debug!(error = %err, "could not read event backlog"),
        }
    }

    /// Polls until `shutdown` completes.
    ///
    /// A batch cut short by shutdown is not committed and will be redelivered.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        tracing::info!(batch_size = self.settings.batch_size, "notification consumer started");
        loop {
            let round = tokio::select! {
                biased;
                () = &mut shutdown => break,
                round = self.run_once() => round,
            };
            let idle = match round {
                Ok(report) => report.polled == 0 || report.stalled > 0,
                Err(err) => {
                    tracing::warn!(error = %err, "event log poll failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    biased;
                    () = &mut shutdown => break,
                    () = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }
        tracing::info!("notification consumer stopped");
    }

    /// Polls one batch, handles it and commits what settled.
    pub async fn run_once(&self) -> Result<BatchReport, NotifyError> {
        let records = self.log.poll(self.settings.batch_size).await?;
        let mut report = BatchReport {
            polled: records.len(),
            ..BatchReport::default()
        };
        if records.is_empty() {
            self.backlog.store(0, Ordering::Relaxed);
            return Ok(report);
        }

        let mut settled: HashMap<u64, Settled> = HashMap::new();
        let mut decoded = Vec::new();
        for record in &records {
            match EventEnvelope::decode(&record.payload) {
                Ok(envelope) => decoded.push((record.offset, envelope)),
                Err(err) => {
                    let outcome = self.set_aside(record, &err).await;
                    settled.insert(record.offset, outcome);
                }
            }
        }

        let recipients: Vec<Vec<UserId>> = decoded
            .iter()
            .map(|(_, envelope)| envelope.event.recipients())
            .collect();
        let lanes = partition_lanes(&recipients);
        let results = join_all(lanes.into_iter().map(|lane| {
            let events: Vec<(u64, &EventEnvelope)> = lane
                .into_iter()
                .map(|i| (decoded[i].0, &decoded[i].1))
                .collect();
            let records = &records;
            async move { self.run_lane(events, records).await }
        }))
        .await;
        for lane in results {
            settled.extend(lane);
        }

        for outcome in settled.values() {
            match outcome {
                Settled::Handled => report.handled += 1,
                Settled::DeadLettered => report.dead_lettered += 1,
                Settled::Stalled => {}
            }
        }
        report.stalled = report.polled - report.handled - report.dead_lettered;

        // Commit up to the first record that is not settled.
        let commit_to = records
            .iter()
            .take_while(|record| {
                matches!(
                    settled.get(&record.offset),
                    Some(Settled::Handled | Settled::DeadLettered)
                )
            })
            .last()
            .map(|record| record.offset);
        if let Some(offset) = commit_to {
            self.log.commit(offset).await?;
            report.committed = Some(offset);
        }
        self.refresh_backlog().await;

        tracing::debug!(
            polled = report.polled,
            handled = report.handled,
            dead_lettered = report.dead_lettered,
            stalled = report.stalled,
            committed = report.committed,
            "notification batch done"
        );
        Ok(report)
    }

    /// Handles one lane in order, stopping at the first stalled event.
    async fn run_lane(
        &self,
        events: Vec<(u64, &EventEnvelope)>,
        records: &[LogRecord],
    ) -> Vec<(u64, Settled)> {
        let mut settled = Vec::with_capacity(events.len());
        for (offset, envelope) in events {
            let outcome = self.handle_with_retry(offset, envelope, records).await;
            settled.push((offset, outcome));
            if outcome == Settled::Stalled {
                break;
            }
        }
        settled
    }

    async fn handle_with_retry(
        &self,
        offset: u64,
        envelope: &EventEnvelope,
        records: &[LogRecord],
    ) -> Settled {
        let mut attempt = 1;
        loop {
            match self.dispatcher.handle(envelope).await {
                Ok(_) => return Settled::Handled,
                Err(err) if err.is_transient() && attempt < self.settings.max_attempts => {
                    let delay = self.settings.backoff(attempt);
                    tracing::warn!(
                        offset,
                        event_id = %envelope.event_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "notification event failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    tracing::error!(
                        offset,
                        event_id = %envelope.event_id,
                        attempts = attempt,
                        error = %err,
                        "notification event still failing, leaving for redelivery"
                    );
                    return Settled::Stalled;
                }
                Err(err) => {
                    let Some(record) = records.iter().find(|r| r.offset == offset) else {
                        return Settled::Stalled;
                    };
                    return self.set_aside(record, &err).await;
                }
            }
        }
    }

    async fn set_aside(&self, record: &LogRecord, err: &NotifyError) -> Settled {
        tracing::error!(offset = record.offset, error = %err, "dead-lettering notification event");
        let letter = DeadLetter {
            record: record.clone(),
            reason: err.to_string(),
        };
        match self.log.dead_letter(letter).await {
            Ok(()) => {
                agora_telemetry::record_notification("dead_lettered", 1);
                Settled::DeadLettered
            }
            Err(log_err) => {
                tracing::error!(offset = record.offset, error = %log_err, "dead letter write failed");
                Settled::Stalled
            }
        }
    }
}

/// Groups event indices so that events sharing any recipient land in the
/// same lane. Each lane lists its indices in ascending order.
fn partition_lanes(recipients: &[Vec<UserId>]) -> Vec<Vec<usize>> {
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut parent: Vec<usize> = (0..recipients.len()).collect();
    let mut owner: HashMap<UserId, usize> = HashMap::new();
    for (i, users) in recipients.iter().enumerate() {
        for user in users.iter().collect::<HashSet<_>>() {
            match owner.get(user) {
                Some(&j) => {
                    let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                    if a != b {
                        parent[a.max(b)] = a.min(b);
                    }
                }
                None => {
                    owner.insert(*user, i);
                }
            }
        }
    }

    let mut lanes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..recipients.len() {
        let root = find(&mut parent, i);
        lanes.entry(root).or_default().push(i);
    }
    lanes.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_recipients_share_a_lane() {
        let lanes = partition_lanes(&[vec![1], vec![2], vec![1, 3], vec![3], vec![4], vec![]]);
        assert_eq!(lanes, vec![vec![0, 2, 3], vec![1], vec![4], vec![5]]);
    }

    #[test]
    fn bridging_event_merges_earlier_lanes() {
        let lanes = partition_lanes(&[vec![1], vec![2], vec![1, 2], vec![2]]);
        assert_eq!(lanes, vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let settings = ConsumerSettings {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            ..ConsumerSettings::default()
        };
        assert_eq!(settings.backoff(1), Duration::from_millis(100));
        assert_eq!(settings.backoff(2), Duration::from_millis(200));
        assert_eq!(settings.backoff(3), Duration::from_millis(400));
        assert_eq!(settings.backoff(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn in_memory_log_redelivers_until_committed() {
        let log = InMemoryEventLog::new();
        for payload in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
            log.append(payload);
        }
        assert_eq!(log.poll(2).await.unwrap().len(), 2);
        assert_eq!(log.poll(2).await.unwrap()[0].offset, 0);
        log.commit(1).await.unwrap();
        assert_eq!(log.committed(), Some(1));
        let rest = log.poll(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].offset, 2);
        assert!(log.commit(5).await.is_err());
        assert_eq!(log.lag(), 1);
    }

    #[tokio::test]
    async fn committed_records_are_dropped() {
        let log = InMemoryEventLog::new();
        for _ in 0..1000 {
            log.append(vec![0; 64]);
        }
        log.commit(998).await.unwrap();
        assert_eq!(log.lag(), 1);
        assert_eq!(log.backlog().await.unwrap(), 1);
        assert_eq!(log.poll(10).await.unwrap()[0].offset, 999);

        // Offsets keep counting after a drain.
        log.commit(999).await.unwrap();
        assert_eq!(log.append(vec![1]), 1000);
        assert_eq!(log.committed(), Some(999));
        log.commit(3).await.unwrap();
        assert_eq!(log.committed(), Some(999));
    }
}
