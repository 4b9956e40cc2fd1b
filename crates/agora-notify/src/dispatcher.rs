//! Event dispatch.

use crate::aggregate::{fold_or_insert, FoldOutcome};
use crate::builders::{self, NotificationDraft};
use crate::error::NotifyError;
use crate::event::EventEnvelope;
use crate::kind::NotificationKind;
use agora_core::Clock;
use agora_store::{Database, NewNotification, Transaction};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Expiry and aggregation windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// How long a notification lives.
    pub expiry: Duration,
    /// Aggregation window for kinds without an override.
    pub default_window: Duration,
    /// Per-kind aggregation windows.
    pub windows: HashMap<NotificationKind, Duration>,
}

impl DispatchSettings {
    /// Window used when folding `kind`.
    #[must_use]
    pub fn window_for(&self, kind: NotificationKind) -> Duration {
        self.windows
            .get(&kind)
            .copied()
            .unwrap_or(self.default_window)
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            expiry: Duration::days(30),
            default_window: Duration::hours(24),
            windows: HashMap::new(),
        }
    }
}

/// What one `handle` call did, per draft.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Rows inserted.
    pub inserted: usize,
    /// Drafts folded into existing rows, including refreshes.
    pub folded: usize,
    /// Drafts skipped because this event already reached the recipient.
    pub duplicates: usize,
    /// Drafts skipped because the actor was the recipient.
    pub skipped_self: usize,
}

/// Turns events into persisted notifications.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    db: Database,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>, settings: DispatchSettings) -> Self {
        Self {
            db,
            clock,
            settings,
        }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Builds and stores the notifications for one event.
    ///
    /// All of an event's rows and its delivery markers are written in one
    /// transaction, so a failure leaves nothing behind and a redelivery after
    /// success writes nothing new. Markers expire with the notifications they
    /// guard and are removed by the same purge.
    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<DispatchReport, NotifyError> {
        let (drafts, skipped): (Vec<_>, Vec<_>) = builders::build(&envelope.event)
            .into_iter()
            .partition(|draft| !draft.is_self_notification());

        let now = self.clock.now();
        let event_id = envelope.event_id.clone();
        let settings = self.settings.clone();
        let mut report = self
            .db
            .run_tx(move |tx| {
                Box::pin(async move {
                    let mut report = DispatchReport::default();
                    let keep_until = now + settings.expiry;
                    for draft in drafts {
                        if !tx.record_delivery(&event_id, draft.recipient, keep_until).await? {
                            report.duplicates += 1;
                            continue;
                        }
                        match write_draft(tx, draft, now, &settings).await? {
                            Some(FoldOutcome::Inserted(_)) | None => report.inserted += 1,
                            Some(FoldOutcome::Folded(_) | FoldOutcome::Refreshed(_)) => {
                                report.folded += 1;
                            }
                        }
                    }
                    Ok::<_, NotifyError>(report)
                })
            })
            .await?;
        report.skipped_self = skipped.len();

        record(&report);
        tracing::debug!(
            event_id = %envelope.event_id,
            event = envelope.event.tag(),
            inserted = report.inserted,
            folded = report.folded,
            duplicates = report.duplicates,
            skipped_self = report.skipped_self,
            "event dispatched"
        );
        Ok(report)
    }

    /// Decodes and handles a raw envelope.
    pub async fn handle_bytes(&self, bytes: &[u8]) -> Result<DispatchReport, NotifyError> {
        let envelope = EventEnvelope::decode(bytes)?;
        self.handle(&envelope).await
    }
}

/// Writes one draft. Returns `None` for plain inserts.
async fn write_draft(
    tx: &mut Transaction,
    draft: NotificationDraft,
    now: DateTime<Utc>,
    settings: &DispatchSettings,
) -> Result<Option<FoldOutcome>, NotifyError> {
    let new = NewNotification {
        recipient: draft.recipient,
        kind: draft.kind.as_str().to_string(),
        source_service: draft.kind.source_service().to_string(),
        source_entity: draft.source_entity,
        needs_action: draft.kind.needs_action(),
        payload: draft.payload,
        created_at: now,
        expires_at: now + settings.expiry,
        aggregated_actor: None,
    };
    if draft.aggregate {
        let window = settings.window_for(draft.kind);
        Ok(Some(fold_or_insert(tx, new, draft.actor, window).await?))
    } else {
        tx.insert_notification(new).await?;
        Ok(None)
    }
}

fn record(report: &DispatchReport) {
    for (outcome, count) in [
        ("inserted", report.inserted),
        ("folded", report.folded),
        ("duplicate", report.duplicates),
        ("skipped_self", report.skipped_self),
    ] {
        if count > 0 {
            agora_telemetry::record_notification(outcome, count as u64);
        }
    }
}
