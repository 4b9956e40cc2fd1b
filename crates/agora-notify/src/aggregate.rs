//! Fold-or-insert for aggregatable notifications.

use agora_core::UserId;
use agora_store::{FoldChange, NewNotification, NotificationId, StoreError, Transaction};
use chrono::Duration;

/// What [`fold_or_insert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// A new row was inserted.
    Inserted(NotificationId),
    /// The actor was folded into an existing row.
    Folded(NotificationId),
    /// The actor was already listed on the matching row; only `updated_at`
    /// moved.
    Refreshed(NotificationId),
}

impl FoldOutcome {
    /// The affected row.
    #[must_use]
    pub const fn id(self) -> NotificationId {
        match self {
            Self::Inserted(id) | Self::Folded(id) | Self::Refreshed(id) => id,
        }
    }

    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inserted(_) => "inserted",
            Self::Folded(_) => "folded",
            Self::Refreshed(_) => "refreshed",
        }
    }
}

/// Folds `actor` into the most recent unseen row matching
/// (recipient, kind, source entity) created within `window` of
/// `new.created_at`, or inserts `new` when there is none.
///
/// Takes the transaction so the lookup and the write cannot interleave with
/// another fold for the same recipient.
pub async fn fold_or_insert(
    tx: &mut Transaction,
    new: NewNotification,
    actor: UserId,
    window: Duration,
) -> Result<FoldOutcome, StoreError> {
    let now = new.created_at;
    let target = tx
        .find_aggregation_target(new.recipient, &new.kind, new.source_entity, now - window)
        .await?;
    match target {
        Some(id) => match tx.fold_actor(id, actor, now).await? {
            FoldChange::Added => Ok(FoldOutcome::Folded(id)),
            FoldChange::AlreadyPresent => Ok(FoldOutcome::Refreshed(id)),
        },
        None => {
            let id = tx
                .insert_notification(NewNotification {
                    aggregated_actor: Some(actor),
                    ..new
                })
                .await?;
            Ok(FoldOutcome::Inserted(id))
        }
    }
}
