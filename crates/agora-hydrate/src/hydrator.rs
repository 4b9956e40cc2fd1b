//! Page hydration.

use crate::error::HydrateError;
use crate::refs::ReferenceSet;
use agora_core::{ImageId, RequestContext, UserId};
use agora_rpc::{ImageBatch, MediaService, UserDirectory, UserRecord};
use std::collections::HashMap;
use std::sync::Arc;

/// An entity with at most one user reference and one image reference.
pub trait Hydratable {
    /// The referenced user, if any.
    fn user_ref(&self) -> Option<UserId>;

    /// The referenced image, if any.
    fn image_ref(&self) -> Option<ImageId>;

    /// Replaces the user stub. Called with [`UserRecord::default`] when the
    /// user could not be resolved.
    fn set_user(&mut self, user: UserRecord);

    /// Sets the image URL. Called with an empty string when the image could
    /// not be resolved.
    fn set_image_url(&mut self, url: String);
}

/// Resolves references on a page with one batch call per service.
#[derive(Clone)]
pub struct Hydrator {
    users: Arc<dyn UserDirectory>,
    media: Arc<dyn MediaService>,
}

impl std::fmt::Debug for Hydrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hydrator").finish_non_exhaustive()
    }
}

impl Hydrator {
    /// Creates a hydrator.
    #[must_use]
    pub fn new(users: Arc<dyn UserDirectory>, media: Arc<dyn MediaService>) -> Self {
        Self { users, media }
    }

    /// Hydrates `page`, returning it with every reference filled.
    ///
    /// The two batches run concurrently and are skipped when empty. If either
    /// fails the page is dropped and the error returned.
    pub async fn hydrate<T: Hydratable + Send>(
        &self,
        ctx: &RequestContext,
        mut page: Vec<T>,
    ) -> Result<Vec<T>, HydrateError> {
        let user_ids: ReferenceSet<UserId> = page.iter().filter_map(Hydratable::user_ref).collect();
        let image_ids: ReferenceSet<ImageId> = page.iter().filter_map(Hydratable::image_ref).collect();

        let users = async {
            if user_ids.is_empty() {
                return Ok(HashMap::new());
            }
            self.users.get_users(ctx, user_ids.as_slice()).await
        };
        let images = async {
            if image_ids.is_empty() {
                return Ok(ImageBatch::default());
            }
            self.media.get_image_urls(ctx, image_ids.as_slice()).await
        };
        let (users, images) = tokio::join!(users, images);
        let users = users.map_err(HydrateError::Users)?;
        let images = images.map_err(HydrateError::Media)?;

        if !images.failed.is_empty() {
            tracing::debug!(failed = ?images.failed, "images unresolved, leaving URLs empty");
        }

        for entity in &mut page {
            if let Some(id) = entity.user_ref() {
                let user = users.get(&id).cloned().unwrap_or_default();
                entity.set_user(user);
            }
            if let Some(id) = entity.image_ref() {
                let url = images.urls.get(&id).cloned().unwrap_or_default();
                entity.set_image_url(url);
            }
        }

        tracing::trace!(
            entities = page.len(),
            users = user_ids.len(),
            images = image_ids.len(),
            "page hydrated"
        );
        Ok(page)
    }

    /// Hydrates a single entity.
    pub async fn hydrate_one<T: Hydratable + Send>(
        &self,
        ctx: &RequestContext,
        entity: T,
    ) -> Result<T, HydrateError> {
        let mut page = self.hydrate(ctx, vec![entity]).await?;
        Ok(page.remove(0))
    }
}
