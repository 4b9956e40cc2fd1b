//! # Agora Hydrate
//!
//! Fills user and image references on a page of entities with two batch
//! calls, one to the user directory and one to the media service.
//!
//! - [`Hydratable`] - what an entity exposes to be hydrated
//! - [`Hydrator`] - collects references, fetches, and writes them back
//! - [`PostView`], [`NotificationView`] - the hydratable shapes the gateway serves
//!
//! Hydration never reorders or drops entities. A reference that cannot be
//! resolved leaves a zero-value user or an empty URL. A failed batch fails the
//! whole page.

#![doc(html_root_url = "https://docs.rs/agora-hydrate/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod hydrator;
mod refs;
mod view;

pub use error::HydrateError;
pub use hydrator::{Hydratable, Hydrator};
pub use refs::ReferenceSet;
pub use view::{NotificationView, PostView};
