//! In-memory fakes of the downstream services.
//!
//! Every fake records the calls it receives and can be told to fail the next
//! calls with a given [`RpcStatus`], which is how tests drive the
//! classification paths.

use agora_core::{GroupId, ImageId, RequestContext, RpcStatus, UserId};
use agora_rpc::{ImageBatch, MediaService, SocialGraph, UserDirectory, UserRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// A call received by [`FakeSocialGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphCall {
    /// `is_following(follower, followee)`.
    IsFollowing(UserId, UserId),
    /// `is_group_member(user, group)`.
    IsGroupMember(UserId, GroupId),
}

#[derive(Debug, Default)]
struct GraphState {
    follows: HashSet<(UserId, UserId)>,
    members: HashSet<(UserId, GroupId)>,
    failure: Option<RpcStatus>,
    latency: Option<Duration>,
    calls: Vec<GraphCall>,
}

/// Social graph backed by two sets.
#[derive(Debug, Default)]
pub struct FakeSocialGraph {
    state: Mutex<GraphState>,
}

impl FakeSocialGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `follower` follows `followee`.
    #[must_use]
    pub fn with_follow(self, follower: UserId, followee: UserId) -> Self {
        self.follow(follower, followee);
        self
    }

    /// Records that `user` is in `group`.
    #[must_use]
    pub fn with_member(self, user: UserId, group: GroupId) -> Self {
        self.state.lock().members.insert((user, group));
        self
    }

    /// Adds a follow edge.
    pub fn follow(&self, follower: UserId, followee: UserId) {
        self.state.lock().follows.insert((follower, followee));
    }

    /// Removes a follow edge.
    pub fn unfollow(&self, follower: UserId, followee: UserId) {
        self.state.lock().follows.remove(&(follower, followee));
    }

    /// Fails every call until [`Self::recover`].
    pub fn fail_with(&self, status: RpcStatus) {
        self.state.lock().failure = Some(status);
    }

    /// Stops failing.
    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    /// Delays every answer.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Returns the calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<GraphCall> {
        self.state.lock().calls.clone()
    }

    async fn answer(&self, call: GraphCall) -> Result<bool, RpcStatus> {
        let latency = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let state = self.state.lock();
        if let Some(status) = &state.failure {
            return Err(status.clone());
        }
        Ok(match call {
            GraphCall::IsFollowing(follower, followee) => state.follows.contains(&(follower, followee)),
            GraphCall::IsGroupMember(user, group) => state.members.contains(&(user, group)),
        })
    }
}

#[async_trait]
impl SocialGraph for FakeSocialGraph {
    async fn is_following(
        &self,
        ctx: &RequestContext,
        follower: UserId,
        followee: UserId,
    ) -> Result<bool, RpcStatus> {
        ctx.call("graph", self.answer(GraphCall::IsFollowing(follower, followee)))
            .await
    }

    async fn is_group_member(
        &self,
        ctx: &RequestContext,
        user: UserId,
        group: GroupId,
    ) -> Result<bool, RpcStatus> {
        ctx.call("graph", self.answer(GraphCall::IsGroupMember(user, group)))
            .await
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<UserId, UserRecord>,
    failure: Option<RpcStatus>,
    calls: Vec<Vec<UserId>>,
}

/// User directory backed by a map.
#[derive(Debug, Default)]
pub struct FakeUserDirectory {
    state: Mutex<DirectoryState>,
}

impl FakeUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user whose username is `name`.
    #[must_use]
    pub fn with_user(self, id: UserId, name: &str) -> Self {
        self.state.lock().users.insert(
            id,
            UserRecord {
                id,
                username: name.to_string(),
                display_name: name.to_string(),
                avatar_url: format!("https://cdn.test/avatars/{id}.png"),
            },
        );
        self
    }

    /// Fails every call until [`Self::recover`].
    pub fn fail_with(&self, status: RpcStatus) {
        self.state.lock().failure = Some(status);
    }

    /// Stops failing.
    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    /// Returns the ID batches received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<UserId>> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl UserDirectory for FakeUserDirectory {
    async fn get_users(
        &self,
        _ctx: &RequestContext,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserRecord>, RpcStatus> {
        let mut state = self.state.lock();
        state.calls.push(ids.to_vec());
        if let Some(status) = &state.failure {
            return Err(status.clone());
        }
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).map(|user| (*id, user.clone())))
            .collect())
    }
}

#[derive(Debug, Default)]
struct MediaState {
    urls: BTreeMap<ImageId, String>,
    broken: HashSet<ImageId>,
    failure: Option<RpcStatus>,
    calls: Vec<Vec<ImageId>>,
}

/// Media service backed by a map.
#[derive(Debug, Default)]
pub struct FakeMedia {
    state: Mutex<MediaState>,
}

impl FakeMedia {
    /// Creates an empty media service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an image at a predictable URL.
    #[must_use]
    pub fn with_image(self, id: ImageId) -> Self {
        self.state
            .lock()
            .urls
            .insert(id, format!("https://cdn.test/images/{id}.png"));
        self
    }

    /// Marks an image as failing individually.
    #[must_use]
    pub fn with_broken_image(self, id: ImageId) -> Self {
        self.state.lock().broken.insert(id);
        self
    }

    /// Fails every call until [`Self::recover`].
    pub fn fail_with(&self, status: RpcStatus) {
        self.state.lock().failure = Some(status);
    }

    /// Stops failing.
    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    /// Returns the ID batches received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<ImageId>> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl MediaService for FakeMedia {
    async fn get_image_urls(
        &self,
        _ctx: &RequestContext,
        ids: &[ImageId],
    ) -> Result<ImageBatch, RpcStatus> {
        let mut state = self.state.lock();
        state.calls.push(ids.to_vec());
        if let Some(status) = &state.failure {
            return Err(status.clone());
        }
        let mut batch = ImageBatch::default();
        for id in ids {
            match state.urls.get(id) {
                Some(url) if !state.broken.contains(id) => {
                    batch.urls.insert(*id, url.clone());
                }
                _ => batch.failed.push(*id),
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::RpcCode;

    #[tokio::test]
    async fn graph_records_and_fails() {
        let graph = FakeSocialGraph::new().with_follow(1, 2).with_member(1, 9);
        let ctx = RequestContext::mock();
        assert!(graph.is_following(&ctx, 1, 2).await.unwrap());
        assert!(!graph.is_following(&ctx, 2, 1).await.unwrap());
        assert!(graph.is_group_member(&ctx, 1, 9).await.unwrap());

        graph.fail_with(RpcStatus::unavailable("graph", "down"));
        let err = graph.is_following(&ctx, 1, 2).await.unwrap_err();
        assert_eq!(err.code(), RpcCode::Unavailable);
        assert_eq!(graph.calls().len(), 4);
    }

    #[tokio::test]
    async fn media_reports_missing_and_broken() {
        let media = FakeMedia::new().with_image(1).with_image(2).with_broken_image(2);
        let batch = media
            .get_image_urls(&RequestContext::mock(), &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(batch.urls.len(), 1);
        assert_eq!(batch.failed, vec![2, 3]);
    }
}
