//! Hydration scenarios against fake user and media services.

use agora_core::{ErrorKind, ImageId, RequestContext, RpcStatus, UserId};
use agora_hydrate::{Hydratable, HydrateError, Hydrator, PostView};
use agora_rpc::UserRecord;
use agora_store::{AudienceTag, Post};
use agora_test::{FakeMedia, FakeUserDirectory};
use chrono::Utc;
use std::sync::Arc;

fn post(id: i64, creator_id: UserId, image_id: Option<ImageId>) -> PostView {
    PostView::from(Post {
        id,
        creator_id,
        group_id: 0,
        audience: AudienceTag::Public,
        body: format!("post {id}"),
        image_id,
        created_at: Utc::now(),
    })
}

fn hydrator(users: &Arc<FakeUserDirectory>, media: &Arc<FakeMedia>) -> Hydrator {
    Hydrator::new(users.clone(), media.clone())
}

#[tokio::test]
async fn shared_references_are_fetched_once() {
    let users = Arc::new(FakeUserDirectory::new().with_user(5, "eve").with_user(9, "nia"));
    let media = Arc::new(FakeMedia::new().with_image(100).with_image(200));
    let page = vec![post(1, 5, Some(100)), post(2, 5, Some(100)), post(3, 9, Some(200))];

    let page = hydrator(&users, &media)
        .hydrate(&RequestContext::mock(), page)
        .await
        .unwrap();

    assert_eq!(users.calls(), vec![vec![5, 9]]);
    assert_eq!(media.calls(), vec![vec![100, 200]]);
    assert_eq!(page.iter().map(|p| p.id).collect::<Vec<_>>(), [1, 2, 3]);
    assert_eq!(page[0].creator, page[1].creator);
    assert_eq!(page[0].creator.username, "eve");
    assert_eq!(page[2].creator.username, "nia");
    assert_eq!(page[1].image_url, "https://cdn.test/images/100.png");
    assert_eq!(page[2].image_url, "https://cdn.test/images/200.png");
}

#[tokio::test]
async fn unresolved_references_degrade_in_place() {
    let users = Arc::new(FakeUserDirectory::new().with_user(5, "eve"));
    let media = Arc::new(FakeMedia::new().with_image(100).with_image(300).with_broken_image(300));
    let page = vec![
        post(1, 404, Some(100)),
        post(2, 5, Some(300)),
        post(3, 5, None),
        post(4, 404, Some(999)),
    ];

    let page = hydrator(&users, &media)
        .hydrate(&RequestContext::mock(), page)
        .await
        .unwrap();

    assert_eq!(page.iter().map(|p| p.id).collect::<Vec<_>>(), [1, 2, 3, 4]);
    assert_eq!(page[0].creator, UserRecord::default());
    assert_eq!(page[0].image_url, "https://cdn.test/images/100.png");
    assert_eq!(page[1].creator.username, "eve");
    assert_eq!(page[1].image_url, "");
    assert_eq!(page[2].image_url, "");
    assert_eq!(page[3].image_url, "");
}

#[tokio::test]
async fn failed_batch_discards_the_page() {
    let users = Arc::new(FakeUserDirectory::new().with_user(5, "eve"));
    let media = Arc::new(FakeMedia::new().with_image(100));
    media.fail_with(RpcStatus::unavailable("media", "timeout"));

    let err = hydrator(&users, &media)
        .hydrate(&RequestContext::mock(), vec![post(1, 5, Some(100))])
        .await
        .unwrap_err();
    assert!(matches!(err, HydrateError::Media(_)));
    assert_eq!(agora_core::AgoraError::from(err).kind(), ErrorKind::UpstreamUnavailable);
}

#[tokio::test]
async fn user_batch_failure_is_reported() {
    let users = Arc::new(FakeUserDirectory::new());
    users.fail_with(RpcStatus::new(agora_core::RpcCode::PermissionDenied, "users", "nope"));
    let media = Arc::new(FakeMedia::new());
    let err = hydrator(&users, &media)
        .hydrate(&RequestContext::mock(), vec![post(1, 5, None)])
        .await
        .unwrap_err();
    assert!(matches!(err, HydrateError::Users(_)));
    assert!(media.calls().is_empty(), "no images on the page");
}

#[tokio::test]
async fn empty_page_makes_no_calls() {
    let users = Arc::new(FakeUserDirectory::new());
    let media = Arc::new(FakeMedia::new());
    let page: Vec<PostView> = hydrator(&users, &media)
        .hydrate(&RequestContext::mock(), Vec::new())
        .await
        .unwrap();
    assert!(page.is_empty());
    assert!(users.calls().is_empty());
    assert!(media.calls().is_empty());
}

/// A page element with neither reference type being mandatory.
#[derive(Debug, Default)]
struct Comment {
    author: Option<UserId>,
    attachment: Option<ImageId>,
    author_name: Option<String>,
    attachment_url: Option<String>,
}

impl Hydratable for Comment {
    fn user_ref(&self) -> Option<UserId> {
        self.author
    }

    fn image_ref(&self) -> Option<ImageId> {
        self.attachment
    }

    fn set_user(&mut self, user: UserRecord) {
        self.author_name = Some(user.username);
    }

    fn set_image_url(&mut self, url: String) {
        self.attachment_url = Some(url);
    }
}

#[tokio::test]
async fn setters_run_only_for_present_references() {
    let users = Arc::new(FakeUserDirectory::new().with_user(1, "ann"));
    let media = Arc::new(FakeMedia::new().with_image(8));
    let page = vec![
        Comment { author: Some(1), ..Comment::default() },
        Comment { attachment: Some(8), ..Comment::default() },
        Comment::default(),
    ];

    let single = hydrator(&users, &media)
        .hydrate_one(&RequestContext::mock(), Comment { author: Some(1), ..Comment::default() })
        .await
        .unwrap();
    assert_eq!(single.author_name.as_deref(), Some("ann"));

    let hydrated = hydrator(&users, &media)
        .hydrate(&RequestContext::mock(), page)
        .await
        .unwrap();
    assert_eq!(hydrated[0].author_name.as_deref(), Some("ann"));
    assert_eq!(hydrated[0].attachment_url, None);
    assert_eq!(hydrated[1].author_name, None);
    assert_eq!(hydrated[1].attachment_url.as_deref(), Some("https://cdn.test/images/8.png"));
    assert_eq!(hydrated[2].author_name, None);
    assert_eq!(hydrated[2].attachment_url, None);
}
