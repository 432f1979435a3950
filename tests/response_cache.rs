mod support;

use std::time::Duration;

use axum::http::StatusCode;
use murmur::application::repos::PostsWriteRepo;
use support::{TestApp, body_text, card_count};

#[tokio::test]
async fn cached_index_stays_stale_until_cleared() {
    let app = TestApp::new();
    let author = app.member("author").await;
    let post = app.post(&author.user, "cached words").await;

    let first = body_text(app.get("/", None).await).await;
    assert_eq!(card_count(&first), 1);

    app.repos.delete_post(post.id).await.unwrap();

    let stale = body_text(app.get("/", None).await).await;
    assert_eq!(stale, first);

    let response = app.admin_post("/_cache/clear").await;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = body_text(response).await;
    assert_eq!(cleared, r#"{"removed":1}"#);

    let fresh = body_text(app.get("/", None).await).await;
    assert_ne!(fresh, first);
    assert_eq!(card_count(&fresh), 0);
}

#[tokio::test]
async fn cached_profile_stays_stale_after_new_posts() {
    let app = TestApp::new();
    let author = app.member("author").await;
    app.post(&author.user, "before caching").await;

    let first = body_text(app.get("/profile/author/", None).await).await;
    assert_eq!(card_count(&first), 1);

    app.post(&author.user, "after caching").await;
    let stale = body_text(app.get("/profile/author/", None).await).await;
    assert_eq!(card_count(&stale), 1);
    assert!(!stale.contains("after caching"));
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_ttl() {
    let app = TestApp::new();
    let author = app.member("author").await;
    let post = app.post(&author.user, "short lived").await;

    let first = body_text(app.get("/", None).await).await;
    app.repos.delete_post(post.id).await.unwrap();

    tokio::time::advance(Duration::from_secs(5)).await;
    let still_cached = body_text(app.get("/", None).await).await;
    assert_eq!(still_cached, first);

    tokio::time::advance(Duration::from_secs(21)).await;
    let expired = body_text(app.get("/", None).await).await;
    assert_eq!(card_count(&expired), 0);
}

#[tokio::test]
async fn cache_entries_are_per_viewer() {
    let app = TestApp::new();
    let author = app.member("author").await;
    let reader = app.member("reader").await;

    let anonymous = body_text(app.get("/", None).await).await;
    assert_eq!(card_count(&anonymous), 0);

    app.post(&author.user, "fresh for readers").await;

    let signed_in = body_text(app.get("/", Some(&reader.token)).await).await;
    assert_eq!(card_count(&signed_in), 1);

    let anonymous_again = body_text(app.get("/", None).await).await;
    assert_eq!(anonymous_again, anonymous);
}

#[tokio::test]
async fn pages_are_cached_independently() {
    let app = TestApp::with_page_size(1);
    let author = app.member("author").await;
    app.post(&author.user, "older").await;
    app.post(&author.user, "newer").await;

    let first = body_text(app.get("/", None).await).await;
    let second = body_text(app.get("/?page=2", None).await).await;
    assert!(first.contains("newer"));
    assert!(second.contains("older"));
}

#[tokio::test]
async fn uncached_routes_see_writes_immediately() {
    let app = TestApp::new();
    let author = app.member("author").await;
    let post = app.post(&author.user, "detail page").await;
    let path = format!("/posts/{}/", post.id);

    assert_eq!(app.get(&path, None).await.status(), StatusCode::OK);
    app.repos.delete_post(post.id).await.unwrap();
    assert_eq!(app.get(&path, None).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disabled_cache_passes_through() {
    let app = TestApp::without_cache();
    let author = app.member("author").await;
    let post = app.post(&author.user, "never cached").await;

    let first = body_text(app.get("/", None).await).await;
    assert_eq!(card_count(&first), 1);
    app.repos.delete_post(post.id).await.unwrap();
    let second = body_text(app.get("/", None).await).await;
    assert_eq!(card_count(&second), 0);

    let response = app.admin_post("/_cache/clear").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_endpoints_report_the_store() {
    let app = TestApp::new();

    assert_eq!(
        app.admin_get("/_health/db").await.status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        app.get("/_health/db", None).await.status(),
        StatusCode::NO_CONTENT
    );
}
