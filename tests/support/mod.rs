//! Shared harness for driving the routers against the in-memory store.

#![allow(dead_code)]

use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{
        Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, LOCATION},
    },
    response::Response,
};
use http_body_util::BodyExt;
use murmur::{
    application::{
        accounts::AccountService,
        groups::{GroupService, NewGroup},
        repos::{CreatePostParams, PostsWriteRepo},
    },
    cache::CacheConfig,
    config::SiteSettings,
    domain::entities::{GroupRecord, PostRecord, UserRecord},
    infra::{
        bootstrap::{ServiceOptions, build_application_context},
        http::{self, SESSION_COOKIE},
        memory::InMemoryRepositories,
    },
};
use tempfile::TempDir;
use tower::ServiceExt;

/// 1x1 transparent GIF.
pub const TINY_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x21, 0xf9, 0x04,
    0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x01, 0x00, 0x00,
];

pub struct TestApp {
    _uploads: TempDir,
    pub repos: Arc<InMemoryRepositories>,
    pub accounts: Arc<AccountService>,
    pub groups: Arc<GroupService>,
    public: Router,
    admin: Router,
}

pub struct Member {
    pub user: UserRecord,
    pub token: String,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(10, true)
    }

    pub fn with_page_size(page_size: u32) -> Self {
        Self::build(page_size, true)
    }

    pub fn without_cache() -> Self {
        Self::build(10, false)
    }

    fn build(page_size: u32, cache_enabled: bool) -> Self {
        let uploads = TempDir::new().expect("temp dir");
        let repos = Arc::new(InMemoryRepositories::new());
        let options = ServiceOptions {
            upload_root: uploads.path().join("media"),
            max_request_bytes: 1024 * 1024,
            page_size: NonZeroU32::new(page_size).expect("non-zero page size"),
            cache: CacheConfig {
                enabled: cache_enabled,
                ttl: Duration::from_secs(20),
                max_entries: NonZeroUsize::new(64).expect("non-zero"),
            },
            site: SiteSettings {
                brand_title: "Murmur".to_string(),
                description: "Short posts".to_string(),
                footer_copy: "Murmur test".to_string(),
            },
        };
        let context =
            build_application_context(repos.clone(), options).expect("application context");

        Self {
            _uploads: uploads,
            repos,
            accounts: context.accounts,
            groups: context.groups,
            public: http::build_router(context.http),
            admin: http::build_admin_router(context.admin),
        }
    }

    /// Register `username` and issue a session token for them.
    pub async fn member(&self, username: &str) -> Member {
        let user = self.accounts.register(username).await.expect("register");
        let issued = self
            .accounts
            .issue_session(username, None)
            .await
            .expect("session");
        Member {
            user,
            token: issued.token,
        }
    }

    pub async fn group(&self, title: &str, slug: &str) -> GroupRecord {
        self.groups
            .create(NewGroup {
                title: title.to_string(),
                slug: Some(slug.to_string()),
                description: format!("About {title}"),
            })
            .await
            .expect("group")
    }

    pub async fn post(&self, author: &UserRecord, text: &str) -> PostRecord {
        self.post_in(author, text, None).await
    }

    pub async fn post_in(
        &self,
        author: &UserRecord,
        text: &str,
        group: Option<&GroupRecord>,
    ) -> PostRecord {
        self.repos
            .create_post(CreatePostParams {
                author_id: author.id,
                text: text.to_string(),
                group_id: group.map(|group| group.id),
                image: None,
            })
            .await
            .expect("post")
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Response {
        let request = with_session(Request::builder().method("GET").uri(path), token)
            .body(Body::empty())
            .expect("request");
        self.public.clone().oneshot(request).await.expect("response")
    }

    pub async fn post_form(&self, path: &str, body: &str, token: Option<&str>) -> Response {
        let request = with_session(Request::builder().method("POST").uri(path), token)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request");
        self.public.clone().oneshot(request).await.expect("response")
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        body: Vec<u8>,
        boundary: &str,
        token: Option<&str>,
    ) -> Response {
        let request = with_session(Request::builder().method("POST").uri(path), token)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request");
        self.public.clone().oneshot(request).await.expect("response")
    }

    pub async fn admin_post(&self, path: &str) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .expect("request");
        self.admin.clone().oneshot(request).await.expect("response")
    }

    pub async fn admin_get(&self, path: &str) -> Response {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("request");
        self.admin.clone().oneshot(request).await.expect("response")
    }
}

fn with_session(
    builder: axum::http::request::Builder,
    token: Option<&str>,
) -> axum::http::request::Builder {
    match token {
        Some(token) => builder.header(COOKIE, format!("{SESSION_COOKIE}={token}")),
        None => builder,
    }
}

pub async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .expect("location header")
        .to_str()
        .expect("ascii location")
        .to_string()
}

pub fn assert_redirect(response: &Response, expected: &str) {
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(response), expected);
}

pub fn card_count(html: &str) -> usize {
    html.matches("class=\"post-card\"").count()
}

/// Multipart body builder for post submissions.
pub struct MultipartBody {
    boundary: String,
    bytes: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: "murmur-test-boundary".to_string(),
            bytes: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content: &[u8]) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(content);
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> (Vec<u8>, String) {
        self.bytes
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (self.bytes, self.boundary)
    }
}
