use std::sync::Arc;

use axum::{
    Form, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{
        HeaderValue, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::error;

use crate::{
    application::{
        accounts::AccountService,
        chrome::ChromeService,
        error::{ErrorReport, HttpError},
        feed::{FeedError, FeedService},
        follows::{FollowError, FollowService},
        pagination::PageNumber,
        posts::{CommentOutcome, PostError, PostService, PostSubmitOutcome},
        repos::HealthRepo,
    },
    cache::{CacheRoute, ResponseCache, response_cache_layer},
    domain::entities::UserRecord,
    infra::uploads::{UploadStorage, UploadStorageError},
    presentation::views::{
        AboutAuthorTemplate, AboutTechTemplate, FollowTemplate, GroupTemplate, IndexTemplate,
        LayoutChrome, LayoutContext, PostDetailTemplate, PostFormContext, PostFormTemplate,
        ProfileTemplate, post_href, profile_href, render_not_found_response,
        render_template_response,
    },
};

use super::{
    auth::{self, CurrentUser, MaybeUser, resolve_viewer},
    db_health_response,
    forms::{CommentFields, PostSubmission},
    middleware::{log_responses, set_request_context},
    repo_error_to_http,
};

const INDEX_CACHE_PREFIX: &str = "index_page";
const PROFILE_CACHE_PREFIX: &str = "profile_page";

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
    pub posts: Arc<PostService>,
    pub follows: Arc<FollowService>,
    pub accounts: Arc<AccountService>,
    pub chrome: Arc<ChromeService>,
    pub uploads: Arc<UploadStorage>,
    pub health: Arc<dyn HealthRepo>,
    pub cache: Option<Arc<ResponseCache>>,
    pub max_request_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    let index = cached(
        Router::new().route("/", get(index)),
        &state,
        INDEX_CACHE_PREFIX,
    );
    let profile = cached(
        Router::new().route("/profile/{username}/", get(profile)),
        &state,
        PROFILE_CACHE_PREFIX,
    );

    let pages = Router::new()
        .route("/group/{slug}/", get(group_feed))
        .route("/posts/{id}/", get(post_detail))
        .route("/create/", get(create_form).post(create_submit))
        .route("/posts/{id}/edit/", get(edit_form).post(edit_submit))
        .route("/posts/{id}/delete/", post(delete_post))
        .route("/posts/{id}/comment/", post(add_comment))
        .route("/follow/", get(follow_index))
        .route("/profile/{username}/follow/", post(profile_follow))
        .route("/profile/{username}/unfollow/", post(profile_unfollow))
        .route(
            "/auth/login/",
            get(auth::login_page).post(auth::login_submit),
        )
        .route("/auth/logout/", post(auth::logout))
        .route("/about/author/", get(about_author))
        .route("/about/tech/", get(about_tech))
        .route("/media/{*path}", get(serve_media))
        .route("/_health/db", get(public_health))
        .fallback(not_found);

    index
        .merge(profile)
        .merge(pages)
        .layer(DefaultBodyLimit::max(state.max_request_bytes))
        .with_state(state.clone())
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn_with_state(state, resolve_viewer))
        .layer(middleware::from_fn(set_request_context))
}

fn cached(
    router: Router<HttpState>,
    state: &HttpState,
    prefix: &'static str,
) -> Router<HttpState> {
    match state.cache.clone() {
        Some(cache) => router.layer(middleware::from_fn_with_state(
            CacheRoute::new(cache, prefix),
            response_cache_layer,
        )),
        None => router,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageQuery {
    page: Option<String>,
}

impl PageQuery {
    fn number(&self) -> PageNumber {
        PageNumber::parse(self.page.as_deref())
    }
}

async fn index(
    State(state): State<HttpState>,
    MaybeUser(viewer): MaybeUser,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());
    match state.feed.index(query.number()).await {
        Ok(content) => {
            let view = LayoutContext::new(chrome, content);
            render_template_response(IndexTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn group_feed(
    State(state): State<HttpState>,
    MaybeUser(viewer): MaybeUser,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());
    match state.feed.group_feed(&slug, query.number()).await {
        Ok(content) => {
            let chrome = chrome.with_title(content.feed.heading.clone());
            let view = LayoutContext::new(chrome, content);
            render_template_response(GroupTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn profile(
    State(state): State<HttpState>,
    MaybeUser(viewer): MaybeUser,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());
    match state
        .feed
        .profile_feed(&username, viewer.as_ref(), query.number())
        .await
    {
        Ok(content) => {
            let chrome = chrome.with_title(format!("Profile of {}", content.username));
            let view = LayoutContext::new(chrome, content);
            render_template_response(ProfileTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn follow_index(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = state.chrome.load(Some(&user));
    match state.feed.follow_feed(&user, query.number()).await {
        Ok(content) => {
            let view = LayoutContext::new(chrome.with_title("Following"), content);
            render_template_response(FollowTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn post_detail(
    State(state): State<HttpState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<String>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };

    match state.posts.detail(id, viewer.as_ref()).await {
        Ok(content) => {
            let chrome = chrome.with_title(content.title.clone());
            let view = LayoutContext::new(chrome, content);
            render_template_response(PostDetailTemplate { view }, StatusCode::OK)
        }
        Err(err) => post_error_to_response(err, chrome),
    }
}

async fn create_form(State(state): State<HttpState>, CurrentUser(user): CurrentUser) -> Response {
    let chrome = state.chrome.load(Some(&user));
    match state.posts.create_form().await {
        Ok(content) => render_post_form(chrome, content),
        Err(err) => post_error_to_response(err, chrome),
    }
}

async fn create_submit(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    PostSubmission(draft): PostSubmission,
) -> Response {
    let chrome = state.chrome.load(Some(&user));
    match state.posts.create(&user, draft).await {
        Ok(PostSubmitOutcome::Saved(_)) => {
            Redirect::to(&profile_href(&user.username)).into_response()
        }
        Ok(PostSubmitOutcome::Rejected(content)) => render_post_form(chrome, content),
        Err(err) => post_error_to_response(err, chrome),
    }
}

async fn edit_form(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Response {
    let chrome = state.chrome.load(Some(&user));
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };

    match state.posts.edit_form(id, &user).await {
        Ok(content) => render_post_form(chrome, content),
        Err(err) => post_error_to_response(err, chrome),
    }
}

async fn edit_submit(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    PostSubmission(draft): PostSubmission,
) -> Response {
    let chrome = state.chrome.load(Some(&user));
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };

    match state.posts.update(id, &user, draft).await {
        Ok(PostSubmitOutcome::Saved(post)) => Redirect::to(&post_href(post.id)).into_response(),
        Ok(PostSubmitOutcome::Rejected(content)) => render_post_form(chrome, content),
        Err(err) => post_error_to_response(err, chrome),
    }
}

async fn delete_post(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Response {
    let chrome = state.chrome.load(Some(&user));
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };

    match state.posts.delete(id, &user).await {
        Ok(()) => Redirect::to(&profile_href(&user.username)).into_response(),
        Err(err) => post_error_to_response(err, chrome),
    }
}

async fn add_comment(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Form(fields): Form<CommentFields>,
) -> Response {
    let chrome = state.chrome.load(Some(&user));
    let Some(id) = parse_post_id(&id) else {
        return render_not_found_response(chrome);
    };

    match state.posts.add_comment(id, &user, fields.into()).await {
        Ok(CommentOutcome::Created(_)) => Redirect::to(&post_href(id)).into_response(),
        Ok(CommentOutcome::Rejected(content)) => {
            let chrome = chrome.with_title(content.title.clone());
            let view = LayoutContext::new(chrome, content);
            render_template_response(PostDetailTemplate { view }, StatusCode::OK)
        }
        Err(err) => post_error_to_response(err, chrome),
    }
}

async fn profile_follow(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> Response {
    match state.follows.follow(&user, &username).await {
        Ok(_) => Redirect::to("/follow/").into_response(),
        Err(err) => follow_error_to_response(err, &state, &user),
    }
}

async fn profile_unfollow(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> Response {
    match state.follows.unfollow(&user, &username).await {
        Ok(()) => Redirect::to("/follow/").into_response(),
        Err(err) => follow_error_to_response(err, &state, &user),
    }
}

async fn about_author(State(state): State<HttpState>, MaybeUser(viewer): MaybeUser) -> Response {
    let chrome = state.chrome.load(viewer.as_ref()).with_title("About the author");
    let view = LayoutContext::new(chrome, ());
    render_template_response(AboutAuthorTemplate { view }, StatusCode::OK)
}

async fn about_tech(State(state): State<HttpState>, MaybeUser(viewer): MaybeUser) -> Response {
    let chrome = state.chrome.load(viewer.as_ref()).with_title("Technology");
    let view = LayoutContext::new(chrome, ());
    render_template_response(AboutTechTemplate { view }, StatusCode::OK)
}

async fn serve_media(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_media";

    match state.uploads.read(&path).await {
        Ok(bytes) => build_media_response(&path, bytes),
        Err(err @ UploadStorageError::InvalidPath) => {
            HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "Media not found", &err)
                .into_response()
        }
        Err(err) if err.is_not_found() => {
            HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "Media not found", &err)
                .into_response()
        }
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read stored media"
            );
            HttpError::internal(SOURCE, &err).into_response()
        }
    }
}

async fn public_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.health.ping().await)
}

async fn not_found(
    State(state): State<HttpState>,
    MaybeUser(viewer): MaybeUser,
    request: Request<Body>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());
    let mut response = render_not_found_response(chrome);
    ErrorReport::from_message(
        "infra::http::public::not_found",
        StatusCode::NOT_FOUND,
        format!("no route for {}", request.uri().path()),
    )
    .attach(&mut response);
    response
}

fn render_post_form(chrome: LayoutChrome, content: PostFormContext) -> Response {
    let title = if content.is_edit {
        "Edit post"
    } else {
        "New post"
    };
    let view = LayoutContext::new(chrome.with_title(title), content);
    render_template_response(PostFormTemplate { view }, StatusCode::OK)
}

fn parse_post_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}

fn feed_error_to_response(err: FeedError, chrome: LayoutChrome) -> Response {
    const SOURCE: &str = "infra::http::feed_error_to_response";

    match err {
        FeedError::UnknownGroup(_) | FeedError::UnknownAuthor(_) => {
            let mut response = render_not_found_response(chrome);
            ErrorReport::from_error(SOURCE, StatusCode::NOT_FOUND, &err).attach(&mut response);
            response
        }
        FeedError::Repo(err) => repo_error_to_http(SOURCE, err).into_response(),
    }
}

fn post_error_to_response(err: PostError, chrome: LayoutChrome) -> Response {
    const SOURCE: &str = "infra::http::post_error_to_response";

    match err {
        PostError::NotFound(_) => {
            let mut response = render_not_found_response(chrome);
            ErrorReport::from_error(SOURCE, StatusCode::NOT_FOUND, &err).attach(&mut response);
            response
        }
        PostError::NotOwner { post_id, .. } => Redirect::to(&post_href(post_id)).into_response(),
        PostError::Storage(err) => HttpError::internal(SOURCE, &err).into_response(),
        PostError::Repo(err) => repo_error_to_http(SOURCE, err).into_response(),
    }
}

fn follow_error_to_response(err: FollowError, state: &HttpState, user: &UserRecord) -> Response {
    const SOURCE: &str = "infra::http::follow_error_to_response";

    match err {
        FollowError::UnknownAuthor(_) | FollowError::NotFollowing { .. } => {
            let mut response = render_not_found_response(state.chrome.load(Some(user)));
            ErrorReport::from_error(SOURCE, StatusCode::NOT_FOUND, &err).attach(&mut response);
            response
        }
        FollowError::Repo(err) => repo_error_to_http(SOURCE, err).into_response(),
    }
}

fn build_media_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}
