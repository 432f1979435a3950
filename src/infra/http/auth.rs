//! Cookie sessions: viewer resolution, gating extractors and the login pages.

use std::convert::Infallible;

use axum::{
    Form,
    body::Body,
    extract::{FromRequestParts, Query, State},
    http::{Request, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::application::accounts::{SessionAuthError, Viewer};
use crate::application::error::HttpError;
use crate::domain::entities::UserRecord;
use crate::presentation::views::{
    LayoutContext, LoginContext, LoginTemplate, render_template_response,
};

use super::public::HttpState;

pub const SESSION_COOKIE: &str = "murmur_session";

const LOGIN_PATH: &str = "/auth/login/";

/// Resolve the session cookie into a [`Viewer`] request extension.
pub(super) async fn resolve_viewer(
    State(state): State<HttpState>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let viewer = match jar.get(SESSION_COOKIE) {
        None => Viewer::anonymous(),
        Some(cookie) => match state.accounts.authenticate(cookie.value()).await {
            Ok(user) => Viewer::signed_in(user),
            Err(SessionAuthError::Repo(err)) => {
                warn!(
                    target = "murmur::http::auth",
                    error = %err,
                    "session lookup failed, treating request as anonymous"
                );
                Viewer::anonymous()
            }
            Err(err) => {
                debug!(target = "murmur::http::auth", error = %err, "ignoring session cookie");
                Viewer::anonymous()
            }
        },
    };

    request.extensions_mut().insert(viewer);
    next.run(request).await
}

/// A signed-in user. Anonymous requests are redirected to the login page.
pub struct CurrentUser(pub UserRecord);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Viewer>().and_then(Viewer::user) {
            Some(user) => Ok(CurrentUser(user.clone())),
            None => {
                let requested = parts
                    .uri
                    .path_and_query()
                    .map(|value| value.as_str())
                    .unwrap_or_else(|| parts.uri.path());
                Err(Redirect::to(&login_redirect_target(requested)))
            }
        }
    }
}

/// The signed-in user, if any.
pub struct MaybeUser(pub Option<UserRecord>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts
                .extensions
                .get::<Viewer>()
                .and_then(Viewer::user)
                .cloned(),
        ))
    }
}

/// `/auth/login/?next=<path>` with the path percent-encoded except for `/`.
pub fn login_redirect_target(next: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(next.as_bytes()).collect();
    format!("{LOGIN_PATH}?next={}", encoded.replace("%2F", "/"))
}

/// Only local absolute paths are followed after login; anything else goes home.
pub fn safe_next(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct LoginQuery {
    next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct LoginForm {
    token: String,
    next: Option<String>,
}

pub(super) async fn login_page(
    State(state): State<HttpState>,
    MaybeUser(viewer): MaybeUser,
    Query(query): Query<LoginQuery>,
) -> Response {
    let next = safe_next(query.next.as_deref());
    if viewer.is_some() {
        return Redirect::to(&next).into_response();
    }
    render_login(&state, next, None)
}

pub(super) async fn login_submit(
    State(state): State<HttpState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let next = safe_next(form.next.as_deref());
    let token = form.token.trim();

    match state.accounts.authenticate(token).await {
        Ok(user) => {
            info!(
                target = "murmur::http::auth",
                user_id = user.id,
                "session cookie issued"
            );
            let cookie = Cookie::build((SESSION_COOKIE, token.to_string()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax);
            (jar.add(cookie), Redirect::to(&next)).into_response()
        }
        Err(SessionAuthError::Repo(err)) => {
            HttpError::internal("infra::http::auth::login_submit", &err).into_response()
        }
        Err(err) => {
            debug!(target = "murmur::http::auth", error = %err, "login rejected");
            render_login(
                &state,
                next,
                Some("That session token is not valid.".to_string()),
            )
        }
    }
}

pub(super) async fn logout(State(state): State<HttpState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE)
        && let Err(err) = state.accounts.revoke(cookie.value()).await
    {
        warn!(target = "murmur::http::auth", error = %err, "failed to revoke session");
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/")).into_response()
}

fn render_login(state: &HttpState, next: String, error: Option<String>) -> Response {
    let chrome = state.chrome.load(None).with_title("Log in");
    let view = LayoutContext::new(chrome, LoginContext { next, error });
    render_template_response(LoginTemplate { view }, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_target_keeps_slashes() {
        assert_eq!(login_redirect_target("/create/"), "/auth/login/?next=/create/");
        assert_eq!(
            login_redirect_target("/follow/?page=2"),
            "/auth/login/?next=/follow/%3Fpage%3D2"
        );
    }

    #[test]
    fn next_must_be_local() {
        assert_eq!(safe_next(Some("/posts/4/")), "/posts/4/");
        assert_eq!(safe_next(Some("https://evil.example/")), "/");
        assert_eq!(safe_next(Some("//evil.example/")), "/");
        assert_eq!(safe_next(Some("/\\evil")), "/");
        assert_eq!(safe_next(None), "/");
    }
}
