use crate::application::error::{ErrorReport, HttpError};
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

const PUBLISHED_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[day padding:none] [month repr:short] [year], [hour]:[minute]");
const ISO_DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(chrome: LayoutChrome) -> Response {
    let content = ErrorPageView::not_found();
    let view = LayoutContext::new(chrome, content);
    let mut response = render_template_response(ErrorTemplate { view }, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

pub fn format_published(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(PUBLISHED_FORMAT)
        .unwrap_or_else(|_| timestamp.to_string())
}

pub fn format_iso_date(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(ISO_DATE_FORMAT)
        .unwrap_or_else(|_| timestamp.date().to_string())
}

pub fn media_url(stored_path: &str) -> String {
    format!("/media/{stored_path}")
}

pub fn profile_href(username: &str) -> String {
    format!("/profile/{username}/")
}

pub fn post_href(id: i64) -> String {
    format!("/posts/{id}/")
}

pub fn group_href(slug: &str) -> String {
    format!("/group/{slug}/")
}

#[derive(Clone)]
pub struct NavigationView {
    pub entries: Vec<NavigationLinkView>,
}

#[derive(Clone)]
pub struct FooterView {
    pub copy: String,
}

#[derive(Clone)]
pub struct BrandView {
    pub title: String,
    pub href: String,
}

#[derive(Clone)]
pub struct NavigationLinkView {
    pub label: String,
    pub href: String,
}

#[derive(Clone)]
pub struct ViewerView {
    pub username: String,
    pub profile_href: String,
}

#[derive(Clone)]
pub struct LayoutChrome {
    pub brand: BrandView,
    pub navigation: NavigationView,
    pub footer: FooterView,
    pub meta: PageMetaView,
    pub viewer: Option<ViewerView>,
}

impl LayoutChrome {
    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self {
            meta: self.meta.with_title(title.into()),
            ..self
        }
    }
}

#[derive(Clone)]
pub struct LayoutContext<T> {
    pub brand: BrandView,
    pub navigation: NavigationView,
    pub footer: FooterView,
    pub meta: PageMetaView,
    pub viewer: Option<ViewerView>,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(chrome: LayoutChrome, content: T) -> Self {
        Self {
            brand: chrome.brand,
            navigation: chrome.navigation,
            footer: chrome.footer,
            meta: chrome.meta,
            viewer: chrome.viewer,
            content,
        }
    }
}

#[derive(Clone)]
pub struct PageMetaView {
    pub title: String,
    pub description: String,
}

impl PageMetaView {
    pub fn with_title(self, title: String) -> Self {
        let title = if title.is_empty() {
            self.title
        } else {
            format!("{title} · {}", self.title)
        };
        Self { title, ..self }
    }
}

#[derive(Clone)]
pub struct GroupBadge {
    pub title: String,
    pub href: String,
}

#[derive(Clone)]
pub struct PostCard {
    pub id: i64,
    pub href: String,
    pub text: String,
    pub author_username: String,
    pub author_href: String,
    pub published: String,
    pub iso_date: String,
    pub group: Option<GroupBadge>,
    pub image_url: Option<String>,
}

#[derive(Clone)]
pub struct PageLinkView {
    pub number: u64,
    pub href: String,
    pub is_current: bool,
}

#[derive(Clone)]
pub struct PaginatorView {
    pub number: u64,
    pub total_pages: u64,
    pub previous_href: Option<String>,
    pub next_href: Option<String>,
    pub pages: Vec<PageLinkView>,
}

impl PaginatorView {
    pub fn is_paginated(&self) -> bool {
        self.total_pages > 1
    }
}

pub struct FeedContext {
    pub heading: String,
    pub cards: Vec<PostCard>,
    pub paginator: PaginatorView,
    pub empty_message: String,
}

impl FeedContext {
    pub fn has_results(&self) -> bool {
        !self.cards.is_empty()
    }
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub view: LayoutContext<FeedContext>,
}

#[derive(Template)]
#[template(path = "follow.html")]
pub struct FollowTemplate {
    pub view: LayoutContext<FeedContext>,
}

pub struct GroupView {
    pub title: String,
    pub slug: String,
    pub description: String,
}

pub struct GroupFeedContext {
    pub group: GroupView,
    pub feed: FeedContext,
}

#[derive(Template)]
#[template(path = "group.html")]
pub struct GroupTemplate {
    pub view: LayoutContext<GroupFeedContext>,
}

pub struct ProfileContext {
    pub username: String,
    pub post_count: u64,
    pub following: bool,
    pub can_follow: bool,
    pub follow_action: String,
    pub unfollow_action: String,
    pub feed: FeedContext,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub view: LayoutContext<ProfileContext>,
}

pub struct CommentView {
    pub author_username: String,
    pub author_href: String,
    pub text: String,
    pub published: String,
}

pub struct CommentFormView {
    pub action: String,
    pub text: String,
    pub errors: Vec<String>,
}

pub struct PostDetailContext {
    pub title: String,
    pub card: PostCard,
    pub author_post_count: u64,
    pub can_edit: bool,
    pub edit_href: String,
    pub delete_action: String,
    pub comments: Vec<CommentView>,
    pub comment_form: Option<CommentFormView>,
    pub login_href: String,
}

#[derive(Template)]
#[template(path = "post_detail.html")]
pub struct PostDetailTemplate {
    pub view: LayoutContext<PostDetailContext>,
}

pub struct GroupOption {
    pub id: i64,
    pub title: String,
    pub selected: bool,
}

#[derive(Default)]
pub struct PostFormErrors {
    pub text: Vec<String>,
    pub group: Vec<String>,
    pub image: Vec<String>,
}

impl PostFormErrors {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.group.is_empty() && self.image.is_empty()
    }
}

pub struct PostFormContext {
    pub is_edit: bool,
    pub action: String,
    pub text: String,
    pub groups: Vec<GroupOption>,
    pub current_image: Option<String>,
    pub errors: PostFormErrors,
}

#[derive(Template)]
#[template(path = "post_form.html")]
pub struct PostFormTemplate {
    pub view: LayoutContext<PostFormContext>,
}

pub struct LoginContext {
    pub next: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub view: LayoutContext<LoginContext>,
}

#[derive(Template)]
#[template(path = "about_author.html")]
pub struct AboutAuthorTemplate {
    pub view: LayoutContext<()>,
}

#[derive(Template)]
#[template(path = "about_tech.html")]
pub struct AboutTechTemplate {
    pub view: LayoutContext<()>,
}

pub struct ErrorPageView {
    pub title: String,
    pub message: String,
    pub primary_action: Option<ErrorAction>,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            title: "Page Not Found".to_string(),
            message: "The page you requested does not exist. Try returning to the homepage."
                .to_string(),
            primary_action: Some(ErrorAction::home()),
        }
    }
}

pub struct ErrorAction {
    pub href: String,
    pub label: String,
}

impl ErrorAction {
    pub fn home() -> Self {
        Self {
            href: "/".to_string(),
            label: "Back to home".to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub view: LayoutContext<ErrorPageView>,
}
