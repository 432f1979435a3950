//! Wiring of repositories, services and router state.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;

use crate::application::{
    accounts::AccountService,
    chrome::ChromeService,
    feed::FeedService,
    follows::FollowService,
    groups::GroupService,
    pagination::Paginator,
    posts::PostService,
    repos::{
        CommentsRepo, FollowsRepo, GroupsRepo, HealthRepo, PostsRepo, PostsWriteRepo,
        SessionsRepo, UsersRepo,
    },
};
use crate::cache::{CacheConfig, ResponseCache};
use crate::config::{Settings, SiteSettings};

use super::error::InfraError;
use super::http::{AdminState, HttpState};
use super::uploads::UploadStorage;

/// Every repository interface the application needs, satisfied by one backend.
pub trait Repositories:
    UsersRepo
    + GroupsRepo
    + PostsRepo
    + PostsWriteRepo
    + CommentsRepo
    + FollowsRepo
    + SessionsRepo
    + HealthRepo
    + 'static
{
}

impl<T> Repositories for T where
    T: UsersRepo
        + GroupsRepo
        + PostsRepo
        + PostsWriteRepo
        + CommentsRepo
        + FollowsRepo
        + SessionsRepo
        + HealthRepo
        + 'static
{
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub upload_root: PathBuf,
    pub max_request_bytes: usize,
    pub page_size: NonZeroU32,
    pub cache: CacheConfig,
    pub site: SiteSettings,
}

impl From<&Settings> for ServiceOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            upload_root: settings.uploads.directory.clone(),
            max_request_bytes: usize::try_from(settings.uploads.max_request_bytes.get())
                .unwrap_or(usize::MAX),
            page_size: settings.feed.page_size,
            cache: CacheConfig::from(&settings.cache),
            site: settings.site.clone(),
        }
    }
}

pub struct ApplicationContext {
    pub http: HttpState,
    pub admin: AdminState,
    pub accounts: Arc<AccountService>,
    pub groups: Arc<GroupService>,
}

pub fn build_application_context<R: Repositories>(
    repositories: Arc<R>,
    options: ServiceOptions,
) -> Result<ApplicationContext, InfraError> {
    let users: Arc<dyn UsersRepo> = repositories.clone();
    let groups_repo: Arc<dyn GroupsRepo> = repositories.clone();
    let posts: Arc<dyn PostsRepo> = repositories.clone();
    let posts_write: Arc<dyn PostsWriteRepo> = repositories.clone();
    let comments: Arc<dyn CommentsRepo> = repositories.clone();
    let follows: Arc<dyn FollowsRepo> = repositories.clone();
    let sessions: Arc<dyn SessionsRepo> = repositories.clone();
    let health: Arc<dyn HealthRepo> = repositories;

    let uploads = Arc::new(UploadStorage::new(options.upload_root)?);

    let feed = Arc::new(FeedService::new(
        posts.clone(),
        groups_repo.clone(),
        users.clone(),
        follows.clone(),
        Paginator::new(options.page_size),
    ));
    let post_service = Arc::new(PostService::new(
        posts,
        posts_write,
        comments,
        groups_repo.clone(),
        uploads.clone(),
    ));
    let follow_service = Arc::new(FollowService::new(users.clone(), follows));
    let accounts = Arc::new(AccountService::new(users, sessions));
    let groups = Arc::new(GroupService::new(groups_repo));
    let chrome = Arc::new(ChromeService::new(options.site));

    let cache = options
        .cache
        .enabled
        .then(|| Arc::new(ResponseCache::new(&options.cache)));

    let http = HttpState {
        feed,
        posts: post_service,
        follows: follow_service,
        accounts: accounts.clone(),
        chrome,
        uploads,
        health: health.clone(),
        cache: cache.clone(),
        max_request_bytes: options.max_request_bytes,
    };
    let admin = AdminState { cache, health };

    Ok(ApplicationContext {
        http,
        admin,
        accounts,
        groups,
    })
}
