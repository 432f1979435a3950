//! Volatile repository implementations used by tests and database-less runs.
//!
//! The store mirrors the relational rules of the Postgres schema: unique
//! usernames, group slugs and follow pairs, cascade deletes from users and
//! posts, and `SET NULL` on a post's group when the group is removed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::repos::{
    CommentsRepo, CreateCommentParams, CreateGroupParams, CreatePostParams, CreateSessionParams,
    FollowsRepo, GroupsRepo, HealthRepo, PageWindow, PostQueryFilter, PostsRepo, PostsWriteRepo,
    RepoError, SessionsRepo, UpdatePostParams, UsersRepo,
};
use crate::domain::entities::{
    Authored, CommentEntry, CommentRecord, FollowRecord, GroupRecord, GroupRef, PostEntry,
    PostRecord, SessionRecord, UserRecord,
};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    users: BTreeMap<i64, UserRecord>,
    groups: BTreeMap<i64, GroupRecord>,
    posts: BTreeMap<i64, PostRecord>,
    comments: BTreeMap<i64, CommentRecord>,
    follows: BTreeMap<i64, FollowRecord>,
    sessions: BTreeMap<Uuid, SessionRecord>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn username(&self, user_id: i64) -> String {
        self.users
            .get(&user_id)
            .map(|user| user.username.clone())
            .unwrap_or_default()
    }

    fn entry(&self, post: &PostRecord) -> PostEntry {
        let group = post
            .group_id
            .and_then(|id| self.groups.get(&id))
            .map(|group| GroupRef {
                id: group.id,
                slug: group.slug.clone(),
                title: group.title.clone(),
            });
        PostEntry {
            post: post.clone(),
            author_username: self.username(post.author_id()),
            group,
        }
    }

    fn matches(&self, post: &PostRecord, filter: PostQueryFilter) -> bool {
        match filter {
            PostQueryFilter::All => true,
            PostQueryFilter::Group(group_id) => post.group_id == Some(group_id),
            PostQueryFilter::Author(author_id) => post.author_id() == author_id,
            PostQueryFilter::FollowedBy(user_id) => self
                .follows
                .values()
                .any(|follow| follow.user_id == user_id && follow.author_id == post.author_id()),
        }
    }

    /// Newest first, ties broken by descending id.
    fn ordered(&self, filter: PostQueryFilter) -> Vec<&PostRecord> {
        let mut posts: Vec<&PostRecord> = self
            .posts
            .values()
            .filter(|post| self.matches(post, filter))
            .collect();
        posts.sort_by(|a, b| {
            b.authored
                .created_at
                .cmp(&a.authored.created_at)
                .then(b.id.cmp(&a.id))
        });
        posts
    }

    fn remove_post(&mut self, post_id: i64) {
        self.posts.remove(&post_id);
        self.comments.retain(|_, comment| comment.post_id != post_id);
    }

    fn ensure_group_exists(&self, group_id: Option<i64>) -> Result<(), RepoError> {
        match group_id {
            Some(id) if !self.groups.contains_key(&id) => Err(RepoError::Integrity {
                message: format!("group {id} does not exist"),
            }),
            _ => Ok(()),
        }
    }

    fn ensure_user_exists(&self, user_id: i64) -> Result<(), RepoError> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(RepoError::Integrity {
                message: format!("user {user_id} does not exist"),
            })
        }
    }
}

#[derive(Default)]
pub struct InMemoryRepositories {
    state: RwLock<MemoryState>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn follow_count(&self) -> usize {
        self.state.read().await.follows.len()
    }

    pub async fn comment_count(&self) -> usize {
        self.state.read().await.comments.len()
    }

    /// Rewrite a post's creation time. Lets tests arrange feed ordering.
    pub async fn set_post_created_at(&self, post_id: i64, created_at: OffsetDateTime) {
        if let Some(post) = self.state.write().await.posts.get_mut(&post_id) {
            post.authored.created_at = created_at;
        }
    }
}

fn window<T>(items: Vec<T>, window: PageWindow) -> Vec<T> {
    let offset = usize::try_from(window.offset).unwrap_or(usize::MAX);
    let limit = usize::try_from(window.limit).unwrap_or(usize::MAX);
    items.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl UsersRepo for InMemoryRepositories {
    async fn create_user(&self, username: &str) -> Result<UserRecord, RepoError> {
        let mut state = self.state.write().await;
        if state.users.values().any(|user| user.username == username) {
            return Err(RepoError::Duplicate {
                constraint: "users_username_key".to_string(),
            });
        }

        let user = UserRecord {
            id: state.allocate_id(),
            username: username.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> Result<Option<UserRecord>, RepoError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, RepoError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn delete_user(&self, id: i64) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        if state.users.remove(&id).is_none() {
            return Err(RepoError::NotFound);
        }

        let authored: Vec<i64> = state
            .posts
            .values()
            .filter(|post| post.author_id() == id)
            .map(|post| post.id)
            .collect();
        for post_id in authored {
            state.remove_post(post_id);
        }
        state
            .comments
            .retain(|_, comment| comment.authored.author_id != id);
        state
            .follows
            .retain(|_, follow| follow.user_id != id && follow.author_id != id);
        state.sessions.retain(|_, session| session.user_id != id);
        Ok(())
    }
}

#[async_trait]
impl GroupsRepo for InMemoryRepositories {
    async fn create_group(&self, params: CreateGroupParams) -> Result<GroupRecord, RepoError> {
        let mut state = self.state.write().await;
        if state.groups.values().any(|group| group.slug == params.slug) {
            return Err(RepoError::Duplicate {
                constraint: "post_groups_slug_key".to_string(),
            });
        }

        let group = GroupRecord {
            id: state.allocate_id(),
            title: params.title,
            slug: params.slug,
            description: params.description,
        };
        state.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<GroupRecord>, RepoError> {
        Ok(self
            .state
            .read()
            .await
            .groups
            .values()
            .find(|group| group.slug == slug)
            .cloned())
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
        let mut groups: Vec<GroupRecord> =
            self.state.read().await.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn delete_group(&self, id: i64) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        if state.groups.remove(&id).is_none() {
            return Err(RepoError::NotFound);
        }
        for post in state.posts.values_mut() {
            if post.group_id == Some(id) {
                post.group_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PostsRepo for InMemoryRepositories {
    async fn count_posts(&self, filter: PostQueryFilter) -> Result<u64, RepoError> {
        let state = self.state.read().await;
        Ok(state
            .posts
            .values()
            .filter(|post| state.matches(post, filter))
            .count() as u64)
    }

    async fn list_posts(
        &self,
        filter: PostQueryFilter,
        page: PageWindow,
    ) -> Result<Vec<PostEntry>, RepoError> {
        let state = self.state.read().await;
        let entries = state
            .ordered(filter)
            .into_iter()
            .map(|post| state.entry(post))
            .collect();
        Ok(window(entries, page))
    }

    async fn find_post(&self, id: i64) -> Result<Option<PostEntry>, RepoError> {
        let state = self.state.read().await;
        Ok(state.posts.get(&id).map(|post| state.entry(post)))
    }
}

#[async_trait]
impl PostsWriteRepo for InMemoryRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let mut state = self.state.write().await;
        state.ensure_user_exists(params.author_id)?;
        state.ensure_group_exists(params.group_id)?;

        let post = PostRecord {
            id: state.allocate_id(),
            authored: Authored {
                author_id: params.author_id,
                text: params.text,
                created_at: OffsetDateTime::now_utc(),
            },
            group_id: params.group_id,
            image: params.image,
        };
        state.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let mut state = self.state.write().await;
        state.ensure_group_exists(params.group_id)?;

        let post = state.posts.get_mut(&params.id).ok_or(RepoError::NotFound)?;
        post.authored.text = params.text;
        post.group_id = params.group_id;
        post.image = params.image;
        Ok(post.clone())
    }

    async fn delete_post(&self, id: i64) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        if !state.posts.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        state.remove_post(id);
        Ok(())
    }
}

#[async_trait]
impl CommentsRepo for InMemoryRepositories {
    async fn list_for_post(&self, post_id: i64) -> Result<Vec<CommentEntry>, RepoError> {
        let state = self.state.read().await;
        let mut comments: Vec<&CommentRecord> = state
            .comments
            .values()
            .filter(|comment| comment.post_id == post_id)
            .collect();
        comments.sort_by(|a, b| {
            b.authored
                .created_at
                .cmp(&a.authored.created_at)
                .then(b.id.cmp(&a.id))
        });
        Ok(comments
            .into_iter()
            .map(|comment| CommentEntry {
                comment: comment.clone(),
                author_username: state.username(comment.authored.author_id),
            })
            .collect())
    }

    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let mut state = self.state.write().await;
        state.ensure_user_exists(params.author_id)?;
        if !state.posts.contains_key(&params.post_id) {
            return Err(RepoError::Integrity {
                message: format!("post {} does not exist", params.post_id),
            });
        }

        let comment = CommentRecord {
            id: state.allocate_id(),
            post_id: params.post_id,
            authored: Authored {
                author_id: params.author_id,
                text: params.text,
                created_at: OffsetDateTime::now_utc(),
            },
        };
        state.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }
}

#[async_trait]
impl FollowsRepo for InMemoryRepositories {
    async fn create_if_absent(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let mut state = self.state.write().await;
        state.ensure_user_exists(user_id)?;
        state.ensure_user_exists(author_id)?;
        if state
            .follows
            .values()
            .any(|follow| follow.user_id == user_id && follow.author_id == author_id)
        {
            return Ok(false);
        }

        let id = state.allocate_id();
        state.follows.insert(
            id,
            FollowRecord {
                id,
                user_id,
                author_id,
            },
        );
        Ok(true)
    }

    async fn delete_follow(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let mut state = self.state.write().await;
        let before = state.follows.len();
        state
            .follows
            .retain(|_, follow| !(follow.user_id == user_id && follow.author_id == author_id));
        Ok(state.follows.len() < before)
    }

    async fn is_following(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        Ok(self
            .state
            .read()
            .await
            .follows
            .values()
            .any(|follow| follow.user_id == user_id && follow.author_id == author_id))
    }
}

#[async_trait]
impl SessionsRepo for InMemoryRepositories {
    async fn create_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<SessionRecord, RepoError> {
        let mut state = self.state.write().await;
        state.ensure_user_exists(params.user_id)?;
        if state
            .sessions
            .values()
            .any(|session| session.prefix == params.prefix)
        {
            return Err(RepoError::Duplicate {
                constraint: "sessions_prefix_key".to_string(),
            });
        }

        let session = SessionRecord {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            prefix: params.prefix,
            hashed_secret: params.hashed_secret,
            created_at: OffsetDateTime::now_utc(),
            expires_at: params.expires_at,
        };
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<SessionRecord>, RepoError> {
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .find(|session| session.prefix == prefix)
            .cloned())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), RepoError> {
        self.state.write().await.sessions.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl HealthRepo for InMemoryRepositories {
    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}
