use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::application::repos::{FollowsRepo, RepoError, UsersRepo};
use crate::domain::entities::UserRecord;

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("unknown author `{0}`")]
    UnknownAuthor(String),
    #[error("`{requester}` does not follow `{author}`")]
    NotFollowing { requester: String, author: String },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Created,
    AlreadyFollowing,
    /// Following yourself is silently ignored.
    SelfFollowIgnored,
}

#[derive(Clone)]
pub struct FollowService {
    users: Arc<dyn UsersRepo>,
    follows: Arc<dyn FollowsRepo>,
}

impl FollowService {
    pub fn new(users: Arc<dyn UsersRepo>, follows: Arc<dyn FollowsRepo>) -> Self {
        Self { users, follows }
    }

    pub async fn follow(
        &self,
        requester: &UserRecord,
        username: &str,
    ) -> Result<FollowOutcome, FollowError> {
        let author = self.author(username).await?;
        if author.id == requester.id {
            debug!(
                target = "murmur::follows",
                user_id = requester.id,
                "ignoring self-follow"
            );
            return Ok(FollowOutcome::SelfFollowIgnored);
        }

        let created = self
            .follows
            .create_if_absent(requester.id, author.id)
            .await?;
        if !created {
            return Ok(FollowOutcome::AlreadyFollowing);
        }

        info!(
            target = "murmur::follows",
            user_id = requester.id,
            author_id = author.id,
            "follow created"
        );
        Ok(FollowOutcome::Created)
    }

    pub async fn unfollow(
        &self,
        requester: &UserRecord,
        username: &str,
    ) -> Result<(), FollowError> {
        let author = self.author(username).await?;
        let removed = self.follows.delete_follow(requester.id, author.id).await?;
        if !removed {
            return Err(FollowError::NotFollowing {
                requester: requester.username.clone(),
                author: author.username,
            });
        }

        info!(
            target = "murmur::follows",
            user_id = requester.id,
            author_id = author.id,
            "follow removed"
        );
        Ok(())
    }

    async fn author(&self, username: &str) -> Result<UserRecord, FollowError> {
        self.users
            .find_by_username(username)
            .await?
            .ok_or_else(|| FollowError::UnknownAuthor(username.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::InMemoryRepositories;

    fn service(repos: &Arc<InMemoryRepositories>) -> FollowService {
        FollowService::new(repos.clone(), repos.clone())
    }

    #[tokio::test]
    async fn following_twice_keeps_single_row() {
        let repos = Arc::new(InMemoryRepositories::new());
        let reader = repos.create_user("reader").await.expect("user");
        repos.create_user("author").await.expect("user");
        let follows = service(&repos);

        assert_eq!(
            follows.follow(&reader, "author").await.expect("follow"),
            FollowOutcome::Created
        );
        assert_eq!(
            follows.follow(&reader, "author").await.expect("follow"),
            FollowOutcome::AlreadyFollowing
        );
        assert_eq!(repos.follow_count().await, 1);
    }

    #[tokio::test]
    async fn self_follow_creates_nothing() {
        let repos = Arc::new(InMemoryRepositories::new());
        let user = repos.create_user("narcissus").await.expect("user");

        let outcome = service(&repos)
            .follow(&user, "narcissus")
            .await
            .expect("handled");
        assert_eq!(outcome, FollowOutcome::SelfFollowIgnored);
        assert_eq!(repos.follow_count().await, 0);
    }

    #[tokio::test]
    async fn unfollow_without_relationship_is_reported() {
        let repos = Arc::new(InMemoryRepositories::new());
        let reader = repos.create_user("reader").await.expect("user");
        repos.create_user("author").await.expect("user");

        let err = service(&repos)
            .unfollow(&reader, "author")
            .await
            .expect_err("nothing to remove");
        assert!(matches!(err, FollowError::NotFollowing { .. }));
    }

    #[tokio::test]
    async fn unknown_author_is_reported() {
        let repos = Arc::new(InMemoryRepositories::new());
        let reader = repos.create_user("reader").await.expect("user");

        let err = service(&repos)
            .follow(&reader, "ghost")
            .await
            .expect_err("unknown author");
        assert!(matches!(err, FollowError::UnknownAuthor(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn unfollow_removes_relationship() {
        let repos = Arc::new(InMemoryRepositories::new());
        let reader = repos.create_user("reader").await.expect("user");
        let author = repos.create_user("author").await.expect("user");
        let follows = service(&repos);

        follows.follow(&reader, "author").await.expect("follow");
        follows.unfollow(&reader, "author").await.expect("unfollow");
        assert!(
            !repos
                .is_following(reader.id, author.id)
                .await
                .expect("lookup")
        );
    }
}
