use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::application::repos::{CreateGroupParams, GroupsRepo, RepoError};
use crate::domain::entities::GroupRecord;
use crate::domain::slug::{SlugAsyncError, SlugError, derive_slug, unique_slug};

const MAX_TITLE_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("invalid group: {0}")]
    Invalid(String),
    #[error("slug `{0}` is already in use")]
    SlugTaken(String),
    #[error("unknown group `{0}`")]
    UnknownGroup(String),
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<SlugAsyncError<RepoError>> for GroupError {
    fn from(err: SlugAsyncError<RepoError>) -> Self {
        match err {
            SlugAsyncError::Slug(inner) => Self::Slug(inner),
            SlugAsyncError::Predicate(inner) => Self::Repo(inner),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub title: String,
    /// Derived from the title when absent.
    pub slug: Option<String>,
    pub description: String,
}

/// Group management. Groups are created and removed by operators only.
#[derive(Clone)]
pub struct GroupService {
    groups: Arc<dyn GroupsRepo>,
}

impl GroupService {
    pub fn new(groups: Arc<dyn GroupsRepo>) -> Self {
        Self { groups }
    }

    pub async fn list(&self) -> Result<Vec<GroupRecord>, GroupError> {
        Ok(self.groups.list_groups().await?)
    }

    pub async fn create(&self, input: NewGroup) -> Result<GroupRecord, GroupError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(GroupError::Invalid("title must not be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(GroupError::Invalid(
                "title must be at most 200 characters".into(),
            ));
        }

        let slug = match input.slug.as_deref().map(str::trim) {
            Some(explicit) if !explicit.is_empty() => derive_slug(explicit)?,
            _ => {
                let groups = self.groups.clone();
                unique_slug(&title, move |candidate| {
                    let groups = groups.clone();
                    async move {
                        let existing = groups.find_by_slug(&candidate).await?;
                        Ok::<bool, RepoError>(existing.is_none())
                    }
                })
                .await?
            }
        };

        let params = CreateGroupParams {
            title,
            slug: slug.clone(),
            description: input.description.trim().to_string(),
        };
        match self.groups.create_group(params).await {
            Ok(group) => {
                info!(
                    target = "murmur::groups",
                    group_id = group.id,
                    slug = %group.slug,
                    "group created"
                );
                Ok(group)
            }
            Err(RepoError::Duplicate { .. }) => Err(GroupError::SlugTaken(slug)),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete the group; its posts survive without a group.
    pub async fn delete(&self, slug: &str) -> Result<(), GroupError> {
        let group = self
            .groups
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| GroupError::UnknownGroup(slug.to_string()))?;
        self.groups.delete_group(group.id).await?;
        info!(target = "murmur::groups", group_id = group.id, "group deleted");
        Ok(())
    }
}
