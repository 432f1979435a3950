use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::application::feed::post_card;
use crate::application::repos::{
    CommentsRepo, CreateCommentParams, CreatePostParams, GroupsRepo, PostQueryFilter, PostsRepo,
    PostsWriteRepo, RepoError, UpdatePostParams,
};
use crate::domain::entities::{CommentRecord, GroupRecord, PostEntry, PostRecord, UserRecord};
use crate::domain::validation::{
    CommentDraft, FIELD_GROUP, FIELD_IMAGE, FIELD_TEXT, FieldErrors, ImageChange, PostDraft,
    ValidatedImage, validate_comment_draft, validate_post_draft,
};
use crate::infra::uploads::{UploadStorage, UploadStorageError};
use crate::presentation::views::{
    CommentFormView, CommentView, GroupOption, PostDetailContext, PostFormContext,
    PostFormErrors, format_published, media_url, post_href, profile_href,
};

const IMAGE_DIRECTORY: &str = "posts";

#[derive(Debug, Error)]
pub enum PostError {
    #[error("post {0} not found")]
    NotFound(i64),
    #[error("user {user_id} does not own post {post_id}")]
    NotOwner { post_id: i64, user_id: i64 },
    #[error(transparent)]
    Storage(#[from] UploadStorageError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Result of a post submission that passed the permission checks.
pub enum PostSubmitOutcome {
    Saved(PostRecord),
    Rejected(PostFormContext),
}

pub enum CommentOutcome {
    Created(CommentRecord),
    Rejected(PostDetailContext),
}

#[derive(Clone)]
pub struct PostService {
    posts: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    comments: Arc<dyn CommentsRepo>,
    groups: Arc<dyn GroupsRepo>,
    storage: Arc<UploadStorage>,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        comments: Arc<dyn CommentsRepo>,
        groups: Arc<dyn GroupsRepo>,
        storage: Arc<UploadStorage>,
    ) -> Self {
        Self {
            posts,
            writer,
            comments,
            groups,
            storage,
        }
    }

    pub async fn find(&self, id: i64) -> Result<PostEntry, PostError> {
        self.posts.find_post(id).await?.ok_or(PostError::NotFound(id))
    }

    pub async fn detail(
        &self,
        id: i64,
        viewer: Option<&UserRecord>,
    ) -> Result<PostDetailContext, PostError> {
        let entry = self.find(id).await?;
        let form = viewer.map(|_| CommentFormView {
            action: format!("{}comment/", post_href(id)),
            text: String::new(),
            errors: Vec::new(),
        });
        self.detail_context(entry, viewer, form).await
    }

    pub async fn create_form(&self) -> Result<PostFormContext, PostError> {
        let groups = self.groups.list_groups().await?;
        Ok(form_context(
            None,
            String::new(),
            None,
            None,
            &groups,
            PostFormErrors::default(),
        ))
    }

    pub async fn edit_form(
        &self,
        id: i64,
        viewer: &UserRecord,
    ) -> Result<PostFormContext, PostError> {
        let entry = self.owned_post(id, viewer).await?;
        let groups = self.groups.list_groups().await?;
        let post = entry.post;
        Ok(form_context(
            Some(post.id),
            post.authored.text,
            post.group_id,
            post.image,
            &groups,
            PostFormErrors::default(),
        ))
    }

    pub async fn create(
        &self,
        author: &UserRecord,
        draft: PostDraft,
    ) -> Result<PostSubmitOutcome, PostError> {
        let groups = self.groups.list_groups().await?;
        let submitted_text = draft.text.clone();
        let submitted_group = parse_group(draft.group.as_deref());

        let validated = match validate_post_draft(draft, &groups) {
            Ok(validated) => validated,
            Err(errors) => {
                return Ok(PostSubmitOutcome::Rejected(form_context(
                    None,
                    submitted_text,
                    submitted_group,
                    None,
                    &groups,
                    form_errors(&errors),
                )));
            }
        };

        let image = match &validated.image {
            ImageChange::Replace(image) => Some(self.store_image(image).await?),
            ImageChange::Keep | ImageChange::Clear => None,
        };

        let created = self
            .writer
            .create_post(CreatePostParams {
                author_id: author.id,
                text: validated.text,
                group_id: validated.group_id,
                image: image.clone(),
            })
            .await;

        let post = match created {
            Ok(post) => post,
            Err(err) => {
                if let Some(path) = image {
                    self.discard_upload(&path).await;
                }
                return Err(err.into());
            }
        };

        info!(
            target = "murmur::posts",
            post_id = post.id,
            author_id = author.id,
            has_image = post.image.is_some(),
            "post created"
        );
        Ok(PostSubmitOutcome::Saved(post))
    }

    pub async fn update(
        &self,
        id: i64,
        editor: &UserRecord,
        draft: PostDraft,
    ) -> Result<PostSubmitOutcome, PostError> {
        let existing = self.owned_post(id, editor).await?.post;
        let groups = self.groups.list_groups().await?;
        let submitted_text = draft.text.clone();
        let submitted_group = parse_group(draft.group.as_deref());

        let validated = match validate_post_draft(draft, &groups) {
            Ok(validated) => validated,
            Err(errors) => {
                return Ok(PostSubmitOutcome::Rejected(form_context(
                    Some(id),
                    submitted_text,
                    submitted_group,
                    existing.image,
                    &groups,
                    form_errors(&errors),
                )));
            }
        };

        let (image, stored) = match &validated.image {
            ImageChange::Keep => (existing.image.clone(), None),
            ImageChange::Clear => (None, None),
            ImageChange::Replace(image) => {
                let stored = self.store_image(image).await?;
                (Some(stored.clone()), Some(stored))
            }
        };

        let updated = self
            .writer
            .update_post(UpdatePostParams {
                id,
                text: validated.text,
                group_id: validated.group_id,
                image: image.clone(),
            })
            .await;

        let post = match updated {
            Ok(post) => post,
            Err(err) => {
                if let Some(path) = stored {
                    self.discard_upload(&path).await;
                }
                return Err(err.into());
            }
        };

        if let Some(previous) = existing.image.as_deref()
            && image.as_deref() != Some(previous)
        {
            self.discard_upload(previous).await;
        }

        info!(
            target = "murmur::posts",
            post_id = post.id,
            author_id = editor.id,
            "post updated"
        );
        Ok(PostSubmitOutcome::Saved(post))
    }

    pub async fn delete(&self, id: i64, requester: &UserRecord) -> Result<(), PostError> {
        let post = self.owned_post(id, requester).await?.post;
        self.writer.delete_post(id).await?;
        if let Some(path) = post.image.as_deref() {
            self.discard_upload(path).await;
        }
        info!(
            target = "murmur::posts",
            post_id = id,
            author_id = requester.id,
            "post deleted"
        );
        Ok(())
    }

    pub async fn add_comment(
        &self,
        post_id: i64,
        author: &UserRecord,
        draft: CommentDraft,
    ) -> Result<CommentOutcome, PostError> {
        let entry = self.find(post_id).await?;
        let submitted = draft.text.clone();

        let validated = match validate_comment_draft(draft) {
            Ok(validated) => validated,
            Err(errors) => {
                let form = CommentFormView {
                    action: format!("{}comment/", post_href(post_id)),
                    text: submitted,
                    errors: errors.messages_for(FIELD_TEXT),
                };
                let context = self.detail_context(entry, Some(author), Some(form)).await?;
                return Ok(CommentOutcome::Rejected(context));
            }
        };

        let comment = self
            .comments
            .create_comment(CreateCommentParams {
                post_id,
                author_id: author.id,
                text: validated.text,
            })
            .await?;

        info!(
            target = "murmur::posts",
            post_id,
            comment_id = comment.id,
            author_id = author.id,
            "comment added"
        );
        Ok(CommentOutcome::Created(comment))
    }

    async fn owned_post(&self, id: i64, user: &UserRecord) -> Result<PostEntry, PostError> {
        let entry = self.find(id).await?;
        if !entry.post.is_authored_by(user) {
            return Err(PostError::NotOwner {
                post_id: id,
                user_id: user.id,
            });
        }
        Ok(entry)
    }

    async fn detail_context(
        &self,
        entry: PostEntry,
        viewer: Option<&UserRecord>,
        comment_form: Option<CommentFormView>,
    ) -> Result<PostDetailContext, PostError> {
        let id = entry.post.id;
        let author_post_count = self
            .posts
            .count_posts(PostQueryFilter::Author(entry.post.author_id()))
            .await?;
        let comments = self
            .comments
            .list_for_post(id)
            .await?
            .into_iter()
            .map(|entry| CommentView {
                author_href: profile_href(&entry.author_username),
                author_username: entry.author_username,
                published: format_published(entry.comment.authored.created_at),
                text: entry.comment.authored.text,
            })
            .collect();
        let can_edit = viewer.is_some_and(|user| entry.post.is_authored_by(user));
        let href = post_href(id);

        Ok(PostDetailContext {
            title: entry.post.display_title(),
            card: post_card(&entry),
            author_post_count,
            can_edit,
            edit_href: format!("{href}edit/"),
            delete_action: format!("{href}delete/"),
            comments,
            comment_form,
            login_href: format!("/auth/login/?next={href}"),
        })
    }

    async fn store_image(&self, image: &ValidatedImage) -> Result<String, PostError> {
        let stored = self
            .storage
            .store(IMAGE_DIRECTORY, &image.filename, image.bytes.clone())
            .await?;
        info!(
            target = "murmur::posts",
            stored_path = %stored.stored_path,
            content_type = %image.content_type,
            width = image.width,
            height = image.height,
            size_bytes = stored.size_bytes,
            checksum = %stored.checksum,
            "image stored"
        );
        Ok(stored.stored_path)
    }

    async fn discard_upload(&self, stored_path: &str) {
        if let Err(err) = self.storage.delete(stored_path).await {
            warn!(
                target = "murmur::posts",
                stored_path,
                error = %err,
                "failed to remove stored image"
            );
        }
    }
}

fn parse_group(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|value| value.trim().parse().ok())
}

fn form_errors(errors: &FieldErrors) -> PostFormErrors {
    PostFormErrors {
        text: errors.messages_for(FIELD_TEXT),
        group: errors.messages_for(FIELD_GROUP),
        image: errors.messages_for(FIELD_IMAGE),
    }
}

fn form_context(
    post_id: Option<i64>,
    text: String,
    group_id: Option<i64>,
    image: Option<String>,
    groups: &[GroupRecord],
    errors: PostFormErrors,
) -> PostFormContext {
    let action = match post_id {
        Some(id) => format!("{}edit/", post_href(id)),
        None => "/create/".to_string(),
    };

    PostFormContext {
        is_edit: post_id.is_some(),
        action,
        text,
        groups: groups
            .iter()
            .map(|group| GroupOption {
                id: group.id,
                title: group.display_title(),
                selected: Some(group.id) == group_id,
            })
            .collect(),
        current_image: image.as_deref().map(media_url),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;
    use crate::application::repos::{CommentsRepo, UsersRepo};
    use crate::domain::validation::ImageUpload;
    use crate::infra::memory::InMemoryRepositories;

    const TINY_GIF: &[u8] = &[
        0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x21, 0xf9,
        0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00,
        0x00, 0x02, 0x01, 0x00, 0x00,
    ];

    struct Fixture {
        _dir: TempDir,
        repos: Arc<InMemoryRepositories>,
        service: PostService,
        storage: Arc<UploadStorage>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let storage = Arc::new(UploadStorage::new(dir.path().to_path_buf()).expect("storage"));
        let repos = Arc::new(InMemoryRepositories::new());
        let service = PostService::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            repos.clone(),
            storage.clone(),
        );
        Fixture {
            _dir: dir,
            repos,
            service,
            storage,
        }
    }

    fn draft(text: &str) -> PostDraft {
        PostDraft {
            text: text.to_string(),
            ..Default::default()
        }
    }

    fn saved(outcome: PostSubmitOutcome) -> PostRecord {
        match outcome {
            PostSubmitOutcome::Saved(post) => post,
            PostSubmitOutcome::Rejected(_) => panic!("submission was rejected"),
        }
    }

    #[tokio::test]
    async fn rejected_create_keeps_input_and_persists_nothing() {
        let fx = fixture();
        let author = fx.repos.create_user("author").await.expect("user");

        let outcome = fx
            .service
            .create(&author, draft("   "))
            .await
            .expect("handled");
        match outcome {
            PostSubmitOutcome::Rejected(form) => {
                assert!(!form.errors.text.is_empty());
                assert!(!form.is_edit);
            }
            PostSubmitOutcome::Saved(_) => panic!("blank post must be rejected"),
        }
        assert_eq!(
            fx.repos.count_posts(PostQueryFilter::All).await.expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn non_owner_cannot_update() {
        let fx = fixture();
        let owner = fx.repos.create_user("owner").await.expect("user");
        let other = fx.repos.create_user("other").await.expect("user");
        let post = saved(fx.service.create(&owner, draft("original")).await.expect("ok"));

        let err = fx
            .service
            .update(post.id, &other, draft("hijacked"))
            .await
            .err()
            .expect("not owner");
        assert!(matches!(err, PostError::NotOwner { .. }));

        let stored = fx.service.find(post.id).await.expect("post");
        assert_eq!(stored.post.authored.text, "original");
    }

    #[tokio::test]
    async fn image_round_trips_through_storage() {
        let fx = fixture();
        let author = fx.repos.create_user("author").await.expect("user");
        let submission = PostDraft {
            text: "picture".to_string(),
            image: Some(ImageUpload {
                filename: "Tiny Pic.gif".to_string(),
                bytes: Bytes::from_static(TINY_GIF),
            }),
            ..Default::default()
        };

        let post = saved(fx.service.create(&author, submission).await.expect("ok"));
        let stored_path = post.image.clone().expect("image reference");
        assert!(stored_path.starts_with("posts/"));
        assert!(stored_path.ends_with("tiny-pic.gif"));

        let reloaded = fx.service.find(post.id).await.expect("post");
        assert_eq!(reloaded.post.image.as_deref(), Some(stored_path.as_str()));
        let bytes = fx.storage.read(&stored_path).await.expect("stored bytes");
        assert_eq!(bytes.as_ref(), TINY_GIF);
    }

    #[tokio::test]
    async fn clearing_image_removes_stored_file() {
        let fx = fixture();
        let author = fx.repos.create_user("author").await.expect("user");
        let submission = PostDraft {
            text: "picture".to_string(),
            image: Some(ImageUpload {
                filename: "tiny.gif".to_string(),
                bytes: Bytes::from_static(TINY_GIF),
            }),
            ..Default::default()
        };
        let post = saved(fx.service.create(&author, submission).await.expect("ok"));
        let stored_path = post.image.clone().expect("image");

        let edit = PostDraft {
            text: "no picture".to_string(),
            clear_image: true,
            ..Default::default()
        };
        let updated = saved(fx.service.update(post.id, &author, edit).await.expect("ok"));
        assert!(updated.image.is_none());
        assert!(fx.storage.read(&stored_path).await.is_err());
    }

    #[tokio::test]
    async fn invalid_comment_rerenders_detail() {
        let fx = fixture();
        let author = fx.repos.create_user("author").await.expect("user");
        let post = saved(fx.service.create(&author, draft("post")).await.expect("ok"));

        let outcome = fx
            .service
            .add_comment(post.id, &author, CommentDraft::default())
            .await
            .expect("handled");
        match outcome {
            CommentOutcome::Rejected(context) => {
                let form = context.comment_form.expect("form");
                assert_eq!(form.errors.len(), 1);
            }
            CommentOutcome::Created(_) => panic!("empty comment must be rejected"),
        }
        assert!(
            fx.repos
                .list_for_post(post.id)
                .await
                .expect("comments")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn detail_marks_owner_as_editor() {
        let fx = fixture();
        let author = fx.repos.create_user("author").await.expect("user");
        let reader = fx.repos.create_user("reader").await.expect("user");
        let post = saved(fx.service.create(&author, draft("post")).await.expect("ok"));

        let as_owner = fx.service.detail(post.id, Some(&author)).await.expect("detail");
        assert!(as_owner.can_edit);
        let as_reader = fx.service.detail(post.id, Some(&reader)).await.expect("detail");
        assert!(!as_reader.can_edit);
        let anonymous = fx.service.detail(post.id, None).await.expect("detail");
        assert!(anonymous.comment_form.is_none());
    }
}
