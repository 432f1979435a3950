use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::application::repos::{
    CreatePostParams, PageWindow, PostQueryFilter, PostsRepo, PostsWriteRepo, RepoError,
    UpdatePostParams,
};
use crate::domain::entities::{Authored, GroupRef, PostEntry, PostRecord};

use super::{PostgresRepositories, map_sqlx_error};

const POST_ENTRY_SELECT: &str = "SELECT p.id, p.text, p.created_at, p.author_id, p.group_id, \
    p.image, u.username AS author_username, g.slug AS group_slug, g.title AS group_title \
    FROM posts p \
    INNER JOIN users u ON u.id = p.author_id \
    LEFT JOIN post_groups g ON g.id = p.group_id";

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: i64,
    text: String,
    created_at: OffsetDateTime,
    author_id: i64,
    group_id: Option<i64>,
    image: Option<String>,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            authored: Authored {
                author_id: row.author_id,
                text: row.text,
                created_at: row.created_at,
            },
            group_id: row.group_id,
            image: row.image,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PostEntryRow {
    #[sqlx(flatten)]
    post: PostRow,
    author_username: String,
    group_slug: Option<String>,
    group_title: Option<String>,
}

impl From<PostEntryRow> for PostEntry {
    fn from(row: PostEntryRow) -> Self {
        let group = match (row.post.group_id, row.group_slug, row.group_title) {
            (Some(id), Some(slug), Some(title)) => Some(GroupRef { id, slug, title }),
            _ => None,
        };
        Self {
            post: row.post.into(),
            author_username: row.author_username,
            group,
        }
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn count_posts(&self, filter: PostQueryFilter) -> Result<u64, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM posts p");
        Self::apply_feed_filter(&mut qb, filter);

        let total: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(total)
    }

    async fn list_posts(
        &self,
        filter: PostQueryFilter,
        window: PageWindow,
    ) -> Result<Vec<PostEntry>, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(POST_ENTRY_SELECT);
        Self::apply_feed_filter(&mut qb, filter);
        qb.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ");
        qb.push_bind(Self::convert_window_value(window.limit)?);
        qb.push(" OFFSET ");
        qb.push_bind(Self::convert_window_value(window.offset)?);

        let rows: Vec<PostEntryRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_post(&self, id: i64) -> Result<Option<PostEntry>, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(POST_ENTRY_SELECT);
        qb.push(" WHERE p.id = ");
        qb.push_bind(id);

        let row: Option<PostEntryRow> = qb
            .build_query_as()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (author_id, text, group_id, image)
            VALUES ($1, $2, $3, $4)
            RETURNING id, text, created_at, author_id, group_id, image
            "#,
        )
        .bind(params.author_id)
        .bind(&params.text)
        .bind(params.group_id)
        .bind(params.image.as_deref())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            UPDATE posts
            SET text = $2, group_id = $3, image = $4
            WHERE id = $1
            RETURNING id, text, created_at, author_id, group_id, image
            "#,
        )
        .bind(params.id)
        .bind(&params.text)
        .bind(params.group_id)
        .bind(params.image.as_deref())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(Into::into).ok_or(RepoError::NotFound)
    }

    async fn delete_post(&self, id: i64) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
