//! Request body extraction for post and comment submissions.

use axum::{
    Form,
    extract::{FromRequest, Request},
    http::{StatusCode, header::CONTENT_TYPE},
};
use axum_extra::extract::Multipart;
use serde::Deserialize;
use tracing::warn;

use crate::application::error::HttpError;
use crate::domain::validation::{CommentDraft, ImageUpload, PostDraft};

const SOURCE: &str = "infra::http::forms";

/// A post submission sent either url-encoded or as `multipart/form-data`.
pub struct PostSubmission(pub PostDraft);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostFields {
    text: String,
    group: Option<String>,
    #[serde(rename = "image-clear")]
    image_clear: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct CommentFields {
    text: String,
}

impl From<CommentFields> for CommentDraft {
    fn from(fields: CommentFields) -> Self {
        CommentDraft { text: fields.text }
    }
}

impl<S> FromRequest<S> for PostSubmission
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(request, state)
                .await
                .map_err(|err| invalid_form(err.status(), err.to_string()))?;
            return read_multipart(multipart).await.map(PostSubmission);
        }

        let Form(fields) = Form::<PostFields>::from_request(request, state)
            .await
            .map_err(|err| invalid_form(err.status(), err.to_string()))?;
        Ok(PostSubmission(PostDraft {
            text: fields.text,
            group: fields.group,
            image: None,
            clear_image: is_checked(fields.image_clear.as_deref()),
        }))
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<PostDraft, HttpError> {
    let mut draft = PostDraft::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(target = SOURCE, error = %err, "failed to read multipart field");
        invalid_form(err.status(), err.to_string())
    })? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("text") => draft.text = field_text(field).await?,
            Some("group") => draft.group = Some(field_text(field).await?),
            Some("image-clear") => {
                draft.clear_image = is_checked(Some(&field_text(field).await?));
            }
            Some("image") => {
                let filename = field
                    .file_name()
                    .map(|value| value.trim().to_string())
                    .unwrap_or_default();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| invalid_form(err.status(), err.to_string()))?;
                // Browsers send an empty part when no file was chosen.
                if filename.is_empty() && bytes.is_empty() {
                    continue;
                }
                draft.image = Some(ImageUpload { filename, bytes });
            }
            _ => continue,
        }
    }

    Ok(draft)
}

async fn field_text(field: axum_extra::extract::multipart::Field) -> Result<String, HttpError> {
    field
        .text()
        .await
        .map_err(|err| invalid_form(err.status(), err.to_string()))
}

fn is_checked(value: Option<&str>) -> bool {
    matches!(
        value.map(|raw| raw.trim().to_ascii_lowercase()).as_deref(),
        Some("on" | "true" | "1" | "yes")
    )
}

fn invalid_form(status: StatusCode, detail: String) -> HttpError {
    let status = if status.is_client_error() {
        status
    } else {
        StatusCode::BAD_REQUEST
    };
    HttpError::new(SOURCE, status, "Invalid form data", detail)
}
