//! Validation of submitted post and comment drafts.
//!
//! Every mutation goes through one of the `validate_*` functions first. They
//! either return the cleaned fields ready for persistence or the complete list
//! of field errors, so callers never commit half of a submission.

use std::fmt;

use bytes::Bytes;

use crate::domain::entities::GroupRecord;

pub const FIELD_TEXT: &str = "text";
pub const FIELD_GROUP: &str = "group";
pub const FIELD_IMAGE: &str = "image";

const REQUIRED_MESSAGE: &str = "This field is required.";
const INVALID_IMAGE_MESSAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
const EMPTY_IMAGE_MESSAGE: &str = "The submitted file is empty.";
const INVALID_GROUP_MESSAGE: &str =
    "Select a valid choice. That choice is not one of the available choices.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    errors: Vec<FieldError>,
}

impl FieldErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    pub fn messages_for(&self, field: &str) -> Vec<String> {
        self.errors
            .iter()
            .filter(|error| error.field == field)
            .map(|error| error.message.clone())
            .collect()
    }

    fn into_result<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

/// A file received with a post submission, before any checks.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub text: String,
    pub group: Option<String>,
    pub image: Option<ImageUpload>,
    pub clear_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedImage {
    pub filename: String,
    pub content_type: String,
    pub width: usize,
    pub height: usize,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    Keep,
    Clear,
    Replace(ValidatedImage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPost {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: ImageChange,
}

#[derive(Debug, Clone, Default)]
pub struct CommentDraft {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedComment {
    pub text: String,
}

/// Check a post submission against the groups that may be referenced.
pub fn validate_post_draft(
    draft: PostDraft,
    groups: &[GroupRecord],
) -> Result<ValidatedPost, FieldErrors> {
    let mut errors = FieldErrors::default();

    let text = draft.text.trim().to_string();
    if text.is_empty() {
        errors.push(FIELD_TEXT, REQUIRED_MESSAGE);
    }

    let group_id = match draft.group.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) if groups.iter().any(|group| group.id == id) => Some(id),
            _ => {
                errors.push(FIELD_GROUP, INVALID_GROUP_MESSAGE);
                None
            }
        },
    };

    let image = match draft.image {
        Some(upload) => match validate_image(upload) {
            Ok(image) => ImageChange::Replace(image),
            Err(message) => {
                errors.push(FIELD_IMAGE, message);
                ImageChange::Keep
            }
        },
        None if draft.clear_image => ImageChange::Clear,
        None => ImageChange::Keep,
    };

    errors.into_result(ValidatedPost {
        text,
        group_id,
        image,
    })
}

pub fn validate_comment_draft(draft: CommentDraft) -> Result<ValidatedComment, FieldErrors> {
    let mut errors = FieldErrors::default();
    let text = draft.text.trim().to_string();
    if text.is_empty() {
        errors.push(FIELD_TEXT, REQUIRED_MESSAGE);
    }
    errors.into_result(ValidatedComment { text })
}

fn validate_image(upload: ImageUpload) -> Result<ValidatedImage, &'static str> {
    if upload.bytes.is_empty() {
        return Err(EMPTY_IMAGE_MESSAGE);
    }

    let guessed = mime_guess::from_path(&upload.filename)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .ok_or(INVALID_IMAGE_MESSAGE)?;

    let size = imagesize::blob_size(&upload.bytes).map_err(|_| INVALID_IMAGE_MESSAGE)?;
    if size.width == 0 || size.height == 0 {
        return Err(INVALID_IMAGE_MESSAGE);
    }

    Ok(ValidatedImage {
        filename: upload.filename,
        content_type: guessed.essence_str().to_string(),
        width: size.width,
        height: size.height,
        bytes: upload.bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 transparent GIF.
    const TINY_GIF: &[u8] = &[
        0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x21, 0xf9,
        0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00,
        0x00, 0x02, 0x01, 0x00, 0x00,
    ];

    fn group(id: i64) -> GroupRecord {
        GroupRecord {
            id,
            title: "Rustaceans".to_string(),
            slug: "rustaceans".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn blank_text_is_rejected() {
        let draft = PostDraft {
            text: "   \n".to_string(),
            ..Default::default()
        };

        let errors = validate_post_draft(draft, &[]).expect_err("blank text must fail");
        assert_eq!(errors.messages_for(FIELD_TEXT), vec![REQUIRED_MESSAGE]);
    }

    #[test]
    fn text_is_trimmed_and_group_resolved() {
        let draft = PostDraft {
            text: "  hello world ".to_string(),
            group: Some("7".to_string()),
            ..Default::default()
        };

        let validated = validate_post_draft(draft, &[group(7)]).expect("valid draft");
        assert_eq!(validated.text, "hello world");
        assert_eq!(validated.group_id, Some(7));
        assert_eq!(validated.image, ImageChange::Keep);
    }

    #[test]
    fn unknown_group_is_a_field_error() {
        let draft = PostDraft {
            text: "hello".to_string(),
            group: Some("99".to_string()),
            ..Default::default()
        };

        let errors = validate_post_draft(draft, &[group(7)]).expect_err("unknown group");
        assert_eq!(errors.messages_for(FIELD_GROUP).len(), 1);
        assert!(errors.messages_for(FIELD_TEXT).is_empty());
    }

    #[test]
    fn all_field_errors_are_collected() {
        let draft = PostDraft {
            text: String::new(),
            group: Some("not-a-number".to_string()),
            image: Some(ImageUpload {
                filename: "notes.txt".to_string(),
                bytes: Bytes::from_static(b"plain text"),
            }),
            clear_image: false,
        };

        let errors = validate_post_draft(draft, &[]).expect_err("invalid draft");
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn valid_gif_is_accepted() {
        let draft = PostDraft {
            text: "with picture".to_string(),
            image: Some(ImageUpload {
                filename: "small.gif".to_string(),
                bytes: Bytes::from_static(TINY_GIF),
            }),
            ..Default::default()
        };

        let validated = validate_post_draft(draft, &[]).expect("valid image");
        match validated.image {
            ImageChange::Replace(image) => {
                assert_eq!(image.content_type, "image/gif");
                assert_eq!((image.width, image.height), (1, 1));
            }
            other => panic!("unexpected image change: {other:?}"),
        }
    }

    #[test]
    fn image_bytes_must_decode() {
        let draft = PostDraft {
            text: "broken".to_string(),
            image: Some(ImageUpload {
                filename: "broken.png".to_string(),
                bytes: Bytes::from_static(b"definitely not a png"),
            }),
            ..Default::default()
        };

        let errors = validate_post_draft(draft, &[]).expect_err("corrupt image");
        assert_eq!(errors.messages_for(FIELD_IMAGE), vec![INVALID_IMAGE_MESSAGE]);
    }

    #[test]
    fn clear_flag_without_upload_clears_image() {
        let draft = PostDraft {
            text: "no picture".to_string(),
            clear_image: true,
            ..Default::default()
        };

        let validated = validate_post_draft(draft, &[]).expect("valid draft");
        assert_eq!(validated.image, ImageChange::Clear);
    }

    #[test]
    fn comment_requires_text() {
        assert!(validate_comment_draft(CommentDraft::default()).is_err());
        let ok = validate_comment_draft(CommentDraft {
            text: " nice ".to_string(),
        })
        .expect("valid comment");
        assert_eq!(ok.text, "nice");
    }
}
