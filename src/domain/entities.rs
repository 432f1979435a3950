//! Domain entities mirrored from persistent storage.

use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum number of characters kept when a title or post text is shortened for display.
pub const DISPLAY_TRUNCATE_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl GroupRecord {
    pub fn display_title(&self) -> String {
        truncate_for_display(&self.title)
    }
}

/// Fields shared by every piece of user-authored content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authored {
    pub author_id: i64,
    pub text: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub id: i64,
    pub authored: Authored,
    pub group_id: Option<i64>,
    pub image: Option<String>,
}

impl PostRecord {
    pub fn author_id(&self) -> i64 {
        self.authored.author_id
    }

    pub fn is_authored_by(&self, user: &UserRecord) -> bool {
        self.authored.author_id == user.id
    }

    pub fn display_title(&self) -> String {
        truncate_for_display(&self.authored.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    pub authored: Authored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FollowRecord {
    pub id: i64,
    pub user_id: i64,
    pub author_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub prefix: String,
    pub hashed_secret: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

/// Reference to the group a post belongs to, resolved alongside the post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRef {
    pub id: i64,
    pub slug: String,
    pub title: String,
}

/// A post joined with the author and group data feeds need for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEntry {
    pub post: PostRecord,
    pub author_username: String,
    pub group: Option<GroupRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEntry {
    pub comment: CommentRecord,
    pub author_username: String,
}

pub fn truncate_for_display(value: &str) -> String {
    let mut chars = value.chars();
    let head: String = chars.by_ref().take(DISPLAY_TRUNCATE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_titles_are_kept_verbatim() {
        assert_eq!(truncate_for_display("Rust notes"), "Rust notes");
    }

    #[test]
    fn long_titles_are_cut_on_char_boundaries() {
        let title = "ж".repeat(DISPLAY_TRUNCATE_CHARS + 5);
        let display = truncate_for_display(&title);
        assert_eq!(display.chars().count(), DISPLAY_TRUNCATE_CHARS + 1);
        assert!(display.ends_with('…'));
    }

    #[test]
    fn exact_length_is_not_truncated() {
        let title = "a".repeat(DISPLAY_TRUNCATE_CHARS);
        assert_eq!(truncate_for_display(&title), title);
    }
}
