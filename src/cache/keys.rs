//! Cache key definitions.

/// Identifies one cached page rendering.
///
/// The viewer is part of the key because cached pages embed per-user chrome
/// (navigation, follow buttons).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    pub prefix: &'static str,
    pub viewer: Option<i64>,
    pub path: String,
    pub query: String,
}

impl ResponseKey {
    pub fn new(prefix: &'static str, viewer: Option<i64>, path: &str, query: &str) -> Self {
        Self {
            prefix,
            viewer,
            path: path.to_string(),
            query: query.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_request_produces_same_key() {
        let first = ResponseKey::new("index_page", None, "/", "page=2");
        let second = ResponseKey::new("index_page", None, "/", "page=2");
        assert_eq!(first, second);
        assert_eq!(first.query, "page=2");
    }

    #[test]
    fn viewer_and_query_separate_keys() {
        let anonymous = ResponseKey::new("profile_page", None, "/profile/leo/", "");
        let member = ResponseKey::new("profile_page", Some(7), "/profile/leo/", "");
        let paged = ResponseKey::new("profile_page", None, "/profile/leo/", "page=2");
        assert_ne!(anonymous, member);
        assert_ne!(anonymous, paged);
    }

    #[test]
    fn prefixes_never_share_entries() {
        let index = ResponseKey::new("index_page", None, "/", "");
        let profile = ResponseKey::new("profile_page", None, "/", "");
        assert_ne!(index, profile);
    }
}
