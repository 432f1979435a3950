use std::sync::Arc;

use thiserror::Error;

use crate::application::pagination::{Page, PageNumber, Paginator};
use crate::application::repos::{
    FollowsRepo, GroupsRepo, PostQueryFilter, PostsRepo, RepoError, UsersRepo,
};
use crate::domain::entities::{PostEntry, UserRecord};
use crate::presentation::views::{
    FeedContext, GroupBadge, GroupFeedContext, GroupView, PageLinkView, PaginatorView, PostCard,
    ProfileContext, format_iso_date, format_published, group_href, media_url, post_href,
    profile_href,
};

/// How many page links are shown on either side of the current page.
const PAGE_LINK_RADIUS: u64 = 2;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown group `{0}`")]
    UnknownGroup(String),
    #[error("unknown author `{0}`")]
    UnknownAuthor(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct FeedService {
    posts: Arc<dyn PostsRepo>,
    groups: Arc<dyn GroupsRepo>,
    users: Arc<dyn UsersRepo>,
    follows: Arc<dyn FollowsRepo>,
    paginator: Paginator,
}

impl FeedService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        groups: Arc<dyn GroupsRepo>,
        users: Arc<dyn UsersRepo>,
        follows: Arc<dyn FollowsRepo>,
        paginator: Paginator,
    ) -> Self {
        Self {
            posts,
            groups,
            users,
            follows,
            paginator,
        }
    }

    /// Fetch one page of posts matching `filter`, clamping the page number.
    pub async fn page(
        &self,
        filter: PostQueryFilter,
        requested: PageNumber,
    ) -> Result<Page<PostEntry>, FeedError> {
        let total = self.posts.count_posts(filter).await?;
        let slot = self.paginator.slot(total, requested);
        let items = self.posts.list_posts(filter, slot.window).await?;
        Ok(Page::new(slot, items))
    }

    pub async fn index(&self, requested: PageNumber) -> Result<FeedContext, FeedError> {
        let page = self.page(PostQueryFilter::All, requested).await?;
        Ok(feed_context(
            "Latest posts",
            "/",
            page,
            "Nobody has posted anything yet.",
        ))
    }

    pub async fn group_feed(
        &self,
        slug: &str,
        requested: PageNumber,
    ) -> Result<GroupFeedContext, FeedError> {
        let group = self
            .groups
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| FeedError::UnknownGroup(slug.to_string()))?;

        let page = self.page(PostQueryFilter::Group(group.id), requested).await?;
        let feed = feed_context(
            &group.display_title(),
            &group_href(&group.slug),
            page,
            "This group has no posts yet.",
        );

        Ok(GroupFeedContext {
            group: GroupView {
                title: group.title,
                slug: group.slug,
                description: group.description,
            },
            feed,
        })
    }

    pub async fn profile_feed(
        &self,
        username: &str,
        viewer: Option<&UserRecord>,
        requested: PageNumber,
    ) -> Result<ProfileContext, FeedError> {
        let author = self
            .users
            .find_by_username(username)
            .await?
            .ok_or_else(|| FeedError::UnknownAuthor(username.to_string()))?;

        let following = match viewer {
            Some(viewer) if viewer.id != author.id => {
                self.follows.is_following(viewer.id, author.id).await?
            }
            _ => false,
        };
        let can_follow = viewer.is_some_and(|viewer| viewer.id != author.id);

        let page = self.page(PostQueryFilter::Author(author.id), requested).await?;
        let post_count = page.total_items;
        let base = profile_href(&author.username);
        let feed = feed_context(
            &format!("All posts by {}", author.username),
            &base,
            page,
            "No posts yet.",
        );

        Ok(ProfileContext {
            follow_action: format!("{base}follow/"),
            unfollow_action: format!("{base}unfollow/"),
            username: author.username,
            post_count,
            following,
            can_follow,
            feed,
        })
    }

    /// Posts written by authors the viewer follows; never the viewer's own.
    pub async fn follow_feed(
        &self,
        viewer: &UserRecord,
        requested: PageNumber,
    ) -> Result<FeedContext, FeedError> {
        let page = self
            .page(PostQueryFilter::FollowedBy(viewer.id), requested)
            .await?;
        Ok(feed_context(
            "Authors you follow",
            "/follow/",
            page,
            "Follow some authors to see their posts here.",
        ))
    }
}

pub fn post_card(entry: &PostEntry) -> PostCard {
    let post = &entry.post;
    PostCard {
        id: post.id,
        href: post_href(post.id),
        text: post.authored.text.clone(),
        author_username: entry.author_username.clone(),
        author_href: profile_href(&entry.author_username),
        published: format_published(post.authored.created_at),
        iso_date: format_iso_date(post.authored.created_at),
        group: entry.group.as_ref().map(|group| GroupBadge {
            title: group.title.clone(),
            href: group_href(&group.slug),
        }),
        image_url: post.image.as_deref().map(media_url),
    }
}

pub fn paginator_view<T>(base_path: &str, page: &Page<T>) -> PaginatorView {
    let href = |number: u64| format!("{base_path}?page={number}");
    let first = page.number.saturating_sub(PAGE_LINK_RADIUS).max(1);
    let last = (page.number + PAGE_LINK_RADIUS).min(page.total_pages);

    PaginatorView {
        number: page.number,
        total_pages: page.total_pages,
        previous_href: page.previous_number().map(href),
        next_href: page.next_number().map(href),
        pages: (first..=last)
            .map(|number| PageLinkView {
                number,
                href: href(number),
                is_current: number == page.number,
            })
            .collect(),
    }
}

fn feed_context(
    heading: &str,
    base_path: &str,
    page: Page<PostEntry>,
    empty_message: &str,
) -> FeedContext {
    let paginator = paginator_view(base_path, &page);
    FeedContext {
        heading: heading.to_string(),
        cards: page.items.iter().map(post_card).collect(),
        paginator,
        empty_message: empty_message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;
    use crate::application::repos::{CreateGroupParams, CreatePostParams, PostsWriteRepo};
    use crate::infra::memory::InMemoryRepositories;

    fn service(repos: &Arc<InMemoryRepositories>, page_size: u32) -> FeedService {
        FeedService::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            repos.clone(),
            Paginator::new(NonZeroU32::new(page_size).expect("non-zero")),
        )
    }

    async fn post(repos: &InMemoryRepositories, author_id: i64, text: &str) -> i64 {
        repos
            .create_post(CreatePostParams {
                author_id,
                text: text.to_string(),
                group_id: None,
                image: None,
            })
            .await
            .expect("post created")
            .id
    }

    #[tokio::test]
    async fn pages_split_at_page_size() {
        let repos = Arc::new(InMemoryRepositories::new());
        let author = repos.create_user("writer").await.expect("user");
        for n in 0..13 {
            post(&repos, author.id, &format!("post {n}")).await;
        }

        let feed = service(&repos, 10);
        let first = feed
            .page(PostQueryFilter::All, PageNumber::FIRST)
            .await
            .expect("first page");
        let second = feed
            .page(PostQueryFilter::All, PageNumber::parse(Some("2")))
            .await
            .expect("second page");

        assert_eq!(first.items.len(), 10);
        assert_eq!(second.items.len(), 3);
        assert_eq!(first.items[0].post.authored.text, "post 12");
    }

    #[tokio::test]
    async fn follow_feed_only_contains_followed_authors() {
        let repos = Arc::new(InMemoryRepositories::new());
        let reader = repos.create_user("reader").await.expect("user");
        let followed = repos.create_user("followed").await.expect("user");
        let stranger = repos.create_user("stranger").await.expect("user");

        let followed_post = post(&repos, followed.id, "followed").await;
        post(&repos, stranger.id, "stranger").await;
        post(&repos, reader.id, "own post").await;
        repos
            .create_if_absent(reader.id, followed.id)
            .await
            .expect("follow");

        let context = service(&repos, 10)
            .follow_feed(&reader, PageNumber::FIRST)
            .await
            .expect("feed");
        let ids: Vec<i64> = context.cards.iter().map(|card| card.id).collect();
        assert_eq!(ids, vec![followed_post]);
    }

    #[tokio::test]
    async fn unknown_group_is_reported() {
        let repos = Arc::new(InMemoryRepositories::new());
        let err = service(&repos, 10)
            .group_feed("missing", PageNumber::FIRST)
            .await
            .err()
            .expect("unknown group");
        assert!(matches!(err, FeedError::UnknownGroup(slug) if slug == "missing"));
    }

    #[tokio::test]
    async fn group_feed_lists_group_posts() {
        let repos = Arc::new(InMemoryRepositories::new());
        let author = repos.create_user("writer").await.expect("user");
        let group = repos
            .create_group(CreateGroupParams {
                title: "Rust".to_string(),
                slug: "rust".to_string(),
                description: "All things Rust".to_string(),
            })
            .await
            .expect("group");
        repos
            .create_post(CreatePostParams {
                author_id: author.id,
                text: "in group".to_string(),
                group_id: Some(group.id),
                image: None,
            })
            .await
            .expect("post");
        post(&repos, author.id, "outside").await;

        let context = service(&repos, 10)
            .group_feed("rust", PageNumber::FIRST)
            .await
            .expect("group feed");
        assert_eq!(context.feed.cards.len(), 1);
        assert_eq!(context.feed.cards[0].text, "in group");
    }

    #[tokio::test]
    async fn profile_reports_following_flag() {
        let repos = Arc::new(InMemoryRepositories::new());
        let reader = repos.create_user("reader").await.expect("user");
        let author = repos.create_user("author").await.expect("user");
        post(&repos, author.id, "hello").await;

        let feed = service(&repos, 10);
        let before = feed
            .profile_feed("author", Some(&reader), PageNumber::FIRST)
            .await
            .expect("profile");
        assert!(!before.following);
        assert!(before.can_follow);
        assert_eq!(before.post_count, 1);

        repos
            .create_if_absent(reader.id, author.id)
            .await
            .expect("follow");
        let after = feed
            .profile_feed("author", Some(&reader), PageNumber::FIRST)
            .await
            .expect("profile");
        assert!(after.following);

        let own = feed
            .profile_feed("author", Some(&author), PageNumber::FIRST)
            .await
            .expect("profile");
        assert!(!own.can_follow);
    }

    #[test]
    fn paginator_links_window_current_page() {
        let page: Page<()> = Page {
            items: Vec::new(),
            number: 5,
            total_pages: 9,
            total_items: 90,
        };
        let view = paginator_view("/", &page);
        let numbers: Vec<u64> = view.pages.iter().map(|link| link.number).collect();
        assert_eq!(numbers, vec![3, 4, 5, 6, 7]);
        assert_eq!(view.previous_href.as_deref(), Some("/?page=4"));
        assert_eq!(view.next_href.as_deref(), Some("/?page=6"));
    }
}
