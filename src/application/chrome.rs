use crate::config::SiteSettings;
use crate::domain::entities::UserRecord;
use crate::presentation::views::{
    BrandView, FooterView, LayoutChrome, NavigationLinkView, NavigationView, PageMetaView,
    ViewerView, profile_href,
};

/// Builds the shared page chrome (brand, navigation, footer) for a viewer.
#[derive(Clone)]
pub struct ChromeService {
    site: SiteSettings,
}

impl ChromeService {
    pub fn new(site: SiteSettings) -> Self {
        Self { site }
    }

    pub fn load(&self, viewer: Option<&UserRecord>) -> LayoutChrome {
        let mut entries = vec![
            link("Home", "/"),
            link("About the author", "/about/author/"),
            link("Technology", "/about/tech/"),
        ];
        if viewer.is_some() {
            entries.push(link("New post", "/create/"));
            entries.push(link("Following", "/follow/"));
        }

        LayoutChrome {
            brand: BrandView {
                title: self.site.brand_title.clone(),
                href: "/".to_string(),
            },
            navigation: NavigationView { entries },
            footer: FooterView {
                copy: self.site.footer_copy.clone(),
            },
            meta: PageMetaView {
                title: self.site.brand_title.clone(),
                description: self.site.description.clone(),
            },
            viewer: viewer.map(|user| ViewerView {
                username: user.username.clone(),
                profile_href: profile_href(&user.username),
            }),
        }
    }
}

fn link(label: &str, href: &str) -> NavigationLinkView {
    NavigationLinkView {
        label: label.to_string(),
        href: href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn site() -> SiteSettings {
        SiteSettings {
            brand_title: "Murmur".to_string(),
            description: "Short posts".to_string(),
            footer_copy: "© Murmur".to_string(),
        }
    }

    #[test]
    fn anonymous_chrome_hides_member_links() {
        let chrome = ChromeService::new(site()).load(None);
        assert!(chrome.viewer.is_none());
        assert!(
            !chrome
                .navigation
                .entries
                .iter()
                .any(|entry| entry.href == "/create/")
        );
    }

    #[test]
    fn member_chrome_links_profile() {
        let user = UserRecord {
            id: 1,
            username: "leo".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let chrome = ChromeService::new(site()).load(Some(&user));
        let viewer = chrome.viewer.expect("viewer");
        assert_eq!(viewer.profile_href, "/profile/leo/");
        assert!(
            chrome
                .navigation
                .entries
                .iter()
                .any(|entry| entry.href == "/follow/")
        );
    }
}
