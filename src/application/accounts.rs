//! User accounts and the session tokens that authenticate them.
//!
//! Tokens look like `ses_<prefix>_<secret>`. Only the prefix and a sha256 of
//! the secret are persisted; the full token is shown once when issued.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::application::repos::{CreateSessionParams, RepoError, SessionsRepo, UsersRepo};
use crate::domain::entities::{SessionRecord, UserRecord};

const TOKEN_PREFIX: &str = "ses";
const MIN_SECRET_LEN: usize = 32;
const MAX_USERNAME_LEN: usize = 150;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid username: {0}")]
    InvalidUsername(&'static str),
    #[error("username `{0}` is already taken")]
    UsernameTaken(String),
    #[error("unknown user `{0}`")]
    UnknownUser(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Error)]
pub enum SessionAuthError {
    #[error("invalid session token")]
    Invalid,
    #[error("expired session token")]
    Expired,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// The user behind the current request, if any. Inserted as a request extension.
#[derive(Debug, Clone, Default)]
pub struct Viewer(Option<UserRecord>);

impl Viewer {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn signed_in(user: UserRecord) -> Self {
        Self(Some(user))
    }

    pub fn user(&self) -> Option<&UserRecord> {
        self.0.as_ref()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.0.as_ref().map(|user| user.id)
    }

    pub fn into_user(self) -> Option<UserRecord> {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct SessionIssued {
    pub record: SessionRecord,
    pub token: String,
}

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UsersRepo>,
    sessions: Arc<dyn SessionsRepo>,
}

impl AccountService {
    pub fn new(users: Arc<dyn UsersRepo>, sessions: Arc<dyn SessionsRepo>) -> Self {
        Self { users, sessions }
    }

    pub async fn register(&self, username: &str) -> Result<UserRecord, AccountError> {
        let username = username.trim();
        validate_username(username)?;

        match self.users.create_user(username).await {
            Ok(user) => {
                info!(
                    target = "murmur::accounts",
                    user_id = user.id,
                    username,
                    "user registered"
                );
                Ok(user)
            }
            Err(RepoError::Duplicate { .. }) => {
                Err(AccountError::UsernameTaken(username.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find(&self, username: &str) -> Result<UserRecord, AccountError> {
        self.users
            .find_by_username(username)
            .await?
            .ok_or_else(|| AccountError::UnknownUser(username.to_string()))
    }

    /// Delete the user; their posts, comments, follows and sessions go with them.
    pub async fn remove(&self, username: &str) -> Result<(), AccountError> {
        let user = self.find(username).await?;
        self.users.delete_user(user.id).await?;
        info!(target = "murmur::accounts", user_id = user.id, "user removed");
        Ok(())
    }

    pub async fn issue_session(
        &self,
        username: &str,
        lifetime: Option<Duration>,
    ) -> Result<SessionIssued, AccountError> {
        let user = self.find(username).await?;
        let prefix = generate_prefix();
        let secret = generate_secret();
        let token = format!("{TOKEN_PREFIX}_{prefix}_{secret}");

        let record = self
            .sessions
            .create_session(CreateSessionParams {
                user_id: user.id,
                prefix,
                hashed_secret: hash_secret(&secret),
                expires_at: lifetime.map(|ttl| OffsetDateTime::now_utc() + ttl),
            })
            .await?;

        info!(
            target = "murmur::accounts",
            user_id = user.id,
            session_prefix = %record.prefix,
            "session issued"
        );
        Ok(SessionIssued { record, token })
    }

    pub async fn authenticate(&self, token: &str) -> Result<UserRecord, SessionAuthError> {
        let session = self.verify(token).await?;
        self.users
            .find_user(session.user_id)
            .await?
            .ok_or(SessionAuthError::Invalid)
    }

    /// Revoke the session behind `token`. Unknown tokens are ignored.
    pub async fn revoke(&self, token: &str) -> Result<(), SessionAuthError> {
        match self.verify(token).await {
            Ok(session) => {
                self.sessions.delete_session(session.id).await?;
                Ok(())
            }
            Err(SessionAuthError::Invalid) | Err(SessionAuthError::Expired) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn verify(&self, token: &str) -> Result<SessionRecord, SessionAuthError> {
        let parsed = parse_token(token).ok_or(SessionAuthError::Invalid)?;
        let record = self
            .sessions
            .find_by_prefix(&parsed.prefix)
            .await?
            .ok_or(SessionAuthError::Invalid)?;

        let hashed_input = hash_secret(&parsed.secret);
        if record.hashed_secret.ct_eq(&hashed_input).unwrap_u8() == 0 {
            return Err(SessionAuthError::Invalid);
        }

        if let Some(expires_at) = record.expires_at
            && expires_at <= OffsetDateTime::now_utc()
        {
            return Err(SessionAuthError::Expired);
        }

        Ok(record)
    }
}

fn validate_username(username: &str) -> Result<(), AccountError> {
    if username.is_empty() {
        return Err(AccountError::InvalidUsername("username must not be empty"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AccountError::InvalidUsername(
            "username must be at most 150 characters",
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Err(AccountError::InvalidUsername(
            "username may only contain letters, digits and @/./+/-/_",
        ));
    }
    Ok(())
}

fn hash_secret(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

fn generate_prefix() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn generate_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

struct ParsedToken {
    prefix: String,
    secret: String,
}

fn parse_token(token: &str) -> Option<ParsedToken> {
    let mut parts = token.trim().splitn(3, '_');
    if parts.next()? != TOKEN_PREFIX {
        return None;
    }
    let prefix = parts.next()?;
    let secret = parts.next()?;
    if prefix.is_empty() || secret.len() < MIN_SECRET_LEN {
        return None;
    }
    Some(ParsedToken {
        prefix: prefix.to_string(),
        secret: secret.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::InMemoryRepositories;

    fn service(repos: &Arc<InMemoryRepositories>) -> AccountService {
        AccountService::new(repos.clone(), repos.clone())
    }

    #[tokio::test]
    async fn issued_token_authenticates_owner() {
        let repos = Arc::new(InMemoryRepositories::new());
        let accounts = service(&repos);
        let user = accounts.register("leo").await.expect("registered");

        let issued = accounts.issue_session("leo", None).await.expect("issued");
        assert!(issued.token.starts_with("ses_"));

        let resolved = accounts.authenticate(&issued.token).await.expect("valid");
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn tampered_secret_is_rejected() {
        let repos = Arc::new(InMemoryRepositories::new());
        let accounts = service(&repos);
        accounts.register("leo").await.expect("registered");
        let issued = accounts.issue_session("leo", None).await.expect("issued");

        let mut tampered = issued.token.clone();
        tampered.pop();
        tampered.push('x');
        let err = accounts.authenticate(&tampered).await.expect_err("tampered");
        assert!(matches!(err, SessionAuthError::Invalid));
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let repos = Arc::new(InMemoryRepositories::new());
        let accounts = service(&repos);
        accounts.register("leo").await.expect("registered");
        let issued = accounts
            .issue_session("leo", Some(Duration::seconds(-1)))
            .await
            .expect("issued");

        let err = accounts.authenticate(&issued.token).await.expect_err("expired");
        assert!(matches!(err, SessionAuthError::Expired));
    }

    #[tokio::test]
    async fn revoked_session_no_longer_authenticates() {
        let repos = Arc::new(InMemoryRepositories::new());
        let accounts = service(&repos);
        accounts.register("leo").await.expect("registered");
        let issued = accounts.issue_session("leo", None).await.expect("issued");

        accounts.revoke(&issued.token).await.expect("revoked");
        assert!(accounts.authenticate(&issued.token).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_username_is_reported() {
        let repos = Arc::new(InMemoryRepositories::new());
        let accounts = service(&repos);
        accounts.register("leo").await.expect("registered");

        let err = accounts.register("leo").await.expect_err("duplicate");
        assert!(matches!(err, AccountError::UsernameTaken(_)));
    }

    #[test]
    fn usernames_are_validated() {
        assert!(validate_username("leo.tolstoy+1").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("two words").is_err());
        assert!(validate_username(&"a".repeat(151)).is_err());
    }

    #[test]
    fn malformed_tokens_do_not_parse() {
        assert!(parse_token("sk_abc_0123456789abcdef0123456789abcdef").is_none());
        assert!(parse_token("ses__0123456789abcdef0123456789abcdef").is_none());
        assert!(parse_token("ses_abc_short").is_none());
        assert!(parse_token("ses_abc_0123456789abcdef0123456789abcdef").is_some());
    }
}
