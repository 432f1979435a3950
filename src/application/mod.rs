//! Application services sitting between HTTP handlers and repositories.

pub mod accounts;
pub mod chrome;
pub mod error;
pub mod feed;
pub mod follows;
pub mod groups;
pub mod pagination;
pub mod posts;
pub mod repos;
