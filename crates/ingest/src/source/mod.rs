//! Source-host clients.

pub mod github;

pub use github::GitHubClient;
