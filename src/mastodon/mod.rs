//! Posting side of the relay
//!
//! [`PostingClient`] is the seam between message handling and the remote
//! service. Every inbound message gets its own client from a
//! [`PostingClientFactory`], so sessions never leak between messages.
//! [`client::MastodonClient`] is the production implementation.

pub mod client;
pub mod models;

use async_trait::async_trait;
use reqwest::StatusCode;

pub use client::{MastodonClient, MastodonClientFactory};
pub use models::{Attachment, Status, Toot};

#[derive(Debug, thiserror::Error)]
pub enum PostingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Client is not authenticated")]
    NotAuthenticated,
}

/// Application credentials plus the instance they belong to
#[derive(Clone, PartialEq, Eq)]
pub struct AppCredentials {
    pub server: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("server", &self.server)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait PostingClient: Send + Sync {
    /// Starts a user session with the password grant
    async fn authenticate(&mut self, user: &str, pass: &str) -> Result<(), PostingError>;

    async fn upload_media(&self, media: Vec<u8>) -> Result<Attachment, PostingError>;

    async fn post_status(&self, toot: &Toot) -> Result<Status, PostingError>;
}

pub trait PostingClientFactory: Send + Sync {
    fn create(&self, credentials: AppCredentials) -> Box<dyn PostingClient>;
}
