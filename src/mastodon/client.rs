use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::models::{AccessToken, Attachment, Status, Toot};
use super::{AppCredentials, PostingClient, PostingClientFactory, PostingError};

const TOKEN_PATH: &str = "/oauth/token";
const MEDIA_PATH: &str = "/api/v1/media";
const STATUSES_PATH: &str = "/api/v1/statuses";
const SCOPES: &str = "read write follow";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// One authenticated session against a single Mastodon instance
pub struct MastodonClient {
    http: Client,
    credentials: AppCredentials,
    access_token: Option<String>,
}

impl MastodonClient {
    pub fn new(http: Client, credentials: AppCredentials) -> Self {
        Self {
            http,
            credentials,
            access_token: None,
        }
    }

    pub fn server(&self) -> &str {
        &self.credentials.server
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.credentials.server.trim_end_matches('/'), path)
    }

    fn token(&self) -> Result<&str, PostingError> {
        self.access_token
            .as_deref()
            .ok_or(PostingError::NotAuthenticated)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, PostingError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PostingError::Status { status, body });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PostingClient for MastodonClient {
    async fn authenticate(&mut self, user: &str, pass: &str) -> Result<(), PostingError> {
        let url = self.endpoint(TOKEN_PATH);
        debug!("Requesting access token from {}", url);

        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("grant_type", "password"),
            ("username", user),
            ("password", pass),
            ("scope", SCOPES),
        ];
        let response = self.http.post(&url).form(&params).send().await?;
        let token: AccessToken = Self::read_json(response).await?;

        self.access_token = Some(token.access_token);
        Ok(())
    }

    async fn upload_media(&self, media: Vec<u8>) -> Result<Attachment, PostingError> {
        let token = self.token()?;
        let size = media.len();
        let form = Form::new().part("file", Part::bytes(media).file_name("file"));

        debug!("Uploading {} bytes of media to {}", size, self.server());
        let response = self
            .http
            .post(self.endpoint(MEDIA_PATH))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn post_status(&self, toot: &Toot) -> Result<Status, PostingError> {
        let token = self.token()?;

        debug!(
            "Posting status with {} media id(s) to {}",
            toot.media_ids.len(),
            self.server()
        );
        let response = self
            .http
            .post(self.endpoint(STATUSES_PATH))
            .bearer_auth(token)
            .form(&toot.form_fields())
            .send()
            .await?;
        Self::read_json(response).await
    }
}

/// Hands out fresh [`MastodonClient`] sessions over one shared HTTP client
#[derive(Clone)]
pub struct MastodonClientFactory {
    http: Client,
}

impl MastodonClientFactory {
    pub fn new(request_timeout: Duration) -> Result<Self, PostingError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http })
    }
}

impl PostingClientFactory for MastodonClientFactory {
    fn create(&self, credentials: AppCredentials) -> Box<dyn PostingClient> {
        Box::new(MastodonClient::new(self.http.clone(), credentials))
    }
}
