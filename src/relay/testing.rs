//! Recording posting client for tests

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::mastodon::{
    AppCredentials, Attachment, PostingClient, PostingClientFactory, PostingError, Status, Toot,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(AppCredentials),
    Authenticate { user: String, pass: String },
    Upload(Vec<u8>),
    Post(Toot),
}

#[derive(Clone, Default)]
pub struct Behaviour {
    pub reject_auth: bool,
    pub fail_upload_at: Option<usize>,
    pub reject_post: bool,
    pub auth_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct RecordingFactory {
    calls: Arc<Mutex<Vec<Call>>>,
    behaviour: Behaviour,
}

impl RecordingFactory {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            calls: Arc::default(),
            behaviour,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Upload(_)))
            .count()
    }
}

impl PostingClientFactory for RecordingFactory {
    fn create(&self, credentials: AppCredentials) -> Box<dyn PostingClient> {
        self.calls.lock().unwrap().push(Call::Create(credentials));
        Box::new(RecordingClient {
            calls: self.calls.clone(),
            behaviour: self.behaviour.clone(),
            uploads: Mutex::new(0),
        })
    }
}

struct RecordingClient {
    calls: Arc<Mutex<Vec<Call>>>,
    behaviour: Behaviour,
    uploads: Mutex<usize>,
}

fn rejected(status: StatusCode) -> PostingError {
    PostingError::Status {
        status,
        body: "rejected".to_string(),
    }
}

#[async_trait]
impl PostingClient for RecordingClient {
    async fn authenticate(&mut self, user: &str, pass: &str) -> Result<(), PostingError> {
        self.calls.lock().unwrap().push(Call::Authenticate {
            user: user.to_string(),
            pass: pass.to_string(),
        });
        if let Some(delay) = self.behaviour.auth_delay {
            tokio::time::sleep(delay).await;
        }
        if self.behaviour.reject_auth {
            return Err(rejected(StatusCode::UNAUTHORIZED));
        }
        Ok(())
    }

    async fn upload_media(&self, media: Vec<u8>) -> Result<Attachment, PostingError> {
        self.calls.lock().unwrap().push(Call::Upload(media));
        let index = {
            let mut uploads = self.uploads.lock().unwrap();
            *uploads += 1;
            *uploads - 1
        };
        if self.behaviour.fail_upload_at == Some(index) {
            return Err(rejected(StatusCode::UNPROCESSABLE_ENTITY));
        }
        Ok(Attachment {
            id: format!("media-{}", index),
            media_type: "image".to_string(),
            url: None,
        })
    }

    async fn post_status(&self, toot: &Toot) -> Result<Status, PostingError> {
        self.calls.lock().unwrap().push(Call::Post(toot.clone()));
        if self.behaviour.reject_post {
            return Err(rejected(StatusCode::UNPROCESSABLE_ENTITY));
        }
        Ok(Status {
            id: "status-1".to_string(),
            url: None,
            created_at: None,
            visibility: None,
            content: toot.status.clone(),
            media_attachments: Vec::new(),
        })
    }
}
