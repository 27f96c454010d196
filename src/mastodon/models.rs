use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

/// Uploaded media as returned by `POST /api/v1/media`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type", default)]
    pub media_type: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Confirmation returned by `POST /api/v1/statuses`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Status {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media_attachments: Vec<Attachment>,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "status {} ({} attachment(s))",
            self.id,
            self.media_attachments.len()
        )?;
        if let Some(url) = &self.url {
            write!(f, " at {}", url)?;
        }
        Ok(())
    }
}

/// Outbound post: normalized text plus the ids of already uploaded media
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toot {
    pub status: String,
    pub media_ids: Vec<String>,
}

impl Toot {
    pub(crate) fn form_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = Vec::with_capacity(1 + self.media_ids.len());
        fields.push(("status", self.status.as_str()));
        for id in &self.media_ids {
            fields.push(("media_ids[]", id.as_str()));
        }
        fields
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccessToken {
    pub access_token: String,
}
