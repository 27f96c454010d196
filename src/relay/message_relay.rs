use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::RelayError;
use super::inbound::InboundMessage;
use crate::mastodon::{AppCredentials, PostingClientFactory, Status, Toot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Posting target for messages that leave `server` empty
    pub default_server: String,
    /// Upper bound for authenticate, uploads and post of one message
    pub message_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Well-formed message without posting credentials
    Ignored,
    Posted(Status),
}

/// Turns one bus message into at most one post.
///
/// Holds no per-message state: every call builds its own posting session
/// through the factory, so concurrent calls on a shared relay are independent.
pub struct MessageRelay {
    factory: Arc<dyn PostingClientFactory>,
    settings: RelaySettings,
}

impl MessageRelay {
    pub fn new(factory: Arc<dyn PostingClientFactory>, settings: RelaySettings) -> Self {
        Self { factory, settings }
    }

    /// Decodes `payload` and forwards it. `topic` is only used for logging.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<RelayOutcome, RelayError> {
        let inbound = InboundMessage::decode(payload)?;
        info!("Received: {}->{}", topic, inbound.message);

        if !inbound.has_posting_intent() {
            info!("Message on {} carries no credentials, ignoring", topic);
            return Ok(RelayOutcome::Ignored);
        }

        let timeout = self.settings.message_timeout;
        match tokio::time::timeout(timeout, self.forward(inbound)).await {
            Ok(result) => result.map(RelayOutcome::Posted),
            Err(_) => Err(RelayError::Timeout(timeout)),
        }
    }

    async fn forward(&self, inbound: InboundMessage) -> Result<Status, RelayError> {
        let server = if inbound.server.is_empty() {
            self.settings.default_server.clone()
        } else {
            inbound.server.clone()
        };

        let mut client = self.factory.create(AppCredentials {
            server: server.clone(),
            client_id: inbound.client_id.clone(),
            client_secret: inbound.client_secret.clone(),
        });
        client
            .authenticate(&inbound.user, &inbound.pass)
            .await
            .map_err(|source| RelayError::Auth {
                server: server.clone(),
                source,
            })?;
        debug!("Authenticated {} against {}", inbound.user, server);

        let mut toot = Toot {
            status: inbound.normalized_text(),
            media_ids: Vec::with_capacity(inbound.media.len()),
        };

        for (index, media) in inbound.media.into_iter().enumerate() {
            let attachment = client
                .upload_media(media)
                .await
                .map_err(|source| RelayError::Upload { index, source })?;
            debug!("Uploaded attachment {} as {}", index, attachment.id);
            toot.media_ids.push(attachment.id);
        }

        let status = client.post_status(&toot).await.map_err(RelayError::Post)?;
        info!("Posted {}", status);
        Ok(status)
    }
}
