use chrono::NaiveDateTime;
use std::fmt;

const PREVIEW_LEN: usize = 40;

/// One publish delivered by the broker
#[derive(Default, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    topic: String,
    payload: Vec<u8>,
    timestamp: NaiveDateTime,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = String::from_utf8_lossy(&self.payload);
        let preview: String = content.chars().take(PREVIEW_LEN).collect();
        write!(f, "{} - {}: {}", self.timestamp, self.topic, preview)
    }
}

impl fmt::Debug for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MqttMessage")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl MqttMessage {
    pub fn from_topic(topic: String, payload: Vec<u8>) -> Self {
        MqttMessage {
            topic,
            payload,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
