//! # MQTT bus side
//!
//! Connects to the broker, keeps the single topic subscribed and hands every
//! delivered publish to the [`crate::relay::MessageRelay`].
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker address parsing and client options
//! ├── message_manager.rs  - Delivered message representation
//! └── mqtt_handler.rs     - Connection lifecycle and dispatch
//! ```
//!
//! Connection lifecycle as tracked by the handler:
//!
//! ```text
//! Disconnected → Connecting → Connected → Subscribed
//!                    ↑            │            │
//!                    └─ Reconnecting ◄─────────┘
//! ```
//!
//! The actual reconnect logic belongs to `rumqttc`; the handler only keeps
//! polling and logs the transitions.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
