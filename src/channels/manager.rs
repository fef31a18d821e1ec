//! Channel manager: owns the active transports and routes replies.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream;
use tokio::sync::RwLock;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;

/// Holds every registered channel and merges their inbound streams.
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a channel. A channel with the same name is replaced.
    pub async fn add(&self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        tracing::debug!(channel = %name, "Registering channel");
        self.channels.write().await.insert(name, Arc::from(channel));
    }

    /// Start every channel and merge their messages into one stream.
    ///
    /// Channels that fail to start are logged and skipped; it is an error
    /// only if none start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let channels = self.channels.read().await;
        let mut streams = Vec::with_capacity(channels.len());

        for (name, channel) in channels.iter() {
            match channel.start().await {
                Ok(stream) => {
                    tracing::info!(channel = %name, "Channel started");
                    streams.push(stream);
                }
                Err(e) => {
                    tracing::error!(channel = %name, error = %e, "Channel failed to start");
                }
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".to_string(),
                reason: "no channel could be started".to_string(),
            });
        }

        Ok(Box::pin(stream::select_all(streams)))
    }

    async fn get(&self, name: &str) -> Result<Arc<dyn Channel>, ChannelError> {
        self.channels
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownChannel {
                name: name.to_string(),
            })
    }

    /// Send a reply through the channel the message arrived on.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.get(&msg.channel).await?.respond(msg, response).await
    }

    pub async fn send_status(
        &self,
        channel_name: &str,
        status: StatusUpdate,
        metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        self.get(channel_name)
            .await?
            .send_status(status, metadata)
            .await
    }

    /// Run every channel's health check.
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), ChannelError>> {
        let channels = self.channels.read().await;
        let mut results = HashMap::new();
        for (name, channel) in channels.iter() {
            results.insert(name.clone(), channel.health_check().await);
        }
        results
    }

    pub async fn shutdown_all(&self) {
        let channels = self.channels.read().await;
        for (name, channel) in channels.iter() {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = %name, error = %e, "Channel shutdown failed");
            }
        }
    }

    pub async fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
