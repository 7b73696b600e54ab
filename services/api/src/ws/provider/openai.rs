//! OpenAI Realtime API connector.

use super::ModelConnector;
use crate::{config::Config, error::LinkError, ws::link::ModelLink};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest, handshake::client::Request, protocol::WebSocketConfig,
    },
};
use tracing::info;

pub struct OpenAIRealtime {
    url: String,
    api_key: SecretString,
    max_message_size: usize,
}

impl OpenAIRealtime {
    /// `base_url` is the realtime endpoint without query; the model is passed
    /// as the `model` query parameter. Frames and messages larger than
    /// `max_message_size` bytes end the link.
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: SecretString,
        max_message_size: usize,
    ) -> Self {
        Self {
            url: format!("{}?model={}", base_url.trim_end_matches('/'), model),
            api_key,
            max_message_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.realtime_url,
            &config.model,
            config.openai_api_key.clone(),
            config.max_message_size,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }

    fn request(&self) -> Result<Request, LinkError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| LinkError::Request(e.to_string()))?;
        let bearer = format!("Bearer {}", self.api_key.expose_secret())
            .parse()
            .map_err(|_| LinkError::Request("API key is not a valid header value".to_string()))?;
        request.headers_mut().insert("Authorization", bearer);
        Ok(request)
    }
}

#[async_trait]
impl ModelConnector for OpenAIRealtime {
    async fn connect(&self) -> Result<ModelLink, LinkError> {
        let (ws_stream, _) =
            connect_async_with_config(self.request()?, Some(self.websocket_config()), false)
                .await?;
        info!(url = %self.url, "Connected to OpenAI Realtime API.");
        Ok(ModelLink::from_stream(ws_stream))
    }
}
