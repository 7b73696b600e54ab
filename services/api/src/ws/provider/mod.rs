//! Connections to the realtime speech model.

pub mod openai;

use super::link::ModelLink;
use crate::error::LinkError;
use async_trait::async_trait;

/// Opens a fresh model link for one call.
#[async_trait]
pub trait ModelConnector: Send + Sync {
    async fn connect(&self) -> Result<ModelLink, LinkError>;
}
