// HTTP fallback endpoint bodies (`POST <api_path>/fallback/`).

use serde::{Deserialize, Serialize};

use super::event::{ClientInfo, CollabEvent, WireEvent};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackRequest {
    pub version: u64,
    pub client_id: Option<String>,
    pub messages: Vec<CollabEvent>,
}

/// Acknowledges the submitted messages and returns the events the caller
/// has not seen yet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallbackResponse {
    pub version: u64,
    #[serde(default)]
    pub messages: Vec<WireEvent>,
    #[serde(default)]
    pub clients: Vec<ClientInfo>,
}
