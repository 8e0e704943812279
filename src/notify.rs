//! Room server notifications
//!
//! Tells the room server that a client left its room for good, so it can
//! release the slot. Best effort: failures are logged and never retried.

use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::types::{ClientId, RoomId};

/// Posts `{base_url}/bye/{room_id}/{client_id}` when a client is evicted
///
/// The base URL comes from the room the client was evicted from.
#[derive(Debug, Clone)]
pub struct ByeNotifier {
    client: reqwest::Client,
}

impl ByeNotifier {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    pub fn bye_url(base_url: &str, room_id: &RoomId, client_id: &ClientId) -> String {
        format!(
            "{}/bye/{}/{}",
            base_url.trim_end_matches('/'),
            room_id,
            client_id
        )
    }

    /// Fire the notification in the background
    pub fn notify(&self, base_url: &str, room_id: &RoomId, client_id: &ClientId) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No tokio runtime, skipping bye notification");
            return;
        };

        let url = Self::bye_url(base_url, room_id, client_id);
        let client = self.client.clone();
        runtime.spawn(async move {
            match client.post(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Bye notification sent to {}", url);
                }
                Ok(response) => {
                    warn!("Bye notification to {} failed: {}", url, response.status());
                }
                Err(e) => {
                    warn!("Bye notification to {} failed: {}", url, e);
                }
            }
        });
    }
}
