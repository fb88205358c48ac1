use ollama_bridge_common::constants::PROBE_PATH;
use std::time::Duration;
use tracing::{debug, warn};

use crate::upstream::UpstreamTarget;

/// Reachability check of the upstream inference service
#[derive(Debug, Clone)]
pub struct UpstreamProbe {
    timeout: Duration,
}

impl UpstreamProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// `GET <base>/api/tags`; true only for a 2xx answer
    ///
    /// Never fails: refused connections, timeouts and unparsable URLs all
    /// count as unreachable.
    pub async fn check(&self, base_url: &str) -> bool {
        let target = match UpstreamTarget::parse(base_url) {
            Ok(target) => target,
            Err(e) => {
                warn!("Cannot probe {}: {}", base_url, e);
                return false;
            }
        };

        let client = match target.client_builder().timeout(self.timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Cannot probe {}: {}", base_url, e);
                return false;
            }
        };

        let url = target.join(PROBE_PATH);
        debug!("Probing {}", url);

        match client.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Probe of {} answered {}", url, response.status());
                false
            }
            Err(e) => {
                warn!("Probe of {} failed: {}", url, e);
                false
            }
        }
    }
}
