//! Catalog source abstraction and the REST implementation.

use std::time::Duration;

use tracing::debug;

use crate::catalog::snapshot::GroupMap;
use crate::catalog::CatalogSnapshot;
use crate::config::Settings;
use crate::error::FsError;

/// Provider of full catalog descriptions.
pub trait CatalogSource: Send + Sync {
    fn fetch_snapshot(&self) -> Result<CatalogSnapshot, FsError>;
}

/// Source backed by the catalog service's REST endpoint.
pub struct RestCatalogSource {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl RestCatalogSource {
    pub fn new(settings: &Settings) -> Result<Self, FsError> {
        let endpoint = format!(
            "http://{host}:{port}/api/files/getsmfs?apiKey={key}&isShort={short}&streamGroupProfileIds={ids}",
            host = settings.host,
            port = settings.port,
            key = settings.api_key,
            short = settings.is_short,
            ids = settings.stream_group_profile_ids,
        );
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FsError::NetworkFatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CatalogSource for RestCatalogSource {
    fn fetch_snapshot(&self) -> Result<CatalogSnapshot, FsError> {
        debug!(endpoint = %self.endpoint, "fetching catalog snapshot");
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .map_err(|e| FsError::NetworkTransient(format!("snapshot request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FsError::NetworkTransient(format!(
                "HTTP {} from catalog source",
                response.status()
            )));
        }

        let groups: GroupMap = response
            .json()
            .map_err(|e| FsError::NetworkFatal(format!("malformed catalog response: {e}")))?;
        Ok(CatalogSnapshot::from_groups(&groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_all_query_parameters() {
        let settings = Settings {
            host: "10.0.0.5".to_string(),
            port: 7095,
            api_key: "abc123".to_string(),
            stream_group_profile_ids: "3".to_string(),
            is_short: true,
            ..Settings::default()
        };
        let source = RestCatalogSource::new(&settings).unwrap();
        assert_eq!(
            source.endpoint(),
            "http://10.0.0.5:7095/api/files/getsmfs?apiKey=abc123&isShort=true&streamGroupProfileIds=3"
        );
    }
}
