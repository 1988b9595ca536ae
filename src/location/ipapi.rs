//! ipapi.co provider implementation
//!
//! Any endpoint answering with the same JSON shape works; the URL comes from
//! settings (`WHEREAMI_API_URL` overrides it).

use super::{FetchError, LocationProvider, LocationRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://ipapi.co/json/";

pub struct IpapiProvider {
    client: reqwest::Client,
    url: String,
}

impl IpapiProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("whereami/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn convert_response(&self, data: IpapiResponse) -> Result<LocationRecord, FetchError> {
        if data.error {
            return Err(FetchError::Api(
                data.reason.unwrap_or_else(|| "API error".to_string()),
            ));
        }

        let ip = data
            .ip
            .filter(|ip| !ip.trim().is_empty())
            .ok_or(FetchError::MissingIp)?;

        Ok(LocationRecord::new(
            ip,
            data.country_name,
            data.country_code,
            data.city,
            data.region,
        ))
    }
}

#[async_trait]
impl LocationProvider for IpapiProvider {
    async fn fetch_location(&self) -> Result<LocationRecord, FetchError> {
        tracing::debug!("Fetching location from: {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .header("accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await?;
        let data: IpapiResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        self.convert_response(data)
    }

    fn name(&self) -> &'static str {
        "ipapi"
    }
}

#[derive(Debug, Deserialize)]
struct IpapiResponse {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ErrorState;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider_for(server: &MockServer) -> IpapiProvider {
        IpapiProvider::new(format!("{}/json/", server.uri()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn full_payload_builds_complete_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ip": "1.2.3.4",
                "country_name": "France",
                "country_code": "FR",
                "city": "Paris",
                "region": "IDF",
                "asn": "AS0000"
            })))
            .mount(&server)
            .await;

        let record = provider_for(&server).await.fetch_location().await.unwrap();
        assert_eq!(record.ip(), "1.2.3.4");
        assert_eq!(record.country(), "France");
        assert_eq!(record.country_code(), Some("FR"));
        assert_eq!(record.city(), "Paris");
        assert_eq!(record.region(), "IDF");
        assert!(!record.is_partial_data());
    }

    #[tokio::test]
    async fn ip_only_payload_is_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ip": "5.6.7.8" })),
            )
            .mount(&server)
            .await;

        let record = provider_for(&server).await.fetch_location().await.unwrap();
        assert!(record.is_partial_data());
        assert_eq!(record.country_code(), None);
    }

    #[tokio::test]
    async fn non_success_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let err = provider_for(&server).await.fetch_location().await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 429 }));
    }

    #[tokio::test]
    async fn embedded_error_field_fails_as_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": true,
                "reason": "RateLimited"
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server).await.fetch_location().await.unwrap_err();
        assert!(matches!(err, FetchError::Api(_)));
        assert_eq!(err.error_state(), ErrorState::NetworkError);
        assert_eq!(err.to_string(), "API error: RateLimited");
    }

    #[tokio::test]
    async fn missing_ip_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "country_name": "France",
                "country_code": "FR"
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server).await.fetch_location().await.unwrap_err();
        assert!(matches!(err, FetchError::MissingIp));
    }

    #[tokio::test]
    async fn malformed_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let err = provider_for(&server).await.fetch_location().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
