//! JSON-over-HTTP cloud API client.
//!
//! Resources live under `{endpoint}/v1/{kind}`. The client performs a single
//! request per call and classifies failures; retrying is left to the engine's
//! retry executor.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::trace;

use crate::error::CloudError;

use super::{Attributes, CloudApi, CloudObject, CloudResult, Filter};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fallback wait when a 429 response carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// REST cloud API client.
#[derive(Debug, Clone)]
pub struct RestCloudClient {
    /// HTTP client.
    client: Client,
    /// Base URL, without a trailing slash.
    endpoint: String,
    /// Bearer token.
    token: String,
    /// Region reported to tasks.
    region: String,
}

#[derive(Debug, Serialize)]
struct AttributesBody<'a> {
    attributes: &'a Attributes,
}

#[derive(Debug, Serialize)]
struct AssociateBody<'a> {
    target: &'a str,
}

impl RestCloudClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: &str, region: &str) -> CloudResult<Self> {
        Self::with_timeout(endpoint, token, region, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(
        endpoint: &str,
        token: &str,
        region: &str,
        timeout_secs: u64,
    ) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CloudError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
            region: region.to_owned(),
        })
    }

    fn collection_url(&self, kind: &str) -> String {
        format!("{}/v1/{kind}", self.endpoint)
    }

    fn resource_url(&self, kind: &str, id: &str) -> String {
        format!("{}/v1/{kind}/{id}", self.endpoint)
    }

    /// Sends a request with authentication and maps transport failures.
    async fn send(&self, request: RequestBuilder) -> CloudResult<Response> {
        request
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| CloudError::network(format!("Request failed: {e}")))
    }

    /// Maps non-success statuses to cloud errors.
    async fn check(response: Response) -> CloudResult<Response> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(CloudError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CloudError::AuthenticationFailed {
                message: String::from("Invalid API token"),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::api_error(status.as_u16(), body));
        }

        Ok(response)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> CloudResult<T> {
        response.json().await.map_err(|e| CloudError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }
}

#[async_trait]
impl CloudApi for RestCloudClient {
    fn region(&self) -> String {
        self.region.clone()
    }

    async fn get(&self, kind: &str, id: &str) -> CloudResult<Option<CloudObject>> {
        trace!("GET {kind}/{id}");
        let response = self
            .send(self.client.get(self.resource_url(kind, id)))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::check(response).await?;
        Self::parse(response).await.map(Some)
    }

    async fn list(&self, kind: &str, filter: &Filter) -> CloudResult<Vec<CloudObject>> {
        trace!("LIST {kind} {filter:?}");
        let response = self
            .send(self.client.get(self.collection_url(kind)).query(filter))
            .await?;
        let response = Self::check(response).await?;
        Self::parse(response).await
    }

    async fn create(&self, kind: &str, attributes: &Attributes) -> CloudResult<CloudObject> {
        trace!("CREATE {kind}");
        let response = self
            .send(
                self.client
                    .post(self.collection_url(kind))
                    .json(&AttributesBody { attributes }),
            )
            .await?;
        let response = Self::check(response).await?;
        Self::parse(response).await
    }

    async fn update(
        &self,
        kind: &str,
        id: &str,
        attributes: &Attributes,
    ) -> CloudResult<CloudObject> {
        trace!("UPDATE {kind}/{id}");
        let response = self
            .send(
                self.client
                    .patch(self.resource_url(kind, id))
                    .json(&AttributesBody { attributes }),
            )
            .await?;
        let response = Self::check(response).await?;
        Self::parse(response).await
    }

    async fn associate(
        &self,
        kind: &str,
        id: &str,
        relation: &str,
        target: &str,
    ) -> CloudResult<()> {
        trace!("ASSOCIATE {kind}/{id} {relation} -> {target}");
        let url = format!("{}/{relation}", self.resource_url(kind, id));
        let response = self
            .send(self.client.post(url).json(&AssociateBody { target }))
            .await?;
        Self::check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RestCloudClient {
        RestCloudClient::new(&server.uri(), "secret", "us-east-1").expect("client")
    }

    #[tokio::test]
    async fn test_get_returns_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/vpc/vpc-404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let found = client(&server).get("vpc", "vpc-404").await.expect("get");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_get_parses_object_and_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/vpc/vpc-1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "vpc-1",
                "attributes": {"cidr": "10.0.0.0/16"}
            })))
            .mount(&server)
            .await;

        let found = client(&server)
            .get("vpc", "vpc-1")
            .await
            .expect("get")
            .expect("object");
        assert_eq!(found.id, "vpc-1");
        assert_eq!(found.text("cidr").as_deref(), Some("10.0.0.0/16"));
    }

    #[tokio::test]
    async fn test_list_passes_filter_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/subnet"))
            .and(query_param("vpc_id", "vpc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "subnet-1", "attributes": {"vpc_id": "vpc-1"}}
            ])))
            .mount(&server)
            .await;

        let mut filter = Filter::new();
        filter.insert(String::from("vpc_id"), String::from("vpc-1"));
        let items = client(&server).list("subnet", &filter).await.expect("list");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "subnet-1");
    }

    #[tokio::test]
    async fn test_create_sends_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/vpc"))
            .and(body_json(json!({"attributes": {"cidr": "10.1.0.0/16"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "vpc-9",
                "attributes": {"cidr": "10.1.0.0/16"}
            })))
            .mount(&server)
            .await;

        let mut attributes = Attributes::new();
        attributes.insert(String::from("cidr"), json!("10.1.0.0/16"));
        let created = client(&server).create("vpc", &attributes).await.expect("create");
        assert_eq!(created.id, "vpc-9");
    }

    #[tokio::test]
    async fn test_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/vpc/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/vpc/denied"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/vpc/broken"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let api = client(&server);

        let err = api.get("vpc", "limited").await.expect_err("rate limited");
        assert!(matches!(err, CloudError::RateLimited { retry_after_secs: 7 }));

        let err = api.get("vpc", "denied").await.expect_err("denied");
        assert!(matches!(err, CloudError::AuthenticationFailed { .. }));
        assert!(!err.is_retryable());

        let err = api.get("vpc", "broken").await.expect_err("server error");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_associate_posts_target() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/dns_zone/Z1/vpcs"))
            .and(body_json(json!({"target": "vpc-1"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .associate("dns_zone", "Z1", "vpcs", "vpc-1")
            .await
            .expect("associate");
    }
}
