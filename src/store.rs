//! The remote instance store boundary.
//!
//! [`InstanceStore`] is the transport seam the rest of the provider is
//! written against: five operations addressing instances by their
//! fully-qualified `"resource_type.label"` identity. [`HttpStore`] is the
//! JSON/REST implementation used against a real Skiff server; tests use the
//! in-memory implementation from [`crate::testing`].

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::ProviderError;
use crate::schema::AttributeDescriptor;

/// A point-in-time snapshot of one instance's attributes, keyed by dotted
/// attribute name.
pub type InstanceState = HashMap<String, Value>;

/// One resource type as reported by the server's discovery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// The resource type name, e.g. `"httpserver"`.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// The configurable attributes of this resource type.
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
}

/// Transport operations against the remote instance store.
///
/// Every method is a single request/response cycle; retry policy belongs to
/// the caller. Cancellation is honoured by dropping the returned future.
#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync {
    /// Create an empty instance under the given identity.
    async fn create_instance(&self, identity: &str) -> Result<(), ProviderError>;

    /// Submit attribute values for an instance; `apply` requests that the
    /// new configuration take effect immediately.
    async fn update_instance(
        &self,
        identity: &str,
        attributes: InstanceState,
        apply: bool,
    ) -> Result<(), ProviderError>;

    /// Fetch the current state of an instance.
    async fn get_instance(&self, identity: &str) -> Result<InstanceState, ProviderError>;

    /// Destroy an instance. `force` tears it down even if it is busy.
    async fn destroy_instance(&self, identity: &str, force: bool) -> Result<(), ProviderError>;

    /// List the resource types this server exposes.
    async fn list_resource_types(&self) -> Result<Vec<ResourceMeta>, ProviderError>;
}

#[derive(Debug, Serialize)]
struct CreateInstanceRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateInstanceRequest {
    attributes: InstanceState,
    apply: bool,
}

#[derive(Debug, Deserialize)]
struct GetInstanceResponse {
    #[serde(default)]
    state: InstanceState,
}

#[derive(Debug, Deserialize)]
struct ListResourceTypesResponse {
    #[serde(default)]
    resources: Vec<ResourceMeta>,
}

/// Maximum length of an error response body carried into an error message.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncate and strip an error body before it lands in logs or error
/// messages.
fn sanitize_body(body: &str) -> String {
    let cleaned: String = body
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    if cleaned.len() > MAX_ERROR_BODY_LENGTH {
        format!(
            "{}... [truncated, {} bytes total]",
            &cleaned[..MAX_ERROR_BODY_LENGTH],
            body.len()
        )
    } else {
        cleaned
    }
}

/// JSON/REST client for a Skiff server.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
}

impl HttpStore {
    /// Create a client for the given endpoint. `api_key`, when set, is sent
    /// as a bearer token on every request. `timeout` bounds each request and
    /// surfaces as [`ProviderError::DeadlineExceeded`].
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut normalized = endpoint.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized).map_err(|err| {
            ProviderError::NotConfigured(format!("invalid endpoint {:?}: {}", endpoint, err))
        })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("skiff-provider/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            api_key,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base
            .join(path)
            .map_err(|err| ProviderError::Transport(format!("invalid request path {:?}: {}", path, err)))
    }

    /// Send a request, attach auth, and parse the JSON response. An empty
    /// 2xx body parses as null.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<Value, ProviderError> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Transport(format!(
                "{}: {}: {}",
                context,
                status,
                sanitize_body(&body)
            )));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| {
            ProviderError::Transport(format!("{}: invalid response body: {}", context, err))
        })
    }
}

#[async_trait::async_trait]
impl InstanceStore for HttpStore {
    async fn create_instance(&self, identity: &str) -> Result<(), ProviderError> {
        let url = self.url("instance")?;
        tracing::debug!(%identity, "POST {}", url);
        self.send(
            self.client
                .post(url)
                .json(&CreateInstanceRequest { name: identity }),
            &format!("create {}", identity),
        )
        .await?;
        Ok(())
    }

    async fn update_instance(
        &self,
        identity: &str,
        attributes: InstanceState,
        apply: bool,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!("instance/{}", identity))?;
        tracing::debug!(%identity, attributes = attributes.len(), apply, "PUT {}", url);
        self.send(
            self.client
                .put(url)
                .json(&UpdateInstanceRequest { attributes, apply }),
            &format!("update {}", identity),
        )
        .await?;
        Ok(())
    }

    async fn get_instance(&self, identity: &str) -> Result<InstanceState, ProviderError> {
        let url = self.url(&format!("instance/{}", identity))?;
        tracing::debug!(%identity, "GET {}", url);
        let body = self
            .send(self.client.get(url), &format!("get {}", identity))
            .await?;
        let response: GetInstanceResponse = serde_json::from_value(body).map_err(|err| {
            ProviderError::Transport(format!("get {}: unexpected response shape: {}", identity, err))
        })?;
        Ok(response.state)
    }

    async fn destroy_instance(&self, identity: &str, force: bool) -> Result<(), ProviderError> {
        let url = self.url(&format!("instance/{}", identity))?;
        tracing::debug!(%identity, force, "DELETE {}", url);
        self.send(
            self.client.delete(url).query(&[("force", force)]),
            &format!("destroy {}", identity),
        )
        .await?;
        Ok(())
    }

    async fn list_resource_types(&self) -> Result<Vec<ResourceMeta>, ProviderError> {
        let url = self.url("resource")?;
        tracing::debug!("GET {}", url);
        let body = self.send(self.client.get(url), "list resource types").await?;
        let response: ListResourceTypesResponse =
            serde_json::from_value(body).map_err(|err| {
                ProviderError::Transport(format!(
                    "list resource types: unexpected response shape: {}",
                    err
                ))
            })?;
        Ok(response.resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_request_wire_shape() {
        let request = UpdateInstanceRequest {
            attributes: InstanceState::from([("listen".to_string(), json!(":8080"))]),
            apply: true,
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["attributes"]["listen"], ":8080");
        assert_eq!(encoded["apply"], true);
    }

    #[test]
    fn test_get_response_defaults_to_empty_state() {
        let response: GetInstanceResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.state.is_empty());

        let response: GetInstanceResponse =
            serde_json::from_value(json!({"state": {"listen": ":8080"}})).unwrap();
        assert_eq!(response.state["listen"], ":8080");
    }

    #[test]
    fn test_resource_meta_deserialisation() {
        let meta: ResourceMeta = serde_json::from_value(json!({
            "name": "httpserver",
            "attributes": [
                {"name": "listen", "type": "string", "required": true},
                {"name": "tls.cert", "type": "string"}
            ]
        }))
        .unwrap();
        assert_eq!(meta.name, "httpserver");
        assert_eq!(meta.attributes.len(), 2);
        assert!(meta.attributes[0].required);
    }

    #[test]
    fn test_endpoint_normalisation() {
        let store =
            HttpStore::new("http://localhost:8090/api", None, Duration::from_secs(10)).unwrap();
        assert_eq!(
            store.url("instance/httpserver.main").unwrap().as_str(),
            "http://localhost:8090/api/instance/httpserver.main"
        );

        assert!(HttpStore::new("not a url", None, Duration::from_secs(10)).is_err());
    }

    #[test]
    fn test_sanitize_body_truncates() {
        let long = "x".repeat(500);
        let sanitized = sanitize_body(&long);
        assert!(sanitized.len() < 300);
        assert!(sanitized.contains("truncated"));

        assert_eq!(sanitize_body("plain error"), "plain error");
    }
}
