//! Secret provider plugin protocol (`secretprovider`).

use std::collections::BTreeMap;
use std::sync::Arc;

use dockplug_sdk::codec::encode_response;
use dockplug_sdk::{DriverResult, Mux, MuxError, Plugin, Reply};
use serde::{Deserialize, Serialize};

use crate::wire::{base64_bytes, is_default, nullable};

/// Capability advertised by secret provider plugins.
pub const CAPABILITY: &str = "secretprovider";

const GET_SECRET_PATH: &str = "/SecretProvider.GetSecret";

/// A published port of the requesting service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Port name.
    #[serde(rename = "Name", skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Swarm protocol code.
    #[serde(rename = "Protocol", skip_serializing_if = "is_default")]
    pub protocol: i32,
    /// Port inside the container.
    #[serde(rename = "TargetPort", skip_serializing_if = "is_default")]
    pub target_port: u32,
    /// Port on the swarm routing mesh or host.
    #[serde(rename = "PublishedPort", skip_serializing_if = "is_default")]
    pub published_port: u32,
    /// Swarm publish mode code.
    #[serde(rename = "PublishMode", skip_serializing_if = "is_default")]
    pub publish_mode: i32,
}

/// Endpoint specification of the requesting service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSpec {
    /// Swarm endpoint mode code.
    #[serde(rename = "Mode", skip_serializing_if = "is_default")]
    pub mode: i32,
    /// Published ports.
    #[serde(
        rename = "Ports",
        deserialize_with = "nullable",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ports: Vec<PortConfig>,
}

/// Arguments of `SecretProvider.GetSecret`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretRequest {
    /// Name of the requested secret.
    #[serde(rename = "SecretName", skip_serializing_if = "String::is_empty")]
    pub secret_name: String,
    /// Hostname of the service, usable for x509 certificates.
    #[serde(rename = "ServiceHostname", skip_serializing_if = "String::is_empty")]
    pub service_hostname: String,
    /// Name of the service asking for the secret.
    #[serde(rename = "ServiceName", skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    /// Labels of the service.
    #[serde(
        rename = "ServiceLabels",
        deserialize_with = "nullable",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub service_labels: BTreeMap<String, String>,
    /// Endpoint specification of the service.
    #[serde(rename = "ServiceEndpointSpec", skip_serializing_if = "Option::is_none")]
    pub service_endpoint_spec: Option<EndpointSpec>,
}

#[derive(Serialize)]
struct SecretResponse<'a> {
    #[serde(rename = "Value", with = "base64_bytes", skip_serializing_if = "<[u8]>::is_empty")]
    value: &'a [u8],
    #[serde(rename = "Err", skip_serializing_if = "str::is_empty")]
    err: &'a str,
}

fn secret_reply(result: &DriverResult<Vec<u8>>) -> Reply {
    match result {
        Ok(value) => encode_response(&SecretResponse { value, err: "" }, false),
        Err(error) => encode_response(
            &SecretResponse {
                value: &[],
                err: error.message(),
            },
            true,
        ),
    }
}

/// Supplies secret values to swarm services.
pub trait SecretProvider: Send + Sync {
    /// Returns the value of the requested secret.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn get_secret(&self, request: &SecretRequest) -> DriverResult<Vec<u8>>;
}

/// Routes the secret provider protocol to a [`SecretProvider`].
#[derive(Debug)]
pub struct SecretsHandler<D> {
    driver: Arc<D>,
}

impl<D: SecretProvider + 'static> SecretsHandler<D> {
    /// Wraps `driver`.
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self::from_arc(Arc::new(driver))
    }

    /// Wraps a driver that is shared with other code.
    #[must_use]
    pub const fn from_arc(driver: Arc<D>) -> Self {
        Self { driver }
    }
}

impl<D: SecretProvider + 'static> Plugin for SecretsHandler<D> {
    fn capability(&self) -> &'static str {
        CAPABILITY
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        mux.handle_with(GET_SECRET_PATH, self.driver, |driver, mut request| {
            let body: SecretRequest = request.decode()?;
            Ok(secret_reply(&driver.get_secret(&body)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dockplug_sdk::{DriverError, PluginRequest, StatusCode};
    use serde_json::{Value, json};

    use super::*;

    /// Serves `secret`, prefixed by the service's `prefix` label.
    #[derive(Default)]
    struct Vault {
        calls: AtomicUsize,
    }

    impl SecretProvider for Vault {
        fn get_secret(&self, request: &SecretRequest) -> DriverResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.secret_name.is_empty() {
                return Err(DriverError::new("missing secret name"));
            }
            let mut value = request
                .service_labels
                .get("prefix")
                .map(|prefix| prefix.as_bytes().to_vec())
                .unwrap_or_default();
            value.extend_from_slice(b"secret");
            Ok(value)
        }
    }

    fn call(vault: Arc<Vault>, body: &Value) -> (StatusCode, Value) {
        let mut mux = Mux::new();
        mux.install(SecretsHandler::from_arc(vault))
            .expect("install secrets handler");
        let reply = mux.dispatch(PluginRequest::json(GET_SECRET_PATH, body).expect("encode"));
        let status = reply.status();
        let bytes = reply.into_bytes().expect("reply bytes");
        (status, serde_json::from_slice(&bytes).expect("reply json"))
    }

    #[test]
    fn secrets_are_returned_as_base64() {
        let vault = Arc::new(Vault::default());
        let (status, body) = call(Arc::clone(&vault), &json!({"SecretName": "my-secret"}));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Value": "c2VjcmV0"}));
        assert_eq!(vault.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn service_labels_reach_the_provider() {
        let (_, body) = call(
            Arc::new(Vault::default()),
            &json!({
                "SecretName": "another-secret",
                "ServiceLabels": {"prefix": "p-"},
                "ServiceEndpointSpec": {"Mode": 1, "Ports": [{"TargetPort": 80}]}
            }),
        );
        assert_eq!(body, json!({"Value": "cC1zZWNyZXQ="}));
    }

    #[test]
    fn failures_omit_the_value() {
        let vault = Arc::new(Vault::default());
        let (status, body) = call(Arc::clone(&vault), &json!({"SecretName": ""}));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"Err": "missing secret name"}));
        assert_eq!(vault.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_request_fields_are_omitted() {
        let request = SecretRequest {
            secret_name: String::from("db"),
            service_endpoint_spec: Some(EndpointSpec {
                mode: 0,
                ports: vec![PortConfig {
                    target_port: 5432,
                    ..PortConfig::default()
                }],
            }),
            ..SecretRequest::default()
        };
        assert_eq!(
            serde_json::to_value(&request).expect("encode"),
            json!({"SecretName": "db", "ServiceEndpointSpec": {"Ports": [{"TargetPort": 5432}]}})
        );
    }
}
