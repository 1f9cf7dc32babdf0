//! Remote network driver protocol (`NetworkDriver`).
//!
//! Successful calls without data answer `{}`. Every failure answers
//! `{"Err": message}` with status 500.

use std::collections::BTreeMap;
use std::sync::Arc;

use dockplug_sdk::codec::{encode_error, encode_response};
use dockplug_sdk::{DriverResult, Mux, MuxError, Plugin, Reply};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire::nullable;

/// Capability advertised by network plugins.
pub const CAPABILITY: &str = "NetworkDriver";

const CAPABILITIES_PATH: &str = "/NetworkDriver.GetCapabilities";
const CREATE_NETWORK_PATH: &str = "/NetworkDriver.CreateNetwork";
const DELETE_NETWORK_PATH: &str = "/NetworkDriver.DeleteNetwork";
const CREATE_ENDPOINT_PATH: &str = "/NetworkDriver.CreateEndpoint";
const ENDPOINT_INFO_PATH: &str = "/NetworkDriver.EndpointOperInfo";
const DELETE_ENDPOINT_PATH: &str = "/NetworkDriver.DeleteEndpoint";
const JOIN_PATH: &str = "/NetworkDriver.Join";
const LEAVE_PATH: &str = "/NetworkDriver.Leave";
const DISCOVER_NEW_PATH: &str = "/NetworkDriver.DiscoverNew";
const DISCOVER_DELETE_PATH: &str = "/NetworkDriver.DiscoverDelete";

/// Whether networks span one host or the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Host-local networks.
    #[default]
    Local,
    /// Cluster-wide networks.
    Global,
}

/// Result of `NetworkDriver.GetCapabilities`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    /// Network scope.
    #[serde(rename = "Scope")]
    pub scope: Scope,
}

/// Address pool assigned by IPAM for one address family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpamData {
    /// Address space the pool belongs to.
    #[serde(rename = "AddressSpace")]
    pub address_space: String,
    /// Pool in CIDR form.
    #[serde(rename = "Pool")]
    pub pool: String,
    /// Gateway in CIDR form.
    #[serde(rename = "Gateway")]
    pub gateway: String,
    /// Auxiliary addresses keyed by name.
    #[serde(rename = "AuxAddresses", deserialize_with = "nullable")]
    pub aux_addresses: BTreeMap<String, Value>,
}

/// Arguments of `NetworkDriver.CreateNetwork`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateNetworkRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Generic and driver options.
    #[serde(rename = "Options", deserialize_with = "nullable")]
    pub options: BTreeMap<String, Value>,
    /// IPv4 pools.
    #[serde(rename = "IPv4Data", deserialize_with = "nullable")]
    pub ipv4_data: Vec<IpamData>,
    /// IPv6 pools.
    #[serde(rename = "IPv6Data", deserialize_with = "nullable")]
    pub ipv6_data: Vec<IpamData>,
}

/// Arguments of `NetworkDriver.DeleteNetwork`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteNetworkRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

/// Addresses of an endpoint's interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointInterface {
    /// IPv4 address in CIDR form.
    #[serde(rename = "Address")]
    pub address: String,
    /// IPv6 address in CIDR form.
    #[serde(rename = "AddressIPv6")]
    pub address_ipv6: String,
    /// MAC address.
    #[serde(rename = "MacAddress")]
    pub mac_address: String,
}

/// Arguments of `NetworkDriver.CreateEndpoint`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateEndpointRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Endpoint identifier.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Addresses already chosen by the Engine.
    #[serde(rename = "Interface")]
    pub interface: Option<EndpointInterface>,
    /// Endpoint options.
    #[serde(rename = "Options", deserialize_with = "nullable")]
    pub options: BTreeMap<String, Value>,
}

/// Result of `NetworkDriver.CreateEndpoint`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEndpointResponse {
    /// Addresses the driver filled in. `None` keeps the Engine's choice.
    #[serde(rename = "Interface")]
    pub interface: Option<EndpointInterface>,
}

/// Arguments naming one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Endpoint identifier.
    #[serde(rename = "EndpointID", alias = "EnpointID")]
    pub endpoint_id: String,
}

/// Arguments of `NetworkDriver.DeleteEndpoint`.
pub type DeleteEndpointRequest = EndpointRequest;
/// Arguments of `NetworkDriver.EndpointOperInfo`.
pub type InfoRequest = EndpointRequest;

/// Result of `NetworkDriver.EndpointOperInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    /// Operational data shown by `docker network inspect`.
    #[serde(rename = "Value")]
    pub value: BTreeMap<String, String>,
}

/// Arguments of `NetworkDriver.Join`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Endpoint identifier.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Path of the sandbox network namespace.
    #[serde(rename = "SandboxKey")]
    pub sandbox_key: String,
    /// Join options.
    #[serde(rename = "Options", deserialize_with = "nullable")]
    pub options: BTreeMap<String, Value>,
}

/// Interface the Engine moves into the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceName {
    /// Name of the interface on the host.
    #[serde(rename = "SrcName")]
    pub src_name: String,
    /// Prefix for the name inside the sandbox.
    #[serde(rename = "DstPrefix")]
    pub dst_prefix: String,
}

/// A route installed in the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticRoute {
    /// Destination in CIDR form.
    #[serde(rename = "Destination")]
    pub destination: String,
    /// 0 for a next-hop route, 1 for a connected route.
    #[serde(rename = "RouteType")]
    pub route_type: i32,
    /// Next hop address.
    #[serde(rename = "NextHop")]
    pub next_hop: String,
}

/// Result of `NetworkDriver.Join`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Default gateway for the sandbox.
    #[serde(rename = "Gateway")]
    pub gateway: String,
    /// Interface to move into the sandbox.
    #[serde(rename = "InterfaceName")]
    pub interface_name: InterfaceName,
    /// Extra routes.
    #[serde(rename = "StaticRoutes")]
    pub static_routes: Vec<StaticRoute>,
}

/// Arguments of `NetworkDriver.Leave`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaveRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Endpoint identifier.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Leave options.
    #[serde(rename = "Options", deserialize_with = "nullable")]
    pub options: BTreeMap<String, Value>,
}

/// Arguments of `NetworkDriver.DiscoverNew` and `DiscoverDelete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryNotification {
    /// Kind of discovery event.
    #[serde(rename = "DiscoveryType")]
    pub discovery_type: i32,
    /// Event payload.
    #[serde(rename = "DiscoveryData")]
    pub discovery_data: Value,
}

/// Operations a remote network driver provides.
///
/// Implementations are shared between concurrent requests.
pub trait NetworkDriver: Send + Sync {
    /// Reports the driver's scope.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn capabilities(&self) -> DriverResult<CapabilitiesResponse>;

    /// Creates a network.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn create_network(&self, request: &CreateNetworkRequest) -> DriverResult<()>;

    /// Deletes a network.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn delete_network(&self, request: &DeleteNetworkRequest) -> DriverResult<()>;

    /// Creates an endpoint.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn create_endpoint(
        &self,
        request: &CreateEndpointRequest,
    ) -> DriverResult<CreateEndpointResponse>;

    /// Deletes an endpoint.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn delete_endpoint(&self, request: &DeleteEndpointRequest) -> DriverResult<()>;

    /// Reports operational data for an endpoint.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn endpoint_info(&self, request: &InfoRequest) -> DriverResult<InfoResponse>;

    /// Attaches an endpoint to a sandbox.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn join(&self, request: &JoinRequest) -> DriverResult<JoinResponse>;

    /// Detaches an endpoint from its sandbox.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn leave(&self, request: &LeaveRequest) -> DriverResult<()>;

    /// Handles a discovery event. Ignored by default.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn discover_new(&self, _notification: &DiscoveryNotification) -> DriverResult<()> {
        Ok(())
    }

    /// Handles a discovery removal. Ignored by default.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn discover_delete(&self, _notification: &DiscoveryNotification) -> DriverResult<()> {
        Ok(())
    }
}

/// Routes the network protocol to a [`NetworkDriver`].
#[derive(Debug)]
pub struct NetworkHandler<D> {
    driver: Arc<D>,
}

impl<D: NetworkDriver + 'static> NetworkHandler<D> {
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

/// Answers `{}` on success and `{"Err": message}` on failure.
fn empty_or_error(result: DriverResult<()>) -> Reply {
    match result {
        Ok(()) => encode_response(&serde_json::Map::new(), false),
        Err(error) => encode_error(&error),
    }
}

/// Answers the payload on success and `{"Err": message}` on failure.
fn payload_or_error<T: Serialize>(result: DriverResult<T>) -> Reply {
    match result {
        Ok(payload) => encode_response(&payload, false),
        Err(error) => encode_error(&error),
    }
}

impl<D: NetworkDriver + 'static> Plugin for NetworkHandler<D> {
    fn capability(&self) -> &'static str {
        CAPABILITY
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        let driver = self.driver;
        mux.handle_with(CAPABILITIES_PATH, Arc::clone(&driver), |driver, _request| {
            Ok(payload_or_error(driver.capabilities()))
        })?;
        mux.handle_with(CREATE_NETWORK_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: CreateNetworkRequest = request.decode()?;
            Ok(empty_or_error(driver.create_network(&body)))
        })?;
        mux.handle_with(DELETE_NETWORK_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: DeleteNetworkRequest = request.decode()?;
            Ok(empty_or_error(driver.delete_network(&body)))
        })?;
        mux.handle_with(CREATE_ENDPOINT_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: CreateEndpointRequest = request.decode()?;
            Ok(payload_or_error(driver.create_endpoint(&body)))
        })?;
        mux.handle_with(DELETE_ENDPOINT_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: DeleteEndpointRequest = request.decode()?;
            Ok(empty_or_error(driver.delete_endpoint(&body)))
        })?;
        mux.handle_with(ENDPOINT_INFO_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: InfoRequest = request.decode()?;
            Ok(payload_or_error(driver.endpoint_info(&body)))
        })?;
        mux.handle_with(JOIN_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: JoinRequest = request.decode()?;
            Ok(payload_or_error(driver.join(&body)))
        })?;
        mux.handle_with(LEAVE_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: LeaveRequest = request.decode()?;
            Ok(empty_or_error(driver.leave(&body)))
        })?;
        mux.handle_with(DISCOVER_NEW_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: DiscoveryNotification = request.decode()?;
            Ok(empty_or_error(driver.discover_new(&body)))
        })?;
        mux.handle_with(DISCOVER_DELETE_PATH, driver, |driver, mut request| {
            let body: DiscoveryNotification = request.decode()?;
            Ok(empty_or_error(driver.discover_delete(&body)))
        })
    }
}
