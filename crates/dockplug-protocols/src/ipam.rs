//! Remote IPAM driver protocol (`IpamDriver`).

use std::collections::BTreeMap;
use std::sync::Arc;

use dockplug_sdk::codec::{encode_error, encode_response};
use dockplug_sdk::{DriverResult, Mux, MuxError, Plugin, Reply};
use serde::{Deserialize, Serialize};

use crate::wire::nullable;

/// Capability advertised by IPAM plugins.
pub const CAPABILITY: &str = "IpamDriver";

const CAPABILITIES_PATH: &str = "/IpamDriver.GetCapabilities";
const ADDRESS_SPACES_PATH: &str = "/IpamDriver.GetDefaultAddressSpaces";
const REQUEST_POOL_PATH: &str = "/IpamDriver.RequestPool";
const RELEASE_POOL_PATH: &str = "/IpamDriver.ReleasePool";
const REQUEST_ADDRESS_PATH: &str = "/IpamDriver.RequestAddress";
const RELEASE_ADDRESS_PATH: &str = "/IpamDriver.ReleaseAddress";

/// Result of `IpamDriver.GetCapabilities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    /// Whether address requests must carry the endpoint's MAC address.
    #[serde(rename = "RequiresMACAddress")]
    pub requires_mac_address: bool,
}

impl Default for CapabilitiesResponse {
    fn default() -> Self {
        Self {
            requires_mac_address: true,
        }
    }
}

/// Result of `IpamDriver.GetDefaultAddressSpaces`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpacesResponse {
    /// Default space for local networks.
    #[serde(rename = "LocalDefaultAddressSpace")]
    pub local_default_address_space: String,
    /// Default space for global networks.
    #[serde(rename = "GlobalDefaultAddressSpace")]
    pub global_default_address_space: String,
}

impl Default for AddressSpacesResponse {
    fn default() -> Self {
        Self {
            local_default_address_space: String::from("defaultLocal"),
            global_default_address_space: String::from("defaultGlobal"),
        }
    }
}

/// Arguments of `IpamDriver.RequestPool`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestPoolRequest {
    /// Address space to allocate from.
    #[serde(rename = "AddressSpace")]
    pub address_space: String,
    /// Requested pool in CIDR form; empty lets the driver choose.
    #[serde(rename = "Pool")]
    pub pool: String,
    /// Sub-range of the pool to allocate addresses from.
    #[serde(rename = "SubPool")]
    pub sub_pool: String,
    /// Driver options.
    #[serde(rename = "Options", deserialize_with = "nullable")]
    pub options: BTreeMap<String, String>,
    /// Whether an IPv6 pool is wanted.
    #[serde(rename = "V6")]
    pub v6: bool,
}

/// Result of `IpamDriver.RequestPool`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPoolResponse {
    /// Identifier used in later calls.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
    /// Allocated pool in CIDR form.
    #[serde(rename = "Pool")]
    pub pool: String,
    /// Extra data, such as a gateway under `com.docker.network.gateway`.
    #[serde(rename = "Data")]
    pub data: BTreeMap<String, String>,
}

/// Arguments of `IpamDriver.ReleasePool`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleasePoolRequest {
    /// Pool identifier.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
}

/// Arguments of `IpamDriver.RequestAddress`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestAddressRequest {
    /// Pool identifier.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
    /// Preferred address; empty lets the driver choose.
    #[serde(rename = "Address")]
    pub address: String,
    /// Driver options.
    #[serde(rename = "Options", deserialize_with = "nullable")]
    pub options: BTreeMap<String, String>,
}

/// Result of `IpamDriver.RequestAddress`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAddressResponse {
    /// Allocated address in CIDR form.
    #[serde(rename = "Address")]
    pub address: String,
    /// Extra data.
    #[serde(rename = "Data")]
    pub data: BTreeMap<String, String>,
}

/// Arguments of `IpamDriver.ReleaseAddress`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseAddressRequest {
    /// Pool identifier.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
    /// Address to release.
    #[serde(rename = "Address")]
    pub address: String,
}

/// Operations a remote IPAM driver provides.
pub trait IpamDriver: Send + Sync {
    /// Reports driver capabilities. Requires MAC addresses by default.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn capabilities(&self) -> DriverResult<CapabilitiesResponse> {
        Ok(CapabilitiesResponse::default())
    }

    /// Reports the default address spaces.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn default_address_spaces(&self) -> DriverResult<AddressSpacesResponse> {
        Ok(AddressSpacesResponse::default())
    }

    /// Allocates an address pool.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn request_pool(&self, request: &RequestPoolRequest) -> DriverResult<RequestPoolResponse>;

    /// Releases an address pool.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn release_pool(&self, request: &ReleasePoolRequest) -> DriverResult<()>;

    /// Allocates an address from a pool.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn request_address(
        &self,
        request: &RequestAddressRequest,
    ) -> DriverResult<RequestAddressResponse>;

    /// Returns an address to its pool.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn release_address(&self, request: &ReleaseAddressRequest) -> DriverResult<()>;
}

/// Routes the IPAM protocol to an [`IpamDriver`].
#[derive(Debug)]
pub struct IpamHandler<D> {
    driver: Arc<D>,
}

impl<D: IpamDriver + 'static> IpamHandler<D> {
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

fn answer<T: Serialize>(result: DriverResult<T>) -> Reply {
    match result {
        Ok(payload) => encode_response(&payload, false),
        Err(error) => encode_error(&error),
    }
}

fn acknowledge(result: DriverResult<()>) -> Reply {
    answer(result.map(|()| serde_json::Map::new()))
}

impl<D: IpamDriver + 'static> Plugin for IpamHandler<D> {
    fn capability(&self) -> &'static str {
        CAPABILITY
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        let driver = self.driver;
        mux.handle_with(CAPABILITIES_PATH, Arc::clone(&driver), |driver, _request| {
            Ok(answer(driver.capabilities()))
        })?;
        mux.handle_with(ADDRESS_SPACES_PATH, Arc::clone(&driver), |driver, _request| {
            Ok(answer(driver.default_address_spaces()))
        })?;
        mux.handle_with(REQUEST_POOL_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: RequestPoolRequest = request.decode()?;
            Ok(answer(driver.request_pool(&body)))
        })?;
        mux.handle_with(RELEASE_POOL_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: ReleasePoolRequest = request.decode()?;
            Ok(acknowledge(driver.release_pool(&body)))
        })?;
        mux.handle_with(REQUEST_ADDRESS_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: RequestAddressRequest = request.decode()?;
            Ok(answer(driver.request_address(&body)))
        })?;
        mux.handle_with(RELEASE_ADDRESS_PATH, driver, |driver, mut request| {
            let body: ReleaseAddressRequest = request.decode()?;
            Ok(acknowledge(driver.release_address(&body)))
        })
    }
}
