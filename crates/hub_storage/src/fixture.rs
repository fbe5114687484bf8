#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use hub_kernel_contracts::ph1route::{
    CommChannel, CustomerAddress, CustomerConfig, CustomerId, GeoPoint, Order, OrderId,
    OrderStatus, PodMethod,
};
use hub_kernel_contracts::ContractViolation;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::route_store::{RouteStore, StorageError};

const ROUTE_FIXTURE_SCHEMA_VERSION: u8 = 1;
const DEMO_ROUTE_JSON: &str = include_str!("../fixtures/demo_route.json");

#[derive(Debug)]
pub enum FixtureError {
    UnsupportedSchema(u8),
    Io(std::io::Error),
    Json(serde_json::Error),
    Contract(ContractViolation),
    Storage(StorageError),
}

impl std::fmt::Display for FixtureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedSchema(v) => write!(f, "unsupported route fixture schema: {v}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::Contract(err) => write!(f, "contract violation: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl std::error::Error for FixtureError {}

impl From<std::io::Error> for FixtureError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for FixtureError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ContractViolation> for FixtureError {
    fn from(value: ContractViolation) -> Self {
        Self::Contract(value)
    }
}

impl From<StorageError> for FixtureError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteFixture {
    pub schema_version: u8,
    pub customers: Vec<CustomerFixture>,
    pub orders: Vec<OrderFixture>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFixture {
    pub customer_id: String,
    pub name: String,
    pub required_pod: Vec<PodMethod>,
    pub channels: Vec<CommChannel>,
    #[serde(default)]
    pub addresses: Vec<AddressFixture>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressFixture {
    pub label: String,
    pub address: String,
    pub postal_code: String,
    #[serde(default)]
    pub location: Option<GeoFixture>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFixture {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFixture {
    pub order_id: String,
    pub customer_id: String,
    pub recipient_name: String,
    pub address: String,
    pub postal_code: String,
    #[serde(default)]
    pub expected_location: Option<GeoFixture>,
    pub status: OrderStatus,
    pub items: u16,
    /// Middle segment of the generated box codes; defaults to the order number.
    #[serde(default)]
    pub parcel_prefix: Option<String>,
}

impl GeoFixture {
    fn to_point(self) -> Result<GeoPoint, ContractViolation> {
        GeoPoint::v1(self.latitude, self.longitude, self.accuracy_m)
    }
}

impl CustomerFixture {
    fn to_config(&self) -> Result<CustomerConfig, ContractViolation> {
        let addresses = self
            .addresses
            .iter()
            .map(|a| -> Result<CustomerAddress, ContractViolation> {
                Ok(CustomerAddress {
                    label: a.label.clone(),
                    address: a.address.clone(),
                    postal_code: a.postal_code.clone(),
                    location: a.location.map(GeoFixture::to_point).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        CustomerConfig::v1(
            CustomerId::new(self.customer_id.clone())?,
            self.name.clone(),
            self.required_pod.iter().copied().collect(),
            self.channels.iter().copied().collect(),
            addresses,
        )
    }
}

impl OrderFixture {
    fn to_order(&self) -> Result<Order, ContractViolation> {
        let order_id = OrderId::new(self.order_id.clone())?;
        let prefix = self
            .parcel_prefix
            .as_deref()
            .unwrap_or_else(|| {
                self.order_id
                    .strip_prefix("ORD-")
                    .unwrap_or(self.order_id.as_str())
            });
        let parcels = Order::with_generated_parcels(order_id.clone(), prefix, self.items)?;
        Order::v1(
            order_id,
            CustomerId::new(self.customer_id.clone())?,
            self.recipient_name.clone(),
            self.address.clone(),
            self.postal_code.clone(),
            self.expected_location.map(GeoFixture::to_point).transpose()?,
            self.status,
            self.items,
            parcels,
        )
    }
}

impl RouteFixture {
    pub fn parse(json: &str) -> Result<Self, FixtureError> {
        let fixture: RouteFixture = serde_json::from_str(json)?;
        if fixture.schema_version != ROUTE_FIXTURE_SCHEMA_VERSION {
            return Err(FixtureError::UnsupportedSchema(fixture.schema_version));
        }
        Ok(fixture)
    }

    pub fn into_store(self) -> Result<RouteStore, FixtureError> {
        let mut store = RouteStore::new_in_memory();
        for c in &self.customers {
            store.insert_customer_config(c.to_config()?)?;
        }
        for o in &self.orders {
            store.insert_order(o.to_order()?)?;
        }
        info!(
            orders = store.orders().len(),
            parcels = store.parcel_count(),
            "route fixture loaded"
        );
        Ok(store)
    }
}

pub fn load_route_fixture(path: &Path) -> Result<RouteStore, FixtureError> {
    let json = fs::read_to_string(path)?;
    RouteFixture::parse(&json)?.into_store()
}

/// The built-in three-order demo route.
pub fn demo_route_store() -> Result<RouteStore, FixtureError> {
    RouteFixture::parse(DEMO_ROUTE_JSON)?.into_store()
}
