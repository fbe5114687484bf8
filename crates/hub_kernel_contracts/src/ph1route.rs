#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::common::{validate_id, validate_range, validate_text};
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const PH1ROUTE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const MAX_PARCELS_PER_ORDER: u16 = 999;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for OrderId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("order_id", &self.0, 64)
    }
}

/// Scan code printed on a box. Unique across every order in the system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParcelId(String);

impl ParcelId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ParcelId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("parcel_id", &self.0, 128)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for CustomerId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("customer_id", &self.0, 64)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Entry,
    Dispatch,
    Picking,
    Packing,
    OutForDelivery,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Entry => "ENTRY",
            OrderStatus::Dispatch => "DISPATCH",
            OrderStatus::Picking => "PICKING",
            OrderStatus::Packing => "PACKING",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
        }
    }

    /// Lifecycle moves strictly forward.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        to > self
    }

    pub fn is_terminal(self) -> bool {
        self == OrderStatus::Delivered
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

impl GeoPoint {
    pub fn v1(
        latitude: f64,
        longitude: f64,
        accuracy_m: Option<f64>,
    ) -> Result<Self, ContractViolation> {
        let p = Self {
            latitude,
            longitude,
            accuracy_m,
        };
        p.validate()?;
        Ok(p)
    }
}

impl Validate for GeoPoint {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_range("geo_point.latitude", self.latitude, -90.0, 90.0)?;
        validate_range("geo_point.longitude", self.longitude, -180.0, 180.0)?;
        if let Some(acc) = self.accuracy_m {
            validate_range("geo_point.accuracy_m", acc, 0.0, 1_000_000.0)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parcel {
    pub parcel_id: ParcelId,
    pub order_id: OrderId,
    pub box_number: u16,
    pub scanned_on_van: bool,
    pub scanned_on_at: Option<MonotonicTimeNs>,
    pub scanned_off_van: bool,
    pub scanned_off_at: Option<MonotonicTimeNs>,
}

impl Parcel {
    pub fn v1(
        parcel_id: ParcelId,
        order_id: OrderId,
        box_number: u16,
    ) -> Result<Self, ContractViolation> {
        let p = Self {
            parcel_id,
            order_id,
            box_number,
            scanned_on_van: false,
            scanned_on_at: None,
            scanned_off_van: false,
            scanned_off_at: None,
        };
        p.validate()?;
        Ok(p)
    }

    /// Applies a sink update. Refuses an unload that was never preceded by a load.
    pub fn apply(&mut self, update: ParcelUpdate) -> Result<(), ContractViolation> {
        match update {
            ParcelUpdate::ScannedOnVan { at } => {
                self.scanned_on_van = true;
                self.scanned_on_at = Some(at);
            }
            ParcelUpdate::ScannedOffVan { at } => {
                if !self.scanned_on_van {
                    return Err(ContractViolation::InvalidValue {
                        field: "parcel.scanned_off_van",
                        reason: "requires scanned_on_van",
                    });
                }
                self.scanned_off_van = true;
                self.scanned_off_at = Some(at);
            }
        }
        Ok(())
    }
}

impl Validate for Parcel {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.parcel_id.validate()?;
        self.order_id.validate()?;
        if self.box_number == 0 || self.box_number > MAX_PARCELS_PER_ORDER {
            return Err(ContractViolation::InvalidValue {
                field: "parcel.box_number",
                reason: "must be within 1..=MAX_PARCELS_PER_ORDER",
            });
        }
        if self.scanned_on_at.is_some() && !self.scanned_on_van {
            return Err(ContractViolation::InvalidValue {
                field: "parcel.scanned_on_at",
                reason: "requires scanned_on_van",
            });
        }
        if self.scanned_off_at.is_some() && !self.scanned_off_van {
            return Err(ContractViolation::InvalidValue {
                field: "parcel.scanned_off_at",
                reason: "requires scanned_off_van",
            });
        }
        if self.scanned_off_van && !self.scanned_on_van {
            return Err(ContractViolation::InvalidValue {
                field: "parcel.scanned_off_van",
                reason: "requires scanned_on_van",
            });
        }
        Ok(())
    }
}

/// The only mutation the scan reconciler ever asks of the parcel owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParcelUpdate {
    ScannedOnVan { at: MonotonicTimeNs },
    ScannedOffVan { at: MonotonicTimeNs },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub schema_version: SchemaVersion,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub recipient_name: String,
    pub address: String,
    pub postal_code: String,
    pub expected_location: Option<GeoPoint>,
    pub status: OrderStatus,
    pub items: u16,
    pub parcels: Vec<Parcel>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        order_id: OrderId,
        customer_id: CustomerId,
        recipient_name: String,
        address: String,
        postal_code: String,
        expected_location: Option<GeoPoint>,
        status: OrderStatus,
        items: u16,
        parcels: Vec<Parcel>,
    ) -> Result<Self, ContractViolation> {
        let o = Self {
            schema_version: PH1ROUTE_CONTRACT_VERSION,
            order_id,
            customer_id,
            recipient_name,
            address,
            postal_code,
            expected_location,
            status,
            items,
            parcels,
        };
        o.validate()?;
        Ok(o)
    }

    /// Builds `items` fresh parcels with ids `BOX-<suffix>-<n>`.
    pub fn with_generated_parcels(
        order_id: OrderId,
        parcel_prefix: &str,
        items: u16,
    ) -> Result<Vec<Parcel>, ContractViolation> {
        (1..=items)
            .map(|n| {
                Parcel::v1(
                    ParcelId::new(format!("BOX-{parcel_prefix}-{n}"))?,
                    order_id.clone(),
                    n,
                )
            })
            .collect()
    }

    pub fn parcel(&self, parcel_id: &ParcelId) -> Option<&Parcel> {
        self.parcels.iter().find(|p| &p.parcel_id == parcel_id)
    }

    pub fn parcel_by_code(&self, code: &str) -> Option<&Parcel> {
        self.parcels.iter().find(|p| p.parcel_id.as_str() == code)
    }

    pub fn parcel_ids(&self) -> BTreeSet<ParcelId> {
        self.parcels.iter().map(|p| p.parcel_id.clone()).collect()
    }

    pub fn all_loaded(&self) -> bool {
        self.parcels.iter().all(|p| p.scanned_on_van)
    }

    pub fn all_unloaded(&self) -> bool {
        self.parcels.iter().all(|p| p.scanned_off_van)
    }
}

impl Validate for Order {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PH1ROUTE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "order.schema_version",
                reason: "must match PH1ROUTE_CONTRACT_VERSION",
            });
        }
        self.order_id.validate()?;
        self.customer_id.validate()?;
        validate_text("order.recipient_name", &self.recipient_name, 256)?;
        validate_text("order.address", &self.address, 512)?;
        validate_text("order.postal_code", &self.postal_code, 16)?;
        if let Some(p) = &self.expected_location {
            p.validate()?;
        }
        if self.items == 0 || self.items > MAX_PARCELS_PER_ORDER {
            return Err(ContractViolation::InvalidValue {
                field: "order.items",
                reason: "must be within 1..=MAX_PARCELS_PER_ORDER",
            });
        }
        if self.parcels.len() != usize::from(self.items) {
            return Err(ContractViolation::InvalidValue {
                field: "order.parcels",
                reason: "parcel count must equal items",
            });
        }
        let mut ids = BTreeSet::new();
        let mut boxes = BTreeSet::new();
        for p in &self.parcels {
            p.validate()?;
            if p.order_id != self.order_id {
                return Err(ContractViolation::InvalidValue {
                    field: "order.parcels.order_id",
                    reason: "must match owning order",
                });
            }
            if p.box_number > self.items || !boxes.insert(p.box_number) {
                return Err(ContractViolation::InvalidValue {
                    field: "order.parcels.box_number",
                    reason: "must be unique within 1..=items",
                });
            }
            if !ids.insert(p.parcel_id.clone()) {
                return Err(ContractViolation::InvalidValue {
                    field: "order.parcels.parcel_id",
                    reason: "must be unique",
                });
            }
        }
        Ok(())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodMethod {
    Photo,
    Signature,
    Otp,
    /// Accepted in configuration; no flow step renders it.
    ReverseScan,
    QrScan,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommChannel {
    Sms,
    Email,
    Whatsapp,
    Push,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAddress {
    pub label: String,
    pub address: String,
    pub postal_code: String,
    pub location: Option<GeoPoint>,
}

impl Validate for CustomerAddress {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("customer_address.label", &self.label, 128)?;
        validate_text("customer_address.address", &self.address, 512)?;
        validate_text("customer_address.postal_code", &self.postal_code, 16)?;
        if let Some(p) = &self.location {
            p.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressChangeEntry {
    pub customer_id: CustomerId,
    pub changed_at: MonotonicTimeNs,
    pub previous_address: String,
    pub new_address: String,
    pub changed_by: String,
}

impl AddressChangeEntry {
    pub fn v1(
        customer_id: CustomerId,
        changed_at: MonotonicTimeNs,
        previous_address: String,
        new_address: String,
        changed_by: String,
    ) -> Result<Self, ContractViolation> {
        let e = Self {
            customer_id,
            changed_at,
            previous_address,
            new_address,
            changed_by,
        };
        e.validate()?;
        Ok(e)
    }
}

impl Validate for AddressChangeEntry {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.customer_id.validate()?;
        validate_text(
            "address_change.previous_address",
            &self.previous_address,
            512,
        )?;
        validate_text("address_change.new_address", &self.new_address, 512)?;
        validate_id("address_change.changed_by", &self.changed_by, 128)?;
        if self.previous_address == self.new_address {
            return Err(ContractViolation::InvalidValue {
                field: "address_change.new_address",
                reason: "must differ from previous_address",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerConfig {
    pub schema_version: SchemaVersion,
    pub customer_id: CustomerId,
    pub name: String,
    pub required_pod: BTreeSet<PodMethod>,
    pub channels: BTreeSet<CommChannel>,
    pub addresses: Vec<CustomerAddress>,
}

impl CustomerConfig {
    pub fn v1(
        customer_id: CustomerId,
        name: String,
        required_pod: BTreeSet<PodMethod>,
        channels: BTreeSet<CommChannel>,
        addresses: Vec<CustomerAddress>,
    ) -> Result<Self, ContractViolation> {
        let c = Self {
            schema_version: PH1ROUTE_CONTRACT_VERSION,
            customer_id,
            name,
            required_pod,
            channels,
            addresses,
        };
        c.validate()?;
        Ok(c)
    }

    /// Raw configured requirement; the flow layers its mandatory floor on top.
    pub fn requires(&self, method: PodMethod) -> bool {
        self.required_pod.contains(&method)
    }
}

impl Validate for CustomerConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PH1ROUTE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "customer_config.schema_version",
                reason: "must match PH1ROUTE_CONTRACT_VERSION",
            });
        }
        self.customer_id.validate()?;
        validate_text("customer_config.name", &self.name, 256)?;
        if self.channels.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "customer_config.channels",
                reason: "must enable at least one channel",
            });
        }
        for a in &self.addresses {
            a.validate()?;
        }
        Ok(())
    }
}
