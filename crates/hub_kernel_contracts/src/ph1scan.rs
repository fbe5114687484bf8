#![forbid(unsafe_code)]

use crate::ph1route::{GeoPoint, OrderId, ParcelId, ParcelUpdate};
use crate::{ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate};

pub const PH1SCAN_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);
pub const PH1SCAN_ENGINE_ID: &str = "PH1.SCAN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    /// Loading boxes onto the vehicle before departure.
    Warehouse,
    /// Unloading a box at the recipient.
    Delivery,
}

impl ScanPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanPhase::Warehouse => "WAREHOUSE",
            ScanPhase::Delivery => "DELIVERY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanCapabilityId {
    Scan,
    ConfirmDelivery,
}

impl ScanCapabilityId {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanCapabilityId::Scan => "SCAN_PARCEL",
            ScanCapabilityId::ConfirmDelivery => "SCAN_CONFIRM_DELIVERY",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanEventRequest {
    /// Raw decoder output. Any string is accepted; codes that match no parcel refuse as not found.
    pub code: String,
    pub phase: ScanPhase,
    pub current_location: Option<GeoPoint>,
}

impl Validate for ScanEventRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if let Some(p) = &self.current_location {
            p.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmDeliveryRequest {
    pub parcel_id: ParcelId,
}

impl Validate for ConfirmDeliveryRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.parcel_id.validate()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanRequest {
    Scan(ScanEventRequest),
    ConfirmDelivery(ConfirmDeliveryRequest),
}

impl ScanRequest {
    pub fn capability_id(&self) -> ScanCapabilityId {
        match self {
            ScanRequest::Scan(_) => ScanCapabilityId::Scan,
            ScanRequest::ConfirmDelivery(_) => ScanCapabilityId::ConfirmDelivery,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ph1ScanRequest {
    pub schema_version: SchemaVersion,
    pub now: MonotonicTimeNs,
    pub request: ScanRequest,
}

impl Ph1ScanRequest {
    pub fn scan_v1(
        now: MonotonicTimeNs,
        code: impl Into<String>,
        phase: ScanPhase,
        current_location: Option<GeoPoint>,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: PH1SCAN_CONTRACT_VERSION,
            now,
            request: ScanRequest::Scan(ScanEventRequest {
                code: code.into(),
                phase,
                current_location,
            }),
        };
        r.validate()?;
        Ok(r)
    }

    pub fn confirm_delivery_v1(
        now: MonotonicTimeNs,
        parcel_id: ParcelId,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: PH1SCAN_CONTRACT_VERSION,
            now,
            request: ScanRequest::ConfirmDelivery(ConfirmDeliveryRequest { parcel_id }),
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for Ph1ScanRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PH1SCAN_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "ph1scan_request.schema_version",
                reason: "must match PH1SCAN_CONTRACT_VERSION",
            });
        }
        match &self.request {
            ScanRequest::Scan(r) => r.validate(),
            ScanRequest::ConfirmDelivery(r) => r.validate(),
        }
    }
}

/// Result of comparing the device position against the order's expected position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationCheck {
    Verified { distance_m: f64 },
    /// Soft warning. The scan stands; committing it needs an explicit confirmation.
    Mismatch { distance_m: f64, max_distance_m: f64 },
    /// One of the two positions was missing.
    Unverifiable,
}

impl LocationCheck {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, LocationCheck::Mismatch { .. })
    }
}

/// A delivery-phase scan that succeeded and waits for `confirm_delivery`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUnload {
    pub parcel_id: ParcelId,
    pub order_id: OrderId,
    pub box_number: u16,
    pub location: LocationCheck,
    pub scanned_at: MonotonicTimeNs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanAccepted {
    Loaded {
        parcel_id: ParcelId,
        order_id: OrderId,
        box_number: u16,
        scanned_at: MonotonicTimeNs,
        /// This scan loaded the last outstanding parcel of the route.
        all_loaded: bool,
    },
    UnloadPending(PendingUnload),
    Unloaded {
        parcel_id: ParcelId,
        order_id: OrderId,
        box_number: u16,
        scanned_at: MonotonicTimeNs,
        location_override: bool,
        /// Every parcel of the owning order is now off the vehicle.
        order_unloaded: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ph1ScanOk {
    pub schema_version: SchemaVersion,
    pub capability_id: ScanCapabilityId,
    pub reason_code: ReasonCodeId,
    pub accepted: ScanAccepted,
    /// Parcel mutation to hand to the parcel-update sink, if any.
    pub update: Option<(ParcelId, ParcelUpdate)>,
}

impl Ph1ScanOk {
    pub fn v1(
        capability_id: ScanCapabilityId,
        reason_code: ReasonCodeId,
        accepted: ScanAccepted,
        update: Option<(ParcelId, ParcelUpdate)>,
    ) -> Result<Self, ContractViolation> {
        let o = Self {
            schema_version: PH1SCAN_CONTRACT_VERSION,
            capability_id,
            reason_code,
            accepted,
            update,
        };
        o.validate()?;
        Ok(o)
    }
}

impl Validate for Ph1ScanOk {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PH1SCAN_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "ph1scan_ok.schema_version",
                reason: "must match PH1SCAN_CONTRACT_VERSION",
            });
        }
        if self.reason_code.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "ph1scan_ok.reason_code",
                reason: "must be > 0",
            });
        }
        let consistent = match (&self.accepted, &self.update) {
            (
                ScanAccepted::Loaded { parcel_id, .. },
                Some((target, ParcelUpdate::ScannedOnVan { .. })),
            ) => parcel_id == target && self.capability_id == ScanCapabilityId::Scan,
            (ScanAccepted::UnloadPending(_), None) => {
                self.capability_id == ScanCapabilityId::Scan
            }
            (
                ScanAccepted::Unloaded { parcel_id, .. },
                Some((target, ParcelUpdate::ScannedOffVan { .. })),
            ) => parcel_id == target && self.capability_id == ScanCapabilityId::ConfirmDelivery,
            _ => false,
        };
        if !consistent {
            return Err(ContractViolation::InvalidValue {
                field: "ph1scan_ok.update",
                reason: "must match the accepted outcome",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanRefuseKind {
    NotFound,
    AlreadyProcessed,
    PrecedenceViolation,
    NoPendingConfirmation,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ph1ScanRefuse {
    pub schema_version: SchemaVersion,
    pub capability_id: ScanCapabilityId,
    pub kind: ScanRefuseKind,
    pub reason_code: ReasonCodeId,
    pub message: String,
}

impl Ph1ScanRefuse {
    pub fn v1(
        capability_id: ScanCapabilityId,
        kind: ScanRefuseKind,
        reason_code: ReasonCodeId,
        message: String,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: PH1SCAN_CONTRACT_VERSION,
            capability_id,
            kind,
            reason_code,
            message,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for Ph1ScanRefuse {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PH1SCAN_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "ph1scan_refuse.schema_version",
                reason: "must match PH1SCAN_CONTRACT_VERSION",
            });
        }
        if self.reason_code.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "ph1scan_refuse.reason_code",
                reason: "must be > 0",
            });
        }
        if self.message.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "ph1scan_refuse.message",
                reason: "must not be empty",
            });
        }
        if self.message.len() > 512 {
            return Err(ContractViolation::InvalidValue {
                field: "ph1scan_refuse.message",
                reason: "must be <= 512 chars",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ph1ScanResponse {
    Ok(Ph1ScanOk),
    Refuse(Ph1ScanRefuse),
}

impl Validate for Ph1ScanResponse {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            Ph1ScanResponse::Ok(o) => o.validate(),
            Ph1ScanResponse::Refuse(r) => r.validate(),
        }
    }
}
