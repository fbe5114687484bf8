#![forbid(unsafe_code)]

use hub_engines::ph1scan::RouteScanView;
use hub_kernel_contracts::ph1scan::{
    PendingUnload, Ph1ScanOk, Ph1ScanRefuse, Ph1ScanRequest, Ph1ScanResponse, ScanAccepted,
    ScanCapabilityId, ScanRefuseKind, ScanRequest, PH1SCAN_ENGINE_ID,
};
use hub_kernel_contracts::{ContractViolation, MonotonicTimeNs, Validate};
use hub_storage::repo::{ParcelUpdateSink, RouteOrderRepo};
use hub_storage::route_store::StorageError;
use tracing::{info, warn};

pub mod reason_codes {
    use hub_kernel_contracts::ReasonCodeId;

    // PH1.SCAN OS wiring reason-code namespace.
    pub const PH1_SCAN_INTERNAL_PIPELINE_ERROR: ReasonCodeId = ReasonCodeId(0x5343_01F1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ph1ScanWiringConfig {
    pub scan_enabled: bool,
}

impl Ph1ScanWiringConfig {
    pub fn mvp_v1(scan_enabled: bool) -> Self {
        Self { scan_enabled }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ph1ScanWiringOutcome {
    NotInvokedDisabled,
    Refused(Ph1ScanRefuse),
    Accepted(Ph1ScanOk),
}

pub trait Ph1ScanEngine {
    fn run(&self, route: RouteScanView<'_>, req: &Ph1ScanRequest) -> Ph1ScanResponse;
}

impl Ph1ScanEngine for hub_engines::ph1scan::Ph1ScanRuntime {
    fn run(&self, route: RouteScanView<'_>, req: &Ph1ScanRequest) -> Ph1ScanResponse {
        self.run(route, req)
    }
}

/// The parcel scan reconciler: the scan engine plus the one delivery scan awaiting
/// confirmation. Accepted parcel mutations go to the sink.
#[derive(Debug, Clone)]
pub struct Ph1ScanWiring<E>
where
    E: Ph1ScanEngine,
{
    config: Ph1ScanWiringConfig,
    engine: E,
    pending: Option<PendingUnload>,
}

impl<E> Ph1ScanWiring<E>
where
    E: Ph1ScanEngine,
{
    pub fn new(config: Ph1ScanWiringConfig, engine: E) -> Result<Self, ContractViolation> {
        Ok(Self {
            config,
            engine,
            pending: None,
        })
    }

    pub fn pending(&self) -> Option<&PendingUnload> {
        self.pending.as_ref()
    }

    /// Abandons the pending confirmation. The parcel stays on the vehicle.
    pub fn abandon_pending(&mut self) -> Option<PendingUnload> {
        self.pending.take()
    }

    pub fn run_request<S>(
        &mut self,
        store: &mut S,
        req: &Ph1ScanRequest,
    ) -> Result<Ph1ScanWiringOutcome, StorageError>
    where
        S: RouteOrderRepo + ParcelUpdateSink,
    {
        req.validate()?;

        if !self.config.scan_enabled {
            return Ok(Ph1ScanWiringOutcome::NotInvokedDisabled);
        }

        let resp = self.engine.run(
            RouteScanView::new(store.route_orders(), self.pending.as_ref()),
            req,
        );
        resp.validate()?;

        let ok = match resp {
            Ph1ScanResponse::Ok(ok) => ok,
            Ph1ScanResponse::Refuse(r) => {
                warn!(
                    engine = PH1SCAN_ENGINE_ID,
                    capability = r.capability_id.as_str(),
                    phase = request_phase(req),
                    kind = ?r.kind,
                    reason_code = r.reason_code.0,
                    "scan refused: {}",
                    r.message
                );
                return Ok(Ph1ScanWiringOutcome::Refused(r));
            }
        };
        if ok.capability_id != req.request.capability_id() {
            return Ok(Ph1ScanWiringOutcome::Refused(Ph1ScanRefuse::v1(
                ok.capability_id,
                ScanRefuseKind::InvalidInput,
                reason_codes::PH1_SCAN_INTERNAL_PIPELINE_ERROR,
                "capability drift detected in ph1scan output".to_string(),
            )?));
        }

        if let Some((parcel_id, update)) = &ok.update {
            store.apply_parcel_update(parcel_id, *update, ok.reason_code)?;
        }

        match &ok.accepted {
            ScanAccepted::Loaded {
                parcel_id,
                all_loaded,
                ..
            } => {
                info!(
                    engine = PH1SCAN_ENGINE_ID,
                    parcel_id = parcel_id.as_str(),
                    all_loaded,
                    "parcel loaded"
                );
            }
            ScanAccepted::UnloadPending(p) => {
                if p.location.is_mismatch() {
                    warn!(
                        parcel_id = p.parcel_id.as_str(),
                        location = ?p.location,
                        "delivery scan outside the location gate; confirmation required"
                    );
                } else {
                    info!(parcel_id = p.parcel_id.as_str(), "delivery scan awaiting confirmation");
                }
                self.pending = Some(p.clone());
            }
            ScanAccepted::Unloaded {
                parcel_id,
                location_override,
                order_unloaded,
                ..
            } => {
                info!(
                    parcel_id = parcel_id.as_str(),
                    location_override,
                    order_unloaded,
                    "parcel unloaded"
                );
                self.pending = None;
            }
        }
        Ok(Ph1ScanWiringOutcome::Accepted(ok))
    }

    /// Confirms whatever delivery scan is pending.
    pub fn confirm_pending<S>(
        &mut self,
        store: &mut S,
        now: MonotonicTimeNs,
    ) -> Result<Ph1ScanWiringOutcome, StorageError>
    where
        S: RouteOrderRepo + ParcelUpdateSink,
    {
        let Some(parcel_id) = self.pending.as_ref().map(|p| p.parcel_id.clone()) else {
            if !self.config.scan_enabled {
                return Ok(Ph1ScanWiringOutcome::NotInvokedDisabled);
            }
            warn!("confirm requested with no pending delivery scan");
            return Ok(Ph1ScanWiringOutcome::Refused(Ph1ScanRefuse::v1(
                ScanCapabilityId::ConfirmDelivery,
                ScanRefuseKind::NoPendingConfirmation,
                hub_engines::ph1scan::reason_codes::SCAN_NO_PENDING_CONFIRMATION,
                "no successful delivery scan awaits confirmation".to_string(),
            )?));
        };
        let req = Ph1ScanRequest::confirm_delivery_v1(now, parcel_id)?;
        self.run_request(store, &req)
    }
}

fn request_phase(req: &Ph1ScanRequest) -> &'static str {
    match &req.request {
        ScanRequest::Scan(v) => v.phase.as_str(),
        ScanRequest::ConfirmDelivery(_) => "CONFIRM",
    }
}
