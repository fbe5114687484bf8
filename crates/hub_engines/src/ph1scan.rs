#![forbid(unsafe_code)]

use hub_kernel_contracts::ph1route::{Order, Parcel, ParcelUpdate};
use hub_kernel_contracts::ph1scan::{
    ConfirmDeliveryRequest, PendingUnload, Ph1ScanOk, Ph1ScanRefuse, Ph1ScanRequest,
    Ph1ScanResponse, ScanAccepted, ScanCapabilityId, ScanEventRequest, ScanPhase, ScanRefuseKind,
    ScanRequest,
};
use hub_kernel_contracts::{MonotonicTimeNs, ReasonCodeId, Validate};

use crate::ph1geo::{Ph1GeoConfig, Ph1GeoRuntime};

pub mod reason_codes {
    use hub_kernel_contracts::ReasonCodeId;

    // PH1.SCAN reason-code namespace.
    pub const SCAN_OK_LOADED: ReasonCodeId = ReasonCodeId(0x5343_0001);
    pub const SCAN_OK_ALL_LOADED: ReasonCodeId = ReasonCodeId(0x5343_0002);
    pub const SCAN_OK_UNLOAD_PENDING: ReasonCodeId = ReasonCodeId(0x5343_0003);
    pub const SCAN_OK_UNLOAD_PENDING_LOCATION_WARNING: ReasonCodeId = ReasonCodeId(0x5343_0004);
    pub const SCAN_OK_UNLOADED: ReasonCodeId = ReasonCodeId(0x5343_0005);

    pub const SCAN_INPUT_SCHEMA_INVALID: ReasonCodeId = ReasonCodeId(0x5343_00F1);
    pub const SCAN_PARCEL_NOT_FOUND: ReasonCodeId = ReasonCodeId(0x5343_00F2);
    pub const SCAN_ALREADY_LOADED: ReasonCodeId = ReasonCodeId(0x5343_00F3);
    pub const SCAN_ALREADY_DELIVERED: ReasonCodeId = ReasonCodeId(0x5343_00F4);
    pub const SCAN_NOT_LOADED_AT_WAREHOUSE: ReasonCodeId = ReasonCodeId(0x5343_00F5);
    pub const SCAN_NO_PENDING_CONFIRMATION: ReasonCodeId = ReasonCodeId(0x5343_00F6);
    pub const SCAN_INTERNAL_PIPELINE_ERROR: ReasonCodeId = ReasonCodeId(0x5343_00FF);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ph1ScanConfig {
    pub geo: Ph1GeoConfig,
}

impl Ph1ScanConfig {
    pub fn mvp_v1() -> Self {
        Self {
            geo: Ph1GeoConfig::mvp_v1(),
        }
    }
}

/// Read-only view of the active route handed to the scan runtime.
#[derive(Debug, Clone, Copy)]
pub struct RouteScanView<'a> {
    pub orders: &'a [Order],
    pub pending: Option<&'a PendingUnload>,
}

impl<'a> RouteScanView<'a> {
    pub fn new(orders: &'a [Order], pending: Option<&'a PendingUnload>) -> Self {
        Self { orders, pending }
    }

    fn find(&self, code: &str) -> Option<(&'a Order, &'a Parcel)> {
        self.orders
            .iter()
            .find_map(|o| o.parcel_by_code(code).map(|p| (o, p)))
    }

    fn unloaded_elsewhere_on_van(&self, except: &Parcel) -> usize {
        self.orders
            .iter()
            .flat_map(|o| o.parcels.iter())
            .filter(|p| !p.scanned_on_van && p.parcel_id != except.parcel_id)
            .count()
    }
}

/// Decides scan outcomes. Never mutates parcels; accepted outcomes carry the update to apply.
#[derive(Debug, Clone)]
pub struct Ph1ScanRuntime {
    geo: Ph1GeoRuntime,
}

impl Default for Ph1ScanRuntime {
    fn default() -> Self {
        Self::new(Ph1ScanConfig::mvp_v1())
    }
}

impl Ph1ScanRuntime {
    pub fn new(config: Ph1ScanConfig) -> Self {
        Self {
            geo: Ph1GeoRuntime::new(config.geo),
        }
    }

    pub fn run(&self, route: RouteScanView<'_>, req: &Ph1ScanRequest) -> Ph1ScanResponse {
        let capability_id = req.request.capability_id();
        if req.validate().is_err() {
            return refuse(
                capability_id,
                ScanRefuseKind::InvalidInput,
                reason_codes::SCAN_INPUT_SCHEMA_INVALID,
                "scan request failed contract validation",
            );
        }
        match &req.request {
            ScanRequest::Scan(v) => match v.phase {
                ScanPhase::Warehouse => self.scan_warehouse(route, v, req.now),
                ScanPhase::Delivery => self.scan_delivery(route, v, req.now),
            },
            ScanRequest::ConfirmDelivery(v) => self.confirm_delivery(route, v, req.now),
        }
    }

    fn scan_warehouse(
        &self,
        route: RouteScanView<'_>,
        v: &ScanEventRequest,
        now: MonotonicTimeNs,
    ) -> Ph1ScanResponse {
        let Some((order, parcel)) = route.find(&v.code) else {
            return not_found(ScanCapabilityId::Scan);
        };
        if parcel.scanned_on_van {
            return refuse(
                ScanCapabilityId::Scan,
                ScanRefuseKind::AlreadyProcessed,
                reason_codes::SCAN_ALREADY_LOADED,
                "parcel already scanned onto the vehicle",
            );
        }
        let all_loaded = route.unloaded_elsewhere_on_van(parcel) == 0;
        let reason_code = if all_loaded {
            reason_codes::SCAN_OK_ALL_LOADED
        } else {
            reason_codes::SCAN_OK_LOADED
        };
        ok(
            ScanCapabilityId::Scan,
            reason_code,
            ScanAccepted::Loaded {
                parcel_id: parcel.parcel_id.clone(),
                order_id: order.order_id.clone(),
                box_number: parcel.box_number,
                scanned_at: now,
                all_loaded,
            },
            Some((
                parcel.parcel_id.clone(),
                ParcelUpdate::ScannedOnVan { at: now },
            )),
        )
    }

    fn scan_delivery(
        &self,
        route: RouteScanView<'_>,
        v: &ScanEventRequest,
        now: MonotonicTimeNs,
    ) -> Ph1ScanResponse {
        let Some((order, parcel)) = route.find(&v.code) else {
            return not_found(ScanCapabilityId::Scan);
        };
        if let Some(refused) = unload_precondition(ScanCapabilityId::Scan, parcel) {
            return refused;
        }
        let location = self
            .geo
            .check(v.current_location.as_ref(), order.expected_location.as_ref());
        let reason_code = if location.is_mismatch() {
            reason_codes::SCAN_OK_UNLOAD_PENDING_LOCATION_WARNING
        } else {
            reason_codes::SCAN_OK_UNLOAD_PENDING
        };
        ok(
            ScanCapabilityId::Scan,
            reason_code,
            ScanAccepted::UnloadPending(PendingUnload {
                parcel_id: parcel.parcel_id.clone(),
                order_id: order.order_id.clone(),
                box_number: parcel.box_number,
                location,
                scanned_at: now,
            }),
            None,
        )
    }

    fn confirm_delivery(
        &self,
        route: RouteScanView<'_>,
        v: &ConfirmDeliveryRequest,
        now: MonotonicTimeNs,
    ) -> Ph1ScanResponse {
        let Some(pending) = route.pending.filter(|p| p.parcel_id == v.parcel_id) else {
            return refuse(
                ScanCapabilityId::ConfirmDelivery,
                ScanRefuseKind::NoPendingConfirmation,
                reason_codes::SCAN_NO_PENDING_CONFIRMATION,
                "no successful delivery scan awaits confirmation for this parcel",
            );
        };
        let Some((order, parcel)) = route.find(pending.parcel_id.as_str()) else {
            return not_found(ScanCapabilityId::ConfirmDelivery);
        };
        // Parcel state may have moved since the scan was accepted.
        if let Some(refused) = unload_precondition(ScanCapabilityId::ConfirmDelivery, parcel) {
            return refused;
        }
        let order_unloaded = order
            .parcels
            .iter()
            .all(|p| p.scanned_off_van || p.parcel_id == parcel.parcel_id);
        ok(
            ScanCapabilityId::ConfirmDelivery,
            reason_codes::SCAN_OK_UNLOADED,
            ScanAccepted::Unloaded {
                parcel_id: parcel.parcel_id.clone(),
                order_id: order.order_id.clone(),
                box_number: parcel.box_number,
                scanned_at: now,
                location_override: pending.location.is_mismatch(),
                order_unloaded,
            },
            Some((
                parcel.parcel_id.clone(),
                ParcelUpdate::ScannedOffVan { at: now },
            )),
        )
    }
}

fn unload_precondition(capability_id: ScanCapabilityId, parcel: &Parcel) -> Option<Ph1ScanResponse> {
    if !parcel.scanned_on_van {
        return Some(refuse(
            capability_id,
            ScanRefuseKind::PrecedenceViolation,
            reason_codes::SCAN_NOT_LOADED_AT_WAREHOUSE,
            "parcel was not loaded at the warehouse",
        ));
    }
    if parcel.scanned_off_van {
        return Some(refuse(
            capability_id,
            ScanRefuseKind::AlreadyProcessed,
            reason_codes::SCAN_ALREADY_DELIVERED,
            "parcel already delivered",
        ));
    }
    None
}

fn not_found(capability_id: ScanCapabilityId) -> Ph1ScanResponse {
    refuse(
        capability_id,
        ScanRefuseKind::NotFound,
        reason_codes::SCAN_PARCEL_NOT_FOUND,
        "scanned code matches no parcel on this route",
    )
}

fn ok(
    capability_id: ScanCapabilityId,
    reason_code: ReasonCodeId,
    accepted: ScanAccepted,
    update: Option<(hub_kernel_contracts::ph1route::ParcelId, ParcelUpdate)>,
) -> Ph1ScanResponse {
    match Ph1ScanOk::v1(capability_id, reason_code, accepted, update) {
        Ok(v) => Ph1ScanResponse::Ok(v),
        Err(_) => refuse(
            capability_id,
            ScanRefuseKind::InvalidInput,
            reason_codes::SCAN_INTERNAL_PIPELINE_ERROR,
            "failed to build scan ok response",
        ),
    }
}

fn refuse(
    capability_id: ScanCapabilityId,
    kind: ScanRefuseKind,
    reason_code: ReasonCodeId,
    message: &str,
) -> Ph1ScanResponse {
    match Ph1ScanRefuse::v1(capability_id, kind, reason_code, message.to_string()) {
        Ok(v) => Ph1ScanResponse::Refuse(v),
        Err(_) => Ph1ScanResponse::Refuse(Ph1ScanRefuse {
            schema_version: hub_kernel_contracts::ph1scan::PH1SCAN_CONTRACT_VERSION,
            capability_id,
            kind,
            reason_code: reason_codes::SCAN_INTERNAL_PIPELINE_ERROR,
            message: "failed to build scan refuse response".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_kernel_contracts::ph1route::{CustomerId, GeoPoint, OrderId, OrderStatus, ParcelId};
    use hub_kernel_contracts::ph1scan::LocationCheck;

    fn order(id: &str, prefix: &str, items: u16, at: Option<GeoPoint>) -> Order {
        let order_id = OrderId::new(id).unwrap();
        Order::v1(
            order_id.clone(),
            CustomerId::new("CUST-1").unwrap(),
            "Jane Doe".to_string(),
            "1 Main St".to_string(),
            "10001".to_string(),
            at,
            OrderStatus::OutForDelivery,
            items,
            Order::with_generated_parcels(order_id, prefix, items).unwrap(),
        )
        .unwrap()
    }

    fn scan(code: &str, phase: ScanPhase, loc: Option<GeoPoint>, t: u64) -> Ph1ScanRequest {
        Ph1ScanRequest::scan_v1(MonotonicTimeNs(t), code, phase, loc).unwrap()
    }

    fn apply(orders: &mut [Order], resp: &Ph1ScanResponse) {
        if let Ph1ScanResponse::Ok(ok) = resp {
            if let Some((id, update)) = &ok.update {
                for o in orders.iter_mut() {
                    for p in o.parcels.iter_mut() {
                        if &p.parcel_id == id {
                            p.apply(*update).unwrap();
                        }
                    }
                }
            }
        }
    }

    fn refuse_kind(resp: &Ph1ScanResponse) -> ScanRefuseKind {
        match resp {
            Ph1ScanResponse::Refuse(r) => r.kind,
            other => panic!("expected refuse, got {other:?}"),
        }
    }

    #[test]
    fn at_scan_01_last_warehouse_scan_flags_all_loaded() {
        let rt = Ph1ScanRuntime::default();
        let mut orders = vec![order("ORD-1", "1", 3, None)];
        for (n, code) in ["BOX-1-1", "BOX-1-2", "BOX-1-3"].iter().enumerate() {
            let resp = rt.run(
                RouteScanView::new(&orders, None),
                &scan(code, ScanPhase::Warehouse, None, 10 + n as u64),
            );
            match &resp {
                Ph1ScanResponse::Ok(ok) => match &ok.accepted {
                    ScanAccepted::Loaded { all_loaded, .. } => assert_eq!(*all_loaded, n == 2),
                    other => panic!("expected loaded, got {other:?}"),
                },
                other => panic!("expected ok, got {other:?}"),
            }
            apply(&mut orders, &resp);
        }
        assert!(orders[0].all_loaded());
    }

    #[test]
    fn at_scan_02_second_warehouse_scan_keeps_first_timestamp() {
        let rt = Ph1ScanRuntime::default();
        let mut orders = vec![order("ORD-1", "1", 2, None)];
        let first = rt.run(
            RouteScanView::new(&orders, None),
            &scan("BOX-1-1", ScanPhase::Warehouse, None, 100),
        );
        apply(&mut orders, &first);
        let second = rt.run(
            RouteScanView::new(&orders, None),
            &scan("BOX-1-1", ScanPhase::Warehouse, None, 200),
        );
        assert_eq!(refuse_kind(&second), ScanRefuseKind::AlreadyProcessed);
        apply(&mut orders, &second);
        assert_eq!(orders[0].parcels[0].scanned_on_at, Some(MonotonicTimeNs(100)));
    }

    #[test]
    fn at_scan_03_unknown_code_is_not_found() {
        let rt = Ph1ScanRuntime::default();
        let orders = vec![order("ORD-1", "1", 3, None)];
        for phase in [ScanPhase::Warehouse, ScanPhase::Delivery] {
            let resp = rt.run(
                RouteScanView::new(&orders, None),
                &scan("WRONG-BOX-123", phase, None, 5),
            );
            assert_eq!(refuse_kind(&resp), ScanRefuseKind::NotFound);
        }
    }

    #[test]
    fn at_scan_04_delivery_before_load_is_precedence_violation() {
        let rt = Ph1ScanRuntime::default();
        let target = GeoPoint::v1(51.5, -0.12, None).unwrap();
        let orders = vec![order("ORD-1", "1", 1, Some(target))];
        for (t, loc) in [(1, None), (2, Some(target)), (3, Some(target))] {
            let resp = rt.run(
                RouteScanView::new(&orders, None),
                &scan("BOX-1-1", ScanPhase::Delivery, loc, t),
            );
            assert_eq!(refuse_kind(&resp), ScanRefuseKind::PrecedenceViolation);
        }
        assert!(!orders[0].parcels[0].scanned_off_van);
    }

    #[test]
    fn at_scan_05_far_delivery_scan_warns_but_succeeds() {
        let rt = Ph1ScanRuntime::default();
        let target = GeoPoint::v1(51.5, -0.12, None).unwrap();
        let here = GeoPoint::v1(51.501349, -0.12, None).unwrap();
        let mut orders = vec![order("ORD-1", "1", 1, Some(target))];
        let load = rt.run(
            RouteScanView::new(&orders, None),
            &scan("BOX-1-1", ScanPhase::Warehouse, None, 1),
        );
        apply(&mut orders, &load);
        let resp = rt.run(
            RouteScanView::new(&orders, None),
            &scan("BOX-1-1", ScanPhase::Delivery, Some(here), 2),
        );
        let pending = match resp {
            Ph1ScanResponse::Ok(ok) => {
                assert!(ok.update.is_none());
                assert_eq!(
                    ok.reason_code,
                    reason_codes::SCAN_OK_UNLOAD_PENDING_LOCATION_WARNING
                );
                match ok.accepted {
                    ScanAccepted::UnloadPending(p) => p,
                    other => panic!("expected pending, got {other:?}"),
                }
            }
            other => panic!("expected ok, got {other:?}"),
        };
        assert!(matches!(pending.location, LocationCheck::Mismatch { .. }));
        assert!(!orders[0].parcels[0].scanned_off_van);

        let confirm = rt.run(
            RouteScanView::new(&orders, Some(&pending)),
            &Ph1ScanRequest::confirm_delivery_v1(
                MonotonicTimeNs(3),
                ParcelId::new("BOX-1-1").unwrap(),
            )
            .unwrap(),
        );
        match &confirm {
            Ph1ScanResponse::Ok(ok) => match &ok.accepted {
                ScanAccepted::Unloaded {
                    location_override,
                    order_unloaded,
                    ..
                } => {
                    assert!(*location_override);
                    assert!(*order_unloaded);
                }
                other => panic!("expected unloaded, got {other:?}"),
            },
            other => panic!("expected ok, got {other:?}"),
        }
        apply(&mut orders, &confirm);
        assert_eq!(orders[0].parcels[0].scanned_off_at, Some(MonotonicTimeNs(3)));
    }

    #[test]
    fn at_scan_06_missing_location_skips_gate() {
        let rt = Ph1ScanRuntime::default();
        let mut orders = vec![order("ORD-1", "1", 1, None)];
        let load = rt.run(
            RouteScanView::new(&orders, None),
            &scan("BOX-1-1", ScanPhase::Warehouse, None, 1),
        );
        apply(&mut orders, &load);
        let here = GeoPoint::v1(10.0, 10.0, None).unwrap();
        match rt.run(
            RouteScanView::new(&orders, None),
            &scan("BOX-1-1", ScanPhase::Delivery, Some(here), 2),
        ) {
            Ph1ScanResponse::Ok(ok) => match ok.accepted {
                ScanAccepted::UnloadPending(p) => {
                    assert_eq!(p.location, LocationCheck::Unverifiable)
                }
                other => panic!("expected pending, got {other:?}"),
            },
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[test]
    fn at_scan_07_confirm_without_pending_is_refused() {
        let rt = Ph1ScanRuntime::default();
        let orders = vec![order("ORD-1", "1", 1, None)];
        let resp = rt.run(
            RouteScanView::new(&orders, None),
            &Ph1ScanRequest::confirm_delivery_v1(
                MonotonicTimeNs(3),
                ParcelId::new("BOX-1-1").unwrap(),
            )
            .unwrap(),
        );
        assert_eq!(refuse_kind(&resp), ScanRefuseKind::NoPendingConfirmation);
    }

    #[test]
    fn at_scan_08_already_delivered_parcel_is_refused() {
        let rt = Ph1ScanRuntime::default();
        let mut orders = vec![order("ORD-1", "1", 1, None)];
        orders[0].parcels[0]
            .apply(ParcelUpdate::ScannedOnVan {
                at: MonotonicTimeNs(1),
            })
            .unwrap();
        orders[0].parcels[0]
            .apply(ParcelUpdate::ScannedOffVan {
                at: MonotonicTimeNs(2),
            })
            .unwrap();
        let resp = rt.run(
            RouteScanView::new(&orders, None),
            &scan("BOX-1-1", ScanPhase::Delivery, None, 3),
        );
        assert_eq!(refuse_kind(&resp), ScanRefuseKind::AlreadyProcessed);
    }
}
