#![forbid(unsafe_code)]

use hub_kernel_contracts::ph1pod::{EvidencePayload, PodCommandOutcome, PodStepKind, OTP_LEN};
use hub_kernel_contracts::ph1route::Order;
use hub_kernel_contracts::ph1scan::{ScanAccepted, ScanPhase};
use hub_kernel_contracts::MonotonicTimeNs;
use hub_os::capabilities::{FixedLocation, SimulatedScanner};
use hub_os::ph1pod::{Ph1PodWiringOutcome, PodCommand};
use hub_os::ph1scan::Ph1ScanWiringOutcome;
use hub_os::route_session::{RouteSession, RouteSessionConfig};
use hub_storage::route_store::RouteStore;

const DEMO_SIGNATURE: &str = "data:image/png;base64,iVBORw0KGgo=";
const DEMO_PHOTO: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRg==";
const DEMO_OTP: &str = "4815";
// A flow never has more steps than this; guards the replay loop.
const MAX_FLOW_ACTIONS: usize = 64;

struct Clock(u64);

impl Clock {
    fn tick(&mut self) -> MonotonicTimeNs {
        self.0 += 250;
        MonotonicTimeNs::from_ms(self.0)
    }
}

/// Replays a full shift against `store`: loads every parcel, then unloads and proves
/// delivery of each open order. Returns one report line per event.
pub fn execute_route_demo(store: RouteStore) -> Result<Vec<String>, String> {
    let mut session = RouteSession::new(store, RouteSessionConfig::mvp_v1())
        .map_err(|e| format!("invalid session config: {e}"))?;
    let mut clock = Clock(0);
    let mut report = Vec::new();

    let codes: Vec<String> = session
        .store()
        .pending_load()
        .iter()
        .map(|p| p.parcel_id.as_str().to_string())
        .collect();
    let mut scanner = SimulatedScanner::new(codes);
    scanner.push("WRONG-BOX-123");
    let no_fix = FixedLocation::no_fix();
    while let Some(out) = session
        .scan_next(clock.tick(), ScanPhase::Warehouse, &mut scanner, &no_fix)
        .map_err(|e| format!("warehouse scan failed: {e}"))?
    {
        report.push(describe_scan("warehouse", &out));
    }

    let open: Vec<Order> = session
        .store()
        .orders()
        .iter()
        .filter(|o| !o.status.is_terminal())
        .cloned()
        .collect();
    for order in &open {
        deliver_order(&mut session, &mut clock, order, &mut report)?;
    }

    let store = session.store();
    report.push(format!(
        "summary: loaded {}/{} delivered {}/{} orders_delivered={}",
        store.loaded_count(),
        store.parcel_count(),
        store.delivered_count(),
        store.parcel_count(),
        store.delivered_orders().len()
    ));
    Ok(report)
}

fn deliver_order(
    session: &mut RouteSession<RouteStore>,
    clock: &mut Clock,
    order: &Order,
    report: &mut Vec<String>,
) -> Result<(), String> {
    let at_door = FixedLocation::new(order.expected_location);
    for parcel in &order.parcels {
        let out = session
            .scan(clock.tick(), parcel.parcel_id.as_str(), ScanPhase::Delivery, &at_door)
            .map_err(|e| format!("delivery scan failed: {e}"))?;
        report.push(describe_scan("delivery", &out));
        if session.pending_unload().is_some() {
            let out = session
                .confirm_delivery(clock.tick())
                .map_err(|e| format!("delivery confirm failed: {e}"))?;
            report.push(describe_scan("confirm", &out));
        }
    }

    let start = PodCommand::Start {
        order_id: order.order_id.clone(),
    };
    let out = pod(session, clock, start)?;
    report.push(describe_pod(order, &out));
    if out.is_refused() {
        return Ok(());
    }

    for _ in 0..MAX_FLOW_ACTIONS {
        let Some(kind) = session.pod().flow().current_kind() else {
            break;
        };
        for cmd in evidence_for(kind, order)? {
            let out = pod(session, clock, cmd)?;
            if out.is_refused() {
                report.push(describe_pod(order, &out));
            }
        }
        let out = pod(session, clock, PodCommand::Advance)?;
        report.push(describe_pod(order, &out));
        if out.is_refused() {
            let _ = pod(session, clock, PodCommand::Reset)?;
            break;
        }
    }
    if session.pod().is_success() {
        let _ = pod(session, clock, PodCommand::Reset)?;
    }
    Ok(())
}

fn evidence_for(kind: PodStepKind, order: &Order) -> Result<Vec<PodCommand>, String> {
    let payload = |raw: &str| EvidencePayload::new(raw).map_err(|e| e.to_string());
    Ok(match kind {
        PodStepKind::Details => vec![],
        PodStepKind::Otp => DEMO_OTP
            .chars()
            .take(OTP_LEN)
            .enumerate()
            .map(|(slot, c)| PodCommand::SetOtpSlot {
                slot,
                input: c.to_string(),
            })
            .collect(),
        PodStepKind::RecipientName => {
            vec![PodCommand::SetRecipientName(order.recipient_name.clone())]
        }
        PodStepKind::Signature => vec![PodCommand::SetSignature(Some(payload(DEMO_SIGNATURE)?))],
        PodStepKind::QrScan => order
            .parcels
            .iter()
            .map(|p| PodCommand::ScanParcel {
                code: p.parcel_id.as_str().to_string(),
            })
            .collect(),
        PodStepKind::Photo => vec![PodCommand::CapturePhoto(payload(DEMO_PHOTO)?)],
    })
}

fn pod(
    session: &mut RouteSession<RouteStore>,
    clock: &mut Clock,
    cmd: PodCommand,
) -> Result<PodCommandOutcome, String> {
    match session
        .pod_command(clock.tick(), cmd)
        .map_err(|e| format!("pod command failed: {e}"))?
    {
        Ph1PodWiringOutcome::Handled(out) => Ok(out),
        Ph1PodWiringOutcome::NotInvokedDisabled => Err("pod flow is disabled".to_string()),
    }
}

fn describe_scan(stage: &str, out: &Ph1ScanWiringOutcome) -> String {
    match out {
        Ph1ScanWiringOutcome::NotInvokedDisabled => format!("{stage}: scanning disabled"),
        Ph1ScanWiringOutcome::Refused(r) => format!("{stage}: REFUSED {:?} {}", r.kind, r.message),
        Ph1ScanWiringOutcome::Accepted(ok) => match &ok.accepted {
            ScanAccepted::Loaded {
                parcel_id,
                all_loaded,
                ..
            } => {
                if *all_loaded {
                    format!("{stage}: {} loaded, all parcels on board", parcel_id.as_str())
                } else {
                    format!("{stage}: {} loaded", parcel_id.as_str())
                }
            }
            ScanAccepted::UnloadPending(p) => format!(
                "{stage}: {} awaiting confirmation ({:?})",
                p.parcel_id.as_str(),
                p.location
            ),
            ScanAccepted::Unloaded {
                parcel_id,
                order_unloaded,
                ..
            } => format!(
                "{stage}: {} unloaded order_complete={order_unloaded}",
                parcel_id.as_str()
            ),
        },
    }
}

fn describe_pod(order: &Order, out: &PodCommandOutcome) -> String {
    let id = order.order_id.as_str();
    match out {
        PodCommandOutcome::Started { steps, .. } => {
            let steps: Vec<&str> = steps.iter().map(|s| s.as_str()).collect();
            format!("pod {id}: started [{}]", steps.join(", "))
        }
        PodCommandOutcome::Moved { to, .. } => format!("pod {id}: -> {}", to.as_str()),
        PodCommandOutcome::Completed(proof) => {
            format!("pod {id}: DELIVERED proof={}", proof.proof_ref)
        }
        PodCommandOutcome::Refused(r) => format!("pod {id}: REFUSED {:?} {}", r.kind, r.message),
        other => format!("pod {id}: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_storage::fixture::demo_route_store;

    #[test]
    fn at_route_demo_01_demo_route_delivers_every_order() {
        let report = execute_route_demo(demo_route_store().unwrap()).unwrap();
        assert!(report
            .iter()
            .any(|l| l.contains("all parcels on board")));
        assert!(report
            .iter()
            .any(|l| l.starts_with("warehouse: REFUSED NotFound")));
        for id in ["ORD-1", "ORD-2", "ORD-3"] {
            assert!(
                report
                    .iter()
                    .any(|l| l.starts_with(&format!("pod {id}: DELIVERED"))),
                "{id} not delivered: {report:#?}"
            );
        }
        assert_eq!(
            report.last().map(String::as_str),
            Some("summary: loaded 6/6 delivered 6/6 orders_delivered=3")
        );
    }
}
