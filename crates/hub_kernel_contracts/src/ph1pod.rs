#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use crate::common::validate_text;
use crate::ph1route::{OrderId, ParcelId};
use crate::{ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate};

pub const PH1POD_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);
pub const PH1POD_ENGINE_ID: &str = "PH1.POD";

pub const OTP_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PodStepKind {
    Details,
    Otp,
    RecipientName,
    Signature,
    QrScan,
    Photo,
}

impl PodStepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PodStepKind::Details => "DETAILS",
            PodStepKind::Otp => "OTP",
            PodStepKind::RecipientName => "RECIPIENT_NAME",
            PodStepKind::Signature => "SIGNATURE",
            PodStepKind::QrScan => "QR_SCAN",
            PodStepKind::Photo => "PHOTO",
        }
    }
}

/// Four independent single-character slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtpEntry {
    slots: [Option<char>; OTP_LEN],
}

impl OtpEntry {
    /// Writes the last character of `input` into `slot` and returns the slot that should
    /// take focus next. Empty input clears the slot and keeps focus.
    pub fn set_slot(&mut self, slot: usize, input: &str) -> Result<Option<usize>, ContractViolation> {
        if slot >= OTP_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "otp_entry.slot",
                reason: "must be < OTP_LEN",
            });
        }
        match input.chars().last() {
            Some(c) if c.is_whitespace() => Err(ContractViolation::InvalidValue {
                field: "otp_entry.input",
                reason: "must not be whitespace",
            }),
            Some(c) => {
                self.slots[slot] = Some(c);
                Ok(if slot + 1 < OTP_LEN { Some(slot + 1) } else { None })
            }
            None => {
                self.slots[slot] = None;
                Ok(Some(slot))
            }
        }
    }

    pub fn slot(&self, slot: usize) -> Option<char> {
        self.slots.get(slot).copied().flatten()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn code(&self) -> Option<String> {
        self.slots.iter().copied().collect()
    }
}

/// Captured signature or photo. Usually a `data:<mime>;base64,...` URL from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidencePayload(String);

impl EvidencePayload {
    pub fn new(data: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(data.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for EvidencePayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("evidence_payload", &self.0, 8 * 1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoStage {
    AwaitingCapture,
    Captured(EvidencePayload),
}

/// One verification step together with the evidence collected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodStep {
    Details,
    Otp(OtpEntry),
    RecipientName(String),
    /// An empty canvas is accepted.
    Signature(Option<EvidencePayload>),
    QrScan {
        expected: BTreeSet<ParcelId>,
        scanned: BTreeSet<ParcelId>,
    },
    Photo(PhotoStage),
}

impl PodStep {
    pub fn kind(&self) -> PodStepKind {
        match self {
            PodStep::Details => PodStepKind::Details,
            PodStep::Otp(_) => PodStepKind::Otp,
            PodStep::RecipientName(_) => PodStepKind::RecipientName,
            PodStep::Signature(_) => PodStepKind::Signature,
            PodStep::QrScan { .. } => PodStepKind::QrScan,
            PodStep::Photo(_) => PodStepKind::Photo,
        }
    }

    pub fn fresh(kind: PodStepKind, expected_parcels: &BTreeSet<ParcelId>) -> Self {
        match kind {
            PodStepKind::Details => PodStep::Details,
            PodStepKind::Otp => PodStep::Otp(OtpEntry::default()),
            PodStepKind::RecipientName => PodStep::RecipientName(String::new()),
            PodStepKind::Signature => PodStep::Signature(None),
            PodStepKind::QrScan => PodStep::QrScan {
                expected: expected_parcels.clone(),
                scanned: BTreeSet::new(),
            },
            PodStepKind::Photo => PodStep::Photo(PhotoStage::AwaitingCapture),
        }
    }

    /// Completion predicate gating `advance`.
    pub fn is_complete(&self) -> bool {
        match self {
            PodStep::Details => true,
            PodStep::Otp(otp) => otp.is_complete(),
            PodStep::RecipientName(name) => !name.trim().is_empty(),
            PodStep::Signature(_) => true,
            // Ids only enter `scanned` after matching `expected`, so size equality suffices.
            PodStep::QrScan { expected, scanned } => scanned.len() == expected.len(),
            PodStep::Photo(stage) => matches!(stage, PhotoStage::Captured(_)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodFlowPhase {
    Idle,
    Active,
    Success,
}

/// Evidence summary handed to the completion sink together with the order id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodProof {
    pub schema_version: SchemaVersion,
    pub order_id: OrderId,
    pub completed_steps: Vec<PodStepKind>,
    pub recipient_name: Option<String>,
    pub otp_code: Option<String>,
    pub signature_sha256: Option<String>,
    pub photo_sha256: Option<String>,
    pub scanned_parcels: Vec<ParcelId>,
    pub completed_at: MonotonicTimeNs,
    pub proof_ref: String,
}

impl PodProof {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        order_id: OrderId,
        completed_steps: Vec<PodStepKind>,
        recipient_name: Option<String>,
        otp_code: Option<String>,
        signature_sha256: Option<String>,
        photo_sha256: Option<String>,
        scanned_parcels: Vec<ParcelId>,
        completed_at: MonotonicTimeNs,
        proof_ref: String,
    ) -> Result<Self, ContractViolation> {
        let p = Self {
            schema_version: PH1POD_CONTRACT_VERSION,
            order_id,
            completed_steps,
            recipient_name,
            otp_code,
            signature_sha256,
            photo_sha256,
            scanned_parcels,
            completed_at,
            proof_ref,
        };
        p.validate()?;
        Ok(p)
    }
}

fn validate_opt_sha256(field: &'static str, v: &Option<String>) -> Result<(), ContractViolation> {
    if let Some(h) = v {
        if h.len() != 64 || !h.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ContractViolation::InvalidValue {
                field,
                reason: "must be 64 hex chars",
            });
        }
    }
    Ok(())
}

impl Validate for PodProof {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PH1POD_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "pod_proof.schema_version",
                reason: "must match PH1POD_CONTRACT_VERSION",
            });
        }
        self.order_id.validate()?;
        if self.completed_steps.first() != Some(&PodStepKind::Details) {
            return Err(ContractViolation::InvalidValue {
                field: "pod_proof.completed_steps",
                reason: "must start with DETAILS",
            });
        }
        if let Some(name) = &self.recipient_name {
            validate_text("pod_proof.recipient_name", name, 256)?;
        }
        if let Some(code) = &self.otp_code {
            if code.chars().count() != OTP_LEN {
                return Err(ContractViolation::InvalidValue {
                    field: "pod_proof.otp_code",
                    reason: "must have OTP_LEN characters",
                });
            }
        }
        validate_opt_sha256("pod_proof.signature_sha256", &self.signature_sha256)?;
        validate_opt_sha256("pod_proof.photo_sha256", &self.photo_sha256)?;
        validate_text("pod_proof.proof_ref", &self.proof_ref, 128)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodRefuseKind {
    NoActiveFlow,
    FlowAlreadyActive,
    IncompleteStep,
    AtFirstStep,
    TerminalState,
    WrongStep,
    WrongParcel,
    NotFound,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRefuse {
    pub schema_version: SchemaVersion,
    pub kind: PodRefuseKind,
    pub reason_code: ReasonCodeId,
    pub message: String,
}

impl PodRefuse {
    pub fn v1(
        kind: PodRefuseKind,
        reason_code: ReasonCodeId,
        message: String,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: PH1POD_CONTRACT_VERSION,
            kind,
            reason_code,
            message,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for PodRefuse {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PH1POD_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "pod_refuse.schema_version",
                reason: "must match PH1POD_CONTRACT_VERSION",
            });
        }
        if self.reason_code.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "pod_refuse.reason_code",
                reason: "must be > 0",
            });
        }
        validate_text("pod_refuse.message", &self.message, 512)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodScanOutcome {
    Counted {
        parcel_id: ParcelId,
        scanned: usize,
        expected: usize,
    },
    /// Parcel was already in the set; nothing changed.
    AlreadyCounted {
        parcel_id: ParcelId,
        scanned: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodCommandOutcome {
    Started {
        order_id: OrderId,
        steps: Vec<PodStepKind>,
    },
    Moved {
        from: PodStepKind,
        to: PodStepKind,
        index: usize,
    },
    Completed(PodProof),
    OtpSlotSet {
        next_focus: Option<usize>,
    },
    EvidenceRecorded(PodStepKind),
    Scanned(PodScanOutcome),
    Reset,
    Refused(PodRefuse),
}

impl PodCommandOutcome {
    pub fn is_refused(&self) -> bool {
        matches!(self, PodCommandOutcome::Refused(_))
    }

    pub fn refuse_kind(&self) -> Option<PodRefuseKind> {
        match self {
            PodCommandOutcome::Refused(r) => Some(r.kind),
            _ => None,
        }
    }
}
