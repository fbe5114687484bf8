#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use hub_kernel_contracts::ph1pod::PodProof;
use hub_kernel_contracts::ph1route::{
    AddressChangeEntry, CustomerConfig, CustomerId, Order, OrderId, OrderStatus, Parcel, ParcelId,
    ParcelUpdate,
};
use hub_kernel_contracts::{ContractViolation, MonotonicTimeNs, ReasonCodeId, Validate};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    ForeignKeyViolation { table: &'static str, key: String },
    DuplicateKey { table: &'static str, key: String },
    AppendOnlyViolation { table: &'static str },
    InvalidTransition { table: &'static str, key: String },
    ContractViolation(ContractViolation),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ForeignKeyViolation { table, key } => {
                write!(f, "foreign key violation on {table}: {key}")
            }
            Self::DuplicateKey { table, key } => write!(f, "duplicate key on {table}: {key}"),
            Self::AppendOnlyViolation { table } => write!(f, "{table} is append-only"),
            Self::InvalidTransition { table, key } => {
                write!(f, "invalid state transition on {table}: {key}")
            }
            Self::ContractViolation(v) => write!(f, "contract violation: {v}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteJournalEventKind {
    ParcelLoaded,
    ParcelUnloaded,
    OrderDelivered,
}

impl RouteJournalEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteJournalEventKind::ParcelLoaded => "PARCEL_LOADED",
            RouteJournalEventKind::ParcelUnloaded => "PARCEL_UNLOADED",
            RouteJournalEventKind::OrderDelivered => "ORDER_DELIVERED",
        }
    }
}

/// Append-only audit row for every committed route mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteJournalRow {
    pub journal_id: u64,
    pub created_at: MonotonicTimeNs,
    pub order_id: OrderId,
    pub parcel_id: Option<ParcelId>,
    pub event_kind: RouteJournalEventKind,
    pub reason_code: ReasonCodeId,
}

/// In-memory route dataset: the orders of one route in route order, their parcels, and the
/// customers they belong to.
#[derive(Debug, Clone)]
pub struct RouteStore {
    orders: Vec<Order>,
    parcel_index: BTreeMap<ParcelId, OrderId>,
    customers: BTreeMap<CustomerId, CustomerConfig>,
    address_changes: Vec<AddressChangeEntry>,
    journal: Vec<RouteJournalRow>,
    next_journal_id: u64,
    pod_proofs: BTreeMap<OrderId, PodProof>,
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl RouteStore {
    pub fn new_in_memory() -> Self {
        Self {
            orders: Vec::new(),
            parcel_index: BTreeMap::new(),
            customers: BTreeMap::new(),
            address_changes: Vec::new(),
            journal: Vec::new(),
            next_journal_id: 1,
            pod_proofs: BTreeMap::new(),
        }
    }

    pub fn insert_customer_config(&mut self, config: CustomerConfig) -> Result<(), StorageError> {
        config.validate()?;
        if self.customers.contains_key(&config.customer_id) {
            return Err(StorageError::DuplicateKey {
                table: "customer_configs.customer_id",
                key: config.customer_id.as_str().to_string(),
            });
        }
        self.customers.insert(config.customer_id.clone(), config);
        Ok(())
    }

    pub fn insert_order(&mut self, order: Order) -> Result<(), StorageError> {
        order.validate()?;
        if !self.customers.contains_key(&order.customer_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "orders.customer_id",
                key: order.customer_id.as_str().to_string(),
            });
        }
        if self.order(&order.order_id).is_some() {
            return Err(StorageError::DuplicateKey {
                table: "orders.order_id",
                key: order.order_id.as_str().to_string(),
            });
        }
        // Box codes are global across the route.
        if let Some(p) = order
            .parcels
            .iter()
            .find(|p| self.parcel_index.contains_key(&p.parcel_id))
        {
            return Err(StorageError::DuplicateKey {
                table: "parcels.parcel_id",
                key: p.parcel_id.as_str().to_string(),
            });
        }
        for p in &order.parcels {
            self.parcel_index
                .insert(p.parcel_id.clone(), order.order_id.clone());
        }
        self.orders.push(order);
        Ok(())
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn order(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| &o.order_id == order_id)
    }

    pub fn customer_config(&self, customer_id: &CustomerId) -> Option<&CustomerConfig> {
        self.customers.get(customer_id)
    }

    pub fn parcel(&self, parcel_id: &ParcelId) -> Option<&Parcel> {
        let order_id = self.parcel_index.get(parcel_id)?;
        self.order(order_id)?.parcel(parcel_id)
    }

    pub fn apply_parcel_update(
        &mut self,
        parcel_id: &ParcelId,
        update: ParcelUpdate,
        reason_code: ReasonCodeId,
    ) -> Result<(), StorageError> {
        let order_id = self
            .parcel_index
            .get(parcel_id)
            .cloned()
            .ok_or_else(|| StorageError::ForeignKeyViolation {
                table: "parcels.parcel_id",
                key: parcel_id.as_str().to_string(),
            })?;
        let parcel = self
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .and_then(|o| o.parcels.iter_mut().find(|p| &p.parcel_id == parcel_id))
            .ok_or_else(|| StorageError::ForeignKeyViolation {
                table: "parcels.parcel_id",
                key: parcel_id.as_str().to_string(),
            })?;
        if parcel.apply(update).is_err() {
            return Err(StorageError::InvalidTransition {
                table: "parcels.scanned_off_van",
                key: parcel_id.as_str().to_string(),
            });
        }
        let (at, event_kind) = match update {
            ParcelUpdate::ScannedOnVan { at } => (at, RouteJournalEventKind::ParcelLoaded),
            ParcelUpdate::ScannedOffVan { at } => (at, RouteJournalEventKind::ParcelUnloaded),
        };
        debug!(
            parcel_id = parcel_id.as_str(),
            order_id = order_id.as_str(),
            event = event_kind.as_str(),
            "parcel updated"
        );
        self.append_journal_row(at, order_id, Some(parcel_id.clone()), event_kind, reason_code);
        Ok(())
    }

    /// Moves an order to DELIVERED and keeps the proof next to it. A second delivery of the
    /// same order is an invalid transition.
    pub fn mark_delivered(
        &mut self,
        order_id: &OrderId,
        proof: PodProof,
        reason_code: ReasonCodeId,
    ) -> Result<(), StorageError> {
        proof.validate()?;
        if &proof.order_id != order_id {
            return Err(StorageError::ContractViolation(
                ContractViolation::InvalidValue {
                    field: "pod_proof.order_id",
                    reason: "must match the delivered order",
                },
            ));
        }
        let order = self
            .orders
            .iter_mut()
            .find(|o| &o.order_id == order_id)
            .ok_or_else(|| StorageError::ForeignKeyViolation {
                table: "orders.order_id",
                key: order_id.as_str().to_string(),
            })?;
        if !order.status.can_transition_to(OrderStatus::Delivered) {
            return Err(StorageError::InvalidTransition {
                table: "orders.status",
                key: order_id.as_str().to_string(),
            });
        }
        order.status = OrderStatus::Delivered;
        info!(
            order_id = order_id.as_str(),
            proof_ref = proof.proof_ref.as_str(),
            "order delivered"
        );
        let at = proof.completed_at;
        self.pod_proofs.insert(order_id.clone(), proof);
        self.append_journal_row(
            at,
            order_id.clone(),
            None,
            RouteJournalEventKind::OrderDelivered,
            reason_code,
        );
        Ok(())
    }

    pub fn pod_proof(&self, order_id: &OrderId) -> Option<&PodProof> {
        self.pod_proofs.get(order_id)
    }

    pub fn append_address_change(&mut self, entry: AddressChangeEntry) -> Result<u64, StorageError> {
        entry.validate()?;
        if !self.customers.contains_key(&entry.customer_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "address_changes.customer_id",
                key: entry.customer_id.as_str().to_string(),
            });
        }
        info!(
            customer_id = entry.customer_id.as_str(),
            changed_by = entry.changed_by.as_str(),
            "address changed"
        );
        self.address_changes.push(entry);
        Ok(self.address_changes.len() as u64)
    }

    pub fn address_history(&self, customer_id: &CustomerId) -> Vec<&AddressChangeEntry> {
        self.address_changes
            .iter()
            .filter(|e| &e.customer_id == customer_id)
            .collect()
    }

    pub fn attempt_overwrite_address_change(&mut self, _seq: u64) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation {
            table: "address_changes",
        })
    }

    pub fn journal(&self) -> &[RouteJournalRow] {
        &self.journal
    }

    pub fn attempt_overwrite_journal_row(&mut self, _journal_id: u64) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation {
            table: "route_journal",
        })
    }

    pub fn parcel_count(&self) -> usize {
        self.orders.iter().map(|o| o.parcels.len()).sum()
    }

    pub fn loaded_count(&self) -> usize {
        self.parcels().filter(|p| p.scanned_on_van).count()
    }

    pub fn delivered_count(&self) -> usize {
        self.parcels().filter(|p| p.scanned_off_van).count()
    }

    /// Parcels still waiting to be loaded, in route order.
    pub fn pending_load(&self) -> Vec<&Parcel> {
        self.parcels().filter(|p| !p.scanned_on_van).collect()
    }

    pub fn all_loaded(&self) -> bool {
        self.orders.iter().all(Order::all_loaded)
    }

    pub fn order_all_unloaded(&self, order_id: &OrderId) -> Option<bool> {
        self.order(order_id).map(Order::all_unloaded)
    }

    pub fn delivered_orders(&self) -> BTreeSet<OrderId> {
        self.orders
            .iter()
            .filter(|o| o.status.is_terminal())
            .map(|o| o.order_id.clone())
            .collect()
    }

    fn parcels(&self) -> impl Iterator<Item = &Parcel> {
        self.orders.iter().flat_map(|o| o.parcels.iter())
    }

    fn append_journal_row(
        &mut self,
        created_at: MonotonicTimeNs,
        order_id: OrderId,
        parcel_id: Option<ParcelId>,
        event_kind: RouteJournalEventKind,
        reason_code: ReasonCodeId,
    ) {
        let journal_id = self.next_journal_id;
        self.next_journal_id = self.next_journal_id.saturating_add(1);
        self.journal.push(RouteJournalRow {
            journal_id,
            created_at,
            order_id,
            parcel_id,
            event_kind,
            reason_code,
        });
    }
}
