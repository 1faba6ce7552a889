//! In-memory ledger behind the checkout participants.
//!
//! Holds the catalog, vouchers, discount packages, orders, payments and
//! tickets, plus the replies already given per idempotency key. All money is
//! integer cents.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PaymentMethod, TicketType};
use crate::interfaces::participant::{ParticipantError, Result, StepReply};

/// Sellable item: a point-to-point journey or a timed ticket plan.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub ticket_type: TicketType,
    pub price_cents: i64,
    /// Remaining capacity. `None` = unlimited.
    pub stock: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Voucher {
    pub discount_cents: i64,
    /// Minimum base total for the voucher to apply.
    pub min_total_cents: i64,
    /// Saga currently holding the voucher.
    pub redeemed_by: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub saga_id: Uuid,
    pub customer_id: Option<String>,
    pub base_total_cents: i64,
    pub discount_total_cents: i64,
    pub final_total_cents: i64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Completed,
    Refunded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Active,
    Voided,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub id: String,
    pub order_id: String,
    pub item_id: String,
    pub ticket_type: TicketType,
    pub status: TicketStatus,
}

/// Mutable ledger contents. Only reachable through `CheckoutLedger`.
#[derive(Debug, Default)]
pub struct LedgerState {
    pub catalog: HashMap<String, CatalogItem>,
    pub vouchers: HashMap<String, Voucher>,
    /// Discount package id -> percentage off.
    pub discount_packages: HashMap<String, u32>,
    pub orders: HashMap<String, Order>,
    pub payments: HashMap<String, Payment>,
    pub tickets: HashMap<String, Ticket>,
    /// Payment methods whose gateway is currently unreachable.
    pub gateways_down: HashSet<PaymentMethod>,
    /// Reason ticket issuing is suspended, if it is.
    pub ticketing_suspended: Option<String>,
    replies: HashMap<String, StepReply>,
    compensated: HashSet<String>,
}

impl LedgerState {
    /// Fail with a transient error while the gateway for `method` is down.
    pub fn ensure_gateway(&self, method: PaymentMethod) -> Result<()> {
        if self.gateways_down.contains(&method) {
            return Err(ParticipantError::Transient(format!(
                "{} gateway unavailable",
                method.as_str()
            )));
        }
        Ok(())
    }
}

/// Shared checkout ledger.
#[derive(Debug, Default)]
pub struct CheckoutLedger {
    state: Mutex<LedgerState>,
}

impl CheckoutLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with a small metro catalog for local runs.
    pub async fn demo() -> Self {
        let ledger = Self::new();
        ledger.add_journey("ben-thanh-suoi-tien", 20_000, None).await;
        ledger.add_journey("ben-thanh-opera-house", 7_000, None).await;
        ledger.add_plan("day-pass", 40_000).await;
        ledger.add_plan("monthly-student", 150_000).await;
        ledger.add_voucher("WELCOME10", 10_000, 30_000).await;
        ledger.add_discount_package("student", 50).await;
        ledger
    }

    pub async fn add_journey(&self, id: &str, price_cents: i64, stock: Option<u32>) {
        self.state.lock().await.catalog.insert(
            id.to_string(),
            CatalogItem {
                ticket_type: TicketType::P2p,
                price_cents,
                stock,
            },
        );
    }

    pub async fn add_plan(&self, id: &str, price_cents: i64) {
        self.state.lock().await.catalog.insert(
            id.to_string(),
            CatalogItem {
                ticket_type: TicketType::Timed,
                price_cents,
                stock: None,
            },
        );
    }

    pub async fn add_voucher(&self, id: &str, discount_cents: i64, min_total_cents: i64) {
        self.state.lock().await.vouchers.insert(
            id.to_string(),
            Voucher {
                discount_cents,
                min_total_cents,
                redeemed_by: None,
            },
        );
    }

    pub async fn add_discount_package(&self, id: &str, percent: u32) {
        self.state
            .lock()
            .await
            .discount_packages
            .insert(id.to_string(), percent.min(100));
    }

    /// Simulate a payment gateway outage (or its recovery).
    pub async fn set_gateway_available(&self, method: PaymentMethod, available: bool) {
        let mut state = self.state.lock().await;
        if available {
            state.gateways_down.remove(&method);
        } else {
            state.gateways_down.insert(method);
        }
    }

    /// Suspend ticket issuing; `None` resumes it.
    pub async fn suspend_ticketing(&self, reason: Option<&str>) {
        self.state.lock().await.ticketing_suspended = reason.map(str::to_string);
    }

    pub async fn stock(&self, item_id: &str) -> Option<u32> {
        self.state
            .lock()
            .await
            .catalog
            .get(item_id)
            .and_then(|item| item.stock)
    }

    pub async fn voucher(&self, id: &str) -> Option<Voucher> {
        self.state.lock().await.vouchers.get(id).cloned()
    }

    pub async fn orders_for_saga(&self, saga_id: Uuid) -> Vec<Order> {
        self.state
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.saga_id == saga_id)
            .cloned()
            .collect()
    }

    pub async fn payments_for_order(&self, order_id: &str) -> Vec<Payment> {
        self.state
            .lock()
            .await
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect()
    }

    pub async fn tickets_for_order(&self, order_id: &str) -> Vec<Ticket> {
        self.state
            .lock()
            .await
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Run a forward action at most once per idempotency key.
    ///
    /// A repeated key returns the stored reply. Errors are not stored, so a
    /// transient failure can be retried under the same key.
    pub async fn execute_once<F>(&self, key: &str, action: F) -> Result<StepReply>
    where
        F: FnOnce(&mut LedgerState) -> Result<StepReply>,
    {
        let mut state = self.state.lock().await;
        if let Some(reply) = state.replies.get(key) {
            return Ok(reply.clone());
        }
        let reply = action(&mut state)?;
        state.replies.insert(key.to_string(), reply.clone());
        Ok(reply)
    }

    /// Run an inverse action at most once per idempotency key.
    pub async fn compensate_once<F>(&self, key: &str, action: F) -> Result<()>
    where
        F: FnOnce(&mut LedgerState) -> Result<()>,
    {
        let mut state = self.state.lock().await;
        if state.compensated.contains(key) {
            return Ok(());
        }
        action(&mut state)?;
        state.compensated.insert(key.to_string());
        Ok(())
    }
}

/// Short, prefixed identifier for ledger records.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}
