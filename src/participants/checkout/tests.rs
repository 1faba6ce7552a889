use super::*;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::interfaces::participant::{compensation_key, step_key, ParticipantError};
use crate::model::SagaContext;

struct Harness {
    ledger: Arc<CheckoutLedger>,
    participants: Vec<Arc<dyn Participant>>,
    context: SagaContext,
    tokens: Vec<(String, Option<Value>)>,
}

impl Harness {
    async fn new(request: Value) -> Self {
        let ledger = Arc::new(CheckoutLedger::new());
        ledger.add_journey("j-1", 20_000, Some(5)).await;
        ledger.add_plan("day-pass", 40_000).await;
        ledger.add_voucher("WELCOME10", 10_000, 30_000).await;
        ledger.add_discount_package("student", 50).await;

        let saga_id = Uuid::new_v4();
        Self {
            participants: checkout_participants(ledger.clone()),
            ledger,
            context: SagaContext {
                saga_id,
                saga_type: CHECKOUT_SAGA_TYPE.to_string(),
                correlation_id: "corr".to_string(),
                payload: request,
                outputs: Default::default(),
            },
            tokens: Vec::new(),
        }
    }

    fn participant(&self, name: &str) -> Arc<dyn Participant> {
        self.participants
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .unwrap()
    }

    fn step_request(&self, name: &str) -> StepRequest {
        StepRequest {
            saga_id: self.context.saga_id,
            step: name.to_string(),
            idempotency_key: step_key(self.context.saga_id, name),
            payload: Value::Null,
            context: self.context.clone(),
        }
    }

    async fn run(&mut self, name: &str) -> Result<StepReply> {
        let reply = self.participant(name).execute(&self.step_request(name)).await?;
        if let Some(output) = &reply.output {
            self.context.outputs.insert(name.to_string(), output.clone());
        }
        self.tokens
            .push((name.to_string(), reply.compensation_token.clone()));
        Ok(reply)
    }

    async fn run_all(&mut self) {
        for step in CheckoutStep::ALL {
            self.run(step.name()).await.unwrap();
        }
    }

    async fn compensate_all(&mut self) {
        while let Some((name, token)) = self.tokens.pop() {
            let request = CompensationRequest {
                saga_id: self.context.saga_id,
                step: name.clone(),
                idempotency_key: compensation_key(self.context.saga_id, &name),
                compensation_token: token,
                context: self.context.clone(),
            };
            self.participant(&name).compensate(&request).await.unwrap();
        }
    }

    fn output(&self, step: &str) -> &Value {
        &self.context.outputs[step]
    }
}

fn checkout(voucher: Option<&str>, package: Option<&str>) -> Value {
    json!({
        "items": [
            {"ticketType": "P2P", "p2pJourneyId": "j-1", "quantity": 2},
            {"ticketType": "TIMED", "timedTicketPlanId": "day-pass", "quantity": 1}
        ],
        "paymentMethod": "VNPAY",
        "voucherId": voucher,
        "discountPackageId": package,
    })
}

#[test]
fn test_checkout_steps_in_order() {
    let names: Vec<String> = checkout_steps().into_iter().map(|s| s.name).collect();
    assert_eq!(
        names,
        vec![
            VALIDATE_ITEMS,
            CALCULATE_PRICING,
            APPLY_DISCOUNTS,
            CREATE_ORDER,
            PROCESS_PAYMENT,
            GENERATE_TICKETS
        ]
    );
    assert!(checkout_steps().iter().all(|s| s.name == s.participant));
}

#[test]
fn test_request_validation() {
    let mut request: CheckoutRequest = serde_json::from_value(checkout(None, None)).unwrap();
    assert!(request.validate().is_ok());

    request.items[0].quantity = 0;
    assert!(request.validate().unwrap_err().contains("quantity"));

    request.items[0].quantity = 1;
    request.items[0].p2p_journey_id = None;
    assert!(request.validate().unwrap_err().contains("missing id"));

    request.items.clear();
    assert!(request.validate().is_err());
}

#[test]
fn test_request_validation_caps_ticket_count() {
    let mut request: CheckoutRequest = serde_json::from_value(checkout(None, None)).unwrap();
    request.items[0].quantity = MAX_TICKETS_PER_CHECKOUT;
    assert!(request.validate().unwrap_err().contains("exceeds"));

    request.items[0].quantity = MAX_TICKETS_PER_CHECKOUT - 1;
    assert!(request.validate().is_ok());

    request.items[0].quantity = u32::MAX;
    request.items[1].quantity = u32::MAX;
    assert!(request.validate().is_err());
}

#[tokio::test]
async fn test_oversized_quantities_rejected_without_holding_stock() {
    let mut harness = Harness::new(json!({
        "items": [
            {"ticketType": "TIMED", "timedTicketPlanId": "day-pass", "quantity": u32::MAX},
            {"ticketType": "TIMED", "timedTicketPlanId": "day-pass", "quantity": 1}
        ],
        "paymentMethod": "CASH",
    }))
    .await;

    let err = harness.run(VALIDATE_ITEMS).await.unwrap_err();
    assert!(matches!(err, ParticipantError::Rejected(_)), "{err}");
    assert_eq!(harness.ledger.stock("j-1").await, Some(5));
}

#[tokio::test]
async fn test_full_checkout_with_discounts() {
    let mut harness = Harness::new(checkout(Some("WELCOME10"), Some("student"))).await;
    harness.run_all().await;

    // 2 * 20_000 + 40_000 = 80_000; 50% package = 40_000; voucher 10_000
    assert_eq!(harness.output(CALCULATE_PRICING)["baseTotalCents"], 80_000);
    assert_eq!(harness.output(APPLY_DISCOUNTS)["discountTotalCents"], 50_000);
    assert_eq!(harness.output(APPLY_DISCOUNTS)["finalTotalCents"], 30_000);

    let order_id = harness.output(CREATE_ORDER)["orderId"]
        .as_str()
        .unwrap()
        .to_string();
    let orders = harness.ledger.orders_for_saga(harness.context.saga_id).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Paid);

    let payments = harness.ledger.payments_for_order(&order_id).await;
    assert_eq!(payments[0].amount_cents, 30_000);
    assert_eq!(payments[0].method, PaymentMethod::Vnpay);

    let tickets = harness.ledger.tickets_for_order(&order_id).await;
    assert_eq!(tickets.len(), 3);
    assert_eq!(harness.ledger.stock("j-1").await, Some(3));
    assert_eq!(
        harness.ledger.voucher("WELCOME10").await.unwrap().redeemed_by,
        Some(harness.context.saga_id)
    );
}

#[tokio::test]
async fn test_compensation_restores_ledger() {
    let mut harness = Harness::new(checkout(Some("WELCOME10"), None)).await;
    harness.run_all().await;
    let order_id = harness.output(CREATE_ORDER)["orderId"]
        .as_str()
        .unwrap()
        .to_string();

    harness.compensate_all().await;

    assert_eq!(harness.ledger.stock("j-1").await, Some(5));
    assert!(harness
        .ledger
        .voucher("WELCOME10")
        .await
        .unwrap()
        .redeemed_by
        .is_none());
    let orders = harness.ledger.orders_for_saga(harness.context.saga_id).await;
    assert_eq!(orders[0].status, OrderStatus::Cancelled);
    let payments = harness.ledger.payments_for_order(&order_id).await;
    assert_eq!(payments[0].status, PaymentStatus::Refunded);
    assert!(harness
        .ledger
        .tickets_for_order(&order_id)
        .await
        .iter()
        .all(|t| t.status == TicketStatus::Voided));
}

#[tokio::test]
async fn test_unknown_item_rejected() {
    let mut harness = Harness::new(json!({
        "items": [{"ticketType": "P2P", "p2pJourneyId": "nowhere", "quantity": 1}],
        "paymentMethod": "CASH"
    }))
    .await;

    let err = harness.run(VALIDATE_ITEMS).await.unwrap_err();
    assert!(matches!(err, ParticipantError::Rejected(msg) if msg.contains("nowhere")));
}

#[tokio::test]
async fn test_insufficient_capacity_holds_nothing() {
    let mut harness = Harness::new(json!({
        "items": [
            {"ticketType": "P2P", "p2pJourneyId": "j-1", "quantity": 3},
            {"ticketType": "P2P", "p2pJourneyId": "j-1", "quantity": 3}
        ],
        "paymentMethod": "CASH"
    }))
    .await;

    let err = harness.run(VALIDATE_ITEMS).await.unwrap_err();
    assert!(matches!(err, ParticipantError::Rejected(msg) if msg.contains("capacity")));
    assert_eq!(harness.ledger.stock("j-1").await, Some(5));
}

#[tokio::test]
async fn test_voucher_redeemed_by_other_saga_rejected() {
    let mut first = Harness::new(checkout(Some("WELCOME10"), None)).await;
    let ledger = first.ledger.clone();
    for step in [VALIDATE_ITEMS, CALCULATE_PRICING, APPLY_DISCOUNTS] {
        first.run(step).await.unwrap();
    }

    let mut second = Harness::new(checkout(Some("WELCOME10"), None)).await;
    second.ledger = ledger.clone();
    second.participants = checkout_participants(ledger);
    second.run(VALIDATE_ITEMS).await.unwrap();
    second.run(CALCULATE_PRICING).await.unwrap();

    let err = second.run(APPLY_DISCOUNTS).await.unwrap_err();
    assert!(matches!(err, ParticipantError::Rejected(msg) if msg.contains("already redeemed")));
}

#[tokio::test]
async fn test_voucher_minimum_total() {
    let mut harness = Harness::new(json!({
        "items": [{"ticketType": "P2P", "p2pJourneyId": "j-1", "quantity": 1}],
        "paymentMethod": "CASH",
        "voucherId": "WELCOME10"
    }))
    .await;
    harness.run(VALIDATE_ITEMS).await.unwrap();
    harness.run(CALCULATE_PRICING).await.unwrap();

    let err = harness.run(APPLY_DISCOUNTS).await.unwrap_err();
    assert!(matches!(err, ParticipantError::Rejected(msg) if msg.contains("at least")));
}

#[tokio::test]
async fn test_redelivered_step_returns_same_order() {
    let mut harness = Harness::new(checkout(None, None)).await;
    for step in [VALIDATE_ITEMS, CALCULATE_PRICING, APPLY_DISCOUNTS] {
        harness.run(step).await.unwrap();
    }

    let first = harness.run(CREATE_ORDER).await.unwrap();
    let second = harness.run(CREATE_ORDER).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        harness.ledger.orders_for_saga(harness.context.saga_id).await.len(),
        1
    );
}

#[tokio::test]
async fn test_gateway_outage_is_transient() {
    let mut harness = Harness::new(checkout(None, None)).await;
    for step in [VALIDATE_ITEMS, CALCULATE_PRICING, APPLY_DISCOUNTS, CREATE_ORDER] {
        harness.run(step).await.unwrap();
    }
    harness
        .ledger
        .set_gateway_available(PaymentMethod::Vnpay, false)
        .await;

    let err = harness.run(PROCESS_PAYMENT).await.unwrap_err();
    assert!(err.is_transient());

    harness
        .ledger
        .set_gateway_available(PaymentMethod::Vnpay, true)
        .await;
    let reply = harness.run(PROCESS_PAYMENT).await.unwrap();
    assert_eq!(reply.output.unwrap()["status"], "COMPLETED");
}

#[tokio::test]
async fn test_suspended_ticketing_rejected() {
    let mut harness = Harness::new(checkout(None, None)).await;
    for step in [
        VALIDATE_ITEMS,
        CALCULATE_PRICING,
        APPLY_DISCOUNTS,
        CREATE_ORDER,
        PROCESS_PAYMENT,
    ] {
        harness.run(step).await.unwrap();
    }
    harness.ledger.suspend_ticketing(Some("printer offline")).await;

    let err = harness.run(GENERATE_TICKETS).await.unwrap_err();
    assert!(matches!(err, ParticipantError::Rejected(msg) if msg.contains("printer offline")));
}
