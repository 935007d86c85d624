//! ACH sandbox provider
//!
//! In-memory stand-in for a NACHA file builder or bank ACH API.
//! Payments are accepted on submission and settle when the test (or
//! demo) calls `settle_all`; returns are injected with
//! `simulate_return`. Production adapters implement the same trait
//! against the real wire.

use chrono::{Duration, NaiveDate, Utc};
use paycore_core::{Amount, AttemptStatus, Currency, Direction, Rail, SettlementStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::{RailError, RailResult};
use crate::provider::{
    RailCapabilities, RailProvider, SettlementRecord, StatusOutcome, SubmitOutcome, SubmitRequest,
    WebhookHeaders,
};
use crate::signature::{self, SIGNATURE_HEADER};

/// Map the sandbox's native ACH status strings to canonical values
pub fn map_ach_status(native: &str) -> Option<SettlementStatus> {
    match native {
        "pending" => Some(SettlementStatus::Pending),
        "originated" => Some(SettlementStatus::Submitted),
        "accepted" => Some(SettlementStatus::Accepted),
        "processed" => Some(SettlementStatus::Settled),
        "returned" => Some(SettlementStatus::Returned),
        "failed" => Some(SettlementStatus::Failed),
        "canceled" => Some(SettlementStatus::Canceled),
        _ => None,
    }
}

fn native_ach_status(status: SettlementStatus) -> &'static str {
    match status {
        SettlementStatus::Pending => "pending",
        SettlementStatus::Submitted => "originated",
        SettlementStatus::Accepted => "accepted",
        SettlementStatus::Settled => "processed",
        SettlementStatus::Returned => "returned",
        SettlementStatus::Failed => "failed",
        SettlementStatus::Canceled => "canceled",
        SettlementStatus::Rejected => "failed",
        SettlementStatus::Reversed => "returned",
    }
}

#[derive(Debug, Clone)]
struct StubPayment {
    amount: Amount,
    currency: Currency,
    direction: Direction,
    payee_ref: String,
    trace_id: String,
    status: SettlementStatus,
    effective_date: NaiveDate,
    return_code: Option<String>,
    return_reason: Option<String>,
}

/// Webhook wire format shared by the sandbox providers
#[derive(Debug, Serialize, Deserialize)]
struct WireSettlement {
    provider_request_id: String,
    trace_id: String,
    status: String,
    amount: Decimal,
    currency: String,
    direction: String,
    effective_date: NaiveDate,
    #[serde(default)]
    return_code: Option<String>,
    #[serde(default)]
    return_reason: Option<String>,
    #[serde(default)]
    payee_ref: Option<String>,
}

/// Sandbox ACH adapter
pub struct AchSandbox {
    webhook_secret: String,
    payments: Mutex<HashMap<String, StubPayment>>,
    injected_failures: Mutex<VecDeque<RailError>>,
}

impl AchSandbox {
    pub const NAME: &'static str = "ach_sandbox";

    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            payments: Mutex::new(HashMap::new()),
            injected_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a failure for the next submit call (test lever)
    pub fn inject_failure(&self, error: RailError) {
        self.injected_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Settle every accepted payment with the given effective date
    pub fn settle_all(&self, date: NaiveDate) {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        for payment in payments.values_mut() {
            if payment.status == SettlementStatus::Accepted {
                payment.status = SettlementStatus::Settled;
                payment.effective_date = date;
            }
        }
    }

    /// Mark a payment returned, as the bank would report it on the
    /// next feed
    pub fn simulate_return(
        &self,
        provider_request_id: &str,
        return_code: &str,
        reason: &str,
    ) -> RailResult<()> {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        let payment = payments
            .get_mut(provider_request_id)
            .ok_or_else(|| RailError::UnknownRequest(provider_request_id.to_string()))?;
        payment.status = SettlementStatus::Returned;
        payment.return_code = Some(return_code.to_string());
        payment.return_reason = Some(reason.to_string());
        Ok(())
    }

    /// Build a signed webhook for a tracked payment (test lever)
    pub fn encode_webhook(&self, provider_request_id: &str) -> RailResult<(Vec<u8>, WebhookHeaders)> {
        let payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        let payment = payments
            .get(provider_request_id)
            .ok_or_else(|| RailError::UnknownRequest(provider_request_id.to_string()))?;
        let wire = WireSettlement {
            provider_request_id: provider_request_id.to_string(),
            trace_id: payment.trace_id.clone(),
            status: native_ach_status(payment.status).to_string(),
            amount: payment.amount.value(),
            currency: payment.currency.code().to_string(),
            direction: payment.direction.to_string(),
            effective_date: payment.effective_date,
            return_code: payment.return_code.clone(),
            return_reason: payment.return_reason.clone(),
            payee_ref: Some(payment.payee_ref.clone()),
        };
        let body = serde_json::to_vec(&wire).map_err(|e| RailError::Malformed(e.to_string()))?;
        let mut headers = WebhookHeaders::new();
        headers.insert(
            SIGNATURE_HEADER.to_string(),
            signature::sign(&self.webhook_secret, &body),
        );
        Ok((body, headers))
    }

    fn record_from(&self, provider_request_id: &str, payment: &StubPayment) -> SettlementRecord {
        SettlementRecord {
            external_trace_id: payment.trace_id.clone(),
            provider_request_id: Some(provider_request_id.to_string()),
            rail: Rail::Ach,
            direction: payment.direction,
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
            effective_date: payment.effective_date,
            return_code: payment.return_code.clone(),
            return_reason: payment.return_reason.clone(),
            payee_ref: Some(payment.payee_ref.clone()),
            raw_payload: json!({
                "provider_request_id": provider_request_id,
                "trace_id": payment.trace_id,
                "status": native_ach_status(payment.status),
            }),
        }
    }
}

impl RailProvider for AchSandbox {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> RailCapabilities {
        RailCapabilities {
            rails: vec![Rail::Ach],
            cutoff_times: BTreeMap::from([(Rail::Ach, "17:00 CT".to_string())]),
            max_per_txn: BTreeMap::from([(
                Rail::Ach,
                Amount::new(Decimal::new(99_999_999_99, 2)).unwrap_or(Amount::ZERO),
            )]),
            settlement_days: BTreeMap::from([(Rail::Ach, 1)]),
            cost_per_txn: BTreeMap::from([(Rail::Ach, Decimal::new(8, 3))]),
            supports_cancel: true,
            supports_batch: true,
        }
    }

    fn submit(&self, request: &SubmitRequest) -> RailResult<SubmitOutcome> {
        if let Some(error) = self
            .injected_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(error);
        }

        let provider_request_id = format!("ACH-{}", request.idempotency_key);
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());

        // Same idempotency key, same payment: the real wire dedupes on
        // the originator's key and so does the sandbox
        if let Some(existing) = payments.get(&provider_request_id) {
            return Ok(SubmitOutcome {
                provider_request_id,
                status: AttemptStatus::Accepted,
                trace_id: existing.trace_id.clone(),
                estimated_settlement_date: Some(existing.effective_date),
                message: "duplicate submission".to_string(),
            });
        }

        let effective = request
            .requested_settlement_date
            .unwrap_or_else(|| Utc::now().date_naive() + Duration::days(1));
        let trace_id = format!("ACHTRACE-{}", request.idempotency_key);

        payments.insert(
            provider_request_id.clone(),
            StubPayment {
                amount: request.amount,
                currency: request.currency.clone(),
                direction: request.direction,
                payee_ref: request.payee_ref.clone(),
                trace_id: trace_id.clone(),
                status: SettlementStatus::Accepted,
                effective_date: effective,
                return_code: None,
                return_reason: None,
            },
        );
        tracing::debug!(%provider_request_id, %trace_id, "ach sandbox accepted submission");

        Ok(SubmitOutcome {
            provider_request_id,
            status: AttemptStatus::Accepted,
            trace_id,
            estimated_settlement_date: Some(effective),
            message: "accepted".to_string(),
        })
    }

    fn status(&self, provider_request_id: &str) -> RailResult<StatusOutcome> {
        let payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        let payment = payments
            .get(provider_request_id)
            .ok_or_else(|| RailError::UnknownRequest(provider_request_id.to_string()))?;
        Ok(StatusOutcome {
            status: payment.status,
            external_trace_id: Some(payment.trace_id.clone()),
            effective_date: Some(payment.effective_date),
            return_code: payment.return_code.clone(),
        })
    }

    fn cancel(&self, provider_request_id: &str) -> RailResult<bool> {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        let payment = payments
            .get_mut(provider_request_id)
            .ok_or_else(|| RailError::UnknownRequest(provider_request_id.to_string()))?;
        // Standard ACH cannot be recalled once processed
        if matches!(
            payment.status,
            SettlementStatus::Settled | SettlementStatus::Returned | SettlementStatus::Failed
        ) {
            return Ok(false);
        }
        payment.status = SettlementStatus::Canceled;
        Ok(true)
    }

    fn reconcile(&self, date: NaiveDate) -> RailResult<Vec<SettlementRecord>> {
        let payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<SettlementRecord> = payments
            .iter()
            .filter(|(_, p)| p.effective_date == date)
            .map(|(id, p)| self.record_from(id, p))
            .collect();
        records.sort_by(|a, b| a.external_trace_id.cmp(&b.external_trace_id));
        Ok(records)
    }

    fn parse_webhook(&self, body: &[u8], headers: &WebhookHeaders) -> RailResult<SettlementRecord> {
        let presented = headers.get(SIGNATURE_HEADER).ok_or(RailError::Signature)?;
        if !signature::verify(&self.webhook_secret, body, presented) {
            return Err(RailError::Signature);
        }

        let wire: WireSettlement =
            serde_json::from_slice(body).map_err(|e| RailError::Malformed(e.to_string()))?;
        let status = map_ach_status(&wire.status)
            .ok_or_else(|| RailError::Malformed(format!("unknown ach status {:?}", wire.status)))?;
        let amount =
            Amount::new(wire.amount).map_err(|e| RailError::Malformed(e.to_string()))?;
        let direction = wire
            .direction
            .parse::<Direction>()
            .map_err(|_| RailError::Malformed(format!("unknown direction {:?}", wire.direction)))?;
        let currency = wire
            .currency
            .parse::<Currency>()
            .map_err(|e| RailError::Malformed(e.to_string()))?;

        Ok(SettlementRecord {
            external_trace_id: wire.trace_id.clone(),
            provider_request_id: Some(wire.provider_request_id.clone()),
            rail: Rail::Ach,
            direction,
            amount,
            currency,
            status,
            effective_date: wire.effective_date,
            return_code: wire.return_code.clone(),
            return_reason: wire.return_reason.clone(),
            payee_ref: wire.payee_ref.clone(),
            raw_payload: serde_json::to_value(&wire)
                .map_err(|e| RailError::Malformed(e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paycore_core::{InstructionId, PayeeType};
    use rust_decimal_macros::dec;

    fn request(key: &str) -> SubmitRequest {
        SubmitRequest {
            instruction_id: InstructionId::new(),
            idempotency_key: key.to_string(),
            amount: Amount::new(dec!(3500)).unwrap(),
            currency: Currency::Usd,
            direction: Direction::Outbound,
            payee_type: PayeeType::Employee,
            payee_ref: "alice".into(),
            rail: Rail::Ach,
            requested_settlement_date: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn test_submit_is_idempotent() {
        let provider = AchSandbox::new("secret");
        let first = provider.submit(&request("k-1")).unwrap();
        let second = provider.submit(&request("k-1")).unwrap();
        assert_eq!(first.provider_request_id, second.provider_request_id);
        assert_eq!(first.trace_id, second.trace_id);
    }

    #[test]
    fn test_settle_and_reconcile() {
        let provider = AchSandbox::new("secret");
        provider.submit(&request("k-1")).unwrap();
        let date = Utc::now().date_naive();
        provider.settle_all(date);

        let records = provider.reconcile(date).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SettlementStatus::Settled);
    }

    #[test]
    fn test_webhook_roundtrip_and_signature() {
        let provider = AchSandbox::new("secret");
        let outcome = provider.submit(&request("k-1")).unwrap();
        let (body, headers) = provider.encode_webhook(&outcome.provider_request_id).unwrap();

        let record = provider.parse_webhook(&body, &headers).unwrap();
        assert_eq!(record.external_trace_id, outcome.trace_id);
        assert_eq!(record.status, SettlementStatus::Accepted);

        // Tampered body must fail as a signature error, not a parse error
        let mut tampered = body.clone();
        tampered[0] ^= 1;
        assert!(matches!(
            provider.parse_webhook(&tampered, &headers),
            Err(RailError::Signature)
        ));

        let mut no_header = headers.clone();
        no_header.remove(SIGNATURE_HEADER);
        assert!(matches!(
            provider.parse_webhook(&body, &no_header),
            Err(RailError::Signature)
        ));
    }

    #[test]
    fn test_cancel_window() {
        let provider = AchSandbox::new("secret");
        let outcome = provider.submit(&request("k-1")).unwrap();
        assert!(provider.cancel(&outcome.provider_request_id).unwrap());

        let outcome = provider.submit(&request("k-2")).unwrap();
        provider.settle_all(Utc::now().date_naive());
        assert!(!provider.cancel(&outcome.provider_request_id).unwrap());
    }

    #[test]
    fn test_injected_failure_is_retryable() {
        let provider = AchSandbox::new("secret");
        provider.inject_failure(RailError::Unavailable("maintenance".into()));
        let error = provider.submit(&request("k-1")).unwrap_err();
        assert!(error.retryable());
        // The queue drains; the retry succeeds
        assert!(provider.submit(&request("k-1")).is_ok());
    }
}
