//! FedNow sandbox provider
//!
//! Instant-rail stand-in: submissions settle immediately with a
//! same-day effective date, the way FedNow credit transfers complete
//! in seconds. Returns arrive as subsequent feed records, injected
//! with `simulate_return`.

use chrono::{NaiveDate, Utc};
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

/// Map ISO 20022-style FedNow status codes to canonical values
pub fn map_fednow_status(native: &str) -> Option<SettlementStatus> {
    match native {
        "PDNG" => Some(SettlementStatus::Pending),
        "ACTC" => Some(SettlementStatus::Submitted),
        "ACSP" => Some(SettlementStatus::Accepted),
        "ACSC" => Some(SettlementStatus::Settled),
        "RJCT" => Some(SettlementStatus::Rejected),
        "RTRN" => Some(SettlementStatus::Returned),
        "CANC" => Some(SettlementStatus::Canceled),
        _ => None,
    }
}

fn native_fednow_status(status: SettlementStatus) -> &'static str {
    match status {
        SettlementStatus::Pending => "PDNG",
        SettlementStatus::Submitted => "ACTC",
        SettlementStatus::Accepted => "ACSP",
        SettlementStatus::Settled => "ACSC",
        SettlementStatus::Rejected => "RJCT",
        SettlementStatus::Returned => "RTRN",
        SettlementStatus::Canceled => "CANC",
        SettlementStatus::Failed => "RJCT",
        SettlementStatus::Reversed => "RTRN",
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

/// Sandbox FedNow adapter
pub struct FedNowSandbox {
    webhook_secret: String,
    payments: Mutex<HashMap<String, StubPayment>>,
    injected_failures: Mutex<VecDeque<RailError>>,
}

impl FedNowSandbox {
    pub const NAME: &'static str = "fednow_sandbox";

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

    /// Mark a settled payment returned, as the receiving institution
    /// would report it
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
            status: native_fednow_status(payment.status).to_string(),
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
            rail: Rail::FedNow,
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
                "status": native_fednow_status(payment.status),
            }),
        }
    }
}

impl RailProvider for FedNowSandbox {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> RailCapabilities {
        RailCapabilities {
            rails: vec![Rail::FedNow],
            // FedNow operates around the clock
            cutoff_times: BTreeMap::from([(Rail::FedNow, "24x7".to_string())]),
            max_per_txn: BTreeMap::from([(
                Rail::FedNow,
                Amount::new(Decimal::new(500_000_00, 2)).unwrap_or(Amount::ZERO),
            )]),
            settlement_days: BTreeMap::from([(Rail::FedNow, 0)]),
            cost_per_txn: BTreeMap::from([(Rail::FedNow, Decimal::new(45, 3))]),
            supports_cancel: false,
            supports_batch: false,
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

        let provider_request_id = format!("FEDNOW-{}", request.idempotency_key);
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = payments.get(&provider_request_id) {
            return Ok(SubmitOutcome {
                provider_request_id,
                status: AttemptStatus::Accepted,
                trace_id: existing.trace_id.clone(),
                estimated_settlement_date: Some(existing.effective_date),
                message: "duplicate submission".to_string(),
            });
        }

        // Instant rail: settled the moment it is accepted
        let effective = request
            .requested_settlement_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let trace_id = format!("FNTRACE-{}", request.idempotency_key);

        payments.insert(
            provider_request_id.clone(),
            StubPayment {
                amount: request.amount,
                currency: request.currency.clone(),
                direction: request.direction,
                payee_ref: request.payee_ref.clone(),
                trace_id: trace_id.clone(),
                status: SettlementStatus::Settled,
                effective_date: effective,
                return_code: None,
                return_reason: None,
            },
        );
        tracing::debug!(%provider_request_id, %trace_id, "fednow sandbox settled submission");

        Ok(SubmitOutcome {
            provider_request_id,
            status: AttemptStatus::Accepted,
            trace_id,
            estimated_settlement_date: Some(effective),
            message: "accepted for immediate settlement".to_string(),
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
        // Instant settlement leaves no cancellation window
        let payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        if !payments.contains_key(provider_request_id) {
            return Err(RailError::UnknownRequest(provider_request_id.to_string()));
        }
        Ok(false)
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
        let status = map_fednow_status(&wire.status).ok_or_else(|| {
            RailError::Malformed(format!("unknown fednow status {:?}", wire.status))
        })?;
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
            rail: Rail::FedNow,
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
            amount: Amount::new(dec!(2100)).unwrap(),
            currency: Currency::Usd,
            direction: Direction::Outbound,
            payee_type: PayeeType::Agency,
            payee_ref: "irs".into(),
            rail: Rail::FedNow,
            requested_settlement_date: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn test_instant_settlement() {
        let provider = FedNowSandbox::new("secret");
        let outcome = provider.submit(&request("k-1")).unwrap();
        let status = provider.status(&outcome.provider_request_id).unwrap();
        assert_eq!(status.status, SettlementStatus::Settled);

        let records = provider.reconcile(Utc::now().date_naive()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_no_cancel_window() {
        let provider = FedNowSandbox::new("secret");
        let outcome = provider.submit(&request("k-1")).unwrap();
        assert!(!provider.cancel(&outcome.provider_request_id).unwrap());
    }

    #[test]
    fn test_iso_status_mapping() {
        assert_eq!(map_fednow_status("ACSC"), Some(SettlementStatus::Settled));
        assert_eq!(map_fednow_status("RJCT"), Some(SettlementStatus::Rejected));
        assert_eq!(map_fednow_status("XXXX"), None);
    }

    #[test]
    fn test_return_roundtrip_through_webhook() {
        let provider = FedNowSandbox::new("secret");
        let outcome = provider.submit(&request("k-1")).unwrap();
        provider
            .simulate_return(&outcome.provider_request_id, "AC04", "account closed")
            .unwrap();

        let (body, headers) = provider.encode_webhook(&outcome.provider_request_id).unwrap();
        let record = provider.parse_webhook(&body, &headers).unwrap();
        assert_eq!(record.status, SettlementStatus::Returned);
        assert_eq!(record.return_code.as_deref(), Some("AC04"));
    }
}
