//! Liability classification
//!
//! Answers "who eats the loss?" for a returned or failed payment.
//! Classification starts from the seeded reference table, applies
//! context overrides, and records an append-only liability event.
//! Determinations are never edited; new facts get new rows.

use paycore_core::{
    Amount, ErrorOrigin, LegalEntityId, LiabilityParty, Rail, RecoveryPath, RecoveryStatus,
    TenantId,
};
use paycore_events::{record, DomainEvent, EventContext};
use paycore_storage::{LiabilityEventRow, NewLiabilityEvent, Store, Txn};
use serde_json::Value as JsonValue;

use crate::error::{LiabilityError, LiabilityResult};

/// Context the caller knows about the failure
#[derive(Debug, Clone, Default)]
pub struct ReturnContext {
    /// Prior failed payments to the same payee
    pub repeat_failure_count: u32,
    /// Evidence that our own data handling caused the failure
    pub platform_data_error: Option<String>,
}

/// Result of classifying one return
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub error_origin: ErrorOrigin,
    pub liability_party: LiabilityParty,
    pub recovery_path: RecoveryPath,
    pub is_recoverable: bool,
    pub determination_reason: String,
}

/// Inputs for recording a liability event
#[derive(Debug, Clone)]
pub struct RecordLiability {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub source_type: String,
    pub source_id: String,
    pub loss_amount: Amount,
    pub return_code: Option<String>,
    pub evidence: JsonValue,
    pub idempotency_key: String,
}

/// Liability attribution service
#[derive(Clone)]
pub struct Classifier {
    store: Store,
}

impl Classifier {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Classify a return code in its context
    pub fn classify(&self, rail: Rail, return_code: &str, context: &ReturnContext) -> Classification {
        self.store
            .read(|tables| classify_with(tables.return_code(rail, return_code), return_code, context))
    }

    /// Classification against an open transaction's view
    pub fn classify_in(
        txn: &Txn,
        rail: Rail,
        return_code: &str,
        context: &ReturnContext,
    ) -> Classification {
        classify_with(txn.tables().return_code(rail, return_code), return_code, context)
    }

    /// Record a classification as an append-only liability event.
    /// Idempotent on (tenant, idempotency_key); the
    /// `LiabilityClassified` event fires only for a new row.
    pub fn record(
        &self,
        classification: &Classification,
        request: RecordLiability,
        ctx: &EventContext,
    ) -> LiabilityResult<(LiabilityEventRow, bool)> {
        self.store
            .with_txn::<_, LiabilityError>(|txn| Self::record_in(txn, classification, request, ctx))
    }

    /// Recording inside an already-open transaction
    pub fn record_in(
        txn: &mut Txn,
        classification: &Classification,
        request: RecordLiability,
        ctx: &EventContext,
    ) -> LiabilityResult<(LiabilityEventRow, bool)> {
        let (row, is_new) = txn.insert_liability_event(NewLiabilityEvent {
            tenant_id: request.tenant_id,
            legal_entity_id: request.legal_entity_id,
            source_type: request.source_type,
            source_id: request.source_id,
            error_origin: classification.error_origin,
            liability_party: classification.liability_party,
            recovery_path: classification.recovery_path,
            loss_amount: request.loss_amount,
            recovery_status: RecoveryStatus::Pending,
            determination_reason: classification.determination_reason.clone(),
            evidence: request.evidence,
            idempotency_key: request.idempotency_key,
        })?;

        if is_new {
            record(
                txn,
                ctx,
                &DomainEvent::LiabilityClassified {
                    liability_event_id: row.id,
                    source_type: row.source_type.clone(),
                    source_id: row.source_id.clone(),
                    error_origin: row.error_origin,
                    liability_party: row.liability_party,
                    recovery_path: row.recovery_path,
                    loss_amount: row.loss_amount,
                    return_code: request.return_code,
                },
            )?;
            tracing::info!(
                liability_event = %row.id,
                party = %row.liability_party,
                path = %row.recovery_path,
                loss = %row.loss_amount,
                "liability classified"
            );
        }

        Ok((row, is_new))
    }

    /// Record recovery progress as a new appended fact. Existing
    /// liability events are never re-opened or edited.
    pub fn record_recovery_progress(
        &self,
        prior: &LiabilityEventRow,
        new_status: RecoveryStatus,
        note: &str,
        ctx: &EventContext,
    ) -> LiabilityResult<(LiabilityEventRow, bool)> {
        let classification = Classification {
            error_origin: prior.error_origin,
            liability_party: prior.liability_party,
            recovery_path: prior.recovery_path,
            is_recoverable: true,
            determination_reason: format!(
                "Recovery update for {}: {note}",
                prior.id
            ),
        };
        self.store.with_txn::<_, LiabilityError>(|txn| {
            let (row, is_new) = txn.insert_liability_event(NewLiabilityEvent {
                tenant_id: prior.tenant_id,
                legal_entity_id: prior.legal_entity_id,
                source_type: prior.source_type.clone(),
                source_id: prior.source_id.clone(),
                error_origin: classification.error_origin,
                liability_party: classification.liability_party,
                recovery_path: classification.recovery_path,
                loss_amount: prior.loss_amount,
                recovery_status: new_status,
                determination_reason: classification.determination_reason.clone(),
                evidence: serde_json::json!({ "supersedes": prior.id.to_string() }),
                idempotency_key: format!("{}:recovery:{}", prior.idempotency_key, new_status),
            })?;
            if is_new {
                record(
                    txn,
                    ctx,
                    &DomainEvent::LiabilityClassified {
                        liability_event_id: row.id,
                        source_type: row.source_type.clone(),
                        source_id: row.source_id.clone(),
                        error_origin: row.error_origin,
                        liability_party: row.liability_party,
                        recovery_path: row.recovery_path,
                        loss_amount: row.loss_amount,
                        return_code: None,
                    },
                )?;
            }
            Ok((row, is_new))
        })
    }
}

fn classify_with(
    reference: Option<&paycore_storage::ReturnCodeRow>,
    return_code: &str,
    context: &ReturnContext,
) -> Classification {
    let (mut origin, mut party, mut recoverable, mut reason) = match reference {
        Some(row) => (
            row.default_error_origin,
            row.default_liability_party,
            row.is_recoverable,
            format!("Return code {}: {}", return_code, row.description),
        ),
        // Unknown codes park the determination for manual review
        None => (
            ErrorOrigin::Unknown,
            LiabilityParty::Pending,
            false,
            format!("Unknown return code {return_code}; requires investigation"),
        ),
    };

    if context.repeat_failure_count >= 3 {
        party = LiabilityParty::Employer;
        reason.push_str(" (repeated failures; employer must correct payment details)");
    }
    if let Some(detail) = &context.platform_data_error {
        origin = ErrorOrigin::Platform;
        party = LiabilityParty::Psp;
        recoverable = false;
        reason = format!("Platform data handling error: {detail}");
    }

    let recovery_path = match party {
        LiabilityParty::Employer if recoverable => RecoveryPath::OffsetFuture,
        LiabilityParty::Psp => RecoveryPath::WriteOff,
        LiabilityParty::Pending => RecoveryPath::Dispute,
        _ => RecoveryPath::None,
    };

    Classification {
        error_origin: origin,
        liability_party: party,
        recovery_path,
        is_recoverable: recoverable,
        determination_reason: reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;
    use paycore_events::{EventFilter, EventLog};
    use paycore_storage::StorageError;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn seeded_store() -> Store {
        let store = Store::new();
        store
            .with_txn::<_, StorageError>(|txn| {
                codes::seed_in(txn);
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_r01_classification() {
        let classifier = Classifier::new(seeded_store());
        let result = classifier.classify(Rail::Ach, "R01", &ReturnContext::default());
        assert_eq!(result.error_origin, ErrorOrigin::Recipient);
        assert_eq!(result.liability_party, LiabilityParty::Employer);
        assert_eq!(result.recovery_path, RecoveryPath::OffsetFuture);
    }

    #[test]
    fn test_unknown_code_parks_for_review() {
        let classifier = Classifier::new(seeded_store());
        let result = classifier.classify(Rail::Ach, "R86", &ReturnContext::default());
        assert_eq!(result.error_origin, ErrorOrigin::Unknown);
        assert_eq!(result.liability_party, LiabilityParty::Pending);
        assert_eq!(result.recovery_path, RecoveryPath::Dispute);
    }

    #[test]
    fn test_platform_error_override() {
        let classifier = Classifier::new(seeded_store());
        let result = classifier.classify(
            Rail::Ach,
            "R03",
            &ReturnContext {
                repeat_failure_count: 0,
                platform_data_error: Some("routing number transposed".into()),
            },
        );
        assert_eq!(result.liability_party, LiabilityParty::Psp);
        assert_eq!(result.recovery_path, RecoveryPath::WriteOff);
    }

    #[test]
    fn test_repeat_failures_escalate() {
        let classifier = Classifier::new(seeded_store());
        let result = classifier.classify(
            Rail::Ach,
            "R16",
            &ReturnContext {
                repeat_failure_count: 3,
                platform_data_error: None,
            },
        );
        assert_eq!(result.liability_party, LiabilityParty::Employer);
    }

    #[test]
    fn test_record_is_idempotent_and_emits_once() {
        let store = seeded_store();
        let classifier = Classifier::new(store.clone());
        let log = EventLog::new(store.clone());
        let tenant = TenantId::new();
        let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());

        let classification = classifier.classify(Rail::Ach, "R01", &ReturnContext::default());
        let request = || RecordLiability {
            tenant_id: tenant,
            legal_entity_id: LegalEntityId::new(),
            source_type: "settlement_event".into(),
            source_id: "se-1".into(),
            loss_amount: Amount::new(dec!(4200)).unwrap(),
            return_code: Some("R01".into()),
            evidence: json!({"trace": "ACHTRACE-1"}),
            idempotency_key: "liability:se-1".into(),
        };

        let (first, is_new) = classifier.record(&classification, request(), &ctx).unwrap();
        assert!(is_new);
        let (second, is_new) = classifier.record(&classification, request(), &ctx).unwrap();
        assert!(!is_new);
        assert_eq!(first.id, second.id);

        let events = log.query(
            tenant,
            &EventFilter::default().with_types(["LiabilityClassified"]),
        );
        assert_eq!(events.len(), 1);
    }
}
