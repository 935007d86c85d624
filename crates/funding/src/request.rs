//! Funding requests
//!
//! The inbound counterpart of a payment instruction: a client's intent
//! to move funds into the PSP. Creation is idempotent; the request's
//! status is advanced by reconciliation as the inbound movement is
//! confirmed by the bank.

use chrono::NaiveDate;
use paycore_core::{Amount, Currency, FundingModel, LegalEntityId, Rail, TenantId};
use paycore_storage::{FundingRequestRow, NewFundingRequest, Store};

use crate::error::{FundingError, FundingResult};

#[derive(Debug, Clone)]
pub struct NewFunding {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub funding_model: FundingModel,
    pub rail: Rail,
    pub amount: Amount,
    pub currency: Currency,
    pub requested_settlement_date: Option<NaiveDate>,
    pub idempotency_key: String,
}

/// Funding request intake
#[derive(Clone)]
pub struct FundingRequests {
    store: Store,
}

impl FundingRequests {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create a funding request; replays return the existing row
    pub fn create(&self, new: NewFunding) -> FundingResult<(FundingRequestRow, bool)> {
        self.store.with_txn::<_, FundingError>(|txn| {
            let (row, is_new) = txn.insert_funding_request(NewFundingRequest {
                tenant_id: new.tenant_id,
                legal_entity_id: new.legal_entity_id,
                funding_model: new.funding_model,
                rail: new.rail,
                amount: new.amount,
                currency: new.currency,
                requested_settlement_date: new.requested_settlement_date,
                idempotency_key: new.idempotency_key,
            })?;
            Ok((row, is_new))
        })
    }

    pub fn get(&self, id: paycore_core::FundingRequestId) -> Option<FundingRequestRow> {
        self.store.read(|tables| tables.funding_request(id).cloned())
    }
}
