//! Funding requirements
//!
//! What a pay run needs in the door before it can go out the door,
//! broken down by obligation and masked by the client's funding model.

use paycore_core::{Amount, FundingModel};
use serde::{Deserialize, Serialize};

/// Computed funding requirement for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundingRequirement {
    pub net_pay: Amount,
    pub taxes: Amount,
    pub third_party: Amount,
    pub fees: Amount,
}

impl FundingRequirement {
    /// Total funding required
    pub fn total(&self) -> Amount {
        self.net_pay + self.taxes + self.third_party + self.fees
    }

    /// Mask the requirement by funding model: `net_only` defers taxes
    /// and third-party, `net_and_third_party` defers taxes only.
    /// `prefund_all` and `split_schedule` require everything up front.
    pub fn for_model(&self, model: FundingModel) -> FundingRequirement {
        match model {
            FundingModel::PrefundAll | FundingModel::SplitSchedule => self.clone(),
            FundingModel::NetOnly => FundingRequirement {
                net_pay: self.net_pay,
                taxes: Amount::ZERO,
                third_party: Amount::ZERO,
                fees: self.fees,
            },
            FundingModel::NetAndThirdParty => FundingRequirement {
                net_pay: self.net_pay,
                taxes: Amount::ZERO,
                third_party: self.third_party,
                fees: self.fees,
            },
        }
    }
}
