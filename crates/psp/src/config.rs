//! Facade configuration
//!
//! Everything that shapes money flow is set here, explicitly, at
//! construction. There is no environment fallback and no process-wide
//! state: two `Psp` instances with different configs behave
//! independently.

use paycore_core::{Currency, FundingModel};
use paycore_funding::GatePolicy;
use paycore_orchestrator::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct PspConfig {
    /// Commit gate policy; the pay gate is not configurable
    pub gate_policy: GatePolicy,
    pub orchestrator: OrchestratorConfig,
    /// Default client funding model
    pub funding_model: FundingModel,
    pub currency: Currency,
}

impl Default for PspConfig {
    fn default() -> Self {
        Self {
            gate_policy: GatePolicy::default(),
            orchestrator: OrchestratorConfig::default(),
            funding_model: FundingModel::PrefundAll,
            currency: Currency::Usd,
        }
    }
}
