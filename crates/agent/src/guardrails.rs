use rapport_core::config::WorkflowSettings;
use rapport_core::domain::action::{AgentAction, RiskLevel};

/// Actor recorded when the policy approves an action on a human's behalf.
pub const AUTO_APPROVER: &str = "system:auto_approve";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionDecision {
    RequireApproval { reason_code: &'static str },
    AutoExecute { reason_code: &'static str },
}

impl ExecutionDecision {
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::RequireApproval { .. })
    }
}

/// Decides whether a freshly proposed action waits for a human.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub auto_execute_low_risk: bool,
}

impl ExecutionPolicy {
    pub fn from_settings(settings: &WorkflowSettings) -> Self {
        Self { auto_execute_low_risk: settings.auto_execute_low_risk }
    }

    pub fn evaluate(&self, action: &AgentAction) -> ExecutionDecision {
        match action.risk_level {
            RiskLevel::Low if self.auto_execute_low_risk => {
                ExecutionDecision::AutoExecute { reason_code: "low_risk_auto_execute" }
            }
            RiskLevel::Low => {
                ExecutionDecision::RequireApproval { reason_code: "approval_required_by_default" }
            }
            RiskLevel::Medium | RiskLevel::High => {
                ExecutionDecision::RequireApproval { reason_code: "risk_requires_approval" }
            }
        }
    }
}
