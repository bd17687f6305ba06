//! Engine configuration.

use std::time::Duration;

use dike_cel::EvalContext;
use dike_core::FailurePolicy;
use tokio_util::sync::CancellationToken;

/// Configuration for the policy engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Overrides the failure policy of every evaluated policy.
    pub failure_policy: Option<FailurePolicy>,

    /// Time budget of one policy evaluation. Unbounded when unset.
    pub evaluation_timeout: Option<Duration>,

    /// Cancels every in-flight evaluation when triggered.
    pub cancellation: CancellationToken,
}

impl EngineConfig {
    /// Creates a configuration with no overrides and no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure policy override.
    #[must_use]
    pub const fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = Some(failure_policy);
        self
    }

    /// Sets the per-policy evaluation timeout.
    #[must_use]
    pub const fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token shared by all evaluations.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The failure policy to apply to a policy declaring `declared`.
    #[must_use]
    pub fn effective_failure_policy(&self, declared: FailurePolicy) -> FailurePolicy {
        self.failure_policy.unwrap_or(declared)
    }

    /// A fresh evaluation context; the deadline starts now.
    #[must_use]
    pub fn eval_context(&self) -> EvalContext {
        let context = EvalContext::new().with_cancellation(self.cancellation.clone());
        match self.evaluation_timeout {
            Some(timeout) => context.with_timeout(timeout),
            None => context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_overrides() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_failure_policy(FailurePolicy::Ignore), FailurePolicy::Ignore);
        assert_eq!(config.eval_context().remaining(), None);
    }

    #[test]
    fn test_failure_policy_override() {
        let config = EngineConfig::new().with_failure_policy(FailurePolicy::Fail);
        assert_eq!(config.effective_failure_policy(FailurePolicy::Ignore), FailurePolicy::Fail);
    }

    #[test]
    fn test_eval_context_carries_deadline_and_token() {
        let token = CancellationToken::new();
        let config = EngineConfig::new()
            .with_evaluation_timeout(Duration::from_secs(5))
            .with_cancellation(token.clone());
        let context = config.eval_context();
        assert!(context.remaining().is_some_and(|d| d <= Duration::from_secs(5)));
        assert!(context.check().is_ok());
        token.cancel();
        assert!(context.check().is_err());
    }
}
