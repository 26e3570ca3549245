//! Runs an [`ApplyPlan`] against the backend.

use std::future::Future;
use std::time::Duration;

use ccshuffle::applier::{ApplyPlan, ApplyStep};
use tokio::time;
use tracing::{error, info};

use crate::backend::{BackendError, EffectBackend, EffectRequestResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Contributed {
        amount: i64,
        result: EffectRequestResult,
    },
    Requested {
        quantity: i64,
        result: EffectRequestResult,
    },
    /// Every step failed; the round still proceeds.
    Failed,
}

/// Bound a backend call by `after`.
pub async fn with_timeout<T>(
    endpoint: &'static str,
    after: Duration,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout { endpoint, after }),
    }
}

/// Try each step in order and stop at the first accepted one.
pub async fn execute(
    backend: &dyn EffectBackend,
    session_id: &str,
    plan: &ApplyPlan,
    call_timeout: Duration,
) -> ApplyOutcome {
    let candidate = &plan.candidate;
    for step in &plan.steps {
        match *step {
            ApplyStep::Contribute { amount } => {
                let call = backend.contribute_to_pool(session_id, candidate, amount);
                match with_timeout("contributeToPool", call_timeout, call).await {
                    Ok(result) => {
                        info!("Contributed {} to pool of {}", amount, candidate.id);
                        return ApplyOutcome::Contributed { amount, result };
                    }
                    Err(e) => error!("Pool contribution for {} failed: {}", candidate.id, e),
                }
            }
            ApplyStep::Request { quantity } => {
                let call = backend.request_effect(session_id, candidate, quantity);
                match with_timeout("requestEffect", call_timeout, call).await {
                    Ok(result) => {
                        info!("Requested {} x{}", candidate.id, quantity);
                        return ApplyOutcome::Requested { quantity, result };
                    }
                    Err(e) => error!("Effect request for {} failed: {}", candidate.id, e),
                }
            }
        }
    }
    ApplyOutcome::Failed
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use ccshuffle::applier;
    use ccshuffle::candidate::EffectCandidate;
    use ccshuffle::prng::Prng;
    use ccshuffle::round::RoundOption;
    use ccshuffle::weights::WeightConfig;
    use std::sync::Mutex;

    use crate::backend::SessionInfo;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Menu,
        Contribute { id: String, amount: i64 },
        Request { id: String, quantity: i64 },
    }

    /// In-memory backend recording every call.
    #[derive(Default)]
    pub struct FakeBackend {
        pub menu: Vec<EffectCandidate>,
        pub fail_contribute: bool,
        pub fail_request: bool,
        /// Hold effect calls this long before answering.
        pub delay: Option<Duration>,
        pub calls: Mutex<Vec<Call>>,
    }

    impl FakeBackend {
        pub fn with_menu(menu: Vec<EffectCandidate>) -> Self {
            Self {
                menu,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        async fn stall(&self) {
            if let Some(delay) = self.delay {
                time::sleep(delay).await;
            }
        }

        fn refused(endpoint: &'static str) -> BackendError {
            BackendError::Status {
                endpoint,
                status: 500,
                body: "refused".into(),
            }
        }
    }

    #[async_trait]
    impl EffectBackend for FakeBackend {
        async fn active_session(&self) -> Result<SessionInfo, BackendError> {
            Ok(SessionInfo {
                id: "gs-test".into(),
                game_pack_id: None,
                game_name: Some("Test Game".into()),
            })
        }

        async fn session_menu(&self, _: &str) -> Result<Vec<EffectCandidate>, BackendError> {
            self.record(Call::Menu);
            Ok(self.menu.clone())
        }

        async fn request_effect(
            &self,
            _: &str,
            candidate: &EffectCandidate,
            quantity: i64,
        ) -> Result<EffectRequestResult, BackendError> {
            self.record(Call::Request {
                id: candidate.id.clone(),
                quantity,
            });
            self.stall().await;
            if self.fail_request {
                return Err(Self::refused("requestEffect"));
            }
            Ok(EffectRequestResult::default())
        }

        async fn contribute_to_pool(
            &self,
            _: &str,
            candidate: &EffectCandidate,
            amount: i64,
        ) -> Result<EffectRequestResult, BackendError> {
            self.record(Call::Contribute {
                id: candidate.id.clone(),
                amount,
            });
            self.stall().await;
            if self.fail_contribute {
                return Err(Self::refused("contributeToPool"));
            }
            Ok(EffectRequestResult::default())
        }
    }

    fn pooled_plan() -> ApplyPlan {
        let cfg = WeightConfig {
            pool_weight: 1,
            max_price: 30,
            ..WeightConfig::default()
        };
        let c = EffectCandidate::new("squash", "Squash", 100).with_pool(40);
        let winner = RoundOption::effect(1, c, &mut Prng::new(1));
        applier::plan(&winner, &cfg).unwrap()
    }

    #[tokio::test]
    async fn contribution_capped_at_cutoff_and_no_request() {
        let backend = FakeBackend::default();
        let out = execute(&backend, "gs", &pooled_plan(), Duration::from_secs(1)).await;
        assert!(matches!(out, ApplyOutcome::Contributed { amount: 30, .. }));
        assert_eq!(
            backend.calls(),
            vec![Call::Contribute {
                id: "squash".into(),
                amount: 30
            }]
        );
    }

    #[tokio::test]
    async fn failed_contribution_falls_back_to_request() {
        let backend = FakeBackend {
            fail_contribute: true,
            ..FakeBackend::default()
        };
        let out = execute(&backend, "gs", &pooled_plan(), Duration::from_secs(1)).await;
        assert!(matches!(out, ApplyOutcome::Requested { quantity: 1, .. }));
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn all_steps_failing_is_reported_not_raised() {
        let backend = FakeBackend {
            fail_contribute: true,
            fail_request: true,
            ..FakeBackend::default()
        };
        let out = execute(&backend, "gs", &pooled_plan(), Duration::from_secs(1)).await;
        assert_eq!(out, ApplyOutcome::Failed);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let slow = async {
            time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BackendError>(())
        };
        let err = with_timeout("requestEffect", Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));
    }
}
