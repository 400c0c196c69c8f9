//! Resilience Wrapper - retry, timeout and circuit breaker per call key
//!
//! Each plugin call goes through `execute` under a key such as
//! `"socratic:intervene"`. Every failed attempt (error or timeout) counts
//! toward that key's consecutive-failure total; reaching the threshold opens
//! the circuit. While open, calls are rejected with `CircuitOpen` without
//! running. Once the recovery timeout elapses exactly one trial call is let
//! through: success closes the circuit, failure re-opens it.
//!
//! `CircuitOpen` is only returned when the first attempt was rejected. If a
//! call's own retries open the circuit, it stops retrying and reports the
//! failure of its last attempt.

use crate::config::ResilienceConfig;
use crate::error::{OrchestratorError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Recovery timeout elapsed; the next call (or the one in flight) is the trial
    HalfOpen,
}

#[derive(Debug, Default)]
struct Circuit {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Read-only view of one circuit, for observability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitStatus {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

pub struct ResilienceWrapper {
    config: ResilienceConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl ResilienceWrapper {
    pub fn new(config: ResilienceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Run `operation` with retries, per-attempt timeout and the key's circuit breaker
    pub async fn execute<T, F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_with_fallback(key, operation, |_| None).await
    }

    /// Like `execute`, but `fallback` may supply a value once every attempt has
    /// failed or the circuit rejected the call
    pub async fn execute_with_fallback<T, F, Fut, FB>(
        &self,
        key: &str,
        mut operation: F,
        fallback: FB,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        FB: FnOnce(&OrchestratorError) -> Option<T>,
    {
        let max_attempts = self.config.max_retries + 1;
        let timeout = self.config.call_timeout();
        let mut last_error: Option<OrchestratorError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                // Our own failures opened the circuit; keep the error they produced
                if self.circuit_state(key) == CircuitState::Open {
                    tracing::debug!(key = %key, attempt, "circuit opened mid-retry, giving up");
                    break;
                }
                tokio::time::sleep(self.config.backoff_for(attempt - 1)).await;
            }

            let guard = match self.acquire(key) {
                Ok(guard) => guard,
                Err(err) => {
                    if last_error.is_none() {
                        last_error = Some(err);
                    }
                    break;
                }
            };

            match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(value)) => {
                    guard.settle(true);
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    guard.settle(false);
                    tracing::debug!(key = %key, attempt, error = %err, "attempt failed");
                    last_error = Some(OrchestratorError::InvocationFailure {
                        key: key.to_string(),
                        attempts: attempt,
                        message: format!("{:#}", err),
                    });
                }
                Err(_) => {
                    guard.settle(false);
                    tracing::debug!(key = %key, attempt, ?timeout, "attempt timed out");
                    last_error = Some(OrchestratorError::Timeout {
                        key: key.to_string(),
                        timeout,
                    });
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| OrchestratorError::CircuitOpen { key: key.to_string() });

        match fallback(&last_error) {
            Some(value) => {
                tracing::debug!(key = %key, error = %last_error, "using fallback value");
                Ok(value)
            }
            None => Err(last_error),
        }
    }

    pub fn circuit_state(&self, key: &str) -> CircuitState {
        let circuits = self.circuits.lock();
        circuits
            .get(key)
            .map(|c| self.state_of(c, Instant::now()))
            .unwrap_or(CircuitState::Closed)
    }

    /// Status of every circuit that has seen traffic, sorted by key
    pub fn circuits(&self) -> Vec<CircuitStatus> {
        let now = Instant::now();
        let circuits = self.circuits.lock();
        let mut statuses: Vec<CircuitStatus> = circuits
            .iter()
            .map(|(key, c)| CircuitStatus {
                key: key.clone(),
                state: self.state_of(c, now),
                consecutive_failures: c.consecutive_failures,
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Force a circuit closed and forget its failures
    pub fn reset(&self, key: &str) {
        self.circuits.lock().remove(key);
    }

    fn state_of(&self, circuit: &Circuit, now: Instant) -> CircuitState {
        match circuit.opened_at {
            None => CircuitState::Closed,
            Some(opened) if circuit.trial_in_flight || now.duration_since(opened) >= self.config.recovery_timeout() => {
                CircuitState::HalfOpen
            }
            Some(_) => CircuitState::Open,
        }
    }

    fn acquire<'a>(&'a self, key: &'a str) -> Result<CallGuard<'a>> {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(key.to_string()).or_default();

        let trial = match circuit.opened_at {
            None => false,
            Some(opened) => {
                let recovered = Instant::now().duration_since(opened) >= self.config.recovery_timeout();
                if !recovered || circuit.trial_in_flight {
                    return Err(OrchestratorError::CircuitOpen { key: key.to_string() });
                }
                circuit.trial_in_flight = true;
                tracing::debug!(key = %key, "circuit half-open, allowing trial call");
                true
            }
        };

        Ok(CallGuard {
            wrapper: self,
            key,
            trial,
            settled: false,
        })
    }

    fn record(&self, key: &str, trial: bool, success: bool) {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(key.to_string()).or_default();

        if success {
            if circuit.opened_at.is_some() {
                tracing::info!(key = %key, "circuit closed after successful trial");
            }
            *circuit = Circuit::default();
            return;
        }

        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        if trial {
            circuit.trial_in_flight = false;
            circuit.opened_at = Some(Instant::now());
            tracing::warn!(key = %key, "trial call failed, circuit re-opened");
        } else if circuit.opened_at.is_none()
            && circuit.consecutive_failures >= self.config.failure_threshold
        {
            circuit.opened_at = Some(Instant::now());
            tracing::warn!(
                key = %key,
                failures = circuit.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }
}

/// Tracks one admitted attempt; a trial dropped mid-flight frees the half-open slot
struct CallGuard<'a> {
    wrapper: &'a ResilienceWrapper,
    key: &'a str,
    trial: bool,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.wrapper.record(self.key, self.trial, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            if let Some(circuit) = self.wrapper.circuits.lock().get_mut(self.key) {
                circuit.trial_in_flight = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(max_retries: u32, threshold: u32) -> ResilienceConfig {
        ResilienceConfig {
            max_retries,
            base_backoff_ms: 10,
            max_backoff_ms: 40,
            call_timeout_ms: 100,
            failure_threshold: threshold,
            recovery_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let wrapper = ResilienceWrapper::new(config(2, 3)).unwrap();
        let value = wrapper.execute("a:intervene", || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(wrapper.circuit_state("a:intervene"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let wrapper = ResilienceWrapper::new(config(2, 10)).unwrap();
        let calls = AtomicU32::new(0);

        let value = wrapper
            .execute("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        anyhow::bail!("transient failure {}", n)
                    }
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_attempts() {
        let wrapper = ResilienceWrapper::new(config(1, 10)).unwrap();
        let err = wrapper
            .execute("broken", || async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .await
            .unwrap_err();

        match err {
            OrchestratorError::InvocationFailure { attempts, message, .. } => {
                assert_eq!(attempts, 2);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_timeouts_open_circuit() {
        let wrapper = ResilienceWrapper::new(config(0, 3)).unwrap();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let err = wrapper
                .execute("slow:intervene", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(())
                    }
                })
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::Timeout { .. }));
        }
        assert_eq!(wrapper.circuit_state("slow:intervene"), CircuitState::Open);

        let err = wrapper
            .execute("slow:intervene", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not run the operation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opened_by_own_retries_keeps_real_error() {
        let wrapper = ResilienceWrapper::new(config(2, 2)).unwrap();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let err = wrapper
            .execute("p:intervene", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::anyhow!("db down")) }
            })
            .await
            .unwrap_err();

        match err {
            OrchestratorError::InvocationFailure { attempts, message, .. } => {
                assert_eq!(attempts, 2);
                assert!(message.contains("db down"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(wrapper.circuit_state("p:intervene"), CircuitState::Open);
        // one backoff before the second attempt, none after the circuit opened
        assert_eq!(started.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_closes_on_success() {
        let wrapper = ResilienceWrapper::new(config(0, 1)).unwrap();
        let _ = wrapper
            .execute("p", || async { Err::<(), _>(anyhow::anyhow!("down")) })
            .await;
        assert_eq!(wrapper.circuit_state("p"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(wrapper.circuit_state("p"), CircuitState::HalfOpen);

        wrapper.execute("p", || async { Ok(()) }).await.unwrap();
        assert_eq!(wrapper.circuit_state("p"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let wrapper = ResilienceWrapper::new(config(0, 1)).unwrap();
        let fail = || async { Err::<(), _>(anyhow::anyhow!("down")) };

        let _ = wrapper.execute("p", fail).await;
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let err = wrapper.execute("p", fail).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvocationFailure { .. }));
        assert_eq!(wrapper.circuit_state("p"), CircuitState::Open);

        let err = wrapper.execute("p", || async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CircuitOpen { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_used_when_circuit_open() {
        let wrapper = ResilienceWrapper::new(config(0, 1)).unwrap();
        let _ = wrapper
            .execute("p", || async { Err::<u32, _>(anyhow::anyhow!("down")) })
            .await;

        let value = wrapper
            .execute_with_fallback(
                "p",
                || async { Ok(1u32) },
                |err| matches!(err, OrchestratorError::CircuitOpen { .. }).then_some(42),
            )
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let wrapper = ResilienceWrapper::new(config(0, 2)).unwrap();
        let _ = wrapper
            .execute("p", || async { Err::<(), _>(anyhow::anyhow!("once")) })
            .await;
        wrapper.execute("p", || async { Ok(()) }).await.unwrap();
        let _ = wrapper
            .execute("p", || async { Err::<(), _>(anyhow::anyhow!("again")) })
            .await;

        assert_eq!(wrapper.circuit_state("p"), CircuitState::Closed);
        assert_eq!(wrapper.circuits()[0].consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_threshold_outlasts_one_exhausted_call() {
        let wrapper = ResilienceWrapper::new(ResilienceConfig::default()).unwrap();
        let hang = || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), anyhow::Error>(())
        };

        let err = wrapper.execute("slow:intervene", hang).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));
        assert_eq!(wrapper.circuit_state("slow:intervene"), CircuitState::Closed);

        let _ = wrapper.execute("slow:intervene", hang).await;
        assert_eq!(wrapper.circuit_state("slow:intervene"), CircuitState::Open);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ResilienceWrapper::new(config(0, 0)).is_err());
    }
}
