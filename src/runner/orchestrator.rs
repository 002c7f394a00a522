//! The execution loop.
//!
//! One run owns one protocol session. Steps are pulled from the interpreter
//! one at a time, executed under the retry policy, and the remaining script
//! text is advanced only after the iteration finishes. Two guards bound the
//! loop: a hard step ceiling and an identical-remainder check. Every exit
//! path goes through `finalize`, which closes the session and flushes the
//! progress buffer.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use action_flow::{Criticality, ExecStrategy, FlowError, RetryPolicy};
use action_gate::{VerificationEngine, VerifyContext};
use action_locator::ElementResolver;
use webpilot_core_types::{
    ActionKind, ExecutionRun, LogLevel, PageSnapshot, ParsedStep, RunId, RunLogEntry, RunStatus,
    TestScript,
};
use webpilot_event_bus::{ProgressBus, ProgressEvent};

use crate::command::{CommandBuilder, ResolutionMode};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::interpreter::StepInterpreter;
use crate::protocol::{check_response, ProtocolClient};
use crate::registry::{RunHandle, RunRegistry};

pub struct Orchestrator {
    config: EngineConfig,
    interpreter: Arc<dyn StepInterpreter>,
    protocol: Arc<dyn ProtocolClient>,
    registry: Arc<RunRegistry>,
    bus: Arc<ProgressBus>,
    builder: CommandBuilder,
    verifier: VerificationEngine,
    policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        interpreter: Arc<dyn StepInterpreter>,
        protocol: Arc<dyn ProtocolClient>,
        registry: Arc<RunRegistry>,
        bus: Arc<ProgressBus>,
        resolver: Arc<dyn ElementResolver>,
    ) -> Arc<Self> {
        let builder = CommandBuilder::new(resolver, config.default_wait_ms);
        let policy = RetryPolicy::new(config.max_attempts, config.base_retry_delay());
        Arc::new(Self {
            config,
            interpreter,
            protocol,
            registry,
            bus,
            builder,
            verifier: VerificationEngine::new(),
            policy,
        })
    }

    /// Execute a script end-to-end and return the final run record. All
    /// failures are captured on the record; this never panics or leaks a
    /// protocol session.
    pub async fn execute(&self, script: TestScript) -> ExecutionRun {
        let run = ExecutionRun::queued(RunId::new(), &script);
        let run_id = run.id.clone();
        let handle = self.registry.register(run);
        self.bus
            .publish(ProgressEvent::status(run_id.clone(), RunStatus::Queued))
            .await;

        if let Err(err) = self.protocol.open().await {
            error!(run = %run_id, error = %err, "protocol session failed to open");
            self.log(&handle, LogLevel::Error, format!("session open failed: {err}"))
                .await;
            return self
                .finalize(&handle, RunStatus::Error, Some(err.to_string()))
                .await;
        }

        {
            let mut run = handle.run.write();
            run.status = RunStatus::Running;
            run.started_at = Some(Utc::now());
        }
        self.bus
            .publish(ProgressEvent::status(run_id.clone(), RunStatus::Running))
            .await;
        info!(run = %run_id, "run started");

        // The url the session started on is the baseline the assertion
        // phase compares against: "url changed" means changed over the
        // whole run, not over the verification call itself.
        let initial_url = self.protocol.current_url().await.unwrap_or(None);

        let outcome = self.step_loop(&handle).await;

        let outcome = match outcome {
            Ok(()) => {
                self.assertion_phase(&handle, &script, initial_url.as_deref())
                    .await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.log(&handle, LogLevel::Info, "run completed").await;
                self.finalize(&handle, RunStatus::Completed, None).await
            }
            Err(err) => {
                let status = match err {
                    EngineError::Cancelled => RunStatus::Cancelled,
                    EngineError::Internal(_) => RunStatus::Error,
                    _ => RunStatus::Failed,
                };
                self.log(&handle, LogLevel::Error, err.to_string()).await;
                self.finalize(&handle, status, Some(err.to_string())).await
            }
        }
    }

    /// Pull-execute-advance until the script is consumed or a guard trips.
    async fn step_loop(&self, handle: &RunHandle) -> EngineResult<()> {
        let run_id = handle.run.read().id.clone();
        // Url as it was before the previous step ran. An expect step's
        // "url changed" compares against this, not against the url an
        // instant before the verification call, which the call itself
        // never moves.
        let mut reference_url = self.protocol.current_url().await.unwrap_or(None);

        loop {
            if handle.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let (remaining, step_index) = {
                let run = handle.run.read();
                (run.remaining_steps_text.clone(), run.step_index)
            };
            if remaining.trim().is_empty() {
                return Ok(());
            }
            if step_index >= self.config.max_steps {
                return Err(EngineError::StepLimitExceeded {
                    limit: self.config.max_steps,
                });
            }

            let snapshot = self.try_snapshot(&run_id).await;
            let reply = self
                .interpreter
                .next_step(&remaining, snapshot.as_ref(), &run_id)
                .await?;

            self.log(
                handle,
                LogLevel::Info,
                format!("step {}: {}", step_index + 1, reply.step.description),
            )
            .await;

            let url_before = self.protocol.current_url().await.unwrap_or(None);
            let pre_url = if reply.step.action == ActionKind::Expect {
                reference_url.clone()
            } else {
                url_before.clone()
            };

            self.execute_step(
                handle,
                &reply.step,
                pre_url.as_deref(),
                self.config.action_timeout(),
            )
            .await?;
            reference_url = url_before;

            // The guard fires only after the iteration succeeded: an
            // interpreter that never consumes text would otherwise redo the
            // same step forever.
            if reply.remaining_text == remaining {
                return Err(EngineError::InfiniteLoopDetected { step_index });
            }

            {
                let mut run = handle.run.write();
                run.step_index += 1;
                run.remaining_steps_text = reply.remaining_text;
            }
        }
    }

    /// One step under the retry policy. Critical actions propagate their
    /// exhaustion; non-critical ones log a warning and let the run continue.
    async fn execute_step(
        &self,
        handle: &RunHandle,
        step: &ParsedStep,
        pre_url: Option<&str>,
        call_timeout: std::time::Duration,
    ) -> EngineResult<()> {
        // The retry policy only keeps stringified errors in its history;
        // the last typed error is stashed here so a critical failure can
        // surface under its own taxonomy class.
        let last_error: Mutex<Option<EngineError>> = Mutex::new(None);
        let result = self
            .policy
            .run_step(
                step.action.name(),
                |strategy, _attempt| {
                    let last_error = &last_error;
                    async move {
                        self.attempt(step, pre_url, strategy, call_timeout)
                            .await
                            .map_err(|err| {
                                *last_error.lock() = Some(err.clone());
                                err
                            })
                    }
                },
                EngineError::is_retryable,
            )
            .await;

        match result {
            Ok(success) => {
                if success.strategy != ExecStrategy::Standard || success.attempts > 1 {
                    self.log(
                        handle,
                        LogLevel::Warn,
                        format!(
                            "step '{}' recovered via {} strategy after {} attempts",
                            step.description,
                            success.strategy.name(),
                            success.attempts
                        ),
                    )
                    .await;
                }
                sleep(self.config.settle_delay(step.action)).await;
                Ok(())
            }
            Err(flow_err) => {
                let message = flow_failure(step, &flow_err);
                if Criticality::of(step.action).is_critical() {
                    Err(step_failure(last_error.into_inner(), message))
                } else {
                    warn!(step = %step.description, "non-critical step failed, continuing");
                    self.log(handle, LogLevel::Warn, message).await;
                    Ok(())
                }
            }
        }
    }

    /// One attempt: resolve, dispatch with a deadline, verify.
    async fn attempt(
        &self,
        step: &ParsedStep,
        pre_url: Option<&str>,
        strategy: ExecStrategy,
        call_timeout: std::time::Duration,
    ) -> EngineResult<()> {
        let mode = match strategy {
            ExecStrategy::Standard => ResolutionMode::AsResolved,
            ExecStrategy::Alternative => ResolutionMode::DescriptionOnly,
            ExecStrategy::Simple => ResolutionMode::FirstOfRole,
        };

        // Re-snapshot per attempt: a failed attempt may still have mutated
        // the page, and the looser strategies must see the current refs.
        let snapshot = if step.action.targets_element() {
            Some(self.protocol.snapshot().await?)
        } else {
            None
        };

        let built = self.builder.build_with_mode(step, snapshot.as_ref(), mode)?;

        let response = timeout(call_timeout, self.protocol.call(&built.invocation))
            .await
            .map_err(|_| {
                EngineError::Protocol(format!(
                    "tool '{}' timed out after {}ms",
                    built.invocation.tool_name,
                    call_timeout.as_millis()
                ))
            })??;
        check_response(response)?;

        let post_url = self.protocol.current_url().await.unwrap_or(None);
        let post_snapshot = self.protocol.snapshot().await.ok();
        let ctx = VerifyContext {
            pre_url,
            post_url: post_url.as_deref(),
            post_snapshot: post_snapshot.as_ref(),
            resolved_ref: built.resolved_ref.as_deref(),
        };
        self.verifier.verify(step, &ctx)?;
        Ok(())
    }

    /// Batch-parse and sequentially check the assertions block. Any failure
    /// fails the run; there is no retry escalation here.
    async fn assertion_phase(
        &self,
        handle: &RunHandle,
        script: &TestScript,
        initial_url: Option<&str>,
    ) -> EngineResult<()> {
        let text = match script.assertions_text.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ok(()),
        };
        let run_id = handle.run.read().id.clone();

        let snapshot = self.try_snapshot(&run_id).await;
        let assertions = self
            .interpreter
            .assertions(text, snapshot.as_ref(), &run_id)
            .await?;
        self.log(
            handle,
            LogLevel::Info,
            format!("checking {} assertions", assertions.len()),
        )
        .await;

        for assertion in &assertions {
            if handle.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            self.check_assertion(assertion, initial_url)
                .await
                .map_err(|err| {
                    EngineError::VerificationFailed(format!(
                        "assertion '{}' failed: {err}",
                        assertion.description
                    ))
                })?;
            self.log(
                handle,
                LogLevel::Info,
                format!("assertion passed: {}", assertion.description),
            )
            .await;
        }
        Ok(())
    }

    async fn check_assertion(&self, assertion: &ParsedStep, pre_url: Option<&str>) -> EngineResult<()> {
        let snapshot = if assertion.action.targets_element() {
            Some(self.protocol.snapshot().await?)
        } else {
            None
        };
        let built = self
            .builder
            .build_with_mode(assertion, snapshot.as_ref(), ResolutionMode::AsResolved)?;

        let deadline = self.config.assertion_timeout();
        let response = timeout(deadline, self.protocol.call(&built.invocation))
            .await
            .map_err(|_| {
                EngineError::Protocol(format!(
                    "assertion check timed out after {}ms",
                    deadline.as_millis()
                ))
            })??;
        check_response(response)?;

        let post_url = self.protocol.current_url().await.unwrap_or(None);
        let post_snapshot = self.protocol.snapshot().await.ok();
        let ctx = VerifyContext {
            pre_url,
            post_url: post_url.as_deref(),
            post_snapshot: post_snapshot.as_ref(),
            resolved_ref: built.resolved_ref.as_deref(),
        };
        self.verifier.verify(assertion, &ctx)?;
        Ok(())
    }

    /// Terminal bookkeeping, on every exit path: status, end timestamp,
    /// failure reason, progress flush, session close.
    async fn finalize(
        &self,
        handle: &RunHandle,
        status: RunStatus,
        failure: Option<String>,
    ) -> ExecutionRun {
        let final_run = {
            let mut run = handle.run.write();
            run.status = status;
            run.ended_at = Some(Utc::now());
            run.failure = failure;
            run.clone()
        };
        info!(
            run = %final_run.id,
            status = status.name(),
            steps = final_run.step_index,
            "run finished"
        );

        self.bus
            .publish(ProgressEvent::status(final_run.id.clone(), status))
            .await;
        self.bus.close_run(&final_run.id).await;

        if let Err(err) = self.protocol.close().await {
            warn!(run = %final_run.id, error = %err, "protocol session close failed");
        }
        final_run
    }

    async fn try_snapshot(&self, run_id: &RunId) -> Option<PageSnapshot> {
        match self.protocol.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(run = %run_id, error = %err, "page snapshot unavailable");
                None
            }
        }
    }

    /// Append to the run's ordered log and mirror to the progress bus.
    async fn log(&self, handle: &RunHandle, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let run_id = {
            let mut run = handle.run.write();
            run.logs.push(RunLogEntry::now(level, message.clone()));
            run.id.clone()
        };
        self.bus
            .publish(ProgressEvent::log(run_id, level, message))
            .await;
    }
}

/// Re-wrap a critical step's flow failure under the class of the error
/// that actually caused it, keeping the exhaustion message as the payload.
fn step_failure(last: Option<EngineError>, message: String) -> EngineError {
    match last {
        Some(EngineError::Validation(_)) => EngineError::Validation(message),
        Some(EngineError::ElementNotFound(_)) => EngineError::ElementNotFound(message),
        Some(EngineError::VerificationFailed(_)) => EngineError::VerificationFailed(message),
        Some(EngineError::Internal(_)) => EngineError::Internal(message),
        _ => EngineError::Protocol(message),
    }
}

fn flow_failure(step: &ParsedStep, err: &FlowError) -> String {
    match err {
        FlowError::Exhausted {
            attempts,
            last_error,
            ..
        } => format!(
            "step '{}' exhausted all strategies after {attempts} attempts: {last_error}",
            step.description
        ),
        FlowError::Aborted { reason, .. } => {
            format!("step '{}' aborted: {reason}", step.description)
        }
    }
}
