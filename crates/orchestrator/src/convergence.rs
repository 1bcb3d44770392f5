//! The synthesize, execute, repair loop.
//!
//! One run walks ANALYZING → SYNTHESIZING → EXECUTING and then either completes
//! or cycles through REPAIRING back into EXECUTING, never more than the
//! configured number of iterations. Every iteration leaves a [`CycleRecord`];
//! records are appended, never rewritten.

use codeloop_core::{Artifact, Candidate, CycleRecord, ExecutionRequest, OrchestrationState};
use events::Event;
use sandbox::ExecutionSession;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::emitter::OrderedEventEmitter;
use crate::error::{OrchestratorError, Result};
use crate::state_machine::RunState;
use crate::synthesis::{Enricher, RepairRequest, SynthesisProvider};

/// Hard cap on iterations, whatever the configuration asks for.
pub const MAX_ITERATION_CEILING: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub max_iterations: u32,
    /// Run the enrichment step after a verified candidate.
    pub visualize: bool,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            visualize: false,
        }
    }
}

impl ConvergenceConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_visualize(mut self, visualize: bool) -> Self {
        self.visualize = visualize;
        self
    }

    pub fn effective_max_iterations(&self) -> u32 {
        self.max_iterations.clamp(1, MAX_ITERATION_CEILING)
    }
}

/// Outcome of one orchestration run.
#[derive(Debug, Serialize)]
pub struct OrchestrationReport {
    pub run_id: Uuid,
    /// Always terminal.
    pub state: OrchestrationState,
    /// Last executed candidate and its verdict; verified iff the run completed.
    pub artifact: Option<Artifact>,
    pub history: Vec<CycleRecord>,
    /// Human-readable reason for a FAILED run.
    pub cause: Option<String>,
    pub trail: Vec<OrchestrationState>,
    #[serde(skip)]
    pub error: Option<OrchestratorError>,
}

impl OrchestrationReport {
    pub fn is_completed(&self) -> bool {
        self.state == OrchestrationState::Completed
    }

    pub fn iterations(&self) -> usize {
        self.history.len()
    }
}

pub struct ConvergenceOrchestrator {
    session: Arc<ExecutionSession>,
    provider: Arc<dyn SynthesisProvider>,
    enricher: Option<Arc<dyn Enricher>>,
    emitter: Option<OrderedEventEmitter>,
    config: ConvergenceConfig,
}

impl ConvergenceOrchestrator {
    pub fn new(
        session: Arc<ExecutionSession>,
        provider: Arc<dyn SynthesisProvider>,
        config: ConvergenceConfig,
    ) -> Self {
        Self {
            session,
            provider,
            enricher: None,
            emitter: None,
            config,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_event_emitter(mut self, emitter: OrderedEventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<ExecutionSession> {
        &self.session
    }

    /// Drive `specification` to a verified artifact or an explained failure.
    ///
    /// Never returns an error: failures end the run in FAILED with a cause.
    pub async fn run(&self, specification: &str) -> OrchestrationReport {
        self.run_with_id(Uuid::new_v4(), specification).await
    }

    /// Like [`run`](Self::run) with a caller-chosen id, so a subscriber can
    /// filter the event stream before the run starts.
    pub async fn run_with_id(&self, run_id: Uuid, specification: &str) -> OrchestrationReport {
        let max_iterations = self.config.effective_max_iterations();
        info!(run_id = %run_id, max_iterations, "Starting orchestration run");
        self.emit(Event::RunStarted {
            run_id,
            max_iterations,
        });

        let mut run = Run {
            orchestrator: self,
            run_id,
            max_iterations,
            state: RunState::new(),
            history: Vec::new(),
            artifact: None,
        };
        let outcome = run.drive(specification).await;
        run.finish(outcome)
    }

    fn emit(&self, event: Event) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event);
        }
    }
}

struct Run<'a> {
    orchestrator: &'a ConvergenceOrchestrator,
    run_id: Uuid,
    max_iterations: u32,
    state: RunState,
    history: Vec<CycleRecord>,
    artifact: Option<Artifact>,
}

impl Run<'_> {
    fn transition(&mut self, to: OrchestrationState, message: impl Into<String>) -> Result<()> {
        let from = self.state.advance(to)?;
        let message = message.into();
        info!(
            run_id = %self.run_id,
            from = %from,
            to = %to,
            "{}",
            message
        );
        self.orchestrator.emit(Event::StateChanged {
            run_id: self.run_id,
            from: Some(from.as_str().to_string()),
            state: to.as_str().to_string(),
            message,
        });
        Ok(())
    }

    async fn drive(&mut self, specification: &str) -> Result<()> {
        let specification = specification.trim();
        if specification.is_empty() {
            return Err(OrchestratorError::EmptySpecification);
        }

        let orchestrator = self.orchestrator;
        let provider = &orchestrator.provider;
        self.transition(
            OrchestrationState::Synthesizing,
            format!("Requesting initial candidate from {}", provider.name()),
        )?;
        let mut candidate = provider.synthesize(specification).await?;

        for iteration in 1..=self.max_iterations {
            self.transition(
                OrchestrationState::Executing,
                format!("Executing iteration {}/{}", iteration, self.max_iterations),
            )?;

            let request = ExecutionRequest::new(candidate.code.clone(), candidate.tests.clone());
            let result = orchestrator.session.run(&request).await?;
            let record = CycleRecord::new(iteration, &candidate, &result);
            self.record(record);

            let passed = result.passed;
            let fatal = result.is_fatal();
            let logs = result.logs.clone();
            self.artifact = Some(Artifact::new(candidate.clone(), result));

            if passed {
                self.enrich(specification).await?;
                self.transition(
                    OrchestrationState::Completed,
                    format!("Candidate verified at iteration {}", iteration),
                )?;
                return Ok(());
            }
            if fatal {
                return Err(OrchestratorError::FatalEngine { iteration, logs });
            }
            if iteration == self.max_iterations {
                return Err(OrchestratorError::ConvergenceExhausted {
                    iterations: iteration,
                    logs,
                });
            }

            self.transition(
                OrchestrationState::Repairing,
                format!("Requesting repair of iteration {}", iteration),
            )?;
            candidate = self
                .repair(specification, &candidate, logs, iteration)
                .await?;
        }

        Err(OrchestratorError::ConvergenceExhausted {
            iterations: self.max_iterations,
            logs: String::new(),
        })
    }

    async fn repair(
        &self,
        specification: &str,
        failing: &Candidate,
        failure_logs: String,
        iteration: u32,
    ) -> Result<Candidate> {
        let request = RepairRequest {
            specification: specification.to_string(),
            prior_code: failing.code.clone(),
            prior_tests: failing.tests.clone(),
            failure_logs,
            iteration,
        };
        Ok(self.orchestrator.provider.repair(&request).await?)
    }

    fn record(&mut self, record: CycleRecord) {
        let message = match (&record.error, record.failure) {
            (None, _) => format!(
                "Iteration {}/{} passed (score {})",
                record.iteration, self.max_iterations, record.score
            ),
            (Some(_), Some(kind)) => format!(
                "Iteration {}/{} failed: {} (score {})",
                record.iteration,
                self.max_iterations,
                kind.as_str(),
                record.score
            ),
            (Some(_), None) => format!(
                "Iteration {}/{} failed (score {})",
                record.iteration, self.max_iterations, record.score
            ),
        };
        debug!(run_id = %self.run_id, iteration = record.iteration, "{}", message);
        self.orchestrator.emit(Event::IterationCompleted {
            run_id: self.run_id,
            iteration: record.iteration,
            passed: record.passed(),
            score: record.score,
            message,
        });
        self.history.push(record);
    }

    /// Optional VISUALIZING step. Its failure never fails the run.
    async fn enrich(&mut self, specification: &str) -> Result<()> {
        let orchestrator = self.orchestrator;
        let Some(enricher) = orchestrator
            .enricher
            .as_ref()
            .filter(|_| orchestrator.config.visualize)
        else {
            return Ok(());
        };
        if self.artifact.is_none() {
            return Ok(());
        }

        self.transition(OrchestrationState::Visualizing, "Enriching verified artifact")?;
        let Some(artifact) = self.artifact.as_mut() else {
            return Ok(());
        };
        match enricher.enrich(specification, artifact).await {
            Ok(enrichment) => artifact.enrichment = Some(enrichment),
            Err(e) => warn!(
                run_id = %self.run_id,
                error = %e,
                "Enrichment failed, delivering without it"
            ),
        }
        Ok(())
    }

    fn finish(mut self, outcome: Result<()>) -> OrchestrationReport {
        let (cause, error) = match outcome {
            Ok(()) => (None, None),
            Err(e) => {
                let cause = e.cause();
                warn!(run_id = %self.run_id, error = %e, "Orchestration run failed");
                if !self.state.current().is_terminal() {
                    let message = format!("Run failed: {}", e);
                    if let Err(transition) = self.transition(OrchestrationState::Failed, message) {
                        warn!(error = %transition, "Could not record FAILED state");
                    }
                }
                (Some(cause), Some(e))
            }
        };

        let state = self.state.current();
        info!(
            run_id = %self.run_id,
            state = %state,
            iterations = self.history.len(),
            "Orchestration run finished"
        );
        self.orchestrator.emit(Event::RunFinished {
            run_id: self.run_id,
            state: state.as_str().to_string(),
            cause: cause.clone(),
        });

        OrchestrationReport {
            run_id: self.run_id,
            state,
            artifact: self.artifact,
            history: self.history,
            cause,
            trail: self.state.trail().to_vec(),
            error,
        }
    }
}
