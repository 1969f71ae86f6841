//! Session orchestration for the auto-plan pipeline.
//!
//! One orchestrator holds the live session state behind a mutex and drives it
//! through `idle -> processing -> analyzing -> planning -> done`, with `error`
//! as the terminal failure phase. Every photo intake starts a new run with a
//! higher generation number; workers from older generations may still be in
//! flight, so every state commit is gated on the generation still being
//! current and stale results are silently discarded.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chromalab_contracts::events::{EventPayload, EventWriter};
use chromalab_contracts::{
    ClientPhoto, ColorPlan, HairAnalysis, PipelineError, TargetColor, DEFAULT_AUTO_TARGET,
};
use serde_json::Value;

use crate::{stages, ColoristCapability};

/// Pause between photo intake and the first generator call, so a stylist who
/// picks the wrong file can swap it before any request is spent.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoPlanPhase {
    Idle,
    Processing,
    Analyzing,
    Planning,
    Done,
    Error { message: String },
}

impl AutoPlanPhase {
    pub fn label(&self) -> &'static str {
        match self {
            AutoPlanPhase::Idle => "idle",
            AutoPlanPhase::Processing => "processing",
            AutoPlanPhase::Analyzing => "analyzing",
            AutoPlanPhase::Planning => "planning",
            AutoPlanPhase::Done => "done",
            AutoPlanPhase::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PhaseChanged {
        generation: u64,
        phase: AutoPlanPhase,
    },
    PlanRegenerated,
    ReanalysisCompleted,
    RefinementFailed {
        message: String,
    },
}

/// Point-in-time copy of the session state for display.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoPlanSnapshot {
    pub phase: AutoPlanPhase,
    pub photo_checksum: Option<String>,
    pub analysis: Option<HairAnalysis>,
    pub plan: Option<ColorPlan>,
    pub auto_planned: bool,
    pub generation: u64,
}

struct Inner {
    phase: AutoPlanPhase,
    photo: Option<ClientPhoto>,
    analysis: Option<HairAnalysis>,
    plan: Option<ColorPlan>,
    auto_planned: bool,
    plan_busy: bool,
    reanalyze_busy: bool,
    generation: u64,
    watchers: Vec<Sender<PipelineEvent>>,
    events: Option<EventWriter>,
}

impl Inner {
    fn notify(&mut self, event: PipelineEvent) {
        self.watchers
            .retain(|watcher| watcher.send(event.clone()).is_ok());
    }

    fn record(&self, event_type: &str, payload: EventPayload) {
        if let Some(events) = &self.events {
            let _ = events.emit(event_type, payload);
        }
    }

    fn record_error(&self, event_type: &str, err: &PipelineError) {
        if let Some(events) = &self.events {
            let _ = events.emit_error(event_type, err.kind(), &err.to_string());
        }
    }

    fn set_phase(&mut self, phase: AutoPlanPhase) {
        self.phase = phase.clone();
        let mut payload = EventPayload::new();
        payload.insert(
            "phase".to_string(),
            Value::String(phase.label().to_string()),
        );
        payload.insert("generation".to_string(), Value::from(self.generation));
        self.record("auto_plan_phase", payload);
        let generation = self.generation;
        self.notify(PipelineEvent::PhaseChanged { generation, phase });
    }
}

pub struct AutoPlanOrchestrator {
    capability: Arc<dyn ColoristCapability>,
    settle_delay: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl AutoPlanOrchestrator {
    pub fn new(capability: Arc<dyn ColoristCapability>) -> Self {
        Self {
            capability,
            settle_delay: SETTLE_DELAY,
            inner: Arc::new(Mutex::new(Inner {
                phase: AutoPlanPhase::Idle,
                photo: None,
                analysis: None,
                plan: None,
                auto_planned: false,
                plan_busy: false,
                reanalyze_busy: false,
                generation: 0,
                watchers: Vec::new(),
                events: None,
            })),
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_event_writer(self, events: EventWriter) -> Self {
        lock_inner(&self.inner).events = Some(events);
        self
    }

    pub fn snapshot(&self) -> AutoPlanSnapshot {
        let inner = lock_inner(&self.inner);
        AutoPlanSnapshot {
            phase: inner.phase.clone(),
            photo_checksum: inner.photo.as_ref().map(|photo| photo.checksum.clone()),
            analysis: inner.analysis.clone(),
            plan: inner.plan.clone(),
            auto_planned: inner.auto_planned,
            generation: inner.generation,
        }
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (sender, receiver) = mpsc::channel();
        lock_inner(&self.inner).watchers.push(sender);
        receiver
    }

    /// Accepts a new photo and starts the full pipeline for it. Always begins
    /// a fresh run: any earlier run is superseded immediately and its results
    /// are discarded whenever they land.
    pub fn run_auto_plan(&self, photo: ClientPhoto) -> JoinHandle<()> {
        let generation = {
            let mut inner = lock_inner(&self.inner);
            inner.generation += 1;
            // Dropping the previous photo releases its preview handle.
            inner.photo = Some(photo);
            inner.analysis = None;
            inner.plan = None;
            inner.auto_planned = false;
            inner.set_phase(AutoPlanPhase::Processing);
            inner.generation
        };

        let capability = Arc::clone(&self.capability);
        let shared = Arc::clone(&self.inner);
        let settle_delay = self.settle_delay;
        thread::spawn(move || {
            run_pipeline(capability, shared, generation, settle_delay);
        })
    }

    /// Regenerates the plan for a stylist-chosen target, keeping the stored
    /// analysis. On failure the stored plan is left untouched.
    pub fn regenerate_plan(&self, target: &TargetColor) -> Result<ColorPlan, PipelineError> {
        let analysis = {
            let mut inner = lock_inner(&self.inner);
            if inner.plan_busy {
                return Err(PipelineError::plan_failed(anyhow::anyhow!(
                    "a plan request is already running"
                )));
            }
            let Some(analysis) = inner.analysis.clone() else {
                return Err(PipelineError::plan_failed(anyhow::anyhow!(
                    "no hair analysis is recorded for this session"
                )));
            };
            inner.plan_busy = true;
            analysis
        };

        let outcome = stages::plan(self.capability.as_ref(), &analysis, &target.to_string());

        let mut inner = lock_inner(&self.inner);
        inner.plan_busy = false;
        match outcome {
            Ok(plan) => {
                inner.plan = Some(plan.clone());
                inner.auto_planned = false;
                let mut payload = EventPayload::new();
                payload.insert("target".to_string(), Value::String(target.to_string()));
                inner.record("plan_regenerated", payload);
                inner.notify(PipelineEvent::PlanRegenerated);
                Ok(plan)
            }
            Err(err) => {
                inner.record_error("plan_regeneration_failed", &err);
                inner.notify(PipelineEvent::RefinementFailed {
                    message: err.user_message(),
                });
                Err(err)
            }
        }
    }

    /// Re-runs both stages against a replacement photo, outside the main
    /// state machine: the pipeline phase is never touched. The session state
    /// is only replaced when both stages succeed; a failed re-analysis leaves the
    /// previous photo, analysis, and plan intact, and the replacement photo's
    /// preview is released on drop.
    pub fn reanalyze_photo(
        &self,
        photo: ClientPhoto,
        target: &TargetColor,
    ) -> Result<(), PipelineError> {
        {
            let mut inner = lock_inner(&self.inner);
            if inner.reanalyze_busy {
                return Err(PipelineError::analysis_failed(anyhow::anyhow!(
                    "a re-analysis is already running"
                )));
            }
            inner.reanalyze_busy = true;
        }

        let outcome = stages::analyze(self.capability.as_ref(), &photo).and_then(|analysis| {
            stages::plan(self.capability.as_ref(), &analysis, &target.to_string())
                .map(|plan| (analysis, plan))
        });

        let mut inner = lock_inner(&self.inner);
        inner.reanalyze_busy = false;
        match outcome {
            Ok((analysis, plan)) => {
                inner.photo = Some(photo);
                inner.analysis = Some(analysis);
                inner.plan = Some(plan);
                inner.auto_planned = false;
                let mut payload = EventPayload::new();
                payload.insert("target".to_string(), Value::String(target.to_string()));
                inner.record("reanalysis_completed", payload);
                inner.notify(PipelineEvent::ReanalysisCompleted);
                Ok(())
            }
            Err(err) => {
                inner.record_error("reanalysis_failed", &err);
                inner.notify(PipelineEvent::RefinementFailed {
                    message: err.user_message(),
                });
                Err(err)
            }
        }
    }

    /// Clears the session back to idle. Bumps the generation so in-flight
    /// workers discard their results.
    pub fn reset(&self) {
        let mut inner = lock_inner(&self.inner);
        inner.generation += 1;
        inner.photo = None;
        inner.analysis = None;
        inner.plan = None;
        inner.auto_planned = false;
        inner.set_phase(AutoPlanPhase::Idle);
        inner.record("pipeline_reset", EventPayload::new());
    }
}

fn run_pipeline(
    capability: Arc<dyn ColoristCapability>,
    shared: Arc<Mutex<Inner>>,
    generation: u64,
    settle_delay: Duration,
) {
    thread::sleep(settle_delay);

    let Some((payload, content_type)) = ({
        let mut inner = lock_inner(&shared);
        if inner.generation != generation {
            None
        } else {
            inner.set_phase(AutoPlanPhase::Analyzing);
            inner
                .photo
                .as_ref()
                .map(|photo| (photo.bytes.clone(), photo.content_type.clone()))
        }
    }) else {
        return;
    };

    let analysis = match stages::analyze_payload(capability.as_ref(), &payload, &content_type) {
        Ok(analysis) => analysis,
        Err(err) => {
            fail_run(&shared, generation, &err);
            return;
        }
    };

    {
        let mut inner = lock_inner(&shared);
        if inner.generation != generation {
            return;
        }
        inner.analysis = Some(analysis.clone());
        inner.set_phase(AutoPlanPhase::Planning);
    }

    match stages::plan(capability.as_ref(), &analysis, DEFAULT_AUTO_TARGET) {
        Ok(plan) => {
            let mut inner = lock_inner(&shared);
            if inner.generation != generation {
                return;
            }
            inner.plan = Some(plan);
            inner.auto_planned = true;
            inner.set_phase(AutoPlanPhase::Done);
        }
        Err(err) => fail_run(&shared, generation, &err),
    }
}

fn fail_run(shared: &Mutex<Inner>, generation: u64, err: &PipelineError) {
    let mut inner = lock_inner(shared);
    if inner.generation != generation {
        return;
    }
    inner.record_error("auto_plan_failed", err);
    inner.set_phase(AutoPlanPhase::Error {
        message: err.user_message(),
    });
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
