use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::jobs::{Authenticate, ScrapeJobs};
use super::profile::{ComposeDocument, ResearchProjects, ResearchSubject};
use super::{
    PipelineStep, RetryPolicy, RunResources, StepContext, StepError, StepHandler, StepOutputs,
    StepState, Track,
};
use crate::progress::{ProgressEvent, ProgressPublisher};
use crate::search::{JobConfig, ProfileConfig, SearchConfig, SearchKind};

/// A step that ended `failed`
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub step: &'static str,
    pub track: Track,
    pub error: StepError,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub outputs: StepOutputs,
    pub states: Vec<(&'static str, StepState)>,
    pub failures: Vec<StepFailure>,
    /// Run stopped on cancellation; nothing more may be published
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn state_of(&self, step: &str) -> Option<StepState> {
        self.states
            .iter()
            .find(|(name, _)| *name == step)
            .map(|(_, state)| *state)
    }

    pub fn failure_for(&self, track: Track) -> Option<&StepFailure> {
        self.failures.iter().find(|f| f.track == track)
    }
}

pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self { steps }
    }

    /// Canned step list for a validated search
    pub fn for_search(search: &SearchConfig) -> Self {
        let mut builder = StepListBuilder::default();
        match &search.kind {
            SearchKind::ProfileResume(profile) => builder.profile(profile),
            SearchKind::JobSearch(jobs) => builder.jobs(jobs),
            SearchKind::Combined { profile, jobs } => {
                builder.profile(profile);
                builder.jobs(jobs);
            }
        }
        Self::new(builder.steps)
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Final step of `track`, whose output is the track's result
    pub fn last_step_of(&self, track: Track) -> Option<&'static str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.track == track)
            .map(|s| s.name)
    }

    pub fn tracks(&self) -> Vec<Track> {
        let tracks: BTreeSet<Track> = self.steps.iter().map(|s| s.track).collect();
        tracks.into_iter().collect()
    }

    /// Run every step in order
    ///
    /// Steps of a track that already failed stay `pending`. A cancelled
    /// failure or a vanished consumer stops the run without further events.
    pub async fn run(
        &self,
        search: &SearchConfig,
        cancel: &CancellationToken,
        progress: &ProgressPublisher,
        retry: &RetryPolicy,
        resources: &mut RunResources,
    ) -> PipelineReport {
        let mut report = PipelineReport {
            states: self
                .steps
                .iter()
                .map(|s| (s.name, StepState::Pending))
                .collect(),
            ..PipelineReport::default()
        };
        let mut aborted: BTreeSet<Track> = BTreeSet::new();

        for (index, step) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if aborted.contains(&step.track) {
                debug!("Skipping {} after earlier {} failure", step.name, step.track);
                continue;
            }

            report.states[index].1 = StepState::Running;
            if progress
                .publish(ProgressEvent::step_started(step.name))
                .await
                .is_err()
            {
                report.states[index].1 = StepState::Failed;
                report.cancelled = true;
                break;
            }
            info!(step = step.name, ordinal = step.ordinal, "Step started");

            let result = {
                let mut ctx = StepContext {
                    step: step.name,
                    outputs: &report.outputs,
                    search,
                    cancel,
                    retry,
                    resources: &mut *resources,
                    progress,
                };
                step.handler.run(&mut ctx).await
            };

            match result {
                Ok(outcome) => {
                    report.states[index].1 = StepState::Done;
                    report.outputs.insert(step.name, outcome.value);
                    info!(step = step.name, "Step done");
                    let done = ProgressEvent::task_done(step.name, outcome.message, outcome.payload);
                    if progress.publish(done).await.is_err() {
                        report.cancelled = true;
                        break;
                    }
                }
                Err(e) if e.kind.is_fatal() || cancel.is_cancelled() => {
                    report.states[index].1 = StepState::Failed;
                    report.cancelled = true;
                    debug!(step = step.name, "Step stopped by cancellation");
                    break;
                }
                Err(e) => {
                    report.states[index].1 = StepState::Failed;
                    error!(step = step.name, kind = %e.kind, "Step failed: {}", e);
                    aborted.insert(step.track);
                    let event = ProgressEvent::error(step.name, e.kind, e.message.clone());
                    report.failures.push(StepFailure {
                        step: step.name,
                        track: step.track,
                        error: e,
                    });
                    if progress.publish(event).await.is_err() {
                        report.cancelled = true;
                        break;
                    }
                }
            }
        }

        report
    }
}

#[derive(Default)]
struct StepListBuilder {
    steps: Vec<PipelineStep>,
}

impl StepListBuilder {
    fn push(&mut self, name: &'static str, track: Track, handler: Arc<dyn StepHandler>) {
        let ordinal = self.steps.len();
        self.steps.push(PipelineStep {
            name,
            ordinal,
            track,
            handler,
        });
    }

    fn profile(&mut self, profile: &ProfileConfig) {
        self.push(
            ResearchSubject::NAME,
            Track::Profile,
            Arc::new(ResearchSubject::new(profile.clone())),
        );
        self.push(
            ResearchProjects::NAME,
            Track::Profile,
            Arc::new(ResearchProjects::new(profile.clone())),
        );
        self.push(
            ComposeDocument::NAME,
            Track::Profile,
            Arc::new(ComposeDocument::new(profile.clone())),
        );
    }

    fn jobs(&mut self, jobs: &JobConfig) {
        self.push(Authenticate::NAME, Track::Jobs, Arc::new(Authenticate));
        self.push(
            ScrapeJobs::NAME,
            Track::Jobs,
            Arc::new(ScrapeJobs::new(jobs.clone())),
        );
    }
}
