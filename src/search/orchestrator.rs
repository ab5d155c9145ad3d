use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::{OutputFormat, SearchConfig, SearchRequest};
use crate::Config;
use crate::agent::{AgentSettings, Credentials};
use crate::capabilities::{BrowserFactory, LlmCapability};
use crate::error::{Classify, ErrorKind};
use crate::pipeline::{JobSearchReport, Pipeline, PipelineReport, RetryPolicy, RunResources, Track};
use crate::progress::{
    self, ProgressEvent, ProgressPublisher, ProgressSubscription, ResultOutput, TerminalResult,
};

/// Entry point: turns a [`SearchRequest`] into a stream of progress events
///
/// Every call gets its own channel, run task and (when the job track needs
/// one) its own browser session.
pub struct SearchOrchestrator {
    llm: Arc<dyn LlmCapability>,
    browsers: Arc<dyn BrowserFactory>,
    credentials: Option<Credentials>,
    config: Arc<Config>,
}

impl SearchOrchestrator {
    pub fn new(llm: Arc<dyn LlmCapability>, browsers: Arc<dyn BrowserFactory>, config: Config) -> Self {
        Self {
            llm,
            browsers,
            credentials: None,
            config: Arc::new(config),
        }
    }

    /// Job site login used by the `authenticate` step
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a search and return its subscription
    ///
    /// Must be called inside a tokio runtime. Dropping the subscription
    /// cancels the run.
    pub fn execute(&self, request: SearchRequest) -> ProgressSubscription {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (publisher, subscription) = progress::channel(&self.config.stream, cancel.clone());

        let run = SearchRun {
            llm: self.llm.clone(),
            browsers: self.browsers.clone(),
            credentials: self.credentials.clone(),
            config: self.config.clone(),
            cancel,
            publisher,
        };
        tokio::spawn(run.execute(request).instrument(info_span!("search", %run_id)));

        subscription
    }
}

struct SearchRun {
    llm: Arc<dyn LlmCapability>,
    browsers: Arc<dyn BrowserFactory>,
    credentials: Option<Credentials>,
    config: Arc<Config>,
    cancel: CancellationToken,
    publisher: ProgressPublisher,
}

impl SearchRun {
    async fn execute(self, request: SearchRequest) {
        let search = match request.validate() {
            Ok(search) => search,
            Err(e) => {
                warn!("Rejected search request: {}", e);
                let terminal = TerminalResult::failed(e.kind(), e.to_string())
                    .with_format(request.requested_format());
                self.finish(terminal).await;
                return;
            }
        };

        info!(search_type = search.search_type().as_str(), "Search started");
        if self
            .publisher
            .publish(ProgressEvent::run_started(search.describe()))
            .await
            .is_err()
        {
            debug!("Consumer left before the search started");
            return;
        }

        let pipeline = Pipeline::for_search(&search);
        let retry = RetryPolicy::from(&self.config.retry);
        let mut resources = RunResources::new(
            self.llm.clone(),
            self.browsers.clone(),
            AgentSettings::from_config(&self.config),
            self.credentials.clone(),
        );

        let report = pipeline
            .run(&search, &self.cancel, &self.publisher, &retry, &mut resources)
            .await;
        resources.release().await;

        if report.cancelled || self.cancel.is_cancelled() {
            info!("Search cancelled");
            return;
        }

        let terminal = compose_terminal(&search, &pipeline, &report);
        if terminal.is_completed() {
            info!("Search completed");
        } else {
            warn!("Search failed: {}", terminal.message.as_deref().unwrap_or_default());
        }
        self.finish(terminal).await;
    }

    async fn finish(&self, terminal: TerminalResult) {
        if self.publisher.finish(terminal).await.is_err() {
            debug!("Consumer left before the result was delivered");
        }
    }
}

/// Final output of one track
struct TrackResult<'a> {
    track: Track,
    value: &'a Value,
}

impl TrackResult<'_> {
    fn markdown(&self) -> String {
        match self.track {
            Track::Profile => self.value.as_str().map(str::to_string).unwrap_or_default(),
            Track::Jobs => match serde_json::from_value::<JobSearchReport>(self.value.clone()) {
                Ok(report) => report.to_markdown(),
                Err(_) => self.value.to_string(),
            },
        }
    }

    fn json(&self, search: &SearchConfig) -> Value {
        match self.track {
            Track::Profile => json!({
                "username": search.profile().map(|p| p.username.as_str()),
                "resume": self.value,
            }),
            Track::Jobs => self.value.clone(),
        }
    }
}

/// Build the terminal result from what the tracks produced
///
/// Completed when at least one track delivered its final output. Combined
/// searches label each part and name the parts that failed.
fn compose_terminal(
    search: &SearchConfig,
    pipeline: &Pipeline,
    report: &PipelineReport,
) -> TerminalResult {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for track in pipeline.tracks() {
        let output = pipeline
            .last_step_of(track)
            .and_then(|step| report.outputs.get(step));
        match output {
            Some(value) if report.failure_for(track).is_none() => {
                succeeded.push(TrackResult { track, value })
            }
            _ => failed.push(track),
        }
    }

    if succeeded.is_empty() {
        return all_failed(report, &failed).with_format(search.output_format);
    }

    let labeled = pipeline.tracks().len() > 1;
    let failure_note = |track: Track| {
        let reason = report
            .failure_for(track)
            .map(|f| f.error.message.as_str())
            .unwrap_or("no output");
        format!("The {} part failed: {}", track.title(), reason)
    };

    let output = match search.output_format {
        OutputFormat::Markdown if labeled => {
            let mut sections: Vec<String> = succeeded
                .iter()
                .map(|part| format!("## {}\n\n{}", part.track.title(), part.markdown().trim_end()))
                .collect();
            sections.extend(failed.iter().map(|track| format!("> Note: {}", failure_note(*track))));
            ResultOutput::Text(sections.join("\n\n"))
        }
        OutputFormat::Markdown => ResultOutput::Text(succeeded[0].markdown()),
        OutputFormat::Json if labeled => {
            let mut object = Map::new();
            for part in &succeeded {
                object.insert(part.track.as_str().to_string(), part.json(search));
            }
            if !failed.is_empty() {
                let failures: Vec<Value> = failed
                    .iter()
                    .map(|track| {
                        let failure = report.failure_for(*track);
                        json!({
                            "part": track.as_str(),
                            "step": failure.map(|f| f.step),
                            "error_kind": failure.map(|f| f.error.kind),
                            "message": failure.map(|f| f.error.message.as_str()),
                        })
                    })
                    .collect();
                object.insert("failed".to_string(), Value::Array(failures));
            }
            ResultOutput::Data(Value::Object(object))
        }
        OutputFormat::Json => ResultOutput::Data(succeeded[0].json(search)),
    };

    let message = if failed.is_empty() {
        "Search completed".to_string()
    } else {
        let names: Vec<&str> = failed.iter().map(|t| t.title()).collect();
        format!("Search completed with failures: {}", names.join(", "))
    };
    TerminalResult::completed(output, Some(message)).with_format(search.output_format)
}

fn all_failed(report: &PipelineReport, failed: &[Track]) -> TerminalResult {
    let failures: Vec<_> = failed
        .iter()
        .filter_map(|track| report.failure_for(*track))
        .collect();

    match failures.as_slice() {
        [] => TerminalResult::failed(ErrorKind::Permanent, "Search produced no output"),
        [only] => TerminalResult::failed(only.error.kind, only.error.message.clone()),
        [first, ..] => {
            let details: Vec<String> = failures
                .iter()
                .map(|f| format!("{}: {}", f.track.title(), f.error.message))
                .collect();
            TerminalResult::failed(
                first.error.kind,
                format!("All parts of the search failed. {}", details.join("; ")),
            )
        }
    }
}
