use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write as _;
use tokio::sync::Mutex;

use super::{StepContext, StepError, StepHandler, StepOutcome, retry_transient};
use crate::agent::{JobQuery, JobRecord};
use crate::search::JobConfig;

/// Output of the `scrape-jobs` step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSearchReport {
    pub search_query: JobQuery,
    pub jobs_found: usize,
    pub jobs: Vec<JobRecord>,
    pub authenticated: bool,
    pub message: String,
}

impl JobSearchReport {
    pub fn new(query: &JobQuery, jobs: Vec<JobRecord>, authenticated: bool) -> Self {
        let summary = query.summary();
        let mode = if authenticated { "authenticated" } else { "anonymous" };
        let message = if jobs.is_empty() {
            format!("No jobs matched {summary} ({mode} search)")
        } else {
            format!("Found {} jobs for {summary} ({mode} search)", jobs.len())
        };
        Self {
            search_query: query.clone(),
            jobs_found: jobs.len(),
            jobs,
            authenticated,
            message,
        }
    }

    /// Numbered markdown listing
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# Jobs: {}\n\n{}\n", self.search_query.summary(), self.message);
        for (i, job) in self.jobs.iter().enumerate() {
            let _ = write!(out, "\n{}. **{}** at {}", i + 1, job.title, job.company);
            if !job.location.is_empty() {
                let _ = write!(out, " ({})", job.location);
            }
            out.push('\n');
            if let Some(posted) = &job.posted_date {
                let _ = writeln!(out, "   Posted: {posted}");
            }
            if let Some(description) = &job.description {
                let _ = writeln!(out, "   {description}");
            }
            let _ = writeln!(out, "   {}", job.url);
        }
        out
    }
}

/// Signs the run's browser session in when credentials are configured
pub struct Authenticate;

impl Authenticate {
    pub const NAME: &'static str = "authenticate";
}

#[async_trait]
impl StepHandler for Authenticate {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let Some(credentials) = ctx.resources.credentials().cloned() else {
            return Ok(StepOutcome::new(
                json!({ "authenticated": false }),
                "No LinkedIn credentials configured; scraping anonymously with reduced results",
            ));
        };

        ctx.info("Signing in to LinkedIn").await?;
        ctx.checkpoint()?;
        let (cancel, retry, step) = (ctx.cancel, ctx.retry, ctx.step);
        let agent = Mutex::new(ctx.resources.agent().await?);
        let (agent, credentials) = (&agent, &credentials);

        retry_transient(retry, cancel, step, move || async move {
            agent.lock().await.authenticate(credentials).await
        })
        .await?;

        Ok(StepOutcome::new(
            json!({ "authenticated": true }),
            "Signed in to LinkedIn; authenticated search enabled",
        ))
    }
}

/// Scrapes job cards with the run's agent
pub struct ScrapeJobs {
    jobs: JobConfig,
}

impl ScrapeJobs {
    pub const NAME: &'static str = "scrape-jobs";

    pub fn new(jobs: JobConfig) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl StepHandler for ScrapeJobs {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let authenticated = ctx
            .outputs
            .get(Authenticate::NAME)
            .and_then(|v| v.get("authenticated"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let query = JobQuery::from_config(&self.jobs, authenticated);

        ctx.info(format!("Searching LinkedIn for {}", query.summary()))
            .await?;
        ctx.checkpoint()?;

        let (cancel, retry, step) = (ctx.cancel, ctx.retry, ctx.step);
        let records = {
            let agent = Mutex::new(ctx.resources.agent().await?);
            let (agent, query) = (&agent, &query);
            retry_transient(retry, cancel, step, move || async move {
                agent.lock().await.search_jobs(query, cancel).await
            })
            .await?
        };

        let report = JobSearchReport::new(&query, records, authenticated);
        let value = serde_json::to_value(&report)
            .map_err(|e| StepError::permanent(format!("could not encode job report: {e}")))?;
        Ok(StepOutcome::new(value, report.message.clone())
            .with_payload(json!({ "jobs_found": report.jobs_found })))
    }
}
