use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{StepContext, StepError, StepHandler, StepOutcome, retry_transient};
use crate::capabilities::LlmContext;
use crate::search::ProfileConfig;

/// Ask the LLM, retrying transient failures per the run's policy
async fn complete(
    ctx: &StepContext<'_>,
    prompt: String,
    context: Option<LlmContext>,
) -> Result<String, StepError> {
    ctx.checkpoint()?;
    let llm = ctx.resources.llm.clone();
    debug!(step = ctx.step, "Requesting completion ({} prompt chars)", prompt.len());

    retry_transient(ctx.retry, ctx.cancel, ctx.step, || {
        let llm = llm.clone();
        let prompt = prompt.clone();
        let context = context.clone();
        async move { llm.complete(&prompt, context.as_ref()).await }
    })
    .await
}

fn subject_prompt(profile: &ProfileConfig) -> String {
    let mut prompt = format!(
        "Research the GitHub user \"{username}\" (https://github.com/{username}).\n\
         Summarize who they are as an engineer: primary languages, areas of \
         expertise, notable organizations and the kind of work they publish.",
        username = profile.username
    );
    if profile.include_contributions {
        prompt.push_str(
            "\nInclude their contribution activity: contributions to other \
             projects, review activity and how consistently they contribute.",
        );
    }
    prompt.push_str("\nAnswer in concise markdown without a title.");
    prompt
}

fn projects_prompt(profile: &ProfileConfig) -> String {
    format!(
        "Analyse up to {max} of the most significant public repositories of the \
         GitHub user \"{username}\". For each one give the name, what it does, \
         the technologies used and what it shows about the author's skills. \
         Use the profile summary in the context. Answer in concise markdown \
         without a title.",
        max = profile.max_repos,
        username = profile.username
    )
}

fn compose_prompt(profile: &ProfileConfig, has_projects: bool) -> String {
    let mut prompt = format!(
        "Write a professional resume in markdown for the GitHub user \"{}\", \
         using only the research in the context. Start with a level-one heading \
         holding their name or username, followed by a short summary, a skills \
         section",
        profile.username
    );
    if has_projects {
        prompt.push_str(", a projects section");
    }
    prompt.push_str(" and links. Do not invent employers, dates or degrees.");
    prompt
}

pub struct ResearchSubject {
    profile: ProfileConfig,
}

impl ResearchSubject {
    pub const NAME: &'static str = "research-subject";

    pub fn new(profile: ProfileConfig) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl StepHandler for ResearchSubject {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        ctx.info(format!("Researching GitHub user {}", self.profile.username))
            .await?;

        let summary = complete(ctx, subject_prompt(&self.profile), None).await?;
        Ok(StepOutcome::new(
            Value::String(summary),
            format!("Profile summary for {} ready", self.profile.username),
        ))
    }
}

pub struct ResearchProjects {
    profile: ProfileConfig,
}

impl ResearchProjects {
    pub const NAME: &'static str = "research-projects";

    pub fn new(profile: ProfileConfig) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl StepHandler for ResearchProjects {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        if !self.profile.include_projects {
            return Ok(StepOutcome::new(
                Value::Null,
                "Project analysis skipped (include_projects is false)",
            ));
        }

        ctx.info(format!(
            "Analysing up to {} repositories",
            self.profile.max_repos
        ))
        .await?;

        let context = LlmContext::with_data(json!({
            "username": self.profile.username,
            "max_repos": self.profile.max_repos,
            "profile_summary": ctx.outputs.get_str(ResearchSubject::NAME),
        }));
        let analysis = complete(ctx, projects_prompt(&self.profile), Some(context)).await?;
        Ok(StepOutcome::new(
            Value::String(analysis),
            format!("Analysed repositories of {}", self.profile.username),
        ))
    }
}

pub struct ComposeDocument {
    profile: ProfileConfig,
}

impl ComposeDocument {
    pub const NAME: &'static str = "compose-document";

    pub fn new(profile: ProfileConfig) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl StepHandler for ComposeDocument {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError> {
        let summary = ctx.outputs.get_str(ResearchSubject::NAME);
        let projects = ctx.outputs.get_str(ResearchProjects::NAME);
        if summary.is_none() {
            return Err(StepError::permanent("no profile summary to compose from"));
        }

        ctx.info("Composing resume").await?;
        let context = LlmContext::with_data(json!({
            "username": self.profile.username,
            "profile_summary": summary,
            "projects": projects,
        }));
        let prompt = compose_prompt(&self.profile, projects.is_some());

        let resume = complete(ctx, prompt, Some(context)).await?;
        let chars = resume.chars().count();
        Ok(StepOutcome::new(Value::String(resume), "Resume composed")
            .with_payload(json!({ "characters": chars })))
    }
}
