// Command-line driver: runs one search and prints its progress as
// text/event-stream frames on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use resume_job_search::agent::AgentSettings;
use resume_job_search::{
    AgentError, BrowserFactory, ChromeSessionFactory, Credentials, GeminiClient, JobSearchAgent,
    SearchEvent, SearchOrchestrator, SearchRequest, SearchType, load_yaml_config,
};

#[derive(Parser, Debug)]
#[command(
    name = "resume-job-search",
    version,
    about = "Generate a resume from a GitHub profile and search LinkedIn jobs"
)]
struct Cli {
    /// Search request JSON file; stdin when omitted
    request: Option<PathBuf>,

    /// Print an example request for a search type and exit
    #[arg(long, value_name = "SEARCH_TYPE")]
    template: Option<String>,

    /// Override the request's output format (markdown or json)
    #[arg(long)]
    format: Option<String>,

    /// Open this page and run one natural-language browser action instead of a search
    #[arg(long, value_name = "URL", requires = "instruction")]
    act_on: Option<String>,

    /// Instruction for --act-on, e.g. "extract the job titles"
    #[arg(long)]
    instruction: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(search_type) = &cli.template {
        let search_type: SearchType = search_type.parse()?;
        println!(
            "{}",
            serde_json::to_string_pretty(&SearchRequest::template(search_type))?
        );
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_yaml_config().context("Failed to load configuration")?;
    let llm = Arc::new(GeminiClient::from_env(config.llm.clone())?);
    let browsers = Arc::new(ChromeSessionFactory::new(config.browser.clone()));

    if let (Some(url), Some(instruction)) = (&cli.act_on, &cli.instruction) {
        let browser = browsers.open_session().await?;
        let mut agent = JobSearchAgent::new(browser, llm, AgentSettings::from_config(&config))?;
        let outcome: Result<String, AgentError> = async {
            agent.open_page(url).await?;
            agent.execute_natural_language_action(instruction).await
        }
        .await;
        agent.close().await?;
        println!("{}", outcome?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut request = read_request(cli.request.as_deref())?;
    if let Some(format) = cli.format {
        request.output_format = Some(format);
    }

    let credentials = Credentials::from_env();
    if credentials.is_none() {
        info!("LINKEDIN_USERNAME / LINKEDIN_PASSWORD not set; job searches run anonymously");
    }
    let orchestrator = SearchOrchestrator::new(llm, browsers, config).with_credentials(credentials);

    let mut subscription = orchestrator.execute(request);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut succeeded = false;
    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                print!("{}", frame(&event)?);
                if let SearchEvent::Terminal(result) = &event {
                    succeeded = result.is_completed();
                }
            }
            _ = &mut ctrl_c => {
                warn!("Interrupted, cancelling search");
                break;
            }
        }
    }
    drop(subscription);

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_request(path: Option<&std::path::Path>) -> Result<SearchRequest> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read request from stdin")?;
            raw
        }
    };
    serde_json::from_str(&raw).context("Request is not a valid search request JSON document")
}

/// One text/event-stream frame
fn frame(event: &SearchEvent) -> Result<String> {
    let data = match event {
        SearchEvent::Progress(progress) if progress.is_heartbeat() => "{}".to_string(),
        SearchEvent::Progress(progress) => serde_json::to_string(progress)?,
        SearchEvent::Terminal(result) => serde_json::to_string(result)?,
    };
    Ok(format!("event: {}\ndata: {}\n\n", event.event_name(), data))
}
