mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    BrowserState, FakeFactory, FailingLlm, FixedLlm, FlakyLlm, SITE, collect, job_card,
    results_page, test_config,
};
use resume_job_search::search::{JobConfigInput, ProfileConfigInput};
use resume_job_search::{
    CapabilityError, Config, Credentials, ErrorKind, EventKind, OutputFormat, SearchEvent,
    SearchOrchestrator, SearchRequest, SearchType, TerminalResult,
};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

const RESUME_TEXT: &str = "# The Octocat\n\nFIXED RESUME TEXT FROM THE STUB";

fn profile_request(max_repos: i64) -> SearchRequest {
    SearchRequest {
        search_type: "profile_resume".to_string(),
        profile_config: Some(ProfileConfigInput {
            username: "octocat".to_string(),
            include_projects: true,
            include_contributions: true,
            max_repos,
        }),
        job_config: None,
        output_format: None,
    }
}

fn jobs_request(keywords: &[&str], max_results: i64) -> SearchRequest {
    SearchRequest {
        search_type: "job_search".to_string(),
        profile_config: None,
        job_config: Some(JobConfigInput {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            location: None,
            experience_level: None,
            job_type: None,
            max_results,
            company_filter: None,
        }),
        output_format: Some("json".to_string()),
    }
}

fn python_pages() -> Vec<String> {
    let first = vec![
        job_card(1, "Senior Python Developer", "Acme"),
        job_card(2, "Java Engineer", "Globex"),
        job_card(3, "Python Data Engineer", "Initech"),
        job_card(4, "Python Backend Engineer", "Hooli"),
    ];
    let mut second = first.clone();
    second.extend([
        job_card(5, "Frontend Developer", "Umbrella"),
        job_card(6, "Python SRE", "Soylent"),
        job_card(3, "Python Data Engineer", "Initech"),
        job_card(7, "Machine Learning Engineer (Python)", "Cyberdyne"),
        job_card(8, "Python Tooling Engineer", "Tyrell"),
    ]);
    vec![results_page(&first), results_page(&second)]
}

fn orchestrator(llm: Arc<dyn resume_job_search::LlmCapability>, factory: Arc<FakeFactory>) -> SearchOrchestrator {
    SearchOrchestrator::new(llm, factory, test_config())
}

fn terminal(events: &[SearchEvent]) -> &TerminalResult {
    events
        .last()
        .and_then(SearchEvent::as_terminal)
        .expect("stream ends with a terminal result")
}

fn assert_single_terminal(events: &[SearchEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "exactly one terminal result");
    assert!(events.last().is_some_and(SearchEvent::is_terminal));
}

fn task_done_steps(events: &[SearchEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(SearchEvent::as_progress)
        .filter(|e| e.kind == EventKind::TaskDone)
        .filter_map(|e| e.task.clone())
        .collect()
}

#[tokio::test]
async fn profile_resume_contains_llm_text_verbatim() {
    let llm = Arc::new(FixedLlm::new(RESUME_TEXT));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![])));
    let events = collect(orchestrator(llm.clone(), factory.clone()).execute(profile_request(3))).await;

    assert_single_terminal(&events);
    let result = terminal(&events);
    assert!(result.is_completed());
    let output = result.output.as_ref().and_then(|o| o.as_text()).unwrap();
    assert!(output.contains(RESUME_TEXT));

    let first = events[0].as_progress().unwrap();
    assert_eq!(first.kind, EventKind::Started);
    assert!(first.task.is_none());
    assert_eq!(
        task_done_steps(&events),
        vec!["research-subject", "research-projects", "compose-document"]
    );

    assert_eq!(llm.calls(), 3);
    assert!(llm.prompts()[1].contains("up to 3"));
    assert!(factory.sessions().is_empty(), "profile searches never open a browser");
}

#[tokio::test]
async fn same_request_same_output() {
    let run = || async {
        let llm = Arc::new(FixedLlm::new(RESUME_TEXT));
        let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![])));
        let events = collect(orchestrator(llm, factory).execute(profile_request(3))).await;
        terminal(&events).output.clone()
    };

    let first = run().await;
    let second = run().await;
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn invalid_requests_yield_one_validation_error() {
    let bad_type = SearchRequest {
        search_type: "everything".to_string(),
        ..profile_request(3)
    };
    let missing_config = SearchRequest {
        search_type: "job_search".to_string(),
        ..profile_request(3)
    };
    let too_many_repos = profile_request(500);

    for request in [bad_type, missing_config, too_many_repos] {
        let llm = Arc::new(FixedLlm::new(RESUME_TEXT));
        let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![])));
        let events = collect(orchestrator(llm.clone(), factory).execute(request)).await;

        assert_eq!(events.len(), 1, "no started event before a validation error");
        let result = terminal(&events);
        assert!(!result.is_completed());
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert_eq!(result.output_format, Some(OutputFormat::Markdown));
        assert_eq!(llm.calls(), 0);
    }
}

#[tokio::test]
async fn validation_error_echoes_the_requested_format() {
    let request = SearchRequest {
        output_format: Some("json".to_string()),
        ..profile_request(0)
    };
    let llm = Arc::new(FixedLlm::new(RESUME_TEXT));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![])));
    let events = collect(orchestrator(llm, factory).execute(request)).await;

    let result = terminal(&events);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));
    assert_eq!(result.output_format, Some(OutputFormat::Json));
}

#[tokio::test(start_paused = true)]
async fn slow_llm_timeout_is_retried_within_default_stream_limits() {
    // The first call runs into the adapter timeout, as long as the stream idle limit
    let llm = Arc::new(FlakyLlm::new(RESUME_TEXT, 1, Duration::from_secs(120)));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![])));
    let orchestrator = SearchOrchestrator::new(llm.clone(), factory, Config::default());

    let events = collect(orchestrator.execute(profile_request(3))).await;

    assert_single_terminal(&events);
    let result = terminal(&events);
    assert!(result.is_completed(), "{:?}", result.message);
    assert!(result.output.as_ref().and_then(|o| o.as_text()).unwrap().contains(RESUME_TEXT));
    assert_eq!(llm.calls(), 4, "one retry, then the remaining two steps");

    let heartbeats = events
        .iter()
        .filter_map(SearchEvent::as_progress)
        .filter(|e| e.is_heartbeat())
        .count();
    assert!(heartbeats >= 7, "heartbeats kept the stream alive");
}

#[tokio::test(start_paused = true)]
async fn heartbeats_follow_the_interval_and_stop_at_the_result() {
    let mut config = test_config();
    config.stream.heartbeat_interval_secs = 15;
    let llm = Arc::new(FixedLlm::new(RESUME_TEXT).with_delay(Duration::from_secs(40)));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![])));
    let orchestrator = SearchOrchestrator::new(llm, factory, config);

    let started = Instant::now();
    let mut subscription = orchestrator.execute(profile_request(3));
    let mut events = Vec::new();
    let mut heartbeat_offsets = Vec::new();
    while let Some(event) = subscription.next().await {
        if event.as_progress().is_some_and(|e| e.is_heartbeat()) {
            heartbeat_offsets.push(started.elapsed().as_secs());
        }
        events.push(event);
    }

    assert_single_terminal(&events);
    assert!(terminal(&events).is_completed());
    assert!(heartbeat_offsets.len() >= 4, "{heartbeat_offsets:?}");
    assert!(
        heartbeat_offsets.iter().all(|secs| secs % 15 == 0),
        "heartbeats only on interval ticks: {heartbeat_offsets:?}"
    );
    // Steps finish at 40s and 80s; nothing was quiet for a full interval there
    assert!(!heartbeat_offsets.contains(&45));
    assert!(!heartbeat_offsets.contains(&90));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_subscription_stops_the_run() {
    let llm = Arc::new(FixedLlm::new(RESUME_TEXT).with_delay(Duration::from_millis(200)));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![])));
    let mut subscription = orchestrator(llm.clone(), factory).execute(profile_request(3));

    while let Some(event) = subscription.next().await {
        if event.as_progress().is_some_and(|e| e.kind == EventKind::TaskDone) {
            break;
        }
    }
    drop(subscription);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(llm.calls() <= 2, "at most the in-flight step finishes");
    assert!(
        !llm.prompts().iter().any(|p| p.contains("professional resume")),
        "compose-document never runs"
    );
}

#[tokio::test]
async fn job_search_returns_unique_matching_records() {
    let llm = Arc::new(FixedLlm::new("unused"));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(python_pages())));
    let events = collect(orchestrator(llm, factory.clone()).execute(jobs_request(&["Python"], 5))).await;

    assert_single_terminal(&events);
    let result = terminal(&events);
    assert!(result.is_completed(), "{:?}", result.message);

    let report = result.output.as_ref().and_then(|o| o.as_data()).unwrap();
    let jobs = report["jobs"].as_array().unwrap();
    assert!(!jobs.is_empty() && jobs.len() <= 5);
    assert_eq!(report["jobs_found"], jobs.len());
    assert_eq!(report["authenticated"], false);

    let mut urls: Vec<&str> = jobs.iter().map(|j| j["url"].as_str().unwrap()).collect();
    for job in jobs {
        assert!(job["title"].as_str().unwrap().contains("Python"));
        assert!(!job["url"].as_str().unwrap().contains('?'));
        assert_eq!(job["source"], "LinkedIn");
    }
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), jobs.len(), "no duplicate urls");

    let sessions = factory.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].lock().closed, "browser released before the result");
}

#[tokio::test]
async fn transient_scrape_failure_is_retried() {
    let state = BrowserState::with_results(python_pages()).with_failing_navigations(1);
    let llm = Arc::new(FixedLlm::new("unused"));
    let factory = Arc::new(FakeFactory::new(state));
    let events = collect(orchestrator(llm, factory.clone()).execute(jobs_request(&["Python"], 5))).await;

    let result = terminal(&events);
    assert!(result.is_completed(), "{:?}", result.message);
    assert!(result.output.as_ref().and_then(|o| o.as_data()).unwrap()["jobs_found"].as_u64().unwrap() > 0);

    let session = factory.sessions()[0].lock().clone();
    assert_eq!(session.failed_navigations, 1);
    assert_eq!(session.navigations.len(), 1);
    assert!(events
        .iter()
        .filter_map(SearchEvent::as_progress)
        .all(|e| e.kind != EventKind::Error));
}

#[tokio::test]
async fn transient_login_failure_is_retried() {
    let state = BrowserState::with_results(python_pages())
        .with_landing(&format!("{SITE}/feed/"), "<main>feed</main>")
        .with_failing_navigations(1);
    let llm = Arc::new(FixedLlm::new("unused"));
    let factory = Arc::new(FakeFactory::new(state));
    let orchestrator = orchestrator(llm, factory.clone())
        .with_credentials(Some(Credentials::new("user@example.com", "pass")));

    let events = collect(orchestrator.execute(jobs_request(&["Python"], 5))).await;
    let result = terminal(&events);
    assert!(result.is_completed(), "{:?}", result.message);
    assert_eq!(
        result.output.as_ref().and_then(|o| o.as_data()).unwrap()["authenticated"],
        true
    );

    let session = factory.sessions()[0].lock().clone();
    assert_eq!(session.failed_navigations, 1);
    assert_eq!(session.clicks.len(), 1, "the form is submitted once");
    assert_eq!(session.typed_into.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_subscription_mid_scrape_stops_scrolling() {
    let pages: Vec<String> = (1..=6)
        .map(|n| {
            let cards: Vec<String> = (1..=n * 2)
                .map(|id| job_card(id, "Python Developer", "Acme"))
                .collect();
            results_page(&cards)
        })
        .collect();
    let scrolled = CancellationToken::new();
    let state = BrowserState::with_results(pages).cancel_after_scrolls(1, scrolled.clone());
    let mut config = test_config();
    config.scraper.min_action_delay_ms = 1_000;
    let factory = Arc::new(FakeFactory::new(state));
    let orchestrator = SearchOrchestrator::new(Arc::new(FixedLlm::new("unused")), factory.clone(), config);

    let subscription = orchestrator.execute(jobs_request(&["Python"], 50));
    scrolled.cancelled().await;
    drop(subscription);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let session = factory.sessions()[0].lock().clone();
    assert_eq!(session.scrolls, 1, "no scroll after the consumer left");
    assert!(session.closed, "browser released after cancellation");
}

#[tokio::test]
async fn anonymous_authenticate_step_reports_reduced_mode() {
    let llm = Arc::new(FixedLlm::new("unused"));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(python_pages())));
    let events = collect(orchestrator(llm, factory).execute(jobs_request(&["Python"], 5))).await;

    let auth_done = events
        .iter()
        .filter_map(SearchEvent::as_progress)
        .find(|e| e.kind == EventKind::TaskDone && e.task.as_deref() == Some("authenticate"))
        .unwrap();
    assert!(auth_done.message.as_deref().unwrap().contains("anonymously"));
}

#[tokio::test]
async fn blocked_results_page_fails_the_job_search() {
    let blocked = "<html><body><div id=\"captcha-internal\"></div></body></html>".to_string();
    let llm = Arc::new(FixedLlm::new("unused"));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![blocked])));
    let events = collect(orchestrator(llm, factory.clone()).execute(jobs_request(&["Python"], 5))).await;

    assert_single_terminal(&events);
    let result = terminal(&events);
    assert!(!result.is_completed());
    assert_eq!(result.error_kind, Some(ErrorKind::Permanent));
    assert!(result.message.as_deref().unwrap().contains("blocked"));

    let error = events
        .iter()
        .filter_map(SearchEvent::as_progress)
        .find(|e| e.kind == EventKind::Error)
        .unwrap();
    assert_eq!(error.task.as_deref(), Some("scrape-jobs"));
    assert!(factory.sessions()[0].lock().closed);
}

#[tokio::test]
async fn combined_search_keeps_the_part_that_succeeded() {
    let blocked = "<p>Let's do a quick security check</p>".to_string();
    let llm = Arc::new(FixedLlm::new(RESUME_TEXT));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![blocked])));
    let events = collect(
        orchestrator(llm, factory).execute(SearchRequest::template(SearchType::Combined)),
    )
    .await;

    assert_single_terminal(&events);
    let result = terminal(&events);
    assert!(result.is_completed());
    let text = result.output.as_ref().and_then(|o| o.as_text()).unwrap();
    assert!(text.contains("## Profile Resume"));
    assert!(text.contains(RESUME_TEXT));
    assert!(!text.contains("## Job Search"));
    assert!(text.contains("The Job Search part failed"));
}

#[tokio::test]
async fn combined_search_survives_a_failing_llm() {
    let llm = Arc::new(FailingLlm(CapabilityError::Permanent("API key rejected".into())));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(python_pages())));
    let mut request = SearchRequest::template(SearchType::Combined);
    request.output_format = Some("json".to_string());
    if let Some(jobs) = request.job_config.as_mut() {
        jobs.keywords = vec!["Python".to_string()];
        jobs.location = None;
        jobs.experience_level = None;
        jobs.job_type = None;
    }
    let events = collect(orchestrator(llm, factory).execute(request)).await;

    let result = terminal(&events);
    assert!(result.is_completed());
    let data = result.output.as_ref().and_then(|o| o.as_data()).unwrap();
    assert!(data.get("profile").is_none());
    assert!(data["jobs"]["jobs_found"].as_u64().unwrap() > 0);
    assert_eq!(data["failed"][0]["part"], "profile");
    assert_eq!(data["failed"][0]["step"], "research-subject");

    let done = task_done_steps(&events);
    assert!(!done.contains(&"research-projects".to_string()));
    assert!(done.contains(&"scrape-jobs".to_string()));
}

#[tokio::test]
async fn transient_llm_failures_exhaust_retries_then_fail() {
    let llm = Arc::new(FailingLlm(CapabilityError::Transient("503".into())));
    let factory = Arc::new(FakeFactory::new(BrowserState::with_results(vec![])));
    let events = collect(orchestrator(llm, factory).execute(profile_request(3))).await;

    let result = terminal(&events);
    assert!(!result.is_completed());
    assert_eq!(result.error_kind, Some(ErrorKind::Transient));
}

#[tokio::test]
async fn credentials_stay_out_of_events() {
    let landing = format!("{SITE}/feed/");
    let state = BrowserState::with_results(python_pages()).with_landing(&landing, "<main>feed</main>");
    let llm = Arc::new(FixedLlm::new("unused"));
    let factory = Arc::new(FakeFactory::new(state));
    let orchestrator = orchestrator(llm, factory.clone())
        .with_credentials(Some(Credentials::new("jane.doe@example.com", "s3cret-pa55")));

    let events = collect(orchestrator.execute(jobs_request(&["Python"], 5))).await;
    let result = terminal(&events);
    assert!(result.is_completed());
    assert_eq!(
        result.output.as_ref().and_then(|o| o.as_data()).unwrap()["authenticated"],
        true
    );

    let transcript = serde_json::to_string(&events).unwrap();
    assert!(!transcript.contains("jane.doe"));
    assert!(!transcript.contains("s3cret-pa55"));

    let session = factory.sessions()[0].lock().clone();
    assert_eq!(
        session.typed_into,
        vec![
            "input[name=\"session_key\"]".to_string(),
            "input[name=\"session_password\"]".to_string()
        ]
    );
}

#[tokio::test]
async fn login_challenge_fails_the_job_track() {
    let state = BrowserState::with_results(python_pages())
        .with_landing(&format!("{SITE}/checkpoint/challenge/abc"), "<div></div>");
    let llm = Arc::new(FixedLlm::new("unused"));
    let factory = Arc::new(FakeFactory::new(state));
    let orchestrator = orchestrator(llm, factory)
        .with_credentials(Some(Credentials::new("user", "pass")));

    let events = collect(orchestrator.execute(jobs_request(&["Python"], 5))).await;
    let result = terminal(&events);
    assert!(!result.is_completed());
    assert_eq!(result.error_kind, Some(ErrorKind::Permanent));
    assert!(result.message.as_deref().unwrap().contains("security"));

    let started: Vec<_> = events
        .iter()
        .filter_map(SearchEvent::as_progress)
        .filter(|e| e.kind == EventKind::Started)
        .filter_map(|e| e.task.clone())
        .collect();
    assert_eq!(started, vec!["authenticate"], "scrape-jobs never starts");
}
