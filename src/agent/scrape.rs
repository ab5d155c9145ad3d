use scraper::Html;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::auth::{challenge_reason, has_element, url_path};
use super::{AgentError, AgentResult, JobSearchAgent, SessionState};
use crate::search::{ExperienceLevel, JobConfig, JobType};

const SEARCH_PATH: &str = "/jobs/search/";

const BLOCK_URL_MARKERS: &[(&str, &str)] = &[
    ("/authwall", "sign-in wall"),
    ("/uas/login", "sign-in wall"),
];
const BLOCK_ELEMENTS: &[(&str, &str)] = &[
    (".authwall-join-form", "sign-in wall"),
    ("[data-test-id=\"authwall\"]", "sign-in wall"),
    ("#error-page", "error page"),
];
const BLOCK_PHRASES: &[&str] = &[
    "let's do a quick security check",
    "unusual activity from your account",
    "you've reached the commercial use limit",
];

/// What to look for on the job board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQuery {
    pub keywords: Vec<String>,
    pub location: Option<String>,
    pub experience_level: Option<ExperienceLevel>,
    pub job_type: Option<JobType>,
    pub max_results: u32,
    #[serde(default)]
    pub company_filter: Vec<String>,
    /// Fail with [`AgentError::NotAuthenticated`] unless logged in
    #[serde(skip)]
    pub require_auth: bool,
}

impl JobQuery {
    pub fn from_config(config: &JobConfig, require_auth: bool) -> Self {
        Self {
            keywords: config.keywords.clone(),
            location: config.location.clone(),
            experience_level: config.experience_level,
            job_type: config.job_type,
            max_results: config.max_results,
            company_filter: config.company_filter.clone(),
            require_auth,
        }
    }

    /// Human-readable query, e.g. `Python, Rust in Berlin`
    pub fn summary(&self) -> String {
        let keywords = self.keywords.join(", ");
        match self.location.as_deref().filter(|l| !l.is_empty()) {
            Some(location) => format!("{keywords} in {location}"),
            None => keywords,
        }
    }

    fn matches(&self, record: &JobRecord) -> bool {
        self.matches_keywords(record) && self.matches_company(record)
    }

    fn matches_keywords(&self, record: &JobRecord) -> bool {
        let title = record.title.to_lowercase();
        let description = record
            .description
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        self.keywords.iter().any(|keyword| {
            let keyword = keyword.trim().to_lowercase();
            title.contains(&keyword) || description.contains(&keyword)
        })
    }

    fn matches_company(&self, record: &JobRecord) -> bool {
        if self.company_filter.is_empty() {
            return true;
        }
        let company = record.company.to_lowercase();
        self.company_filter
            .iter()
            .any(|wanted| company.contains(&wanted.trim().to_lowercase()))
    }
}

/// One job posting as listed on the search results page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<String>,
    pub source: String,
    pub authenticated_search: bool,
}

impl JobRecord {
    pub const SOURCE: &'static str = "LinkedIn";
}

/// Search results URL for `query` under `base`
pub fn build_search_url(base: &Url, query: &JobQuery) -> AgentResult<Url> {
    let mut url = base
        .join(SEARCH_PATH)
        .map_err(|e| AgentError::Config(format!("search url: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("keywords", &query.keywords.join(" "));
        if let Some(location) = query.location.as_deref().filter(|l| !l.trim().is_empty()) {
            pairs.append_pair("location", location.trim());
        }
        if let Some(level) = query.experience_level {
            pairs.append_pair("f_E", level.site_code());
        }
        if let Some(job_type) = query.job_type {
            pairs.append_pair("f_JT", job_type.site_code());
        }
    }
    Ok(url)
}

/// Why the page is unusable for scraping, if it is
pub fn detect_block(url: Option<&str>, html: &str) -> Option<String> {
    let url = url.unwrap_or_default();
    let document = Html::parse_document(html);

    if let Some(reason) = challenge_reason(url, &document) {
        return Some(reason.to_string());
    }

    let path = url_path(url);
    if let Some((_, reason)) = BLOCK_URL_MARKERS
        .iter()
        .find(|(marker, _)| path.starts_with(marker))
    {
        return Some(reason.to_string());
    }
    if let Some((_, reason)) = BLOCK_ELEMENTS
        .iter()
        .find(|(selector, _)| has_element(&document, selector))
    {
        return Some(reason.to_string());
    }

    let lowered = html.to_lowercase();
    BLOCK_PHRASES
        .iter()
        .find(|phrase| lowered.contains(*phrase))
        .map(|phrase| format!("page says \"{phrase}\""))
}

impl JobSearchAgent {
    /// Pacing delay bracketed by cancellation checks
    async fn paced(&self, cancel: &CancellationToken) -> AgentResult<()> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        self.pace().await;
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    /// Scrape job cards for `query`, scrolling until enough unique matches
    /// are found or the results stop growing
    ///
    /// A blocked page or cancellation discards everything collected so far.
    pub async fn search_jobs(
        &mut self,
        query: &JobQuery,
        cancel: &CancellationToken,
    ) -> AgentResult<Vec<JobRecord>> {
        self.ensure_usable()?;
        if query.require_auth && !self.is_authenticated() {
            return Err(AgentError::NotAuthenticated);
        }
        if self.state == SessionState::SessionOpen {
            self.state = SessionState::Anonymous;
        }
        let authenticated = self.is_authenticated();

        let url = build_search_url(&self.base_url, query)?;
        info!("Searching jobs: {}", query.summary());

        self.paced(cancel).await?;
        self.goto(&url).await?;

        let max_results = query.max_results as usize;
        let mut seen = HashSet::new();
        let mut kept: Vec<JobRecord> = Vec::new();
        let mut stagnant = 0u32;
        let mut scrolls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let snapshot = self.browser.read_dom().await.map_err(AgentError::Browser)?;
            if snapshot.url.is_some() {
                self.last_url = snapshot.url.clone();
            }
            if let Some(reason) = detect_block(snapshot.url.as_deref(), &snapshot.html) {
                warn!("Job search blocked: {}", reason);
                return Err(AgentError::Blocked(reason));
            }

            let mut new_raw = 0usize;
            for mut record in self.selectors.extract(&snapshot.html, &self.base_url) {
                if !seen.insert(record.url.clone()) {
                    continue;
                }
                new_raw += 1;
                record.authenticated_search = authenticated;
                if kept.len() < max_results && query.matches(&record) {
                    kept.push(record);
                }
            }
            debug!(
                "Scroll {}: {} new cards, {} matching so far",
                scrolls,
                new_raw,
                kept.len()
            );

            if kept.len() >= max_results {
                break;
            }
            if new_raw == 0 {
                stagnant += 1;
                if stagnant >= self.settings.stagnation_limit {
                    debug!("Results stopped growing after {} scrolls", scrolls);
                    break;
                }
            } else {
                stagnant = 0;
            }
            if scrolls >= self.settings.max_scroll_attempts {
                break;
            }

            self.paced(cancel).await?;
            self.browser
                .scroll_by(self.settings.scroll_step_px)
                .await
                .map_err(AgentError::Browser)?;
            self.settle().await?;
            scrolls += 1;
        }

        info!("Found {} matching jobs", kept.len());
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> JobQuery {
        JobQuery {
            keywords: vec!["Python".to_string(), "Django".to_string()],
            location: Some("Berlin, Germany".to_string()),
            experience_level: Some(ExperienceLevel::MidSenior),
            job_type: Some(JobType::FullTime),
            max_results: 5,
            company_filter: vec![],
            require_auth: false,
        }
    }

    fn record(title: &str, company: &str) -> JobRecord {
        JobRecord {
            title: title.to_string(),
            company: company.to_string(),
            location: String::new(),
            url: "https://www.linkedin.com/jobs/view/1".to_string(),
            description: None,
            posted_date: None,
            source: JobRecord::SOURCE.to_string(),
            authenticated_search: false,
        }
    }

    #[test]
    fn search_url_carries_filters() {
        let base = Url::parse("https://www.linkedin.com").unwrap();
        let url = build_search_url(&base, &query()).unwrap();

        assert_eq!(url.path(), "/jobs/search/");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("keywords".to_string(), "Python Django".to_string()),
                ("location".to_string(), "Berlin, Germany".to_string()),
                ("f_E".to_string(), "4".to_string()),
                ("f_JT".to_string(), "F".to_string()),
            ]
        );
    }

    #[test]
    fn search_url_omits_missing_filters() {
        let base = Url::parse("https://www.linkedin.com").unwrap();
        let query = JobQuery {
            location: None,
            experience_level: None,
            job_type: None,
            ..query()
        };
        let url = build_search_url(&base, &query).unwrap();
        assert_eq!(url.query(), Some("keywords=Python+Django"));
    }

    #[test]
    fn keyword_filter_checks_title_and_description() {
        let q = query();
        assert!(q.matches(&record("Senior python engineer", "Acme")));
        assert!(!q.matches(&record("Java Developer", "Acme")));

        let mut described = record("Backend Developer", "Acme");
        described.description = Some("Django and PostgreSQL".to_string());
        assert!(q.matches(&described));
    }

    #[test]
    fn company_filter_is_case_insensitive_containment() {
        let q = JobQuery {
            company_filter: vec!["acme".to_string()],
            ..query()
        };
        assert!(q.matches(&record("Python Developer", "ACME Corporation")));
        assert!(!q.matches(&record("Python Developer", "Globex")));
    }

    #[test]
    fn block_detection() {
        assert_eq!(
            detect_block(Some("https://www.linkedin.com/authwall?trk=x"), "<html></html>").as_deref(),
            Some("sign-in wall")
        );
        assert_eq!(
            detect_block(
                Some("https://www.linkedin.com/jobs/search/"),
                "<div id=\"captcha-internal\"></div>"
            )
            .as_deref(),
            Some("captcha")
        );
        assert!(
            detect_block(None, "<p>Let's do a quick security check</p>")
                .is_some_and(|reason| reason.contains("security check"))
        );
        assert_eq!(
            detect_block(
                Some("https://www.linkedin.com/jobs/search/"),
                "<ul class=\"jobs-search__results-list\"></ul>"
            ),
            None
        );
    }
}
