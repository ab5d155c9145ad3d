//! Search requests and their validated form
//!
//! [`SearchRequest`] is whatever the caller sent; [`SearchConfig`] is the
//! only thing pipelines ever see. Enumerated fields arrive as strings so that
//! every rejection happens here, in one place, with a precise message.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::{Classify, ErrorKind};

const MAX_USERNAME_LEN: usize = 39;
const MAX_REPOS_LIMIT: i64 = 100;
const MAX_RESULTS_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    ProfileResume,
    JobSearch,
    Combined,
}

impl SearchType {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchType::ProfileResume => "profile_resume",
            SearchType::JobSearch => "job_search",
            SearchType::Combined => "combined",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile_resume" | "github_resume" => Ok(SearchType::ProfileResume),
            "job_search" | "linkedin_jobs" => Ok(SearchType::JobSearch),
            "combined" => Ok(SearchType::Combined),
            _ => Err(ValidationError::UnknownSearchType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            _ => Err(ValidationError::UnknownOutputFormat(s.to_string())),
        }
    }
}

/// Seniority filter, encoded on the job site as `f_E`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperienceLevel {
    Internship,
    #[serde(rename = "Entry level")]
    EntryLevel,
    Associate,
    #[serde(rename = "Mid-Senior level")]
    MidSenior,
    Director,
    Executive,
}

impl ExperienceLevel {
    pub fn site_code(self) -> &'static str {
        match self {
            ExperienceLevel::Internship => "1",
            ExperienceLevel::EntryLevel => "2",
            ExperienceLevel::Associate => "3",
            ExperienceLevel::MidSenior => "4",
            ExperienceLevel::Director => "5",
            ExperienceLevel::Executive => "6",
        }
    }
}

impl FromStr for ExperienceLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internship" => Ok(ExperienceLevel::Internship),
            "entry level" | "entry-level" | "entry" => Ok(ExperienceLevel::EntryLevel),
            "associate" => Ok(ExperienceLevel::Associate),
            "mid-senior level" | "mid-senior" | "mid senior" => Ok(ExperienceLevel::MidSenior),
            "director" => Ok(ExperienceLevel::Director),
            "executive" => Ok(ExperienceLevel::Executive),
            _ => Err(ValidationError::UnknownExperienceLevel(s.to_string())),
        }
    }
}

/// Employment type filter, encoded on the job site as `f_JT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "Full-time")]
    FullTime,
    #[serde(rename = "Part-time")]
    PartTime,
    Contract,
    Temporary,
    Volunteer,
    Internship,
}

impl JobType {
    pub fn site_code(self) -> &'static str {
        match self {
            JobType::FullTime => "F",
            JobType::PartTime => "P",
            JobType::Contract => "C",
            JobType::Temporary => "T",
            JobType::Volunteer => "V",
            JobType::Internship => "I",
        }
    }
}

impl FromStr for JobType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full-time" | "full time" | "fulltime" => Ok(JobType::FullTime),
            "part-time" | "part time" | "parttime" => Ok(JobType::PartTime),
            "contract" => Ok(JobType::Contract),
            "temporary" => Ok(JobType::Temporary),
            "volunteer" => Ok(JobType::Volunteer),
            "internship" => Ok(JobType::Internship),
            _ => Err(ValidationError::UnknownJobType(s.to_string())),
        }
    }
}

/// Request rejected before any step ran
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown search type '{0}'. Expected profile_resume, job_search or combined")]
    UnknownSearchType(String),

    #[error("Search type {search_type} requires {field}")]
    MissingSubConfig {
        search_type: SearchType,
        field: &'static str,
    },

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("At least one keyword is required")]
    EmptyKeywords,

    #[error("Keyword #{0} is blank")]
    BlankKeyword(usize),

    #[error("Company filter entry #{0} is blank")]
    BlankCompanyFilter(usize),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Unknown experience level '{0}'")]
    UnknownExperienceLevel(String),

    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("Unknown output format '{0}'. Expected markdown or json")]
    UnknownOutputFormat(String),
}

impl Classify for ValidationError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

fn default_true() -> bool {
    true
}
fn default_max_repos() -> i64 {
    10
}
fn default_max_results() -> i64 {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfigInput {
    pub username: String,
    #[serde(default = "default_true")]
    pub include_projects: bool,
    #[serde(default = "default_true")]
    pub include_contributions: bool,
    #[serde(default = "default_max_repos")]
    pub max_repos: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfigInput {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub experience_level: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: i64,
    #[serde(default)]
    pub company_filter: Option<Vec<String>>,
}

/// Unvalidated search request as received from the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub search_type: String,
    #[serde(default, alias = "github_config")]
    pub profile_config: Option<ProfileConfigInput>,
    #[serde(default, alias = "linkedin_config")]
    pub job_config: Option<JobConfigInput>,
    #[serde(default)]
    pub output_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileConfig {
    pub username: String,
    pub include_projects: bool,
    pub include_contributions: bool,
    pub max_repos: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobConfig {
    pub keywords: Vec<String>,
    pub location: Option<String>,
    pub experience_level: Option<ExperienceLevel>,
    pub job_type: Option<JobType>,
    pub max_results: u32,
    pub company_filter: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchKind {
    ProfileResume(ProfileConfig),
    JobSearch(JobConfig),
    Combined {
        profile: ProfileConfig,
        jobs: JobConfig,
    },
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub kind: SearchKind,
    pub output_format: OutputFormat,
}

impl SearchConfig {
    pub fn search_type(&self) -> SearchType {
        match self.kind {
            SearchKind::ProfileResume(_) => SearchType::ProfileResume,
            SearchKind::JobSearch(_) => SearchType::JobSearch,
            SearchKind::Combined { .. } => SearchType::Combined,
        }
    }

    pub fn profile(&self) -> Option<&ProfileConfig> {
        match &self.kind {
            SearchKind::ProfileResume(profile) | SearchKind::Combined { profile, .. } => {
                Some(profile)
            }
            SearchKind::JobSearch(_) => None,
        }
    }

    pub fn jobs(&self) -> Option<&JobConfig> {
        match &self.kind {
            SearchKind::JobSearch(jobs) | SearchKind::Combined { jobs, .. } => Some(jobs),
            SearchKind::ProfileResume(_) => None,
        }
    }

    /// One-line description used in the run's `started` event
    pub fn describe(&self) -> String {
        match &self.kind {
            SearchKind::ProfileResume(p) => format!("Generating resume for {}", p.username),
            SearchKind::JobSearch(j) => format!("Searching jobs for {}", j.keywords.join(", ")),
            SearchKind::Combined { profile, jobs } => format!(
                "Generating resume for {} and searching jobs for {}",
                profile.username,
                jobs.keywords.join(", ")
            ),
        }
    }
}

impl SearchRequest {
    /// The format the caller asked for, falling back to the default when
    /// absent or unrecognized
    pub fn requested_format(&self) -> OutputFormat {
        self.output_format
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }

    /// Validate and normalize into a [`SearchConfig`]
    pub fn validate(&self) -> Result<SearchConfig, ValidationError> {
        let search_type: SearchType = self.search_type.parse()?;
        let output_format = match &self.output_format {
            Some(raw) => raw.parse()?,
            None => OutputFormat::default(),
        };

        let profile = || {
            self.profile_config
                .as_ref()
                .ok_or(ValidationError::MissingSubConfig {
                    search_type,
                    field: "profile_config",
                })
                .and_then(validate_profile)
        };
        let jobs = || {
            self.job_config
                .as_ref()
                .ok_or(ValidationError::MissingSubConfig {
                    search_type,
                    field: "job_config",
                })
                .and_then(validate_jobs)
        };

        let kind = match search_type {
            SearchType::ProfileResume => SearchKind::ProfileResume(profile()?),
            SearchType::JobSearch => SearchKind::JobSearch(jobs()?),
            SearchType::Combined => SearchKind::Combined {
                profile: profile()?,
                jobs: jobs()?,
            },
        };

        Ok(SearchConfig {
            kind,
            output_format,
        })
    }

    /// Example request for `search_type`, ready to edit
    pub fn template(search_type: SearchType) -> SearchRequest {
        let profile = ProfileConfigInput {
            username: "octocat".to_string(),
            include_projects: true,
            include_contributions: true,
            max_repos: default_max_repos(),
        };
        let jobs = JobConfigInput {
            keywords: vec!["Python".to_string(), "Backend".to_string()],
            location: Some("San Francisco, CA".to_string()),
            experience_level: Some("Mid-Senior level".to_string()),
            job_type: Some("Full-time".to_string()),
            max_results: 10,
            company_filter: None,
        };

        SearchRequest {
            search_type: search_type.as_str().to_string(),
            profile_config: matches!(search_type, SearchType::ProfileResume | SearchType::Combined)
                .then_some(profile),
            job_config: matches!(search_type, SearchType::JobSearch | SearchType::Combined)
                .then_some(jobs),
            output_format: Some("markdown".to_string()),
        }
    }
}

fn check_range(field: &'static str, value: i64, max: i64) -> Result<u32, ValidationError> {
    if (1..=max).contains(&value) {
        Ok(value as u32)
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min: 1,
            max,
        })
    }
}

/// GitHub rules: 1-39 ASCII alphanumerics or hyphens, no leading or trailing hyphen
fn validate_username(raw: &str) -> Result<String, ValidationError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(ValidationError::InvalidUsername("username is empty".into()));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(ValidationError::InvalidUsername(format!(
            "longer than {MAX_USERNAME_LEN} characters"
        )));
    }
    if let Some(bad) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(ValidationError::InvalidUsername(format!(
            "unexpected character {bad:?}"
        )));
    }
    if username.starts_with('-') || username.ends_with('-') {
        return Err(ValidationError::InvalidUsername(
            "cannot start or end with '-'".into(),
        ));
    }
    Ok(username.to_string())
}

fn validate_profile(input: &ProfileConfigInput) -> Result<ProfileConfig, ValidationError> {
    Ok(ProfileConfig {
        username: validate_username(&input.username)?,
        include_projects: input.include_projects,
        include_contributions: input.include_contributions,
        max_repos: check_range("max_repos", input.max_repos, MAX_REPOS_LIMIT)?,
    })
}

fn validate_jobs(input: &JobConfigInput) -> Result<JobConfig, ValidationError> {
    if input.keywords.is_empty() {
        return Err(ValidationError::EmptyKeywords);
    }
    let keywords = input
        .keywords
        .iter()
        .enumerate()
        .map(|(i, k)| {
            let k = k.trim();
            if k.is_empty() {
                Err(ValidationError::BlankKeyword(i + 1))
            } else {
                Ok(k.to_string())
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let company_filter = input
        .company_filter
        .iter()
        .flatten()
        .enumerate()
        .map(|(i, c)| {
            let c = c.trim();
            if c.is_empty() {
                Err(ValidationError::BlankCompanyFilter(i + 1))
            } else {
                Ok(c.to_string())
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let non_blank = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    Ok(JobConfig {
        keywords,
        location: non_blank(&input.location),
        experience_level: non_blank(&input.experience_level)
            .map(|v| v.parse::<ExperienceLevel>())
            .transpose()?,
        job_type: non_blank(&input.job_type)
            .map(|v| v.parse::<JobType>())
            .transpose()?,
        max_results: check_range("max_results", input.max_results, MAX_RESULTS_LIMIT)?,
        company_filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> SearchRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn profile_request_gets_defaults() {
        let config = request(json!({
            "search_type": "profile_resume",
            "profile_config": {"username": "  octocat "}
        }))
        .validate()
        .unwrap();

        let profile = config.profile().unwrap();
        assert_eq!(profile.username, "octocat");
        assert!(profile.include_projects);
        assert!(profile.include_contributions);
        assert_eq!(profile.max_repos, 10);
        assert_eq!(config.output_format, OutputFormat::Markdown);
        assert!(config.jobs().is_none());
    }

    #[test]
    fn legacy_names_are_accepted() {
        let config = request(json!({
            "search_type": "linkedin_jobs",
            "linkedin_config": {
                "keywords": ["Rust"],
                "experience_level": "Mid-Senior",
                "job_type": "Full-time"
            },
            "output_format": "json"
        }))
        .validate()
        .unwrap();

        let jobs = config.jobs().unwrap();
        assert_eq!(config.search_type(), SearchType::JobSearch);
        assert_eq!(jobs.experience_level, Some(ExperienceLevel::MidSenior));
        assert_eq!(jobs.experience_level.unwrap().site_code(), "4");
        assert_eq!(jobs.job_type.unwrap().site_code(), "F");
        assert_eq!(jobs.max_results, 20);
        assert_eq!(config.output_format, OutputFormat::Json);
    }

    #[test]
    fn combined_requires_both_sub_configs() {
        let err = request(json!({
            "search_type": "combined",
            "profile_config": {"username": "octocat"}
        }))
        .validate()
        .unwrap_err();

        assert_eq!(
            err,
            ValidationError::MissingSubConfig {
                search_type: SearchType::Combined,
                field: "job_config"
            }
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn rejects_bad_fields() {
        let cases = [
            json!({"search_type": "resume"}),
            json!({"search_type": "job_search", "job_config": {"keywords": []}}),
            json!({"search_type": "job_search", "job_config": {"keywords": ["Rust", "  "]}}),
            json!({"search_type": "job_search", "job_config": {"keywords": ["Rust"], "max_results": 0}}),
            json!({"search_type": "job_search", "job_config": {"keywords": ["Rust"], "job_type": "Gig"}}),
            json!({"search_type": "job_search", "job_config": {"keywords": ["Rust"], "company_filter": [""]}}),
            json!({"search_type": "profile_resume", "profile_config": {"username": "octo cat"}}),
            json!({"search_type": "profile_resume", "profile_config": {"username": "-octocat"}}),
            json!({"search_type": "profile_resume", "profile_config": {"username": "octocat", "max_repos": -1}}),
            json!({"search_type": "profile_resume", "profile_config": {"username": "octocat"}, "output_format": "pdf"}),
        ];

        for case in cases {
            let result = request(case.clone()).validate();
            assert!(result.is_err(), "expected rejection for {case}");
        }
    }

    #[test]
    fn overlong_username_is_rejected() {
        let name = "a".repeat(40);
        let err = request(json!({
            "search_type": "profile_resume",
            "profile_config": {"username": name}
        }))
        .validate()
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUsername(_)));
    }

    #[test]
    fn templates_validate() {
        for search_type in [
            SearchType::ProfileResume,
            SearchType::JobSearch,
            SearchType::Combined,
        ] {
            let config = SearchRequest::template(search_type).validate().unwrap();
            assert_eq!(config.search_type(), search_type);
        }
    }
}
