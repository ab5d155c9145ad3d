use scraper::{Html, Selector};
use tracing::{info, warn};

use super::{AgentError, AgentResult, Credentials, JobSearchAgent, SessionState};

const LOGIN_PATH: &str = "/login";
const USERNAME_FIELD: &str = "input[name=\"session_key\"]";
const PASSWORD_FIELD: &str = "input[name=\"session_password\"]";
const SUBMIT_BUTTON: &str = "button[type=\"submit\"]";

/// Markers of a captcha, checkpoint or second-factor prompt
const CHALLENGE_URL_MARKERS: &[(&str, &str)] = &[
    ("/checkpoint", "security checkpoint"),
    ("/challenge", "security challenge"),
    ("captcha", "captcha"),
    ("two-step", "two-step verification"),
];
const CHALLENGE_ELEMENTS: &[(&str, &str)] = &[
    ("#captcha-internal", "captcha"),
    ("iframe[src*=\"captcha\"]", "captcha"),
    ("form#two-step-challenge", "two-step verification"),
    ("#input__phone_verification_pin", "phone verification"),
    ("#input__email_verification_pin", "email verification"),
    ("input[name=\"pin\"]", "verification code"),
];
const LOGIN_ERROR_ELEMENTS: &[&str] = &[
    "#error-for-username",
    "#error-for-password",
    ".form__label--error",
    "[role=\"alert\"].alert-content",
];
const SIGNED_IN_PATHS: &[&str] = &["/feed", "/mynetwork", "/jobs", "/in/", "/messaging"];
const LOGIN_PATHS: &[&str] = &["/login", "/uas/login"];

/// How the site responded to a login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    /// Captcha, checkpoint or 2FA prompt. Carries a short description.
    Challenge(String),
    InvalidCredentials,
}

/// Classify the page reached after submitting the login form
///
/// Challenge indicators win, then explicit form errors. A page that is
/// neither a challenge nor the login form counts as signed in.
pub fn classify_login(url: &str, html: &str) -> LoginOutcome {
    let document = Html::parse_document(html);
    if let Some(reason) = challenge_reason(url, &document) {
        return LoginOutcome::Challenge(reason.to_string());
    }

    if LOGIN_ERROR_ELEMENTS
        .iter()
        .any(|selector| has_element(&document, selector))
    {
        return LoginOutcome::InvalidCredentials;
    }

    let path = url_path(url);
    if SIGNED_IN_PATHS.iter().any(|p| path.starts_with(p)) {
        return LoginOutcome::Success;
    }
    if LOGIN_PATHS.iter().any(|p| path.starts_with(p)) {
        return LoginOutcome::InvalidCredentials;
    }
    LoginOutcome::Success
}

/// Shared with block detection while scraping
pub(super) fn challenge_reason(url: &str, document: &Html) -> Option<&'static str> {
    let path = url_path(url);
    CHALLENGE_URL_MARKERS
        .iter()
        .find(|(marker, _)| path.contains(marker))
        .or_else(|| {
            CHALLENGE_ELEMENTS
                .iter()
                .find(|(selector, _)| has_element(document, selector))
        })
        .map(|(_, reason)| *reason)
}

pub(super) fn has_element(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false)
}

pub(super) fn url_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase())
}

impl JobSearchAgent {
    /// Sign in with `credentials`
    ///
    /// Idempotent once authenticated. A challenge page or a rejected login
    /// leaves the session open but anonymous.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> AgentResult<()> {
        self.ensure_usable()?;
        if self.state == SessionState::Authenticated {
            return Ok(());
        }

        let login_url = self
            .base_url
            .join(LOGIN_PATH)
            .map_err(|e| AgentError::Config(format!("login url: {e}")))?;

        self.pace().await;
        self.goto(&login_url).await?;

        info!("Submitting login form");
        self.browser
            .type_text(USERNAME_FIELD, credentials.username())
            .await
            .map_err(AgentError::Browser)?;
        self.browser
            .type_text(PASSWORD_FIELD, credentials.password())
            .await
            .map_err(AgentError::Browser)?;
        self.pace().await;
        self.browser
            .click(SUBMIT_BUTTON)
            .await
            .map_err(AgentError::Browser)?;
        self.settle().await?;

        let snapshot = self.browser.read_dom().await.map_err(AgentError::Browser)?;
        let landed = match snapshot.url {
            Some(url) => url,
            None => self
                .browser
                .current_url()
                .await
                .map_err(AgentError::Browser)?
                .unwrap_or_default(),
        };
        self.last_url = Some(landed.clone());

        match classify_login(&landed, &snapshot.html) {
            LoginOutcome::Success => {
                self.state = SessionState::Authenticated;
                info!("Login succeeded");
                Ok(())
            }
            LoginOutcome::Challenge(reason) => {
                self.state = SessionState::Anonymous;
                warn!("Login interrupted by {}", reason);
                Err(AgentError::AuthChallenge(reason))
            }
            LoginOutcome::InvalidCredentials => {
                self.state = SessionState::Anonymous;
                warn!("Login rejected");
                Err(AgentError::InvalidCredentials)
            }
        }
    }
}
