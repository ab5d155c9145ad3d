use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use scraper::{Html, Selector};

use super::{AgentError, AgentResult, JobSearchAgent};
use crate::capabilities::LlmContext;

const DEFAULT_SCROLL_PX: i64 = 500;
const MAX_SCROLL_PX: i64 = 10_000;
const MAX_WAIT: Duration = Duration::from_secs(10);
const MAX_EXTRACT_CHARS: usize = 4_000;

const ACTION_PROMPT: &str = "You control a web browser. The attached screenshot shows the current page.\n\
Instruction: {instruction}\n\n\
Reply with one JSON object and nothing else:\n\
{\"action_type\": \"click|type|scroll|navigate|extract|wait\", \
\"details\": {\"selector\": \"...\", \"text\": \"...\", \"direction\": \"up|down\", \
\"amount\": 500, \"url\": \"...\", \"seconds\": 1}, \"reasoning\": \"...\"}";

/// A single browser operation chosen by the LLM
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserAction {
    Click { selector: String },
    Type { selector: String, text: String },
    Scroll { dy: i64 },
    Navigate { url: Url },
    /// Text of `selector`, or the whole page when absent
    Extract { selector: Option<String> },
    Wait { duration: Duration },
    /// The model answered in prose instead of JSON
    Answer(String),
}

#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    action_type: String,
    #[serde(default)]
    details: Map<String, Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn json_object(reply: &str) -> Option<&str> {
    let body = strip_code_fence(reply);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

fn detail_str<'a>(details: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    details
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn detail_i64(details: &Map<String, Value>, key: &str) -> Option<i64> {
    details.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn required<'a>(details: &'a Map<String, Value>, action: &str, key: &str) -> AgentResult<&'a str> {
    detail_str(details, key)
        .ok_or_else(|| AgentError::InvalidAction(format!("'{action}' needs details.{key}")))
}

/// Interpret an LLM reply as a [`BrowserAction`]
///
/// Replies without a JSON object become [`BrowserAction::Answer`].
pub fn parse_action(reply: &str) -> AgentResult<BrowserAction> {
    let Some(envelope) = json_object(reply)
        .and_then(|raw| serde_json::from_str::<ActionEnvelope>(raw).ok())
    else {
        return Ok(BrowserAction::Answer(reply.trim().to_string()));
    };

    if let Some(reasoning) = &envelope.reasoning {
        debug!("Model reasoning: {}", reasoning);
    }

    let details = &envelope.details;
    let action = envelope.action_type.trim().to_ascii_lowercase();
    match action.as_str() {
        "click" => Ok(BrowserAction::Click {
            selector: required(details, "click", "selector")?.to_string(),
        }),
        "type" => Ok(BrowserAction::Type {
            selector: required(details, "type", "selector")?.to_string(),
            text: details
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| AgentError::InvalidAction("'type' needs details.text".into()))?
                .to_string(),
        }),
        "scroll" => {
            let requested = detail_i64(details, "amount").unwrap_or(DEFAULT_SCROLL_PX);
            let amount = requested.clamp(1, MAX_SCROLL_PX);
            if amount != requested {
                warn!(
                    "Scroll amount {} out of range [1, {}], clamped to {}",
                    requested, MAX_SCROLL_PX, amount
                );
            }
            let dy = match detail_str(details, "direction") {
                Some("up") => -amount,
                _ => amount,
            };
            Ok(BrowserAction::Scroll { dy })
        }
        "navigate" => {
            let raw = required(details, "navigate", "url")?;
            let url = Url::parse(raw)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .ok_or_else(|| AgentError::InvalidAction(format!("not a web URL: {raw}")))?;
            Ok(BrowserAction::Navigate { url })
        }
        "extract" => Ok(BrowserAction::Extract {
            selector: detail_str(details, "selector").map(str::to_string),
        }),
        "wait" => {
            let seconds = detail_i64(details, "seconds").unwrap_or(1).max(0) as u64;
            Ok(BrowserAction::Wait {
                duration: Duration::from_secs(seconds).min(MAX_WAIT),
            })
        }
        other => Err(AgentError::InvalidAction(format!("unknown action '{other}'"))),
    }
}

/// Text under `selector`, or the page as markdown
fn extract_text(html: &str, selector: Option<&str>) -> AgentResult<String> {
    let text = match selector {
        Some(raw) => {
            let selector = Selector::parse(raw).map_err(|e| AgentError::Selector {
                selector: raw.to_string(),
                reason: e.to_string(),
            })?;
            let document = Html::parse_document(html);
            document
                .select(&selector)
                .map(|el| el.text().collect::<Vec<_>>().join(" "))
                .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        }
        None => html2md::parse_html(html).trim().to_string(),
    };

    Ok(if text.chars().count() > MAX_EXTRACT_CHARS {
        let mut cut: String = text.chars().take(MAX_EXTRACT_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        text
    })
}

impl JobSearchAgent {
    /// Navigate to an arbitrary web page
    pub async fn open_page(&mut self, url: &str) -> AgentResult<()> {
        self.ensure_usable()?;
        let url = Url::parse(url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| AgentError::InvalidAction(format!("not a web URL: {url}")))?;
        self.pace().await;
        self.goto(&url).await
    }

    /// Let the LLM pick one browser action for `instruction` and run it
    ///
    /// Returns a short description of what happened, or the extracted text.
    pub async fn execute_natural_language_action(&mut self, instruction: &str) -> AgentResult<String> {
        self.ensure_usable()?;

        let screenshot = self.browser.screenshot().await.map_err(AgentError::Browser)?;
        let prompt = ACTION_PROMPT.replace("{instruction}", instruction);
        let reply = self
            .llm
            .complete(&prompt, Some(&LlmContext::with_screenshot(screenshot)))
            .await
            .map_err(AgentError::Llm)?;

        let action = parse_action(&reply)?;
        info!("Executing browser action: {:?}", action);

        match action {
            BrowserAction::Click { selector } => {
                self.pace().await;
                self.browser.click(&selector).await.map_err(AgentError::Browser)?;
                self.settle().await?;
                Ok(format!("Clicked {selector}"))
            }
            BrowserAction::Type { selector, text } => {
                self.browser
                    .type_text(&selector, &text)
                    .await
                    .map_err(AgentError::Browser)?;
                Ok(format!("Typed {} characters into {selector}", text.chars().count()))
            }
            BrowserAction::Scroll { dy } => {
                self.pace().await;
                self.browser.scroll_by(dy).await.map_err(AgentError::Browser)?;
                self.settle().await?;
                Ok(format!("Scrolled by {dy}px"))
            }
            BrowserAction::Navigate { url } => {
                self.pace().await;
                self.goto(&url).await?;
                Ok(format!("Navigated to {url}"))
            }
            BrowserAction::Extract { selector } => {
                let snapshot = self.browser.read_dom().await.map_err(AgentError::Browser)?;
                extract_text(&snapshot.html, selector.as_deref())
            }
            BrowserAction::Wait { duration } => {
                tokio::time::sleep(duration).await;
                Ok(format!("Waited {}s", duration.as_secs()))
            }
            BrowserAction::Answer(text) => Ok(text),
        }
    }
}
