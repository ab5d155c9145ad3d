//! Job card extraction
//!
//! Each card is tried against three strategies in order: structural class
//! selectors, semantic attributes, then a text heuristic over the card's
//! visible lines. The first strategy that yields a well-formed record wins.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::trace;
use url::Url;

use super::scrape::JobRecord;
use super::{AgentError, AgentResult};

const CARD_SELECTOR: &str = ".job-search-card, .base-search-card, .job-card-container, \
     .jobs-search-results__list-item, [data-entity-urn*=\"jobPosting\"], [data-job-id], \
     [data-occludable-job-id], ul.jobs-search__results-list > li";

const HEADING_SELECTOR: &str = "h1, h2, h3, h4";
const JOB_VIEW_PATH: &str = "/jobs/view/";
const JOB_ID_PARAM: &str = "currentJobId";
const HEURISTIC_LINK_SELECTOR: &str = "a[href*=\"/jobs/\"]";

/// Card text that never names a company or a location
const NOISE_LINES: &[&str] = &[
    "promoted",
    "easy apply",
    "actively recruiting",
    "be an early applicant",
    "new",
    "save",
    "apply",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Structural,
    Attribute,
    TextHeuristic,
}

struct FieldSelectors {
    title: Vec<Selector>,
    company: Vec<Selector>,
    location: Vec<Selector>,
    link: Vec<Selector>,
    description: Vec<Selector>,
    posted: Vec<Selector>,
}

enum Strategy {
    Fields(StrategyKind, FieldSelectors),
    TextHeuristic { heading: Selector, link: Selector },
}

impl Strategy {
    fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Fields(kind, _) => *kind,
            Strategy::TextHeuristic { .. } => StrategyKind::TextHeuristic,
        }
    }
}

#[derive(Debug, Default)]
struct RawFields {
    title: Option<String>,
    company: Option<String>,
    location: Option<String>,
    href: Option<String>,
    description: Option<String>,
    posted: Option<String>,
}

/// Ordered selector strategies for job cards
pub struct SelectorChain {
    cards: Selector,
    strategies: Vec<Strategy>,
}

impl SelectorChain {
    pub fn job_cards() -> AgentResult<Self> {
        let structural = FieldSelectors {
            title: parse_all(&[
                ".base-search-card__title",
                ".job-search-card__title",
                ".job-card-list__title",
                ".job-card-container__link strong",
            ])?,
            company: parse_all(&[
                ".base-search-card__subtitle",
                ".job-search-card__subtitle-link",
                ".job-card-container__company-name",
                ".artdeco-entity-lockup__subtitle",
            ])?,
            location: parse_all(&[
                ".job-search-card__location",
                ".job-card-container__metadata-item",
                ".artdeco-entity-lockup__caption",
            ])?,
            link: parse_all(&[
                "a.base-card__full-link",
                "a.job-card-container__link",
                "a.job-card-list__title",
            ])?,
            description: parse_all(&[".job-search-card__snippet", ".job-card-list__insight"])?,
            posted: parse_all(&[
                "time.job-search-card__listdate",
                "time.job-search-card__listdate--new",
            ])?,
        };

        let attribute = FieldSelectors {
            title: parse_all(&["[itemprop=\"title\"]", "[data-test-job-title]", "[data-job-title]"])?,
            company: parse_all(&[
                "[itemprop=\"hiringOrganization\"]",
                "[data-test-company-name]",
                "[data-company-name]",
            ])?,
            location: parse_all(&[
                "[itemprop=\"jobLocation\"]",
                "[data-test-job-location]",
                "[data-job-location]",
            ])?,
            link: parse_all(&["a[data-job-link]", "a[itemprop=\"url\"]", "a[href*=\"/jobs/view/\"]"])?,
            description: parse_all(&["[itemprop=\"description\"]", "[data-job-description]"])?,
            posted: parse_all(&["[itemprop=\"datePosted\"]", "time[datetime]"])?,
        };

        Ok(Self {
            cards: parse(CARD_SELECTOR)?,
            strategies: vec![
                Strategy::Fields(StrategyKind::Structural, structural),
                Strategy::Fields(StrategyKind::Attribute, attribute),
                Strategy::TextHeuristic {
                    heading: parse(HEADING_SELECTOR)?,
                    link: parse(HEURISTIC_LINK_SELECTOR)?,
                },
            ],
        })
    }

    /// Extract well-formed records from `html` in document order
    ///
    /// Links are resolved against `base` and stripped of query and fragment.
    /// Cards repeated in the markup (nested matches) yield one record.
    pub fn extract(&self, html: &str, base: &Url) -> Vec<JobRecord> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for card in document.select(&self.cards) {
            let Some((kind, record)) = self.extract_card(card, base) else {
                trace!("Skipping card that matched no strategy");
                continue;
            };
            if seen.insert(record.url.clone()) {
                trace!("Card extracted with {:?} strategy: {}", kind, record.url);
                records.push(record);
            }
        }
        records
    }

    fn extract_card(&self, card: ElementRef<'_>, base: &Url) -> Option<(StrategyKind, JobRecord)> {
        self.strategies.iter().find_map(|strategy| {
            let raw = match strategy {
                Strategy::Fields(_, fields) => fields_from_selectors(card, fields),
                Strategy::TextHeuristic { heading, link } => fields_from_text(card, heading, link),
            };
            into_record(raw, base).map(|record| (strategy.kind(), record))
        })
    }
}

fn parse(selector: &str) -> AgentResult<Selector> {
    Selector::parse(selector).map_err(|e| AgentError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn parse_all(selectors: &[&str]) -> AgentResult<Vec<Selector>> {
    selectors.iter().map(|s| parse(s)).collect()
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = collapse(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn first_text(card: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .flat_map(|sel| card.select(sel))
        .find_map(element_text)
}

fn first_href(card: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .flat_map(|sel| card.select(sel))
        .find_map(|a| a.value().attr("href").map(str::to_string))
}

fn first_posted(card: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors.iter().flat_map(|sel| card.select(sel)).find_map(|el| {
        el.value()
            .attr("datetime")
            .map(str::to_string)
            .or_else(|| element_text(el))
    })
}

fn fields_from_selectors(card: ElementRef<'_>, fields: &FieldSelectors) -> RawFields {
    RawFields {
        title: first_text(card, &fields.title),
        company: first_text(card, &fields.company),
        location: first_text(card, &fields.location),
        href: first_href(card, &fields.link),
        description: first_text(card, &fields.description),
        posted: first_posted(card, &fields.posted),
    }
}

fn is_noise(line: &str) -> bool {
    let lowered = line.to_ascii_lowercase();
    NOISE_LINES.contains(&lowered.as_str())
}

fn looks_like_date(line: &str) -> bool {
    let lowered = line.to_ascii_lowercase();
    lowered.ends_with(" ago") || lowered.starts_with("posted") || lowered == "today"
}

/// Heading (or link text) as title, then the next visible lines as company and location
fn fields_from_text(card: ElementRef<'_>, heading: &Selector, link: &Selector) -> RawFields {
    let anchor = card.select(link).next();
    let href = anchor.and_then(|a| a.value().attr("href").map(str::to_string));
    let link_text = anchor.and_then(element_text);
    let title = card
        .select(heading)
        .find_map(element_text)
        .or_else(|| link_text.clone());

    let lines: Vec<String> = card
        .text()
        .map(collapse)
        .filter(|line| !line.is_empty())
        .collect();

    let posted = lines.iter().find(|line| looks_like_date(line)).cloned();
    let (company, location) = {
        let mut rest = lines.into_iter().filter(|line| {
            Some(line) != title.as_ref()
                && Some(line) != link_text.as_ref()
                && !is_noise(line)
                && !looks_like_date(line)
        });
        (rest.next(), rest.next())
    };

    RawFields {
        company,
        location,
        title,
        href,
        description: None,
        posted,
    }
}

/// Absolute link without tracking parameters
///
/// Search-page links carry the posting only in `currentJobId`; that one
/// parameter survives when the path names no job.
fn canonical_url(href: &str, base: &Url) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let job_id = if url.path().contains(JOB_VIEW_PATH) {
        None
    } else {
        url.query_pairs()
            .find(|(key, _)| key == JOB_ID_PARAM)
            .map(|(_, id)| id.into_owned())
    };
    url.set_query(None);
    url.set_fragment(None);
    if let Some(id) = job_id {
        url.query_pairs_mut().append_pair(JOB_ID_PARAM, &id);
    }
    Some(url)
}

/// Title, company and a resolvable link make a record well-formed
fn into_record(raw: RawFields, base: &Url) -> Option<JobRecord> {
    let title = raw.title.filter(|t| !t.is_empty())?;
    let company = raw.company.filter(|c| !c.is_empty())?;
    let url = canonical_url(raw.href.as_deref()?, base)?;

    Some(JobRecord {
        title,
        company,
        location: raw.location.unwrap_or_default(),
        url: url.to_string(),
        description: raw.description,
        posted_date: raw.posted,
        source: JobRecord::SOURCE.to_string(),
        authenticated_search: false,
    })
}
