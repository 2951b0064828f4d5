//! Headline curation heuristics.
//!
//! Google News mixes in a lot of material that is no use to a young reader:
//! match reports, market moves and TV recaps. These are dropped by keyword
//! matching on the title, by URL path hints and by known single-topic
//! sources. An optional whitelist restricts the feed to trusted outlets.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::FilterConfig;
use crate::db::NewHeadline;

const SPORTS_KEYWORDS: &[&str] = &[
    "nfl", "nba", "mlb", "nhl", "mls", "wnba", "ncaa", "fifa", "uefa", "pga", "nascar",
    "formula 1", "f1", "ufc", "super bowl", "world series", "stanley cup", "world cup",
    "premier league", "champions league", "playoff", "playoffs", "quarterback", "touchdown",
    "home run", "slam dunk", "grand slam", "free agent", "draft pick", "transfer window",
    "head coach", "tennis", "golf", "boxing", "wrestlemania", "lakers", "yankees",
    "dodgers", "cowboys", "patriots", "warriors", "chiefs",
];

const SPORTS_SOURCES: &[&str] = &[
    "espn", "bleacher report", "sports illustrated", "cbs sports", "fox sports",
    "nbc sports", "yahoo sports", "the athletic", "sb nation", "247sports", "on3",
];

const FINANCE_KEYWORDS: &[&str] = &[
    "stock", "stocks", "shares", "dow", "nasdaq", "s&p 500", "wall street", "earnings",
    "investors", "ipo", "dividend", "market cap", "bond yields", "treasury yields",
    "bitcoin", "crypto", "cryptocurrency", "quarterly results", "hedge fund",
];

const FINANCE_SOURCES: &[&str] = &[
    "motley fool", "the motley fool", "marketwatch", "barron's", "investopedia", "benzinga",
    "seeking alpha", "zacks", "tipranks", "thestreet", "investor's business daily",
];

const TV_KEYWORDS: &[&str] = &[
    "season finale", "season premiere", "episode", "recap", "showrunner",
    "renewed for season", "reality tv", "bachelor", "bachelorette", "survivor", "big brother", "love island",
    "dancing with the stars", "american idol", "the voice", "jeopardy", "snl",
    "saturday night live", "tv series", "emmy", "emmys",
];

const TV_SOURCES: &[&str] = &[
    "tvline", "tv insider", "tv guide", "entertainment weekly", "screen rant", "collider",
    "soap hub", "e! online",
];

const SPORTS_PATHS: &[&str] = &["/sports/", "/sport/", "/nfl/", "/nba/", "/mlb/", "/soccer/"];
const FINANCE_PATHS: &[&str] = &["/markets/", "/investing/", "/personal-finance/", "/stocks/"];
const TV_PATHS: &[&str] = &["/tv/", "/television/", "/entertainment/tv"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Sports,
    Finance,
    Tv,
    Keyword,
    Source(String),
    Stale,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Reject(RejectReason),
}

/// Split a Google News title of the form `Headline - Source`.
pub fn split_source(title: &str) -> (&str, Option<&str>) {
    match title.rsplit_once(" - ") {
        Some((head, source)) if !head.trim().is_empty() && !source.trim().is_empty() => {
            (head.trim(), Some(source.trim()))
        }
        _ => (title.trim(), None),
    }
}

/// Lowercase, drop punctuation and collapse whitespace. Two titles that
/// normalize equal are the same story. Expects a title whose source suffix
/// has already been split off.
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| *c != '\'' && *c != '\u{2019}')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

static URL_DATE_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        r"/(\d{4})/(\d{1,2})/(\d{1,2})(?:[/\-_.]|$)",
        r"/(\d{4})-(\d{2})-(\d{2})(?:[/\-_.]|$)",
        r"[/\-_](\d{4})(\d{2})(\d{2})(?:[/\-_.]|$)",
    ]
    .map(|pattern| Regex::new(pattern).expect("URL date pattern is valid"))
});

/// Pull a publication date out of common URL layouts: `/2024/05/06/`,
/// `/2024-05-06-slug` and `/20240506/`.
pub fn extract_date_from_url(url: &str) -> Option<DateTime<Utc>> {
    for re in URL_DATE_PATTERNS.iter() {
        for caps in re.captures_iter(url) {
            let year: i32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            let day: u32 = caps[3].parse().ok()?;
            if !(1990..=2100).contains(&year) {
                continue;
            }
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            }
        }
    }
    None
}

fn keyword_regex(words: &[&str]) -> anyhow::Result<Regex> {
    let alternation = words
        .iter()
        .map(|w| regex::escape(&w.to_lowercase()))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))?)
}

fn source_listed(source: Option<&str>, list: &[&str]) -> bool {
    let Some(source) = source else {
        return false;
    };
    let source = source.trim().to_lowercase();
    list.iter().any(|s| source == *s || source.starts_with(&format!("{} ", s)))
}

fn path_hinted(url: &str, paths: &[&str]) -> bool {
    let url = url.to_lowercase();
    paths.iter().any(|p| url.contains(p))
}

pub struct HeadlineFilter {
    sports: Regex,
    finance: Regex,
    tv: Regex,
    extra: Option<Regex>,
    allowed_sources: Vec<String>,
    config: FilterConfig,
    max_age: Duration,
}

impl HeadlineFilter {
    pub fn new(config: &FilterConfig, max_age_hours: i64) -> anyhow::Result<Self> {
        let extra_words: Vec<&str> = config
            .extra_excluded_keywords
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        let extra = if extra_words.is_empty() {
            None
        } else {
            Some(keyword_regex(&extra_words)?)
        };

        Ok(Self {
            sports: keyword_regex(SPORTS_KEYWORDS)?,
            finance: keyword_regex(FINANCE_KEYWORDS)?,
            tv: keyword_regex(TV_KEYWORDS)?,
            extra,
            allowed_sources: config
                .allowed_sources
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
            config: config.clone(),
            max_age: Duration::hours(max_age_hours),
        })
    }

    pub fn is_sports_story(&self, title: &str, url: &str, source: Option<&str>) -> bool {
        self.sports.is_match(title)
            || path_hinted(url, SPORTS_PATHS)
            || source_listed(source, SPORTS_SOURCES)
    }

    pub fn is_finance_story(&self, title: &str, url: &str, source: Option<&str>) -> bool {
        self.finance.is_match(title)
            || path_hinted(url, FINANCE_PATHS)
            || source_listed(source, FINANCE_SOURCES)
    }

    pub fn is_tv_story(&self, title: &str, url: &str, source: Option<&str>) -> bool {
        self.tv.is_match(title) || path_hinted(url, TV_PATHS) || source_listed(source, TV_SOURCES)
    }

    /// An empty whitelist admits every source. Headlines without a source
    /// only pass an empty whitelist.
    pub fn is_allowed_source(&self, source: Option<&str>) -> bool {
        if self.allowed_sources.is_empty() {
            return true;
        }
        let Some(source) = source else {
            return false;
        };
        let source = source.trim().to_lowercase();
        self.allowed_sources
            .iter()
            .any(|allowed| source == *allowed || source.starts_with(&format!("{} ", allowed)))
    }

    /// `headline.title` is the title with its source suffix already split off.
    pub fn evaluate(&self, headline: &NewHeadline, now: DateTime<Utc>) -> Verdict {
        let title = headline.title.trim();
        if title.is_empty() {
            return Verdict::Reject(RejectReason::Empty);
        }
        let source = headline.source.as_deref();
        let url = headline.url.as_str();

        if !self.is_allowed_source(source) {
            return Verdict::Reject(RejectReason::Source(source.unwrap_or_default().to_string()));
        }
        if let Some(published) = headline.published {
            if now - published > self.max_age {
                return Verdict::Reject(RejectReason::Stale);
            }
        }
        if self.config.exclude_sports && self.is_sports_story(title, url, source) {
            return Verdict::Reject(RejectReason::Sports);
        }
        if self.config.exclude_finance && self.is_finance_story(title, url, source) {
            return Verdict::Reject(RejectReason::Finance);
        }
        if self.config.exclude_tv && self.is_tv_story(title, url, source) {
            return Verdict::Reject(RejectReason::Tv);
        }
        if self.extra.as_ref().is_some_and(|re| re.is_match(title)) {
            return Verdict::Reject(RejectReason::Keyword);
        }
        Verdict::Keep
    }

    /// Drop rejected headlines and duplicates, keeping the first occurrence
    /// of each normalized title or URL.
    pub fn apply(&self, headlines: Vec<NewHeadline>, now: DateTime<Utc>) -> Vec<NewHeadline> {
        let mut seen_titles = HashSet::new();
        let mut seen_urls = HashSet::new();

        headlines
            .into_iter()
            .filter(|h| match self.evaluate(h, now) {
                Verdict::Keep => true,
                Verdict::Reject(reason) => {
                    tracing::debug!("Dropping '{}': {:?}", h.title, reason);
                    false
                }
            })
            .filter(|h| {
                let key = normalize_title(&h.title);
                if seen_titles.contains(&key) || seen_urls.contains(&h.url) {
                    return false;
                }
                seen_titles.insert(key);
                seen_urls.insert(h.url.clone());
                true
            })
            .collect()
    }
}
