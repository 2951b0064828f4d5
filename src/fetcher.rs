use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::db::{Database, Feed, NewHeadline};
use crate::filter::{extract_date_from_url, split_source, HeadlineFilter};
use crate::retry::{retry_fixed, RetryPolicy};

pub struct Fetcher {
    client: Client,
    db: Arc<Database>,
    filter: HeadlineFilter,
    retry: RetryPolicy,
    refreshing: Arc<RwLock<bool>>,
}

impl Fetcher {
    pub fn new(db: Arc<Database>, filter: HeadlineFilter, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("FiveNews/1.0 (Headline Fetcher)")
            .build()?;

        Ok(Self {
            client,
            db,
            filter,
            retry,
            refreshing: Arc::new(RwLock::new(false)),
        })
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Refresh every configured feed. Returns the number of new headlines;
    /// a call made while another refresh is running does nothing.
    pub async fn refresh_all_feeds(&self) -> anyhow::Result<usize> {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return Ok(0);
            }
            *refreshing = true;
        }

        let result = self.do_refresh_all().await;

        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        result
    }

    async fn do_refresh_all(&self) -> anyhow::Result<usize> {
        let feeds = self.db.get_all_feeds().await?;
        info!("Refreshing {} feeds", feeds.len());

        let mut added = 0;
        for feed in feeds {
            match self.refresh_feed(&feed).await {
                Ok(count) => {
                    added += count;
                    let _ = self.db.update_feed_fetched(feed.id, None).await;
                }
                Err(e) => {
                    error!("Failed to refresh feed '{}': {}", feed.name, e);
                    let _ = self
                        .db
                        .update_feed_fetched(feed.id, Some(&e.to_string()))
                        .await;
                }
            }
        }

        info!("Feed refresh complete, {} new headlines", added);
        Ok(added)
    }

    async fn refresh_feed(&self, feed: &Feed) -> anyhow::Result<usize> {
        info!("Fetching feed: {} ({})", feed.name, feed.url);

        let scraped = self.fetch_feed(&feed.url).await?;
        let total = scraped.len();
        let kept = self.filter.apply(scraped, Utc::now());
        info!(
            "Feed '{}': kept {} of {} headlines after filtering",
            feed.name,
            kept.len(),
            total
        );

        let mut inserted = 0;
        for headline in &kept {
            if self.db.upsert_headline(feed.id, headline).await? {
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    /// Download and parse one RSS feed, retrying transport failures with a
    /// fixed delay.
    pub async fn fetch_feed(&self, url: &str) -> anyhow::Result<Vec<NewHeadline>> {
        let client = &self.client;
        let bytes = retry_fixed(self.retry, url, |_: &anyhow::Error| true, move || async move {
            let response = client.get(url).send().await?.error_for_status()?;
            Ok::<_, anyhow::Error>(response.bytes().await?)
        })
        .await?;

        Self::parse_headlines(&bytes)
    }

    /// Map feed entries to headlines. Google News titles carry the outlet as
    /// a ` - Source` suffix; the `<source>` element is the fallback.
    pub fn parse_headlines(bytes: &[u8]) -> anyhow::Result<Vec<NewHeadline>> {
        let sources = Self::extract_sources_from_xml(bytes);
        let parsed = parser::parse(bytes)?;

        let mut headlines = Vec::new();
        for entry in parsed.entries {
            let raw_title = entry
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();

            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();

            if link.is_empty() {
                warn!("Skipping entry with no link: {}", raw_title);
                continue;
            }

            let (title, suffix_source) = split_source(&raw_title);
            let source = suffix_source
                .map(|s| s.to_string())
                .or_else(|| sources.get(&link).cloned());

            let published: Option<DateTime<Utc>> = entry
                .published
                .or(entry.updated)
                .or_else(|| extract_date_from_url(&link));

            headlines.push(NewHeadline {
                title: title.to_string(),
                url: link,
                source,
                published,
            });
        }

        Ok(headlines)
    }

    /// Map each item's `<link>` to the text of its `<source>` element.
    pub fn extract_sources_from_xml(xml_bytes: &[u8]) -> HashMap<String, String> {
        let mut sources = HashMap::new();
        let xml_str = match std::str::from_utf8(xml_bytes) {
            Ok(s) => s,
            Err(_) => return sources,
        };

        for item_block in xml_str.split("<item>").skip(1) {
            let item_end = item_block.find("</item>").unwrap_or(item_block.len());
            let item = &item_block[..item_end];

            let link = Self::extract_xml_element(item, "link");
            let source = Self::extract_xml_element(item, "source");

            if let (Some(link), Some(source)) = (link, source) {
                if !link.is_empty() && !source.is_empty() {
                    sources.insert(link, source);
                }
            }
        }

        sources
    }

    /// Text of the first `<tag>` element, tolerating attributes and CDATA.
    pub fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
        let open = format!("<{}", tag);
        let end_tag = format!("</{}>", tag);

        let mut search_from = 0;
        let content_start = loop {
            let at = xml[search_from..].find(&open)? + search_from;
            let after = &xml[at + open.len()..];
            match after.chars().next() {
                Some('>') => break at + open.len() + 1,
                Some(c) if c.is_whitespace() => {
                    let close = after.find('>')?;
                    break at + open.len() + close + 1;
                }
                // `<linkage>` is not `<link>`
                _ => search_from = at + open.len(),
            }
        };

        let end = xml[content_start..].find(&end_tag)? + content_start;
        let raw = xml[content_start..end].trim();
        let raw = raw
            .strip_prefix("<![CDATA[")
            .and_then(|r| r.strip_suffix("]]>"))
            .unwrap_or(raw);

        Some(decode_entities(raw.trim()))
    }

    pub async fn purge_expired_cache(&self) {
        match self.db.purge_expired().await {
            Ok(0) => {}
            Ok(n) => info!("Purged {} expired cache entries", n),
            Err(e) => error!("Cache purge failed: {}", e),
        }
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub async fn start_background_refresh(fetcher: Arc<Fetcher>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes.max(1) * 60);

    info!("Starting initial feed fetch");
    if let Err(e) = fetcher.refresh_all_feeds().await {
        error!("Initial feed fetch failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled feed refresh");
        if let Err(e) = fetcher.refresh_all_feeds().await {
            error!("Scheduled feed refresh failed: {}", e);
        }
        fetcher.purge_expired_cache().await;
    }
}
