//! Source fetchers.
//!
//! A fetcher turns one source into a [`FetchOutcome`]: an HTTP-like
//! status and zero or more candidate items. Network-level failures are
//! folded into the status (sentinel 0) rather than surfaced as errors,
//! so the scheduler sees every attempt the same way.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use newswire_common::{
    CandidateItem, DateConfidence, FetchOutcome, SourceDescriptor, STATUS_NETWORK_ERROR,
};

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &SourceDescriptor) -> FetchOutcome;
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("newswire-collector/0.1")
        .build()
        .expect("Failed to build HTTP client")
}

fn status_of(error: &reqwest::Error) -> u16 {
    error
        .status()
        .map(|s| s.as_u16())
        .unwrap_or(STATUS_NETWORK_ERROR)
}

// --- RSS/Atom feeds ---

pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
        }
    }
}

#[async_trait]
impl Fetcher for FeedFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> FetchOutcome {
        let resp = match self.client.get(&source.id).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "Feed fetch failed");
                return FetchOutcome::failed(status_of(&e));
            }
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return FetchOutcome::failed(status);
        }

        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "Failed to read feed body");
                return FetchOutcome::failed(status_of(&e));
            }
        };

        let feed = match feed_rs::parser::parse(&bytes[..]) {
            Ok(feed) => feed,
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "Failed to parse feed");
                // The server answered but the payload is not a feed.
                // Treat as soft so the cooldown escalates if it persists.
                return FetchOutcome::failed(422);
            }
        };

        let items: Vec<CandidateItem> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

                let (published_at, date_confidence) = match (entry.published, entry.updated) {
                    (Some(dt), _) => (
                        Some(dt.with_timezone(&Utc)),
                        DateConfidence::High,
                    ),
                    (None, Some(dt)) => (
                        Some(dt.with_timezone(&Utc)),
                        DateConfidence::Medium,
                    ),
                    (None, None) => (None, DateConfidence::None),
                };

                let title = entry.title.map(|t| t.content).unwrap_or_default();
                let raw_text = entry
                    .summary
                    .map(|s| s.content)
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| title.clone());

                Some(CandidateItem {
                    url,
                    title,
                    raw_text,
                    published_at,
                    date_confidence,
                    source_id: source.id.clone(),
                })
            })
            .collect();

        debug!(source_id = %source.id, items = items.len(), "Feed parsed");
        FetchOutcome { status, items }
    }
}

// --- Plain HTML pages ---

/// Treats the whole page as a single undated candidate. Deduplication by
/// content checksum keeps an unchanged page from being re-delivered.
pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
        }
    }
}

#[async_trait]
impl Fetcher for PageFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> FetchOutcome {
        let resp = match self.client.get(&source.id).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "Page fetch failed");
                return FetchOutcome::failed(status_of(&e));
            }
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return FetchOutcome::failed(status);
        }

        let html = match resp.text().await {
            Ok(html) => html,
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "Failed to read page body");
                return FetchOutcome::failed(status_of(&e));
            }
        };

        let title = extract_title(&html).unwrap_or_else(|| source.name.clone());
        let raw_text = strip_tags(&html);

        debug!(source_id = %source.id, bytes = html.len(), "Page fetched");
        FetchOutcome {
            status,
            items: vec![CandidateItem {
                url: source.id.clone(),
                title,
                raw_text,
                published_at: None,
                date_confidence: DateConfidence::None,
                source_id: source.id.clone(),
            }],
        }
    }
}

fn extract_title(html: &str) -> Option<String> {
    // ASCII-only lowercasing keeps byte offsets valid for slicing the
    // original; Unicode lowercasing can change byte lengths.
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = html[open_end..close].trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Crude text extraction: drop script/style blocks, then all tags,
/// collapsing whitespace. Good enough for checksum-level comparison.
fn strip_tags(html: &str) -> String {
    let without_scripts = remove_blocks(html, "script");
    let rest = remove_blocks(&without_scripts, "style");

    let mut out = String::with_capacity(rest.len() / 4);
    let mut in_tag = false;
    let mut last_was_space = true;
    for ch in rest.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            }
            c if !in_tag => {
                if c.is_whitespace() {
                    if !last_was_space {
                        out.push(' ');
                        last_was_space = true;
                    }
                } else {
                    out.push(c);
                    last_was_space = false;
                }
            }
            _ => {}
        }
    }

    out.trim().to_string()
}

fn remove_blocks(html: &str, block: &str) -> String {
    let open_tag = format!("<{block}");
    let close_tag = format!("</{block}>");
    // One ASCII-lowercase pass; its byte offsets are valid in the
    // original string, which full Unicode lowercasing does not guarantee.
    let lower = html.to_ascii_lowercase();
    let mut cleaned = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(open_rel) = lower[pos..].find(&open_tag) {
        let open = pos + open_rel;
        cleaned.push_str(&html[pos..open]);
        match lower[open..].find(&close_tag) {
            Some(close_rel) => pos = open + close_rel + close_tag.len(),
            None => return cleaned,
        }
    }
    cleaned.push_str(&html[pos..]);
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title() {
        let html = "<html><head><title> Morning Brief </title></head><body></body></html>";
        assert_eq!(extract_title(html), Some("Morning Brief".to_string()));
        assert_eq!(extract_title("<html><body>no head</body></html>"), None);
    }

    #[test]
    fn strips_tags_and_scripts() {
        let html = "<html><head><style>p { color: red; }</style>\
                    <script>var x = 1;</script></head>\
                    <body><p>First   paragraph.</p><p>Second.</p></body></html>";
        let text = strip_tags(html);
        assert_eq!(text, "First paragraph. Second.");
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn title_offsets_survive_multibyte_prefix() {
        // İ (U+0130) grows from 2 to 3 bytes under Unicode lowercasing;
        // offsets into a lowercased copy must still index the original.
        let html = "<meta content=\"İzvestia сводка\"><TITLE>Главные новости</TITLE><body></body>";
        assert_eq!(extract_title(html), Some("Главные новости".to_string()));
    }

    #[test]
    fn strips_tags_from_cyrillic_html() {
        let html = "<html><body><p>Совещание в Москве: «İstanbul» и Ереван</p>\
                    <script>var x = \"скрипт\";</script>\
                    <p>Вторая часть текста.</p></body></html>";
        let text = strip_tags(html);
        assert_eq!(text, "Совещание в Москве: «İstanbul» и Ереван Вторая часть текста.");
        assert!(!text.contains("скрипт"));
    }

    #[test]
    fn unchanged_page_text_is_stable() {
        let html = "<body><div>Breaking: event happened.</div></body>";
        assert_eq!(strip_tags(html), strip_tags(html));
    }
}
