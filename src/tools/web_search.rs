//! Web search tool backed by DuckDuckGo's lite HTML endpoint (no API key)

use super::{Tool, ToolContext, ToolOutput, TOOL_TIMEOUT};
use crate::state_machine::state::WebSearchInput;
use async_trait::async_trait;
use serde_json::{json, Value};

const MAX_RESULTS: usize = 5;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, String> {
        let url = reqwest::Url::parse_with_params(&self.endpoint, &[("q", query)])
            .map_err(|e| format!("Invalid search URL: {e}"))?;
        let html = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(TOOL_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| format!("Search request failed: {e}"))?
            .text()
            .await
            .map_err(|e| format!("Search response unreadable: {e}"))?;
        Ok(parse_results(&html, MAX_RESULTS))
    }
}

/// Scan the lite results table: each hit is an `<a ... class="result-link">`
/// followed by a `result-snippet` cell.
fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    const LINK_MARKER: &str = "class=\"result-link\"";
    const SNIPPET_MARKER: &str = "class=\"result-snippet\"";

    let mut results = Vec::new();
    let mut rest = html;
    while results.len() < max_results {
        let Some((before, after)) = rest.split_once(LINK_MARKER) else {
            break;
        };
        let href = before
            .rsplit_once("<a ")
            .and_then(|(_, tag)| extract_attr(tag, "href"))
            .unwrap_or_default();
        let Some((_, after_open)) = after.split_once('>') else {
            break;
        };
        let Some((title_html, after_title)) = after_open.split_once("</a>") else {
            break;
        };
        let title = strip_tags(title_html).trim().to_string();

        // Only look for the snippet before the next result
        let segment = after_title
            .split_once(LINK_MARKER)
            .map_or(after_title, |(s, _)| s);
        let snippet = segment
            .split_once(SNIPPET_MARKER)
            .and_then(|(_, cell)| cell.split_once('>'))
            .map(|(_, body)| body.split_once("</td>").map_or(body, |(b, _)| b))
            .map(|body| strip_tags(body).trim().to_string())
            .unwrap_or_default();

        if !href.is_empty() && !title.is_empty() {
            results.push(SearchResult {
                title,
                url: href,
                snippet,
            });
        }
        rest = after_title;
    }
    results
}

/// Extract an attribute value from an HTML tag fragment.
fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let pattern = format!("{attr}=\"");
    let (_, start) = tag.split_once(pattern.as_str())?;
    let (value, _) = start.split_once('"')?;
    Some(html_decode(value))
}

/// Strip HTML tags from a string.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    html_decode(&out)
}

/// Decode common HTML entities.
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results found for: {query}");
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if r.snippet.is_empty() {
                format!("{}. {}\n   {}", i + 1, r.title, r.url)
            } else {
                format!("{}. {}\n   {}\n   {}", i + 1, r.title, r.url, r.snippet)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> String {
        "Search the web with DuckDuckGo. Useful for current events and facts not in the \
         conversation or the uploaded document. Returns titles, URLs and snippets."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> ToolOutput {
        let input: WebSearchInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        if input.query.trim().is_empty() {
            return ToolOutput::error("Query must not be empty");
        }

        match self.search(&input.query).await {
            Ok(results) => {
                tracing::debug!(query = %input.query, hits = results.len(), "Web search");
                ToolOutput::success(format_results(&input.query, &results))
            }
            Err(message) => {
                tracing::warn!(query = %input.query, error = %message, "Web search failed");
                ToolOutput::error(message)
            }
        }
    }
}
