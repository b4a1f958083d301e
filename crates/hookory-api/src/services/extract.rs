//! Readable-text extraction from a user-supplied URL.

use std::time::Duration;

use html5ever::driver::ParseOpts;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use html5ever::tree_builder::TreeBuilderOpts;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use reqwest::{redirect, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::security::{is_internal_target, validate_source_url, UrlValidationResult};

/// Extracted text is cut to this many characters.
pub const MAX_EXTRACTED_CHARS: usize = 50_000;
/// Anything shorter is unlikely to be real page content.
pub const MIN_EXTRACTED_CHARS: usize = 100;

const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Extraction failures. The display text is shown to the user as is.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("This website blocked our request. The URL may require authentication or have bot protection. Try copying the content directly instead.")]
    Forbidden,

    #[error("URL not found. Please check the URL and try again.")]
    NotFound,

    #[error("The website server is experiencing issues. Please try again later.")]
    Upstream,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Request timed out. The website may be slow or unavailable. Please try again or copy the content directly.")]
    Timeout,

    #[error("Network error. Please check your connection and try again.")]
    Network(#[source] reqwest::Error),

    #[error("The page is too large to process. Try copying the content directly instead.")]
    TooLarge,

    #[error("Extracted text too short - may not be valid content")]
    TooShort,

    #[error("URL extraction unavailable: {0}")]
    Setup(String),
}

impl ExtractError {
    fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            403 => Self::Forbidden,
            404 => Self::NotFound,
            s if s >= 500 => Self::Upstream,
            s => Self::Status(s),
        }
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_redirect() {
            Self::InvalidUrl(
                "URL redirects to an internal or restricted endpoint".to_string(),
            )
        } else {
            Self::Network(e)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub timeout: Duration,
    /// Permit loopback and private targets. Only for local testing.
    pub allow_private_hosts: bool,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            allow_private_hosts: false,
        }
    }
}

/// Elements whose content is never page text.
const HIDDEN_ELEMENTS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "svg", "iframe", "object",
];

/// Candidate content roots, most specific first.
const CONTENT_ROOTS: [&str; 3] = ["article", "main", "body"];

/// Elements that start a new paragraph.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "table", "tr", "ul",
];

/// Reduce an HTML document to its readable text.
fn html_to_text(html: &str) -> String {
    let parse_options = ParseOpts {
        tree_builder: TreeBuilderOpts {
            drop_doctype: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let dom = parse_document(RcDom::default(), parse_options).one(html);

    let root = CONTENT_ROOTS
        .iter()
        .find_map(|tag| find_element(&dom.document, tag))
        .unwrap_or_else(|| dom.document.clone());

    let mut raw = String::new();
    collect_text(&root, &mut raw);
    normalize_whitespace(&raw)
}

fn element_name(node: &Handle) -> Option<&str> {
    match node.data {
        NodeData::Element { ref name, .. } => Some(&*name.local),
        _ => None,
    }
}

/// First element named `tag`, depth first, outside hidden subtrees.
fn find_element(node: &Handle, tag: &str) -> Option<Handle> {
    match element_name(node) {
        Some(name) if name == tag => return Some(node.clone()),
        Some(name) if HIDDEN_ELEMENTS.contains(&name) => return None,
        _ => {}
    }
    node.children
        .borrow()
        .iter()
        .find_map(|child| find_element(child, tag))
}

fn collect_text(node: &Handle, out: &mut String) {
    let mut block = false;
    match node.data {
        NodeData::Text { ref contents } => {
            out.push_str(&contents.borrow());
            return;
        }
        NodeData::Element { .. } => {
            let name = element_name(node).unwrap_or_default();
            if HIDDEN_ELEMENTS.contains(&name) {
                return;
            }
            if name == "br" {
                out.push('\n');
                return;
            }
            block = BLOCK_ELEMENTS.contains(&name);
        }
        NodeData::Document => {}
        _ => return,
    }

    if block {
        out.push('\n');
    }
    for child in node.children.borrow().iter() {
        collect_text(child, out);
    }
    if block {
        out.push('\n');
    }
}

/// Collapse runs of spaces within lines; blank lines become one paragraph break.
fn normalize_whitespace(raw: &str) -> String {
    let mut out = String::new();
    let mut paragraph_break = false;
    for line in raw.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            paragraph_break = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if paragraph_break { "\n\n" } else { "\n" });
        }
        out.push_str(&words.join(" "));
        paragraph_break = false;
    }
    out
}

/// Fetches a web page and returns its main readable text.
pub struct UrlExtractor {
    client: reqwest::Client,
    allow_private_hosts: bool,
}

impl UrlExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        Self::with_options(ExtractorOptions::default())
    }

    pub fn with_options(options: ExtractorOptions) -> Result<Self, ExtractError> {
        let allow_private = options.allow_private_hosts;
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if !allow_private && is_internal_target(attempt.url()) {
                attempt.error("redirect to internal address")
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT)
            .redirect(policy)
            .build()
            .map_err(|e| ExtractError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            allow_private_hosts: allow_private,
        })
    }

    /// Fetch `url` and extract its text.
    pub async fn extract(&self, url: &str) -> Result<String, ExtractError> {
        let parsed = match validate_source_url(url) {
            UrlValidationResult::Valid(u) => u,
            UrlValidationResult::Blocked(_) if self.allow_private_hosts => {
                reqwest::Url::parse(url.trim())
                    .map_err(|_| ExtractError::InvalidUrl("Invalid URL format".to_string()))?
            }
            other => {
                let message = other.into_result().err().unwrap_or_default();
                return Err(ExtractError::InvalidUrl(message));
            }
        };

        let mut response = self
            .client
            .get(parsed.clone())
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %parsed, status = status.as_u16(), "Source URL returned error status");
            return Err(ExtractError::from_status(status));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(ExtractError::TooLarge);
            }
            body.extend_from_slice(&chunk);
        }
        let html = String::from_utf8_lossy(&body);

        let text = truncate_chars(html_to_text(&html), MAX_EXTRACTED_CHARS);
        debug!(url = %parsed, chars = text.chars().count(), "Extracted text from URL");

        if text.chars().count() < MIN_EXTRACTED_CHARS {
            return Err(ExtractError::TooShort);
        }
        Ok(text)
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}
