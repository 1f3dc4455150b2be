//! HTTP plumbing for the crawl engine.
//!
//! Two clients: one that follows redirects for page fetches, and one with
//! redirects disabled for external-link probes, where the chain is walked
//! by hand so it can be recorded and checked for loops.

use futures_util::StreamExt;
use log::debug;
use reqwest::header::{HeaderValue, ACCEPT, LOCATION};
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::state_store::LinkStatus;

const MAX_REDIRECT_HOPS: usize = 10;
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8";

/// Marker appended to a redirect chain when it cycles.
pub const REDIRECT_LOOP_MARKER: &str = "loop";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// A fetched page with transport facts the extractor needs.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects, as reported by the client.
    pub final_url: String,
    pub status: u16,
    /// Case-folded header keys.
    pub headers: HashMap<String, String>,
    pub body: String,
    pub body_bytes: u64,
    pub elapsed_ms: u64,
    /// Body looks like an HTML document (content type or sniff).
    pub is_html: bool,
}

/// Result of probing an external link.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: LinkStatus,
    pub headers: HashMap<String, String>,
    /// Hops followed; ends with [`REDIRECT_LOOP_MARKER`] when the chain
    /// cycles. `None` when the first response was final.
    pub redirect_chain: Option<Vec<String>>,
    /// Where the probe ended up; `None` when the chain looped or errored.
    pub final_url: Option<String>,
}

pub struct Fetcher {
    page_client: reqwest::Client,
    probe_client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl Fetcher {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        max_body_bytes: usize,
    ) -> anyhow::Result<Self> {
        let ua = HeaderValue::from_str(user_agent)
            .map_err(|e| anyhow::anyhow!("invalid user agent: {e}"))?;

        let page_client = reqwest::Client::builder()
            .user_agent(ua.clone())
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECT_HOPS))
            .build()?;

        let probe_client = reqwest::Client::builder()
            .user_agent(ua)
            .timeout(timeout)
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            page_client,
            probe_client,
            timeout,
            max_body_bytes,
        })
    }

    /// GET a page, following redirects, streaming the body up to the
    /// configured ceiling. The deadline covers the whole transfer.
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();

        let work = async {
            let response = self
                .page_client
                .get(url)
                .header(ACCEPT, ACCEPT_HTML)
                .send()
                .await
                .map_err(classify_reqwest_error)?;

            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let headers = fold_headers(response.headers());

            let content_type_html = headers
                .get("content-type")
                .is_some_and(|ct| ct.to_ascii_lowercase().contains("html"));

            let mut body: Vec<u8> = Vec::new();
            let mut truncated = false;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(classify_reqwest_error)?;
                let remaining = self.max_body_bytes.saturating_sub(body.len());
                if chunk.len() >= remaining {
                    body.extend_from_slice(&chunk[..remaining]);
                    truncated = true;
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            if truncated {
                debug!("body truncated at {} bytes for {url}", self.max_body_bytes);
            }

            let body_bytes = body.len() as u64;
            let body = String::from_utf8_lossy(&body).into_owned();
            let is_html = content_type_html || sniff_html(&body);

            Ok(FetchedPage {
                final_url,
                status,
                headers,
                body,
                body_bytes,
                elapsed_ms: started.elapsed().as_millis() as u64,
                is_html,
            })
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    /// Check an external link: HEAD first, GET when the server rejects HEAD,
    /// walking redirects by hand so the chain is recorded and loops caught.
    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        match tokio::time::timeout(self.timeout, self.probe_inner(url)).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome {
                status: LinkStatus::timeout(),
                headers: HashMap::new(),
                redirect_chain: None,
                final_url: None,
            },
        }
    }

    async fn probe_inner(&self, url: &str) -> ProbeOutcome {
        let mut chain: Vec<String> = Vec::new();
        let mut current = url.to_string();

        for _ in 0..MAX_REDIRECT_HOPS {
            let response = match self.probe_request(&current).await {
                Ok(r) => r,
                Err(e) => {
                    debug!("probe failed for {current}: {e}");
                    return ProbeOutcome {
                        status: match e {
                            FetchError::Timeout => LinkStatus::timeout(),
                            FetchError::Network(_) => LinkStatus::error(),
                        },
                        headers: HashMap::new(),
                        redirect_chain: chain_or_none(chain),
                        final_url: None,
                    };
                }
            };

            let status = response.status().as_u16();
            if response.status().is_redirection() {
                let Some(next) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|l| l.to_str().ok())
                    .and_then(|l| resolve_location(&current, l))
                else {
                    // Redirect without a usable target: that status is final.
                    return ProbeOutcome {
                        status: LinkStatus::Code(status),
                        headers: fold_headers(response.headers()),
                        redirect_chain: chain_or_none(chain),
                        final_url: Some(current),
                    };
                };

                chain.push(current.clone());
                if chain.contains(&next) {
                    chain.push(REDIRECT_LOOP_MARKER.to_string());
                    return ProbeOutcome {
                        status: LinkStatus::Code(status),
                        headers: fold_headers(response.headers()),
                        redirect_chain: Some(chain),
                        final_url: None,
                    };
                }
                current = next;
                continue;
            }

            return ProbeOutcome {
                status: LinkStatus::Code(status),
                headers: fold_headers(response.headers()),
                redirect_chain: chain_or_none(chain),
                final_url: Some(current),
            };
        }

        // Hop budget exhausted: treat like a loop, the chain tells the story.
        chain.push(REDIRECT_LOOP_MARKER.to_string());
        ProbeOutcome {
            status: LinkStatus::error(),
            headers: HashMap::new(),
            redirect_chain: Some(chain),
            final_url: None,
        }
    }

    async fn probe_request(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let head = self
            .probe_client
            .head(url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        // Servers that reject HEAD get one GET; the body is never read.
        if matches!(head.status().as_u16(), 405 | 501) {
            return self
                .probe_client
                .get(url)
                .send()
                .await
                .map_err(classify_reqwest_error);
        }
        Ok(head)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

fn fold_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

fn sniff_html(body: &str) -> bool {
    let head = body.trim_start().get(..256).unwrap_or(body.trim_start());
    let lower = head.to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.contains("<html")
}

fn resolve_location(current: &str, location: &str) -> Option<String> {
    let base = Url::parse(current).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}

fn chain_or_none(chain: Vec<String>) -> Option<Vec<String>> {
    if chain.is_empty() { None } else { Some(chain) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_sniffing() {
        assert!(sniff_html("  <!DOCTYPE html><html></html>"));
        assert!(sniff_html("<html lang=\"en\">"));
        assert!(!sniff_html("{\"json\": true}"));
    }

    #[test]
    fn location_resolution_handles_relative() {
        assert_eq!(
            resolve_location("https://a.test/x/y", "/z").as_deref(),
            Some("https://a.test/z")
        );
        assert_eq!(
            resolve_location("https://a.test/x/", "b").as_deref(),
            Some("https://a.test/x/b")
        );
    }
}
