//! Extractor pipeline: parsed document in, page record plus raw links out.
//!
//! The pipeline is pure and safe to run concurrently on distinct documents.
//! It takes the HTML as `&str` and parses internally: the `scraper` DOM is
//! not `Send`, so it must never be held across an `await` — keeping it
//! inside a single synchronous call enforces that by construction.

pub mod extractors;
pub mod schema;

pub use schema::{ExtractionOutput, PageRecord, RawLink, ResponseMeta};

use chrono::Utc;
use scraper::Html;
use url::Url;

/// Contract between the crawl engine and the analysis layer.
pub trait ExtractorPipeline: Send + Sync {
    /// Produce the record for one document. Must not block on I/O.
    fn extract(&self, html: &str, url: &str, meta: &ResponseMeta) -> ExtractionOutput;
}

/// The built-in analyzer set.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor;

impl ExtractorPipeline for DefaultExtractor {
    fn extract(&self, html: &str, url: &str, meta: &ResponseMeta) -> ExtractionOutput {
        let doc = Html::parse_document(html);

        let parsed_url = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => {
                // The engine only hands us canonical URLs; an unparseable one
                // still yields a transport-only record rather than a crash.
                return ExtractionOutput {
                    record: PageRecord::minimal(url, meta),
                    links: Vec::new(),
                };
            }
        };

        let links = extractors::extract_raw_links(&doc);

        let record = PageRecord {
            url: url.to_string(),
            fetched_at: Utc::now(),
            status: meta.status,
            response_time_ms: meta.elapsed_ms,
            size_bytes: meta.body_size,
            headers: meta.headers.clone(),
            seo: extractors::extract_seo(&doc),
            content: extractors::extract_content(&doc),
            links: extractors::extract_links_summary(&links),
            technical: extractors::extract_technical(&doc, html),
            security: extractors::extract_security(&doc, &parsed_url, &meta.headers),
            accessibility: extractors::extract_accessibility(&doc),
            mobile: extractors::extract_mobile(&doc),
            enhanced: Some(extractors::extract_enhanced(&doc, &parsed_url)),
            ecommerce: Some(extractors::extract_ecommerce(&doc)),
            media: Some(extractors::extract_media(&doc)),
            navigation: Some(extractors::extract_navigation(&doc)),
        };

        ExtractionOutput { record, links }
    }
}
