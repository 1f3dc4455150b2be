//! The page record and the extractor pipeline's wire types.
//!
//! The outer record is typed; each analyzer's output stays an opaque
//! `serde_json::Value` tree so the core never couples to analyzer schemas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Response metadata handed to the extractor alongside the document.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: u16,
    /// Case-folded header keys.
    pub headers: HashMap<String, String>,
    pub body_size: u64,
    pub elapsed_ms: u64,
}

/// A link as it appeared in the document, before canonicalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLink {
    pub href: String,
    pub anchor_text: String,
    #[serde(default)]
    pub rel: Vec<String>,
    pub target: Option<String>,
}

/// One record per visited canonical URL. Successive visits overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub status: u16,
    pub response_time_ms: u64,
    pub size_bytes: u64,
    pub headers: HashMap<String, String>,

    pub seo: Value,
    pub content: Value,
    pub links: Value,
    pub technical: Value,
    pub security: Value,
    pub accessibility: Value,
    pub mobile: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecommerce: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation: Option<Value>,
}

impl PageRecord {
    /// Skeleton record carrying only transport facts; used when the body
    /// was missing or not HTML.
    #[must_use]
    pub fn minimal(url: &str, meta: &ResponseMeta) -> Self {
        Self {
            url: url.to_string(),
            fetched_at: Utc::now(),
            status: meta.status,
            response_time_ms: meta.elapsed_ms,
            size_bytes: meta.body_size,
            headers: meta.headers.clone(),
            seo: Value::Null,
            content: Value::Null,
            links: Value::Null,
            technical: Value::Null,
            security: Value::Null,
            accessibility: Value::Null,
            mobile: Value::Null,
            enhanced: None,
            ecommerce: None,
            media: None,
            navigation: None,
        }
    }
}

/// What the pipeline returns for one document.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub record: PageRecord,
    pub links: Vec<RawLink>,
}
