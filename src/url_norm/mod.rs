//! URL canonicalization and link classification.
//!
//! Every store key and membership test in the crate goes through
//! [`canonicalize`]; the crawl engine decides what to do with a discovered
//! link via [`classify`]. The canonical form is a plain `String` so it can
//! be used directly as a map key and serialized without ceremony.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Errors produced while normalizing a URL.
///
/// Callers treat any of these as "not crawlable": the link is skipped and
/// never enqueued.
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("invalid URL `{url}`: {source}")]
    Invalid {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("URL has no host: `{0}`")]
    MissingHost(String),
}

/// Classification of a discovered link relative to the crawl seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClass {
    /// Same registrable domain as the seed; candidate for crawling.
    Internal,
    /// Different host; recorded and optionally probed, never crawled.
    External,
    /// `mailto:` address.
    Mailto,
    /// `tel:` number.
    Tel,
    /// A scheme or file extension we never fetch (assets, scripts, binaries).
    NonFetchable,
}

/// File extensions that never resolve to an HTML document.
static NON_FETCHABLE_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // images
        "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "avif", "tiff",
        // video
        "mp4", "webm", "avi", "mov", "mkv", "m4v",
        // audio
        "mp3", "wav", "ogg", "m4a", "flac", "aac",
        // documents
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "rtf",
        // archives
        "zip", "rar", "tar", "gz", "tgz", "7z", "bz2",
        // fonts
        "woff", "woff2", "ttf", "otf", "eot",
        // code and data served as assets
        "css", "js", "mjs", "json", "xml", "rss", "atom", "txt", "map",
        // binaries
        "exe", "dmg", "bin", "iso", "apk", "msi", "deb", "rpm",
    ]
    .into_iter()
    .collect()
});

/// Two-label public suffixes where the registrable domain is three labels.
static TWO_LABEL_SUFFIXES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["co.uk", "com.au", "co.za", "com.br", "co.jp"].into_iter().collect());

/// Normalize a raw link into its canonical string form.
///
/// Normalization: lowercased host, default port dropped, fragment stripped,
/// `.`/`..` segments resolved, trailing `/` stripped unless the path is
/// exactly `/`, query preserved verbatim. Relative references (including
/// protocol-relative `//host/path`) require `base` and inherit its scheme.
pub fn canonicalize(raw: &str, base: Option<&Url>) -> Result<String, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let resolved = match base {
        Some(b) => b.join(trimmed),
        None => Url::parse(trimmed),
    }
    .map_err(|source| UrlError::Invalid {
        url: trimmed.to_string(),
        source,
    })?;

    if !matches!(resolved.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(resolved.scheme().to_string()));
    }
    if resolved.host_str().is_none() {
        return Err(UrlError::MissingHost(trimmed.to_string()));
    }

    Ok(canonical_form(&resolved))
}

/// Canonical key for a functional (`mailto:` / `tel:`) link.
#[must_use]
pub fn functional_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn canonical_form(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);

    let mut path = u.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    u.set_path(&path);

    u.to_string()
}

/// Classify a raw link relative to the crawl seed.
///
/// The input may be relative; relative references are internal by
/// construction. Parse failures surface as [`UrlError`] and the caller
/// treats the link as non-internal without enqueuing it.
pub fn classify(raw: &str, seed: &Url) -> Result<LinkClass, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let lower = trimmed.to_ascii_lowercase();
    for scheme in ["javascript:", "ftp:", "file:", "data:", "blob:"] {
        if lower.starts_with(scheme) {
            return Ok(LinkClass::NonFetchable);
        }
    }
    if lower.starts_with("mailto:") {
        return Ok(LinkClass::Mailto);
    }
    if lower.starts_with("tel:") {
        return Ok(LinkClass::Tel);
    }

    if has_non_fetchable_extension(trimmed) {
        return Ok(LinkClass::NonFetchable);
    }

    // Protocol-relative references carry a host of their own; resolve them
    // against the seed so they inherit its scheme before comparing hosts.
    if trimmed.starts_with("//") {
        let resolved = seed.join(trimmed).map_err(|source| UrlError::Invalid {
            url: trimmed.to_string(),
            source,
        })?;
        return Ok(if same_host(&resolved, seed) {
            LinkClass::Internal
        } else {
            LinkClass::External
        });
    }

    // Relative references: no scheme, or rooted / fragment / query-only.
    if trimmed.starts_with('/') || trimmed.starts_with('#') || trimmed.starts_with('?') {
        return Ok(LinkClass::Internal);
    }
    if !has_scheme(trimmed) {
        return Ok(LinkClass::Internal);
    }

    let parsed = Url::parse(trimmed).map_err(|source| UrlError::Invalid {
        url: trimmed.to_string(),
        source,
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Ok(LinkClass::NonFetchable);
    }
    if parsed.host_str().is_none() {
        return Err(UrlError::MissingHost(trimmed.to_string()));
    }

    Ok(if same_host(&parsed, seed) {
        LinkClass::Internal
    } else {
        LinkClass::External
    })
}

fn has_scheme(s: &str) -> bool {
    let Some(colon) = s.find(':') else {
        return false;
    };
    let prefix = &s[..colon];
    !prefix.is_empty()
        && prefix.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn has_non_fetchable_extension(link: &str) -> bool {
    // Extension check runs on the path alone; query and fragment are noise.
    let path = link.split(['?', '#']).next().unwrap_or(link);
    let Some(dot) = path.rfind('.') else {
        return false;
    };
    let ext = &path[dot + 1..];
    if ext.is_empty() || ext.contains('/') {
        return false;
    }
    NON_FETCHABLE_EXTENSIONS.contains(ext.to_ascii_lowercase().as_str())
}

/// Host equivalence for the crawl scope test.
///
/// Domain-style hosts compare by registrable domain with a `www.` prefix
/// ignored. IP literals and single-label hosts (`localhost`, loopback test
/// servers) compare by exact host plus effective port.
#[must_use]
pub fn same_host(a: &Url, b: &Url) -> bool {
    let (Some(ha), Some(hb)) = (a.host_str(), b.host_str()) else {
        return false;
    };

    if is_literal_host(ha) || is_literal_host(hb) {
        return ha.eq_ignore_ascii_case(hb)
            && a.port_or_known_default() == b.port_or_known_default();
    }

    registrable_domain(ha) == registrable_domain(hb)
}

fn is_literal_host(host: &str) -> bool {
    host.parse::<std::net::IpAddr>().is_ok() || !host.contains('.')
}

/// The registrable domain of a host: the last two labels, or three when the
/// suffix is on the two-label allow-list (`example.co.uk` → `example.co.uk`,
/// `shop.example.com` → `example.com`). A leading `www.` never counts.
#[must_use]
pub fn registrable_domain(host: &str) -> String {
    let host = host.strip_prefix("www.").unwrap_or(host).to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if TWO_LABEL_SUFFIXES.contains(last_two.as_str()) && labels.len() >= 3 {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}

/// Filesystem-safe slug for a host: anything outside `[A-Za-z0-9.-]`
/// becomes `_`.
#[must_use]
pub fn domain_slug(host: &str) -> String {
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolve user input (`example.com`, `https://example.com/start`) into a
/// seed URL, defaulting to `https` when no scheme is given.
pub fn seed_url(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let with_scheme = if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&with_scheme).map_err(|source| UrlError::Invalid {
        url: trimmed.to_string(),
        source,
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    if parsed.host_str().is_none() {
        return Err(UrlError::MissingHost(trimmed.to_string()));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrable_domain_strips_www_and_subdomains() {
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(registrable_domain("shop.example.com"), "example.com");
        assert_eq!(registrable_domain("example.com"), "example.com");
    }

    #[test]
    fn registrable_domain_respects_two_label_suffixes() {
        assert_eq!(registrable_domain("www.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("a.b.example.com.au"), "example.com.au");
        // Not on the allow-list: plain two-label rule applies.
        assert_eq!(registrable_domain("example.co.fr"), "co.fr");
    }

    #[test]
    fn scheme_detection() {
        assert!(has_scheme("https://x.com"));
        assert!(has_scheme("mailto:a@b.c"));
        assert!(!has_scheme("/path"));
        assert!(!has_scheme("page.html"));
        assert!(!has_scheme("a/b:c"));
    }

    #[test]
    fn extension_check_ignores_query_and_fragment() {
        assert!(has_non_fetchable_extension("/img/logo.png?v=2"));
        assert!(has_non_fetchable_extension("style.css#section"));
        assert!(!has_non_fetchable_extension("/about.html"));
        assert!(!has_non_fetchable_extension("/about"));
    }
}
