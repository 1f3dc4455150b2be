//! Per-dimension analyzers over a parsed document.
//!
//! Each function returns an untyped JSON tree; the shapes here are consumed
//! by report tooling, not by the crawl core.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use std::collections::HashMap;
use url::Url;

use super::schema::RawLink;

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

static TITLE: Lazy<Selector> = Lazy::new(|| sel("head > title"));
static META: Lazy<Selector> = Lazy::new(|| sel("meta"));
static CANONICAL: Lazy<Selector> = Lazy::new(|| sel("link[rel=canonical]"));
static A_HREF: Lazy<Selector> = Lazy::new(|| sel("a[href]"));
static IMG: Lazy<Selector> = Lazy::new(|| sel("img"));
static SCRIPT: Lazy<Selector> = Lazy::new(|| sel("script"));
static SCRIPT_SRC: Lazy<Selector> = Lazy::new(|| sel("script[src]"));
static STYLESHEET: Lazy<Selector> = Lazy::new(|| sel("link[rel=stylesheet]"));
static STYLE: Lazy<Selector> = Lazy::new(|| sel("style"));
static HTML_EL: Lazy<Selector> = Lazy::new(|| sel("html"));
static BODY: Lazy<Selector> = Lazy::new(|| sel("body"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| sel("p"));
static FORM_INPUT: Lazy<Selector> = Lazy::new(|| sel("input, select, textarea"));
static LABEL_FOR: Lazy<Selector> = Lazy::new(|| sel("label[for]"));
static LANDMARK: Lazy<Selector> =
    Lazy::new(|| sel("header, nav, main, footer, aside, [role=banner], [role=main], [role=navigation], [role=contentinfo]"));
static NAV: Lazy<Selector> = Lazy::new(|| sel("nav"));
static BREADCRUMB: Lazy<Selector> =
    Lazy::new(|| sel("nav[aria-label*='breadcrumb' i], .breadcrumb, .breadcrumbs, ol.breadcrumb"));
static PAGINATION: Lazy<Selector> =
    Lazy::new(|| sel(".pagination, .pager, link[rel=next], link[rel=prev], a[rel=next], a[rel=prev]"));
static FOOTER_LINK: Lazy<Selector> = Lazy::new(|| sel("footer a[href]"));
static VIDEO: Lazy<Selector> = Lazy::new(|| sel("video"));
static AUDIO: Lazy<Selector> = Lazy::new(|| sel("audio"));
static IFRAME_SRC: Lazy<Selector> = Lazy::new(|| sel("iframe[src]"));
static LD_JSON: Lazy<Selector> = Lazy::new(|| sel("script[type='application/ld+json']"));
static TOUCH_ICON: Lazy<Selector> = Lazy::new(|| sel("link[rel*=apple-touch-icon]"));
static SRCSET_IMG: Lazy<Selector> = Lazy::new(|| sel("img[srcset], picture source[srcset]"));
static ARTICLE: Lazy<Selector> = Lazy::new(|| sel("article"));

fn meta_content(doc: &Html, name: &str) -> Option<String> {
    doc.select(&META).find_map(|m| {
        let v = m.value();
        let matches = v
            .attr("name")
            .or_else(|| v.attr("property"))
            .is_some_and(|n| n.eq_ignore_ascii_case(name));
        if matches {
            v.attr("content").map(|c| c.trim().to_string())
        } else {
            None
        }
    })
}

fn element_text(el: scraper::ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Every `<a href>` in document order, with anchor text and rel/target.
pub fn extract_raw_links(doc: &Html) -> Vec<RawLink> {
    doc.select(&A_HREF)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            Some(RawLink {
                href: href.to_string(),
                anchor_text: element_text(a),
                rel: a
                    .value()
                    .attr("rel")
                    .map(|r| r.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                target: a.value().attr("target").map(str::to_string),
            })
        })
        .collect()
}

pub fn extract_seo(doc: &Html) -> Value {
    let title = doc
        .select(&TITLE)
        .next()
        .map(element_text)
        .unwrap_or_default();
    let description = meta_content(doc, "description");
    let canonical = doc
        .select(&CANONICAL)
        .next()
        .and_then(|l| l.value().attr("href"))
        .map(str::to_string);

    json!({
        "title": title,
        "titleLength": title.chars().count(),
        "metaDescription": description,
        "metaDescriptionLength": description.as_deref().map(|d| d.chars().count()).unwrap_or(0),
        "canonical": canonical,
        "robots": meta_content(doc, "robots"),
        "openGraph": {
            "title": meta_content(doc, "og:title"),
            "description": meta_content(doc, "og:description"),
            "image": meta_content(doc, "og:image"),
            "type": meta_content(doc, "og:type"),
        },
        "h1Count": heading_count(doc, "h1"),
    })
}

fn heading_count(doc: &Html, level: &str) -> usize {
    static H: Lazy<HashMap<&'static str, Selector>> = Lazy::new(|| {
        ["h1", "h2", "h3", "h4", "h5", "h6"]
            .into_iter()
            .map(|h| (h, sel(h)))
            .collect()
    });
    H.get(level).map_or(0, |s| doc.select(s).count())
}

pub fn extract_content(doc: &Html) -> Value {
    let body_text = doc
        .select(&BODY)
        .next()
        .map(element_text)
        .unwrap_or_default();
    let word_count = body_text.split_whitespace().count();

    let images = doc.select(&IMG).count();
    let images_without_alt = doc
        .select(&IMG)
        .filter(|img| {
            img.value()
                .attr("alt")
                .map_or(true, |alt| alt.trim().is_empty())
        })
        .count();

    json!({
        "wordCount": word_count,
        "paragraphCount": doc.select(&PARAGRAPH).count(),
        "headings": {
            "h1": heading_count(doc, "h1"),
            "h2": heading_count(doc, "h2"),
            "h3": heading_count(doc, "h3"),
            "h4": heading_count(doc, "h4"),
            "h5": heading_count(doc, "h5"),
            "h6": heading_count(doc, "h6"),
        },
        "imageCount": images,
        "imagesWithoutAlt": images_without_alt,
    })
}

/// Summary view over the raw link inventory.
pub fn extract_links_summary(links: &[RawLink]) -> Value {
    let nofollow = links
        .iter()
        .filter(|l| l.rel.iter().any(|r| r.eq_ignore_ascii_case("nofollow")))
        .count();
    let empty_anchor = links.iter().filter(|l| l.anchor_text.is_empty()).count();
    let new_tab = links
        .iter()
        .filter(|l| l.target.as_deref() == Some("_blank"))
        .count();

    json!({
        "total": links.len(),
        "nofollow": nofollow,
        "emptyAnchor": empty_anchor,
        "opensNewTab": new_tab,
    })
}

pub fn extract_technical(doc: &Html, raw_html: &str) -> Value {
    let has_doctype = raw_html.trim_start().to_ascii_lowercase().starts_with("<!doctype");
    let charset = doc
        .select(&META)
        .find_map(|m| m.value().attr("charset").map(str::to_string));
    let lang = doc
        .select(&HTML_EL)
        .next()
        .and_then(|h| h.value().attr("lang"))
        .map(str::to_string);
    let inline_scripts = doc
        .select(&SCRIPT)
        .filter(|s| s.value().attr("src").is_none())
        .count();

    json!({
        "doctype": has_doctype,
        "charset": charset,
        "lang": lang,
        "viewport": meta_content(doc, "viewport"),
        "generator": meta_content(doc, "generator"),
        "externalScripts": doc.select(&SCRIPT_SRC).count(),
        "inlineScripts": inline_scripts,
        "stylesheets": doc.select(&STYLESHEET).count(),
        "inlineStyles": doc.select(&STYLE).count(),
    })
}

pub fn extract_security(doc: &Html, url: &Url, headers: &HashMap<String, String>) -> Value {
    let https = url.scheme() == "https";
    // http:// subresources on an https page defeat the transport guarantee.
    let mixed_content = if https {
        doc.select(&SCRIPT_SRC)
            .filter_map(|s| s.value().attr("src"))
            .chain(doc.select(&IMG).filter_map(|i| i.value().attr("src")))
            .chain(
                doc.select(&STYLESHEET)
                    .filter_map(|l| l.value().attr("href")),
            )
            .filter(|src| src.starts_with("http://"))
            .count()
    } else {
        0
    };

    json!({
        "https": https,
        "hsts": headers.contains_key("strict-transport-security"),
        "contentSecurityPolicy": headers.get("content-security-policy"),
        "xFrameOptions": headers.get("x-frame-options"),
        "xContentTypeOptions": headers.get("x-content-type-options"),
        "referrerPolicy": headers.get("referrer-policy"),
        "mixedContentCandidates": mixed_content,
    })
}

pub fn extract_accessibility(doc: &Html) -> Value {
    let images = doc.select(&IMG).count();
    let images_with_alt = doc
        .select(&IMG)
        .filter(|img| {
            img.value()
                .attr("alt")
                .is_some_and(|alt| !alt.trim().is_empty())
        })
        .count();
    let inputs = doc.select(&FORM_INPUT).count();
    let labels = doc.select(&LABEL_FOR).count();
    let has_lang = doc
        .select(&HTML_EL)
        .next()
        .and_then(|h| h.value().attr("lang"))
        .is_some_and(|l| !l.trim().is_empty());

    json!({
        "imageCount": images,
        "imagesWithAlt": images_with_alt,
        "formInputs": inputs,
        "labeledControls": labels,
        "landmarks": doc.select(&LANDMARK).count(),
        "htmlLang": has_lang,
    })
}

pub fn extract_mobile(doc: &Html) -> Value {
    json!({
        "viewportMeta": meta_content(doc, "viewport"),
        "appleTouchIcon": doc.select(&TOUCH_ICON).next().is_some(),
        "responsiveImages": doc.select(&SRCSET_IMG).count(),
        "themeColor": meta_content(doc, "theme-color"),
    })
}

/// Coarse page-type classification from URL path and document signals.
pub fn extract_enhanced(doc: &Html, url: &Url) -> Value {
    let path = url.path().to_ascii_lowercase();
    let segment_hit = |needles: &[&str]| needles.iter().any(|n| path.contains(n));

    let page_type = if path == "/" || path.is_empty() {
        "homepage"
    } else if segment_hit(&["/product", "/shop/", "/item"]) {
        "product"
    } else if segment_hit(&["/cart", "/checkout", "/basket"]) {
        "checkout"
    } else if segment_hit(&["/blog", "/news", "/article", "/post"])
        || doc.select(&ARTICLE).next().is_some()
    {
        "article"
    } else if segment_hit(&["/contact"]) {
        "contact"
    } else if segment_hit(&["/about"]) {
        "about"
    } else if segment_hit(&["/category", "/collection", "/tag/"]) {
        "category"
    } else if segment_hit(&["/search"]) {
        "search"
    } else {
        "other"
    };

    json!({
        "pageType": page_type,
        "language": doc
            .select(&HTML_EL)
            .next()
            .and_then(|h| h.value().attr("lang")),
    })
}

pub fn extract_ecommerce(doc: &Html) -> Value {
    let product_schema = doc.select(&LD_JSON).any(|s| {
        let text: String = s.text().collect();
        serde_json::from_str::<Value>(&text)
            .ok()
            .is_some_and(|v| has_schema_type(&v, "Product"))
    });

    let body_text = doc
        .select(&BODY)
        .next()
        .map(element_text)
        .unwrap_or_default();
    let price_markers = count_price_markers(&body_text);

    let cart_links = doc
        .select(&A_HREF)
        .filter_map(|a| a.value().attr("href"))
        .filter(|h| {
            let h = h.to_ascii_lowercase();
            h.contains("cart") || h.contains("checkout") || h.contains("basket")
        })
        .count();

    json!({
        "productSchema": product_schema,
        "priceMarkers": price_markers,
        "cartLinks": cart_links,
        "isStorefront": product_schema || cart_links > 0,
    })
}

fn has_schema_type(v: &Value, wanted: &str) -> bool {
    match v {
        Value::Object(map) => match map.get("@type") {
            Some(Value::String(t)) => t == wanted,
            Some(Value::Array(ts)) => ts.iter().any(|t| t.as_str() == Some(wanted)),
            _ => map.values().any(|child| has_schema_type(child, wanted)),
        },
        Value::Array(items) => items.iter().any(|child| has_schema_type(child, wanted)),
        _ => false,
    }
}

/// Currency symbol immediately followed by a digit.
fn count_price_markers(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    chars
        .windows(2)
        .filter(|w| matches!(w[0], '$' | '€' | '£' | '¥') && w[1].is_ascii_digit())
        .count()
}

pub fn extract_media(doc: &Html) -> Value {
    let images: Vec<Value> = doc
        .select(&IMG)
        .take(20)
        .map(|img| {
            json!({
                "src": img.value().attr("src"),
                "alt": img.value().attr("alt"),
            })
        })
        .collect();

    let embedded_players = doc
        .select(&IFRAME_SRC)
        .filter_map(|f| f.value().attr("src"))
        .filter(|src| {
            let s = src.to_ascii_lowercase();
            s.contains("youtube") || s.contains("vimeo")
        })
        .count();

    json!({
        "imageCount": doc.select(&IMG).count(),
        "imageSample": images,
        "videoCount": doc.select(&VIDEO).count(),
        "audioCount": doc.select(&AUDIO).count(),
        "embeddedPlayers": embedded_players,
    })
}

pub fn extract_navigation(doc: &Html) -> Value {
    json!({
        "navCount": doc.select(&NAV).count(),
        "hasBreadcrumbs": doc.select(&BREADCRUMB).next().is_some(),
        "hasPagination": doc.select(&PAGINATION).next().is_some(),
        "footerLinks": doc.select(&FOOTER_LINK).count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn raw_links_capture_anchor_and_rel() {
        let d = doc(r#"<html><body><a href="/a" rel="nofollow noopener" target="_blank">Go <b>now</b></a></body></html>"#);
        let links = extract_raw_links(&d);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].href, "/a");
        assert_eq!(links[0].anchor_text, "Go now");
        assert_eq!(links[0].rel, vec!["nofollow", "noopener"]);
        assert_eq!(links[0].target.as_deref(), Some("_blank"));
    }

    #[test]
    fn seo_reports_title_and_description() {
        let d = doc(
            r#"<html><head><title> Hello </title><meta name="description" content="A page"></head></html>"#,
        );
        let seo = extract_seo(&d);
        assert_eq!(seo["title"], "Hello");
        assert_eq!(seo["metaDescription"], "A page");
        assert_eq!(seo["metaDescriptionLength"], 6);
    }

    #[test]
    fn price_markers_need_adjacent_digit() {
        assert_eq!(count_price_markers("costs $5 or €10"), 2);
        assert_eq!(count_price_markers("US$ 5, just dollars $"), 0);
    }

    #[test]
    fn page_type_from_path() {
        let d = doc("<html><body></body></html>");
        let url = Url::parse("https://x.test/blog/my-post").unwrap();
        assert_eq!(extract_enhanced(&d, &url)["pageType"], "article");
        let url = Url::parse("https://x.test/").unwrap();
        assert_eq!(extract_enhanced(&d, &url)["pageType"], "homepage");
    }

    #[test]
    fn product_schema_detected_in_ld_json() {
        let d = doc(
            r#"<html><head><script type="application/ld+json">{"@context":"https://schema.org","@type":"Product","name":"X"}</script></head></html>"#,
        );
        assert_eq!(extract_ecommerce(&d)["productSchema"], true);
    }
}
