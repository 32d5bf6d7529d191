// src/ingest/normalize.rs
//! Payload normalization shared by every adapter: markup stripping, entity
//! decoding, whitespace collapsing, length caps, link canonicalization and
//! lenient date parsing.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

pub const MAX_TITLE_CHARS: usize = 300;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]*>").expect("tag regex"));
static RE_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("script regex")
});
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Strip markup and decode entities, leaving collapsed plain text.
pub fn strip_markup(s: &str) -> String {
    // Entities first: feeds often double-escape markup (`&lt;p&gt;`).
    let decoded = html_escape::decode_html_entities(s).to_string();
    let no_script = RE_SCRIPT.replace_all(&decoded, " ");
    let no_tags = RE_TAGS.replace_all(&no_script, " ");
    // A second decode handles entities that were inside the escaped markup.
    let out = html_escape::decode_html_entities(&no_tags).to_string();

    // Typographic quotes to ASCII.
    let out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// Truncate to at most `max` chars, cutting back to a word boundary when one
/// is reasonably close.
pub fn cap_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    // (char position, byte offset) of the last space.
    let last_space = cut
        .char_indices()
        .enumerate()
        .filter(|(_, (_, c))| *c == ' ')
        .map(|(pos, (byte, _))| (pos, byte))
        .last();
    match last_space {
        Some((pos, byte)) if pos > max / 2 => format!("{}…", cut[..byte].trim_end()),
        _ => format!("{}…", cut),
    }
}

pub fn clean_title(raw: &str) -> String {
    cap_chars(&strip_markup(raw), MAX_TITLE_CHARS)
}

pub fn clean_description(raw: &str) -> String {
    cap_chars(&strip_markup(raw), MAX_DESCRIPTION_CHARS)
}

/// Whitespace-split tokens after markup stripping.
pub fn word_count(s: &str) -> usize {
    strip_markup(s).split_whitespace().count()
}

/// Canonical form of a link: no fragment, no `utm_*` params, lowercase host,
/// no trailing slash. Unparseable links are returned trimmed.
pub fn canonical_link(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = url::Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_string();
    };
    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string().trim_end_matches('/').to_string()
}

/// Registrable-ish host of a link, lowercased and without `www.`.
pub fn link_domain(link: &str) -> Option<String> {
    let url = url::Url::parse(link.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Parse RFC 2822 (RSS) or RFC 3339 (Atom, JSON APIs) timestamps.
/// Anything else yields `None`; callers must not substitute "now".
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(parsed) =
        OffsetDateTime::parse(s, &Rfc2822).or_else(|_| OffsetDateTime::parse(s, &Rfc3339))
    {
        return DateTime::<Utc>::from_timestamp(parsed.unix_timestamp(), parsed.nanosecond());
    }
    // chrono is more lenient with obsolete zone names ("GMT", "EST").
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
