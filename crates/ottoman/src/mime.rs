//! Content-type registry and negotiation for show and list functions.
//!
//! Scripts associate short keys with media types through `register_type`
//! and attach handlers to keys through `provides`. When a function has
//! registered handlers, the request's `query.format` or `Accept` header
//! picks the one to run.

use std::cmp::Ordering;

use serde_json::Value;
use tracing::debug;

use crate::error::QueryError;

pub(crate) const MIME_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::mime");

const DEFAULT_TYPES: &[(&str, &[&str])] = &[
    ("all", &["*/*"]),
    ("text", &["text/plain; charset=utf-8", "txt"]),
    ("html", &["text/html; charset=utf-8"]),
    ("xhtml", &["application/xhtml+xml", "xhtml"]),
    ("xml", &["application/xml", "text/xml", "application/x-xml"]),
    (
        "js",
        &[
            "text/javascript",
            "application/javascript",
            "application/x-javascript",
        ],
    ),
    ("css", &["text/css"]),
    ("ics", &["text/calendar"]),
    ("csv", &["text/csv"]),
    ("rss", &["application/rss+xml"]),
    ("atom", &["application/atom+xml"]),
    ("yaml", &["application/x-yaml", "text/yaml"]),
    ("multipart_form", &["multipart/form-data"]),
    ("url_encoded_form", &["application/x-www-form-urlencoded"]),
    ("json", &["application/json", "text/x-json"]),
];

/// Ordered mapping from short keys to media types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeRegistry {
    entries: Vec<(String, Vec<String>)>,
}

impl Default for MimeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl MimeRegistry {
    /// Registry holding the conventional web media types.
    #[must_use]
    pub fn with_defaults() -> Self {
        let entries = DEFAULT_TYPES
            .iter()
            .map(|(key, types)| {
                (
                    (*key).to_owned(),
                    types.iter().map(|mime| (*mime).to_owned()).collect(),
                )
            })
            .collect();
        Self { entries }
    }

    /// Drops script registrations and reinstates the defaults.
    pub fn restore_defaults(&mut self) {
        *self = Self::with_defaults();
    }

    /// Associates `key` with `types`, replacing any earlier association.
    pub fn register(&mut self, key: &str, types: Vec<String>) {
        debug!(target: MIME_TARGET, key, ?types, "registering media types");
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, slot)) => *slot = types,
            None => self.entries.push((key.to_owned(), types)),
        }
    }

    /// Media types registered for `key`.
    #[must_use]
    pub fn types(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, types)| types.as_slice())
    }
}

/// Provider chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Key of the provider to run.
    pub key: String,
    /// Media type to advertise, when one is known.
    pub content_type: Option<String>,
}

/// Chooses among `provided` keys (in the order they were provided).
///
/// An explicit `query.format` wins, then the `Accept` header, then the first
/// provider. Ties between equally acceptable types go to the earliest
/// provider.
///
/// # Errors
///
/// Returns `not_acceptable` when no provider matches the request.
pub fn negotiate(
    registry: &MimeRegistry,
    provided: &[String],
    request: &Value,
) -> Result<Negotiation, QueryError> {
    if let Some(format) = request.pointer("/query/format").and_then(Value::as_str) {
        return if provided.iter().any(|key| key == format) {
            Ok(Negotiation {
                key: format.to_owned(),
                content_type: first_type(registry, format),
            })
        } else {
            Err(not_acceptable(registry, provided, format))
        };
    }

    let accept = request
        .pointer("/headers/Accept")
        .and_then(Value::as_str)
        .filter(|accept| !accept.trim().is_empty());

    let Some(accept) = accept else {
        return provided
            .first()
            .map(|key| Negotiation {
                key: key.clone(),
                content_type: first_type(registry, key),
            })
            .ok_or_else(|| not_acceptable(registry, provided, "*/*"));
    };

    let candidates: Vec<(&str, &str)> = provided
        .iter()
        .flat_map(|key| {
            registry
                .types(key)
                .unwrap_or_default()
                .iter()
                .map(move |mime| (key.as_str(), mime.as_str()))
        })
        .collect();
    let supported: Vec<&str> = candidates.iter().map(|(_, mime)| *mime).collect();

    best_match(&supported, accept)
        .and_then(|index| candidates.get(index))
        .map(|(key, mime)| Negotiation {
            key: (*key).to_owned(),
            content_type: Some((*mime).to_owned()),
        })
        .ok_or_else(|| not_acceptable(registry, provided, accept))
}

fn first_type(registry: &MimeRegistry, key: &str) -> Option<String> {
    registry
        .types(key)
        .and_then(|types| types.first())
        .cloned()
}

fn not_acceptable(registry: &MimeRegistry, provided: &[String], wanted: &str) -> QueryError {
    let offered: Vec<String> = provided
        .iter()
        .map(|key| match registry.types(key) {
            Some(types) if !types.is_empty() => types.join(", "),
            _ => key.clone(),
        })
        .collect();
    QueryError::error(
        "not_acceptable",
        format!(
            "Content-Type {wanted} not supported, try one of:\n{}",
            offered.join(", ")
        ),
    )
}

#[derive(Debug)]
struct MediaRange {
    kind: String,
    subtype: String,
    params: Vec<(String, String)>,
    quality: f64,
}

impl MediaRange {
    fn parse(text: &str) -> Self {
        let mut parts = text.split(';');
        let raw = parts.next().unwrap_or_default().trim();
        let full = if raw == "*" { "*/*" } else { raw };
        let (kind, subtype) = full.split_once('/').unwrap_or((full, ""));

        let mut quality = 1.0;
        let mut params = Vec::new();
        for param in parts {
            let Some((raw_name, raw_value)) = param.split_once('=') else {
                continue;
            };
            let (name, value) = (raw_name.trim(), raw_value.trim());
            if name == "q" {
                quality = value
                    .parse::<f64>()
                    .ok()
                    .filter(|q| (0.0..=1.0).contains(q))
                    .unwrap_or(1.0);
            } else {
                params.push((name.to_owned(), value.to_owned()));
            }
        }

        Self {
            kind: kind.trim().to_owned(),
            subtype: subtype.trim().to_owned(),
            params,
            quality,
        }
    }

    /// Fitness of this range against `offer`, or `None` when they do not
    /// overlap.
    fn fitness(&self, offer: &Self) -> Option<u32> {
        let kind_ok = self.kind == offer.kind || self.kind == "*" || offer.kind == "*";
        let subtype_ok =
            self.subtype == offer.subtype || self.subtype == "*" || offer.subtype == "*";
        if !(kind_ok && subtype_ok) {
            return None;
        }
        let shared = offer
            .params
            .iter()
            .filter(|param| self.params.contains(param))
            .count();
        let kind_score = if self.kind == offer.kind { 100 } else { 0 };
        let subtype_score = if self.subtype == offer.subtype { 10 } else { 0 };
        Some(kind_score + subtype_score + u32::try_from(shared).unwrap_or(u32::MAX))
    }
}

/// Index of the best entry of `supported` for an `Accept` header.
///
/// Each offer takes the quality of its best-fitting range; offers are ranked
/// by quality and then fitness, earliest first on ties. Offers with zero
/// quality never match.
#[must_use]
pub fn best_match(supported: &[&str], accept: &str) -> Option<usize> {
    let ranges: Vec<MediaRange> = accept.split(',').map(MediaRange::parse).collect();
    let mut best: Option<(usize, f64, u32)> = None;

    for (index, text) in supported.iter().enumerate() {
        let offer = MediaRange::parse(text);
        let Some((quality, fitness)) = ranges
            .iter()
            .filter_map(|range| range.fitness(&offer).map(|fit| (range.quality, fit)))
            .max_by_key(|(_, fit)| *fit)
        else {
            continue;
        };
        if quality <= 0.0 {
            continue;
        }
        let better = best.is_none_or(|(_, best_quality, best_fitness)| {
            match quality.total_cmp(&best_quality) {
                Ordering::Greater => true,
                Ordering::Equal => fitness > best_fitness,
                Ordering::Less => false,
            }
        });
        if better {
            best = Some((index, quality, fitness));
        }
    }

    best.map(|(index, _, _)| index)
}
