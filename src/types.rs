use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::verification::Verification;

pub const HEADER_EVENT_ID: &str = "x-sapliy-event-id";
pub const HEADER_EVENT_TYPE: &str = "x-sapliy-event-type";
pub const HEADER_TIMESTAMP: &str = "x-sapliy-timestamp";
pub const HEADER_SIGNATURE: &str = "x-sapliy-signature";

// Deprecated names still sent by older senders.
pub const LEGACY_HEADER_EVENT_ID: &str = "x-webhook-id";
pub const LEGACY_HEADER_EVENT_TYPE: &str = "x-webhook-event";
pub const LEGACY_HEADER_TIMESTAMP: &str = "x-webhook-timestamp";
pub const LEGACY_HEADER_SIGNATURE: &str = "x-webhook-signature";

/// An event as returned by the events API. Only `id` and `type` are
/// interpreted; everything else is kept for verbose display. A missing or
/// non-string `id`/`type` reads as "".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "string_or_empty")]
    pub event_type: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        _ => String::new(),
    })
}

/// One page of `GET /v1/events`. Entries that are not event objects are
/// skipped so one bad entry does not cost the rest of the page.
#[derive(Debug, Default, Deserialize)]
pub struct EventsPage {
    #[serde(default, deserialize_with = "lenient_events")]
    pub data: Vec<Event>,
}

fn lenient_events<'de, D>(deserializer: D) -> Result<Vec<Event>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed event in page");
                None
            }
        })
        .collect())
}

/// Event metadata carried in the headers of a pushed delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryHeaders {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: String,
    pub signature: String,
}

impl DeliveryHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            event_id: header_value(headers, HEADER_EVENT_ID, LEGACY_HEADER_EVENT_ID),
            event_type: header_value(headers, HEADER_EVENT_TYPE, LEGACY_HEADER_EVENT_TYPE),
            timestamp: header_value(headers, HEADER_TIMESTAMP, LEGACY_HEADER_TIMESTAMP),
            signature: header_value(headers, HEADER_SIGNATURE, LEGACY_HEADER_SIGNATURE),
        }
    }
}

/// Canonical header if present and non-empty, else the legacy one, else "".
fn header_value(headers: &HeaderMap, canonical: &str, legacy: &str) -> String {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    };
    get(canonical).or_else(|| get(legacy)).unwrap_or("").to_string()
}

/// A delivery that passed the filter, ready to be rendered.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub headers: DeliveryHeaders,
    pub verification: Option<Verification>,
    pub payload: Payload,
}

/// Delivery body as it will be displayed.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    /// Body that is not JSON, shown verbatim (lossy UTF-8).
    Raw(String),
}

impl Payload {
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body)
            .map(Payload::Json)
            .unwrap_or_else(|_| Payload::Raw(String::from_utf8_lossy(body).into_owned()))
    }
}
