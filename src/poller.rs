//! Pull path: poll `GET /v1/events` on a fixed interval and render new events.
//!
//! ```text
//! Idle ──start──▶ Polling ──tick──▶ Polling
//!                    │
//!                    └──cancel──▶ Stopped
//! ```
//!
//! Cancellation is checked before every cycle and preempts a pending tick, but a
//! cycle that has already started (fetch + render) always runs to completion.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PollerSettings;
use crate::errors::{Error, Result};
use crate::pattern::EventPattern;
use crate::render::{self, Console};
use crate::types::{Event, EventsPage};

/// How many rendered ids the cursor remembers for de-duplication.
const SEEN_CAPACITY: usize = 1000;

/// Where events come from. The HTTP implementation is [`HttpEventSource`].
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch the next page of events strictly after `after`, oldest first.
    async fn fetch(&self, after: Option<&str>) -> Result<Vec<Event>>;
}

/// Authenticated client for the events endpoint.
pub struct HttpEventSource {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    zone: Option<String>,
    limit: u32,
}

impl HttpEventSource {
    pub fn new(settings: &PollerSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/events", settings.api_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            zone: settings.zone.clone(),
            limit: settings.limit,
        })
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn fetch(&self, after: Option<&str>) -> Result<Vec<Event>> {
        let mut query = vec![("limit", self.limit.to_string())];
        if let Some(zone) = &self.zone {
            query.push(("zone", zone.clone()));
        }
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let page: EventsPage = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(page.data)
    }
}

/// Last rendered event id plus a bounded window of ids already shown.
#[derive(Debug, Default)]
pub struct PollCursor {
    last_seen_id: Option<String>,
    seen: VecDeque<String>,
    seen_ids: HashSet<String>,
}

impl PollCursor {
    /// The `after` bound for the next fetch.
    pub fn after(&self) -> Option<&str> {
        self.last_seen_id.as_deref()
    }

    pub fn already_rendered(&self, id: &str) -> bool {
        !id.is_empty() && self.seen_ids.contains(id)
    }

    /// Record that `id` was rendered. Events without an id never move the cursor.
    pub fn advance(&mut self, id: &str) {
        if id.is_empty() {
            return;
        }
        self.last_seen_id = Some(id.to_string());
        if self.seen_ids.insert(id.to_string()) {
            self.seen.push_back(id.to_string());
            if self.seen.len() > SEEN_CAPACITY {
                if let Some(oldest) = self.seen.pop_front() {
                    self.seen_ids.remove(&oldest);
                }
            }
        }
    }
}

pub struct EventPoller<S> {
    source: S,
    filter: Option<EventPattern>,
    verbose: bool,
    interval: Duration,
    console: Console,
    cursor: PollCursor,
}

impl<S: EventSource> EventPoller<S> {
    pub fn new(source: S, settings: &PollerSettings, console: Console) -> Self {
        Self {
            source,
            filter: settings.filter.clone(),
            verbose: settings.verbose,
            interval: settings.interval,
            console,
            cursor: PollCursor::default(),
        }
    }

    pub fn cursor(&self) -> &PollCursor {
        &self.cursor
    }

    /// Run one fetch-filter-render cycle and return how many events were
    /// rendered. A failed fetch counts as an empty page.
    pub async fn poll_once(&mut self) -> usize {
        let events = match self.source.fetch(self.cursor.after()).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, after = ?self.cursor.after(), "event poll failed");
                return 0;
            }
        };

        let mut rendered = 0;
        for event in events {
            if let Some(filter) = &self.filter {
                if !filter.matches(&event.event_type) {
                    continue;
                }
            }
            if self.cursor.already_rendered(&event.id) {
                tracing::debug!(event_id = %event.id, "skipping already rendered event");
                continue;
            }

            self.cursor.advance(&event.id);
            self.console
                .emit(&render::render_event(&event, Local::now(), self.verbose));
            rendered += 1;
        }

        tracing::debug!(rendered, after = ?self.cursor.after(), "poll cycle complete");
        rendered
    }

    /// Poll every `interval` until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        tracing::debug!(after = ?self.cursor.after(), "event poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{POLL_INTERVAL, REQUEST_TIMEOUT};
    use crate::test_utils::CapturedOutput;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(api_url: &str, filter: Option<&str>) -> PollerSettings {
        PollerSettings {
            api_url: api_url.to_string(),
            api_key: "sk_test_123".to_string(),
            zone: None,
            filter: filter.map(EventPattern::parse),
            verbose: false,
            interval: POLL_INTERVAL,
            timeout: REQUEST_TIMEOUT,
            limit: 10,
        }
    }

    fn event(id: &str, event_type: &str) -> Event {
        Event {
            id: id.to_string(),
            event_type: event_type.to_string(),
            ..Default::default()
        }
    }

    /// Replays scripted pages and records the `after` of every call.
    #[derive(Clone, Default)]
    struct ScriptedSource {
        pages: Arc<Mutex<VecDeque<Result<Vec<Event>>>>>,
        calls: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl ScriptedSource {
        fn push(&self, page: Result<Vec<Event>>) {
            self.pages.lock().unwrap().push_back(page);
        }

        fn calls(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn fetch(&self, after: Option<&str>) -> Result<Vec<Event>> {
            self.calls.lock().unwrap().push(after.map(str::to_string));
            self.pages.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn poller(
        source: ScriptedSource,
        filter: Option<&str>,
    ) -> (EventPoller<ScriptedSource>, CapturedOutput) {
        let captured = CapturedOutput::default();
        let settings = settings("http://unused", filter);
        let poller = EventPoller::new(source, &settings, captured.console());
        (poller, captured)
    }

    #[test]
    fn test_cursor_window_is_bounded() {
        let mut cursor = PollCursor::default();
        assert_eq!(cursor.after(), None);

        for i in 0..SEEN_CAPACITY + 5 {
            cursor.advance(&format!("e{i}"));
        }
        assert_eq!(cursor.after(), Some(format!("e{}", SEEN_CAPACITY + 4).as_str()));
        assert!(!cursor.already_rendered("e0"));
        assert!(cursor.already_rendered("e5"));
        assert_eq!(cursor.seen.len(), SEEN_CAPACITY);

        cursor.advance("");
        assert_eq!(cursor.after(), Some(format!("e{}", SEEN_CAPACITY + 4).as_str()));
    }

    #[tokio::test]
    async fn test_after_tracks_last_rendered_event() {
        let source = ScriptedSource::default();
        source.push(Ok(vec![event("e1", "payment.succeeded"), event("e2", "payment.failed")]));
        source.push(Ok(vec![]));
        source.push(Ok(vec![event("e3", "payment.succeeded")]));
        source.push(Ok(vec![]));

        let (mut poller, _captured) = poller(source.clone(), None);
        assert_eq!(poller.poll_once().await, 2);
        assert_eq!(poller.poll_once().await, 0);
        assert_eq!(poller.poll_once().await, 1);
        poller.poll_once().await;

        assert_eq!(
            source.calls(),
            vec![None, Some("e2".to_string()), Some("e2".to_string()), Some("e3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_filtered_events_do_not_move_cursor() {
        let source = ScriptedSource::default();
        source.push(Ok(vec![event("c1", "checkout.completed")]));
        source.push(Ok(vec![event("p1", "payment.succeeded"), event("c2", "checkout.completed")]));
        source.push(Ok(vec![]));

        let (mut poller, captured) = poller(source.clone(), Some("payment.*"));
        assert_eq!(poller.poll_once().await, 0);
        assert_eq!(poller.cursor().after(), None);
        assert_eq!(poller.poll_once().await, 1);
        assert_eq!(poller.cursor().after(), Some("p1"));
        poller.poll_once().await;

        assert_eq!(source.calls(), vec![None, None, Some("p1".to_string())]);
        let out = captured.contents();
        assert!(out.contains("p1"));
        assert!(!out.contains("c1"));
        assert!(!out.contains("c2"));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_an_empty_cycle() {
        let source = ScriptedSource::default();
        source.push(Ok(vec![event("e1", "payment.succeeded")]));
        source.push(Err(Error::MissingApiKey));
        source.push(Ok(vec![event("e2", "payment.succeeded")]));

        let (mut poller, captured) = poller(source.clone(), None);
        assert_eq!(poller.poll_once().await, 1);
        assert_eq!(poller.poll_once().await, 0);
        assert_eq!(poller.cursor().after(), Some("e1"));
        assert_eq!(poller.poll_once().await, 1);

        assert_eq!(
            source.calls(),
            vec![None, Some("e1".to_string()), Some("e1".to_string())]
        );
        assert_eq!(captured.contents().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_http_source_sends_auth_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .and(query_param("limit", "10"))
            .and(query_param("zone", "zone_1"))
            .and(query_param("after", "e9"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "e10", "type": "payment.succeeded", "amount": 100}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = settings(&format!("{}/", server.uri()), None);
        settings.zone = Some("zone_1".to_string());
        let source = HttpEventSource::new(&settings).unwrap();

        let events = source.fetch(Some("e9")).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e10");
        assert_eq!(events[0].extra["amount"], 100);
    }

    #[tokio::test]
    async fn test_http_source_errors_on_bad_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .and(query_param("after", "boom"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .and(query_param_is_missing("after"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let source = HttpEventSource::new(&settings(&server.uri(), None)).unwrap();
        assert!(matches!(source.fetch(Some("boom")).await, Err(Error::Fetch(_))));
        assert!(matches!(source.fetch(None).await, Err(Error::Fetch(_))));
    }

    #[tokio::test]
    async fn test_duplicate_event_rendered_once_across_cycles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .and(query_param_is_missing("after"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "e1", "type": "payment.succeeded"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .and(query_param("after", "e1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "e1", "type": "payment.succeeded"},
                    {"id": "e2", "type": "payment.succeeded"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let settings = settings(&server.uri(), None);
        let captured = CapturedOutput::default();
        let mut poller = EventPoller::new(
            HttpEventSource::new(&settings).unwrap(),
            &settings,
            captured.console(),
        );

        assert_eq!(poller.poll_once().await, 1);
        let after_first = captured.contents();
        assert_eq!(poller.poll_once().await, 1);
        let second_cycle = captured.contents()[after_first.len()..].to_string();

        assert!(after_first.contains("e1"));
        assert!(second_cycle.contains("e2"));
        assert!(!second_cycle.contains("e1"));
        assert_eq!(poller.cursor().after(), Some("e2"));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url.query(), Some("limit=10&after=e1"));
    }

    #[tokio::test]
    async fn test_malformed_event_does_not_drop_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "e1", "type": "payment.succeeded"},
                    {"id": 42, "type": null},
                    "junk",
                    {"id": "e3", "type": "payment.failed"}
                ]
            })))
            .mount(&server)
            .await;

        let settings = settings(&server.uri(), Some("payment.*"));
        let captured = CapturedOutput::default();
        let mut poller = EventPoller::new(
            HttpEventSource::new(&settings).unwrap(),
            &settings,
            captured.console(),
        );

        assert_eq!(poller.poll_once().await, 2);
        let output = captured.contents();
        assert!(output.contains("payment.succeeded"));
        assert!(output.contains("payment.failed"));
        assert_eq!(poller.cursor().after(), Some("e3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval_until_cancelled() {
        let source = ScriptedSource::default();
        let (poller, _captured) = poller(source.clone(), None);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(poller.run(shutdown.clone()));

        // First tick fires one interval after start, not immediately.
        time::sleep(POLL_INTERVAL / 2).await;
        assert_eq!(source.calls().len(), 0);

        time::sleep(POLL_INTERVAL * 3).await;
        let polled = source.calls().len();
        assert!(polled >= 3, "expected at least 3 polls, got {polled}");

        shutdown.cancel();
        handle.await.unwrap();

        time::sleep(POLL_INTERVAL * 5).await;
        assert_eq!(source.calls().len(), polled);
    }

    #[tokio::test]
    async fn test_cancellation_does_not_wait_for_interval() {
        let source = ScriptedSource::default();
        let captured = CapturedOutput::default();
        let mut settings = settings("http://unused", None);
        settings.interval = Duration::from_secs(3600);
        let poller = EventPoller::new(source.clone(), &settings, captured.console());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(poller.run(shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
        assert!(source.calls().is_empty());
    }
}
