//! Terminal output for deliveries and polled events.
//!
//! Every function here builds a complete block as a `String`; [`Console::emit`]
//! then writes that block under a single lock so concurrent deliveries never
//! interleave on screen.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

use crate::pattern::EventPattern;
use crate::types::{Delivery, Event, Payload};
use crate::verification::Verification;

const RULE_WIDTH: usize = 60;

fn rule() -> String {
    "─".repeat(RULE_WIDTH)
}

/// Shared, mutex-guarded output sink.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Write one rendered block atomically.
    pub fn emit(&self, block: &str) {
        // A panic mid-write elsewhere leaves the sink usable; keep printing.
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = out.write_all(block.as_bytes()).and_then(|()| out.flush()) {
            tracing::warn!(error = %e, "failed to write to console");
        }
    }
}

pub fn listener_banner(port: u16, pattern: &EventPattern, verification_enabled: bool) -> String {
    let rule = rule();
    let verification = if verification_enabled {
        "ENABLED"
    } else {
        "DISABLED (set SAPLIY_WEBHOOK_SECRET)"
    };

    format!(
        "\n🎧 Sapliy Webhook Listener\n{rule}\n\
         Listening on: http://localhost:{port}\n\
         Event filter: {pattern}\n\
         Signature verification: {verification}\n\
         {rule}\n\n\
         ✓ Server started successfully\n\
         Press Ctrl+C to stop\n\n"
    )
}

pub fn poller_banner(api_url: &str) -> String {
    format!(
        "🔌 Connecting to {api_url}...\n\
         ✅ Connected! Polling for events... (Ctrl+C to stop)\n{}\n",
        rule()
    )
}

pub fn goodbye() -> String {
    "\n👋 Disconnecting...\n".to_string()
}

pub fn render_delivery(delivery: &Delivery) -> String {
    let rule = rule();
    let headers = &delivery.headers;
    let mut block = String::new();

    let _ = write!(
        block,
        "\n📨 Incoming Webhook\n{rule}\n\
         Event ID:   {}\n\
         Event Type: {}\n\
         Timestamp:  {}\n",
        headers.event_id, headers.event_type, headers.timestamp
    );

    match &delivery.verification {
        Some(Verification::Valid) => block.push_str("Signature:  ✓ VALID\n"),
        Some(Verification::Invalid { expected, received }) => {
            let _ = write!(
                block,
                "Signature:  ✗ INVALID\n  Expected: {expected}\n  Got:      {received}\n"
            );
        }
        Some(Verification::Unverified { signature }) => {
            let _ = writeln!(block, "Signature:  {signature} (not verified)");
        }
        Some(Verification::NotConfigured) | None => {}
    }

    let _ = write!(
        block,
        "\nPayload:\n{rule}\n{}\n{rule}\n\n",
        render_payload(&delivery.payload)
    );
    block
}

fn render_payload(payload: &Payload) -> String {
    match payload {
        Payload::Json(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        Payload::Raw(text) => text.clone(),
    }
}

/// One polled event: a single line, or the full JSON dump when `verbose`.
pub fn render_event(event: &Event, received_at: DateTime<Local>, verbose: bool) -> String {
    let time = received_at.format("%H:%M:%S");
    if verbose {
        let pretty = serde_json::to_string_pretty(event).unwrap_or_else(|_| format!("{event:?}"));
        format!("[{time}] {}\n{pretty}\n\n", event.event_type)
    } else {
        format!("[{time}] {:<30}  {}\n", event.event_type, event.id)
    }
}
