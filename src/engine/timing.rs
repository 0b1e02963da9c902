use crate::domain::NetworkTimings;
use std::time::Instant;

/// Instants recorded by the executor around one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeline {
    pub sent_at: Instant,
    pub headers_at: Instant,
    pub finished_at: Instant,
    pub proxied: bool,
}

/// Optional capability that turns a completed request into a network breakdown.
/// Returning `None` means "unavailable"; callers must not substitute zeros.
pub trait TimingProbe: Send + Sync {
    fn breakdown(&self, url: &str, timeline: &RequestTimeline) -> Option<NetworkTimings>;
}

/// Breakdown from the client's own timeline. The pooled client does not expose
/// connection setup, so DNS/TCP/TLS time is folded into TTFB and reported as 0.
/// Proxied requests measure the proxy hop, not the target, and yield nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineProbe;

impl TimingProbe for TimelineProbe {
    fn breakdown(&self, _url: &str, timeline: &RequestTimeline) -> Option<NetworkTimings> {
        if timeline.proxied {
            return None;
        }
        let ttfb_ms = millis_between(timeline.sent_at, timeline.headers_at);
        let download_ms = millis_between(timeline.headers_at, timeline.finished_at);
        Some(NetworkTimings {
            dns_ms: 0.0,
            tcp_ms: 0.0,
            tls_ms: 0.0,
            ttfb_ms,
            download_ms,
            total_ms: millis_between(timeline.sent_at, timeline.finished_at),
        })
    }
}

fn millis_between(start: Instant, end: Instant) -> f64 {
    end.saturating_duration_since(start).as_secs_f64() * 1000.0
}
