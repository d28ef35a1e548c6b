//! Server-sent event framing and the streaming response body.

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use serde_json::Value;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_ENDPOINT: &str = "endpoint";

const KEEP_ALIVE_FRAME: &[u8] = b": ping\n\n";

/// Encode one SSE event. Multi-line data is split across `data:` fields.
pub fn event(name: &str, data: &str) -> Bytes {
    let mut out = String::with_capacity(data.len() + name.len() + 16);
    out.push_str("event: ");
    out.push_str(name);
    out.push('\n');
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// Encode a JSON-RPC message as a `message` event.
pub fn message_event(message: &Value) -> Bytes {
    event(EVENT_MESSAGE, &message.to_string())
}

/// Encode the legacy `endpoint` event announcing where to POST messages.
pub fn endpoint_event(endpoint: &str) -> Bytes {
    event(EVENT_ENDPOINT, endpoint)
}

type OnDrop = Box<dyn FnOnce() + Send + Sync>;

/// Response body fed by a channel of pre-framed SSE events.
///
/// The stream ends once every sender is dropped. Dropping the body (client
/// went away) closes the receiver and runs the `on_drop` hook, if any, on the
/// dropping task.
pub struct SseBody {
    rx: mpsc::Receiver<Bytes>,
    keep_alive: Option<Interval>,
    on_drop: Option<OnDrop>,
}

impl SseBody {
    /// `keep_alive` of `None` or zero disables comment pings.
    pub fn new(rx: mpsc::Receiver<Bytes>, keep_alive: Option<Duration>) -> Self {
        let keep_alive = keep_alive.filter(|d| !d.is_zero()).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self {
            rx,
            keep_alive,
            on_drop: None,
        }
    }

    /// Run `hook` when the body is dropped.
    pub fn on_drop(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Box::new(hook));
        self
    }
}

impl Drop for SseBody {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}

impl Body for SseBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => return Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }
        if let Some(interval) = this.keep_alive.as_mut() {
            if interval.poll_tick(cx).is_ready() {
                let ping = Bytes::from_static(KEEP_ALIVE_FRAME);
                return Poll::Ready(Some(Ok(Frame::data(ping))));
            }
        }
        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        false
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}
