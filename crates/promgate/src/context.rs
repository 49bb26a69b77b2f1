// Copyright (C) 2026  promgate contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//! Per-request metrics context and route opt-out markers.
//!
//! One [`MetricsContext`] is created per in-flight request by the outermost
//! promgate layer that sees it and shared through the request extensions.
//! Handlers can reach it with `Extension<MetricsContext>` to exclude a
//! request from tracking while it is being handled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Request-scoped instrumentation state.
///
/// Cheap to clone; all clones share the same flags for one request.
#[derive(Debug, Clone, Default)]
pub struct MetricsContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug, Default)]
struct ContextInner {
    do_not_track: AtomicBool,
    exclude_all: AtomicBool,
    start: Mutex<Option<Instant>>,
}

impl MetricsContext {
    /// Skip the default HTTP metrics for this request. Explicitly wrapped
    /// trackers still record.
    pub fn set_do_not_track(&self) {
        self.inner.do_not_track.store(true, Ordering::Relaxed);
    }

    pub fn is_do_not_track(&self) -> bool {
        self.inner.do_not_track.load(Ordering::Relaxed)
    }

    /// Skip every metric for this request, including wrapped trackers.
    /// Safe to call from inside a handler; gauges that already incremented
    /// their in-progress count are reverted.
    pub fn exclude_all(&self) {
        self.inner.exclude_all.store(true, Ordering::Relaxed);
    }

    pub fn is_exclude_all(&self) -> bool {
        self.inner.exclude_all.load(Ordering::Relaxed)
    }

    pub(crate) fn stamp_start(&self, at: Instant) {
        if let Ok(mut start) = self.inner.start.lock() {
            *start = Some(at);
        }
    }

    pub(crate) fn start(&self) -> Option<Instant> {
        self.inner.start.lock().ok().and_then(|s| *s)
    }
}

/// Fetch the request's context, creating and attaching one if this is the
/// first promgate layer to see the request.
pub(crate) fn context_for(req: &mut Request) -> MetricsContext {
    if let Some(ctx) = req.extensions().get::<MetricsContext>() {
        return ctx.clone();
    }
    let ctx = MetricsContext::default();
    req.extensions_mut().insert(ctx.clone());
    ctx
}

/// Route marker: skip the default HTTP metrics for requests to this route.
///
/// ```ignore
/// Router::new()
///     .route("/ping", get(ping))
///     .route_layer(middleware::from_fn(promgate::do_not_track))
/// ```
pub async fn do_not_track(mut req: Request, next: Next) -> Response {
    context_for(&mut req).set_do_not_track();
    next.run(req).await
}

/// Route marker: skip all metrics, default and tracker alike, for requests
/// to this route.
pub async fn exclude_all_metrics(mut req: Request, next: Next) -> Response {
    context_for(&mut req).exclude_all();
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_flags_shared_between_clones() {
        let ctx = MetricsContext::default();
        let other = ctx.clone();
        assert!(!other.is_do_not_track());
        ctx.set_do_not_track();
        assert!(other.is_do_not_track());
        assert!(!other.is_exclude_all());
        other.exclude_all();
        assert!(ctx.is_exclude_all());
    }

    #[test]
    fn test_context_for_reuses_existing() {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let first = context_for(&mut req);
        first.set_do_not_track();
        let second = context_for(&mut req);
        assert!(second.is_do_not_track());
    }

    #[test]
    fn test_start_stamp() {
        let ctx = MetricsContext::default();
        assert!(ctx.start().is_none());
        let now = Instant::now();
        ctx.stamp_start(now);
        assert_eq!(ctx.start(), Some(now));
    }
}
