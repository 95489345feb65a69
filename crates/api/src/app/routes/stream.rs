//! Watch endpoints: one SSE stream per topic, plus a stock-alert stream.
//!
//! A stream opens with a `snapshot` event carrying the topic's current state,
//! then one `change` event per delivered notification. Slow clients miss
//! notifications instead of slowing writers; each `change` carries the full
//! collection, so the latest one is always complete.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use stockledger_infra::{ChangeNotification, Snapshot, StockAlert, Subscription};
use stockledger_inventory::Topic;

use crate::app::errors;
use crate::app::services::AppServices;

type EventSender = UnboundedSender<Result<SseEvent, Infallible>>;

pub fn router() -> Router {
    Router::new()
        .route("/alerts", get(stream_alerts))
        .route("/:topic", get(stream_topic))
}

/// GET /stream/:topic  (products | warehouses | movements | stock_levels)
pub async fn stream_topic(
    Extension(services): Extension<Arc<AppServices>>,
    Path(topic): Path<String>,
) -> axum::response::Response {
    let topic: Topic = match topic.parse() {
        Ok(t) => t,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation", format!("{e}")),
    };

    // Subscribe before reading the snapshot so no change falls in between.
    let subscription = services.notifier.subscribe(topic);
    let snapshot = match services.notifier.snapshot(topic).await {
        Ok(s) => s,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    open_stream(subscription, topic.as_str(), &snapshot, |notification| {
        SseEvent::default().event("change").json_data(notification).ok()
    })
}

/// GET /stream/alerts
///
/// Stock alerts recomputed from every products notification.
pub async fn stream_alerts(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let subscription = services.notifier.subscribe(Topic::Products);
    let alerts = match services.catalog.stock_alerts().await {
        Ok(a) => a,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    open_stream(subscription, "alerts", &alerts, |notification| match &notification.snapshot {
        Snapshot::Products(products) => SseEvent::default()
            .event("change")
            .json_data(StockAlert::for_products(products))
            .ok(),
        _ => None,
    })
}

/// Send `initial` as the `snapshot` event, then forward each notification
/// that `render` turns into an event.
fn open_stream<T, F>(
    subscription: Subscription<ChangeNotification>,
    name: &'static str,
    initial: &T,
    render: F,
) -> axum::response::Response
where
    T: Serialize,
    F: Fn(&ChangeNotification) -> Option<SseEvent> + Send + 'static,
{
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();
    match SseEvent::default().event("snapshot").json_data(initial) {
        Ok(event) => {
            let _ = tx.send(Ok(event));
        }
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization", e.to_string());
        }
    }

    // The subscription is a blocking receiver; forward it from a blocking task.
    tokio::task::spawn_blocking(move || forward(subscription, tx, name, render));

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

fn forward<F>(subscription: Subscription<ChangeNotification>, tx: EventSender, name: &'static str, render: F)
where
    F: Fn(&ChangeNotification) -> Option<SseEvent>,
{
    loop {
        match subscription.recv_timeout(Duration::from_millis(1000)) {
            Ok(notification) => {
                let Some(event) = render(&notification) else {
                    continue;
                };
                if tx.send(Ok(event)).is_err() {
                    break; // Client gone
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if tx.is_closed() {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(stream = name, "watch stream closed");
    // Dropping `subscription` unregisters the watcher.
}
