// Fire-and-forget usage forwarding.
//
// Actors enqueue envelopes; a single task drains the queue and POSTs each
// to the configured webhook. Delivery failures are logged and dropped.
use relay_wire::UsageEnvelope;
use tokio::sync::mpsc;
use tracing::warn;

pub fn spawn_forwarder(webhook_url: String, queue_size: usize) -> mpsc::Sender<UsageEnvelope> {
    let (tx, mut rx) = mpsc::channel::<UsageEnvelope>(queue_size);
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        while let Some(envelope) = rx.recv().await {
            match client.post(&webhook_url).json(&envelope).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "usage webhook rejected event");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "usage webhook unreachable"),
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use relay_wire::{UsageEvent, UsageKind};
    use std::time::Duration;

    #[tokio::test]
    async fn envelopes_reach_the_webhook() {
        let (seen_tx, mut seen_rx) = mpsc::channel::<UsageEnvelope>(8);
        let app = Router::new().route(
            "/hook",
            post(move |Json(envelope): Json<UsageEnvelope>| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send(envelope).await;
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });

        let queue = spawn_forwarder(format!("http://{addr}/hook"), 8);
        let envelope = UsageEnvelope::new(UsageEvent {
            event: UsageKind::Subscribe,
            project_id: "p".to_string(),
            channel: "r".to_string(),
            topic: Some("orders".to_string()),
            client_id: Some("u1".to_string()),
            at_ms: 42,
        });
        queue.send(envelope.clone()).await.expect("enqueue");

        let received = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .expect("webhook called")
            .expect("envelope");
        assert_eq!(received, envelope);
    }
}
