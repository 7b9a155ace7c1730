use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    domain::{BackgroundMessage, ProcessingResponse},
    infrastructure::shutdown::ShutdownListener,
    tasks::orchestrator::FactCheckOrchestrator,
};

/// A serialized message and the slot its single reply goes into.
struct Envelope {
    payload: String,
    reply: oneshot::Sender<String>,
}

/// Page-side handle. Cheap to clone; every clone talks to the same worker.
#[derive(Clone)]
pub struct ChannelClient {
    sender: mpsc::Sender<Envelope>,
}

impl ChannelClient {
    /// Sends one message and waits for its reply. Always resolves: transport
    /// problems come back as `ProcessingResponse::error`.
    pub async fn send(&self, message: &BackgroundMessage) -> ProcessingResponse {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => return ProcessingResponse::error(format!("failed to encode message: {err}")),
        };
        self.send_raw(payload).await
    }

    pub async fn send_raw(&self, payload: String) -> ProcessingResponse {
        let (reply, receiver) = oneshot::channel();
        if self.sender.send(Envelope { payload, reply }).await.is_err() {
            return ProcessingResponse::error("background context is not running");
        }
        match receiver.await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                ProcessingResponse::error(format!("failed to decode reply: {err}"))
            }),
            Err(_) => ProcessingResponse::error("background context closed before replying"),
        }
    }
}

/// Background side: owns the orchestrator and answers every envelope once.
pub struct BackgroundWorker {
    receiver: mpsc::Receiver<Envelope>,
    orchestrator: Arc<FactCheckOrchestrator>,
}

pub fn channel(
    orchestrator: Arc<FactCheckOrchestrator>,
    capacity: usize,
) -> (ChannelClient, BackgroundWorker) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        ChannelClient { sender },
        BackgroundWorker {
            receiver,
            orchestrator,
        },
    )
}

impl BackgroundWorker {
    pub fn spawn(self, shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: ShutdownListener) {
        loop {
            let envelope = tokio::select! {
                envelope = self.receiver.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
                _ = shutdown.notified() => break,
            };
            let orchestrator = self.orchestrator.clone();
            tokio::spawn(async move {
                let Envelope { payload, reply } = envelope;
                let response = dispatch(&orchestrator, &payload).await;
                let raw = serde_json::to_string(&response)
                    .unwrap_or_else(|_| r#"{"error":"failed to encode reply"}"#.to_string());
                if reply.send(raw).is_err() {
                    tracing::debug!(target: "channel", "requester went away before the reply");
                }
            });
        }

        // Refuse whatever is still queued so no requester waits forever.
        self.receiver.close();
        while let Ok(Envelope { reply, .. }) = self.receiver.try_recv() {
            let _ = reply.send(r#"{"error":"background context is shutting down"}"#.to_string());
        }
        tracing::info!(target: "channel", "background worker stopped");
    }
}

async fn dispatch(orchestrator: &FactCheckOrchestrator, payload: &str) -> ProcessingResponse {
    let message = match serde_json::from_str::<BackgroundMessage>(payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(target: "channel", error = %err, "unsupported message");
            return ProcessingResponse::error(format!("unsupported message: {err}"));
        }
    };

    match message {
        BackgroundMessage::ProcessFactCheck { data } => {
            tracing::info!(
                target: "channel",
                title = %data.title,
                url = %data.url,
                "processing fact check"
            );
            let response = orchestrator.handle(&data).await;
            match serde_json::to_string(&response) {
                Ok(result) => ProcessingResponse::result(result),
                Err(err) => ProcessingResponse::error(format!("failed to encode result: {err}")),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        ai::{analysis::tests::StubTransport, AnalysisService},
        domain::{FactCheckResponse, PageSelectionRequest, RateLimitState},
        infrastructure::shutdown::Shutdown,
        tasks::rate_limiter::{
            tests::{fixed_clock, t0, MemoryRateLimitStore},
            RateLimitPolicy, RateLimiter,
        },
    };

    pub(crate) fn orchestrator_with(
        store: MemoryRateLimitStore,
        transport: Arc<StubTransport>,
    ) -> Arc<FactCheckOrchestrator> {
        let limiter = RateLimiter::with_clock(
            Arc::new(store),
            RateLimitPolicy::default(),
            fixed_clock(t0()),
        );
        let analysis = AnalysisService::new(transport, "perplexity/sonar", "openai/gpt-4o");
        Arc::new(FactCheckOrchestrator::new(limiter, analysis))
    }

    /// Client whose background reports each arriving payload on `arrived`,
    /// then replies with that payload once a `release` permit is available.
    pub(crate) fn gated_client(
        release: Arc<tokio::sync::Semaphore>,
        arrived: mpsc::UnboundedSender<String>,
    ) -> ChannelClient {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(8);
        tokio::spawn(async move {
            while let Some(Envelope { payload, reply }) = receiver.recv().await {
                let _ = arrived.send(payload.clone());
                let release = release.clone();
                tokio::spawn(async move {
                    release.acquire().await.unwrap().forget();
                    let response = ProcessingResponse::result(payload);
                    let _ = reply.send(serde_json::to_string(&response).unwrap());
                });
            }
        });
        ChannelClient { sender }
    }

    fn request() -> BackgroundMessage {
        BackgroundMessage::ProcessFactCheck {
            data: PageSelectionRequest {
                title: "Example".into(),
                url: "http://x".into(),
                text: "The earth is flat".into(),
            },
        }
    }

    fn decode(response: &ProcessingResponse) -> FactCheckResponse {
        serde_json::from_str(response.result.as_deref().expect("result")).unwrap()
    }

    #[tokio::test]
    async fn round_trip_through_worker() {
        let (shutdown, _) = Shutdown::new();
        let transport = Arc::new(StubTransport::answering("Almost certainly false"));
        let (client, worker) = channel(orchestrator_with(MemoryRateLimitStore::new(), transport), 4);
        let handle = worker.spawn(shutdown.subscribe());

        let response = client.send(&request()).await;
        assert!(response.error.is_none());
        assert!(matches!(decode(&response), FactCheckResponse::Result(_)));

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn quota_denial_travels_as_result() {
        let (shutdown, _) = Shutdown::new();
        let store = MemoryRateLimitStore::with_state(RateLimitState {
            count: 10,
            reset_at: t0() + chrono::TimeDelta::hours(1),
        });
        let transport = Arc::new(StubTransport::answering("I don't know"));
        let (client, worker) = channel(orchestrator_with(store, transport.clone()), 4);
        let _handle = worker.spawn(shutdown.subscribe());

        let response = client.send(&request()).await;
        assert!(matches!(
            decode(&response),
            FactCheckResponse::RateLimitExceeded { .. }
        ));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_message_type_still_gets_a_reply() {
        let (shutdown, _) = Shutdown::new();
        let transport = Arc::new(StubTransport::answering("I don't know"));
        let (client, worker) = channel(orchestrator_with(MemoryRateLimitStore::new(), transport), 4);
        let _handle = worker.spawn(shutdown.subscribe());

        let response = client
            .send_raw(json!({"type": "SOMETHING_ELSE"}).to_string())
            .await;
        assert!(response.result.is_none());
        assert!(response.error.unwrap().contains("unsupported message"));
    }

    #[tokio::test]
    async fn stopped_worker_resolves_with_error() {
        let transport = Arc::new(StubTransport::answering("I don't know"));
        let (client, worker) = channel(orchestrator_with(MemoryRateLimitStore::new(), transport), 4);
        drop(worker);

        let response = client.send(&request()).await;
        assert_eq!(
            response.error.as_deref(),
            Some("background context is not running")
        );
    }

    #[tokio::test]
    async fn concurrent_requests_each_get_one_reply() {
        let (shutdown, _) = Shutdown::new();
        let transport = Arc::new(StubTransport::answering("Somewhere in between"));
        let (client, worker) =
            channel(orchestrator_with(MemoryRateLimitStore::new(), transport.clone()), 2);
        let _handle = worker.spawn(shutdown.subscribe());

        let message = request();
        let responses =
            futures::future::join_all((0..5).map(|_| client.send(&message))).await;
        assert_eq!(responses.len(), 5);
        assert!(responses
            .iter()
            .all(|r| matches!(decode(r), FactCheckResponse::Result(_))));
        assert_eq!(transport.call_count(), 10);
    }
}
