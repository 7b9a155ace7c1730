use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time::timeout,
};

use crate::{
    ai::{AnalysisService, OpenRouterClient},
    config::AppConfig,
    db::{self, storage::StorageRepository},
    domain::{ContentMessage, ProcessingResponse},
    infrastructure::{
        directories::ResolvedPaths,
        shutdown::{Shutdown, ShutdownListener},
    },
    tasks::{
        channel::{self, ChannelClient},
        orchestrator::FactCheckOrchestrator,
        rate_limiter::{RateLimitPolicy, RateLimiter},
        requester::{PageContext, SelectionRequester},
    },
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// One line of stdin: the page the user is on and what they selected.
#[derive(Debug, Deserialize)]
struct SelectionEvent {
    title: String,
    url: String,
    text: String,
}

/// One line of stdout.
#[derive(Debug, Serialize)]
struct RenderedResponse<'a> {
    url: &'a str,
    selection: &'a str,
    #[serde(flatten)]
    response: &'a ProcessingResponse,
}

pub struct FactCheckApp {
    channel: ChannelClient,
    worker_handle: JoinHandle<()>,
    storage: Arc<StorageRepository>,
    shutdown: Shutdown,
}

impl FactCheckApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let pool = db::init_pool(&paths.db_path).await?;
        let storage = Arc::new(StorageRepository::new(pool));

        let http_client = Client::builder()
            .user_agent(format!("truthy-fact-check/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let transport = Arc::new(OpenRouterClient::new(http_client, config.openrouter.clone()));
        let analysis = AnalysisService::new(
            transport,
            config.openrouter.explanation_model.clone(),
            config.openrouter.classification_model.clone(),
        );
        let limiter = RateLimiter::new(
            storage.clone(),
            RateLimitPolicy::daily(config.rate_limit.daily_limit),
        );
        let orchestrator = Arc::new(FactCheckOrchestrator::new(limiter, analysis));

        let (channel, worker) = channel::channel(orchestrator, config.channel.capacity);
        let worker_handle = worker.spawn(shutdown.subscribe());

        tracing::info!(
            target: "app",
            db = %paths.db_path.display(),
            daily_limit = config.rate_limit.daily_limit,
            explanation_model = %config.openrouter.explanation_model,
            classification_model = %config.openrouter.classification_model,
            "fact-check service initialized"
        );

        Ok(Self {
            channel,
            worker_handle,
            storage,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let FactCheckApp {
            channel,
            mut worker_handle,
            storage,
            shutdown,
        } = self;

        tracing::info!(target: "app", "waiting for selections on stdin");
        let served = serve(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            channel,
            shutdown.subscribe(),
        )
        .await;

        shutdown.trigger();
        tokio::select! {
            res = &mut worker_handle => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!(target: "channel", "background worker panicked");
                    }
                }
            }
            _ = tokio::time::sleep(SHUTDOWN_TIMEOUT) => {
                tracing::warn!(target: "channel", "background worker did not stop in time");
                worker_handle.abort();
            }
        }

        if timeout(SHUTDOWN_TIMEOUT, storage.close()).await.is_err() {
            tracing::warn!(target: "db", "storage did not close within {:?}", SHUTDOWN_TIMEOUT);
        }

        served?;
        tracing::info!(target: "app", "fact-check service stopped");
        Ok(())
    }
}

/// Why the input loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    InputClosed,
    Signal,
}

/// One requester per page address. Entries nobody is waiting on are dropped
/// before a new one is added.
struct Requesters {
    channel: ChannelClient,
    by_url: HashMap<String, Arc<SelectionRequester>>,
}

impl Requesters {
    fn new(channel: ChannelClient) -> Self {
        Self {
            channel,
            by_url: HashMap::new(),
        }
    }

    fn for_event(&mut self, event: &SelectionEvent) -> Arc<SelectionRequester> {
        if let Some(requester) = self.by_url.get(&event.url) {
            requester.set_title(&event.title);
            return requester.clone();
        }

        self.by_url.retain(|_, requester| Arc::strong_count(requester) > 1);
        let requester = Arc::new(SelectionRequester::new(
            PageContext {
                title: event.title.clone(),
                url: event.url.clone(),
            },
            self.channel.clone(),
        ));
        self.by_url.insert(event.url.clone(), requester.clone());
        tracing::debug!(target: "app", url = %event.url, pages = self.by_url.len(), "tracking page");
        requester
    }
}

/// Reads selection events line by line and writes one rendered response line
/// per answered selection. Returns the output once everything is flushed.
///
/// When input ends, every in-flight check runs to completion; each remote call
/// is already bounded by the client timeout. A shutdown signal gives them
/// `SHUTDOWN_TIMEOUT` and then aborts the rest.
async fn serve<R, W>(
    input: R,
    output: W,
    channel: ChannelClient,
    mut shutdown: ShutdownListener,
) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (output_tx, output_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_output(output_rx, output));

    let mut requesters = Requesters::new(channel);
    let mut in_flight = JoinSet::new();
    let mut lines = input.lines();

    let stop = loop {
        let line = tokio::select! {
            _ = shutdown.notified() => break Stop::Signal,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break Stop::InputClosed;
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<SelectionEvent>(&line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(target: "app", error = %err, "ignoring malformed selection event");
                continue;
            }
        };
        if event.text.trim().is_empty() {
            tracing::debug!(target: "app", url = %event.url, "empty selection, nothing to check");
            continue;
        }

        let requester = requesters.for_event(&event);
        let output = output_tx.clone();
        in_flight.spawn(async move {
            let trigger = ContentMessage::FactCheckRequest {
                text: event.text.clone(),
            };
            if let Some(response) = requester.on_message(trigger).await {
                let rendered = RenderedResponse {
                    url: &event.url,
                    selection: &event.text,
                    response: &response,
                };
                match serde_json::to_string(&rendered) {
                    Ok(line) => {
                        let _ = output.send(line);
                    }
                    Err(err) => {
                        tracing::error!(target: "app", error = %err, "failed to render response");
                    }
                }
            }
        });
    };

    match stop {
        Stop::InputClosed => {
            tracing::info!(
                target: "app",
                pending = in_flight.len(),
                "stdin closed, finishing in-flight fact checks"
            );
            drain(&mut in_flight).await;
        }
        Stop::Signal => {
            tracing::info!(target: "app", pending = in_flight.len(), "shutdown requested");
            if timeout(SHUTDOWN_TIMEOUT, drain(&mut in_flight)).await.is_err() {
                tracing::warn!(
                    target: "app",
                    "in-flight fact checks did not finish within {:?}; aborting them",
                    SHUTDOWN_TIMEOUT
                );
                in_flight.abort_all();
                drain(&mut in_flight).await;
            }
        }
    }

    drop(output_tx);
    Ok(writer.await?)
}

async fn drain(set: &mut JoinSet<()>) {
    while let Some(res) = set.join_next().await {
        if let Err(err) = res {
            if err.is_panic() {
                tracing::error!(target: "app", "fact-check task panicked");
            }
        }
    }
}

async fn write_output<W>(mut rx: mpsc::UnboundedReceiver<String>, mut out: W) -> W
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(err) = out.write_all(line.as_bytes()).await {
            tracing::error!(target: "app", error = %err, "failed to write response");
            break;
        }
        let _ = out.flush().await;
    }
    out
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        ai::{
            analysis::tests::StubTransport,
            inference::{ChatCompletionRequest, ChatCompletionResponse},
            AnalysisError, ChatTransport,
        },
        domain::FactCheckResponse,
        tasks::rate_limiter::tests::{fixed_clock, t0, MemoryRateLimitStore},
    };

    const EVENT: &str = r#"{"title":"Example","url":"http://x","text":"The earth is flat"}"#;

    /// Answers like `StubTransport`, but only after `delay`.
    struct SlowTransport {
        inner: StubTransport,
        delay: Duration,
        started: Notify,
    }

    #[async_trait]
    impl ChatTransport for SlowTransport {
        async fn complete(
            &self,
            request: &ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, AnalysisError> {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.inner.complete(request).await
        }
    }

    fn slow_channel(delay: Duration) -> (ChannelClient, Arc<SlowTransport>, Shutdown, JoinHandle<()>) {
        let transport = Arc::new(SlowTransport {
            inner: StubTransport::answering("Almost certainly false"),
            delay,
            started: Notify::new(),
        });
        let limiter = RateLimiter::with_clock(
            Arc::new(MemoryRateLimitStore::new()),
            RateLimitPolicy::default(),
            fixed_clock(t0()),
        );
        let analysis = AnalysisService::new(transport.clone(), "perplexity/sonar", "openai/gpt-4o");
        let orchestrator = Arc::new(FactCheckOrchestrator::new(limiter, analysis));
        let (client, worker) = channel::channel(orchestrator, 4);
        let (shutdown, _) = Shutdown::new();
        let handle = worker.spawn(shutdown.subscribe());
        (client, transport, shutdown, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn closed_input_still_answers_slow_checks() {
        let (client, transport, shutdown, _worker) = slow_channel(SHUTDOWN_TIMEOUT * 2);
        let input = format!("{EVENT}\n");

        let output = serve(input.as_bytes(), Vec::new(), client, shutdown.subscribe())
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1, "{text}");
        let line: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(line["url"], "http://x");
        assert_eq!(line["selection"], "The earth is flat");
        let response: FactCheckResponse =
            serde_json::from_str(line["result"].as_str().unwrap()).unwrap();
        assert!(matches!(response, FactCheckResponse::Result(_)));
        assert_eq!(transport.inner.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn signal_abandons_checks_after_grace_period() {
        let (client, transport, shutdown, _worker) = slow_channel(Duration::from_secs(600));
        let (mut feed, input) = tokio::io::duplex(1024);
        let served = tokio::spawn(serve(
            BufReader::new(input),
            Vec::new(),
            client,
            shutdown.subscribe(),
        ));

        feed.write_all(format!("{EVENT}\n").as_bytes()).await.unwrap();
        transport.started.notified().await;
        let signalled = tokio::time::Instant::now();
        shutdown.trigger();

        let output = served.await.unwrap().unwrap();
        assert!(output.is_empty());
        assert!(signalled.elapsed() >= SHUTDOWN_TIMEOUT);
        assert!(signalled.elapsed() < Duration::from_secs(600));
        drop(feed);
    }

    #[tokio::test]
    async fn idle_requesters_are_evicted_and_titles_follow_the_page() {
        let (client, _transport, _shutdown, _worker) = slow_channel(Duration::ZERO);
        let mut requesters = Requesters::new(client);
        let event = |title: &str, url: &str| SelectionEvent {
            title: title.into(),
            url: url.into(),
            text: "x".into(),
        };

        let busy = requesters.for_event(&event("A", "http://a"));
        drop(requesters.for_event(&event("B", "http://b")));
        assert_eq!(requesters.by_url.len(), 2);

        let again = requesters.for_event(&event("A, edited", "http://a"));
        assert!(Arc::ptr_eq(&busy, &again));
        assert_eq!(busy.page().title, "A, edited");

        let _other = requesters.for_event(&event("C", "http://c"));
        assert_eq!(requesters.by_url.len(), 2);
        assert!(requesters.by_url.contains_key("http://a"));
        assert!(!requesters.by_url.contains_key("http://b"));
    }

    #[test]
    fn rendered_response_flattens_processing_fields() {
        let response = ProcessingResponse::error("background context is not running");
        let line = serde_json::to_value(RenderedResponse {
            url: "http://x",
            selection: "The earth is flat",
            response: &response,
        })
        .unwrap();
        assert_eq!(line["url"], "http://x");
        assert_eq!(line["error"], "background context is not running");
        assert!(line.get("result").is_none());
    }

    #[test]
    fn selection_event_requires_all_fields() {
        assert!(serde_json::from_str::<SelectionEvent>(r#"{"title":"t","url":"u"}"#).is_err());
        let event: SelectionEvent =
            serde_json::from_str(r#"{"title":"t","url":"u","text":"x"}"#).unwrap();
        assert_eq!(event.text, "x");
    }
}
