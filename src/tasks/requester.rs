use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::{
    domain::{BackgroundMessage, ContentMessage, PageSelectionRequest, ProcessingResponse},
    tasks::channel::ChannelClient,
};

/// Title and address of the page a requester is embedded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub title: String,
    pub url: String,
}

/// Page-embedded side of the channel. Overlapping triggers on the same page
/// follow last-request-wins: a reply that arrives after a newer trigger is
/// dropped instead of rendered.
pub struct SelectionRequester {
    page: Mutex<PageContext>,
    channel: ChannelClient,
    generation: AtomicU64,
}

impl SelectionRequester {
    pub fn new(page: PageContext, channel: ChannelClient) -> Self {
        Self {
            page: Mutex::new(page),
            channel,
            generation: AtomicU64::new(0),
        }
    }

    pub fn page(&self) -> PageContext {
        self.page.lock().clone()
    }

    /// Pages can change their title without changing address.
    pub fn set_title(&self, title: &str) {
        let mut page = self.page.lock();
        if page.title != title {
            page.title = title.to_string();
        }
    }

    /// Returns the response to render, or `None` when it went stale.
    pub async fn on_message(&self, message: ContentMessage) -> Option<ProcessingResponse> {
        let ContentMessage::FactCheckRequest { text } = message;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let PageContext { title, url } = self.page();
        let data = PageSelectionRequest { title, url, text };
        let response = self
            .channel
            .send(&BackgroundMessage::ProcessFactCheck { data })
            .await;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(
                target: "requester",
                url = %self.page.lock().url,
                generation,
                "discarding response superseded by a newer selection"
            );
            return None;
        }
        Some(response)
    }
}
