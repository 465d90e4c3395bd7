use std::sync::Arc;

use crate::composer::{ContextComposer, FORMATTING_PROMPT};
use crate::data_models::{ChatRequest, ChatTurn};
use crate::error::RelayError;
use crate::relay::{ChatProvider, CompletionRelay, EventStream, TurnMode};
use crate::search::{DEFAULT_MAX_RESULTS, SearchClient};

/// The prompts for one turn, ready to hand to the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTurn {
    pub system: String,
    pub user: String,
    pub mode: TurnMode,
}

/// Runs a chat turn end to end: optional search, prompt composition, streaming relay.
pub struct ChatService {
    search: Arc<SearchClient>,
    relay: CompletionRelay,
    composer: ContextComposer,
    max_results: usize,
}

impl ChatService {
    pub fn new(search: Arc<SearchClient>, provider: Arc<dyn ChatProvider>) -> ChatService {
        ChatService {
            search,
            relay: CompletionRelay::new(provider),
            composer: ContextComposer::default(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_composer(mut self, composer: ContextComposer) -> ChatService {
        self.composer = composer;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> ChatService {
        self.max_results = max_results;
        self
    }

    pub fn search_client(&self) -> &SearchClient {
        &self.search
    }

    /// Builds the system and user messages. Search failures degrade to a
    /// "no results" context rather than failing the turn.
    pub async fn prepare(&self, message: &str) -> PreparedTurn {
        match ChatTurn::parse(message) {
            ChatTurn::Search(query) => {
                let outcome = self.search.search(&query, self.max_results).await;
                if outcome.is_degraded() {
                    log::warn!("answering {query:?} without search context");
                }
                PreparedTurn {
                    system: self.composer.search_system_prompt(&query, &outcome.results),
                    user: query,
                    mode: TurnMode::Search,
                }
            }
            ChatTurn::Plain(message) => PreparedTurn {
                system: FORMATTING_PROMPT.to_string(),
                user: message,
                mode: TurnMode::Plain,
            },
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<EventStream, RelayError> {
        let turn = self.prepare(&request.message).await;
        self.relay
            .complete(turn.system, turn.user, &request.model, turn.mode)
            .await
    }
}
