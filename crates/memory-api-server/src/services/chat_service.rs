use chrono::Utc;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::memory::{
    ComposedContext, ContextComposer, IdentityKey, MemoryCache, MemoryStats, RefreshCoordinator,
    RefreshOutcome,
};
use super::providers::{BrainProvider, GenerateRequest, LlmProvider};
use super::threads::{NewThread, Thread, ThreadMessage, ThreadStore, ThreadSummary};
use crate::config::Settings;
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::chat::{
    ChatReply, ChatStreamChunk, ContextInfo, CreateThreadRequest, MemoryChatRequest,
    MemoryHealthResponse, PersonaResponse, ThreadChatRequest, ThreadContextResponse,
    UpdateThreadRequest,
};
use crate::utils::{EngineError, EngineResult, Limiters};

pub type ReplyStream = Pin<Box<dyn Stream<Item = ChatStreamChunk> + Send>>;

/// Events buffered ahead of a slow stream consumer
const STREAM_BUFFER: usize = 64;

/// Everything resolved about one inbound message before generation
#[derive(Debug, Clone)]
struct Turn {
    identity: IdentityKey,
    thread_id: Option<String>,
    knowledge_scope: String,
    behavior_override: Option<String>,
    message: String,
}

/// Reply path plus memory and thread management
#[derive(Clone)]
pub struct ChatService {
    refresh: RefreshCoordinator,
    composer: ContextComposer,
    threads: ThreadStore,
    llm: Arc<dyn LlmProvider>,
    brain: Arc<dyn BrainProvider>,
    activity: ActivityLogger,
    system_prompt: String,
    persona_ttl_seconds: i64,
}

impl ChatService {
    /// Wire stores and coordinators from settings. Must run inside a tokio runtime.
    pub fn new(
        settings: &Settings,
        brain: Arc<dyn BrainProvider>,
        llm: Arc<dyn LlmProvider>,
        activity: ActivityLogger,
    ) -> Self {
        let cache = MemoryCache::new(&settings.memory);
        let threads = ThreadStore::new(&settings.threads);

        let refresh = RefreshCoordinator::new(
            cache,
            brain.clone(),
            Limiters::new(&settings.memory),
            activity.clone(),
            &settings.memory,
            settings.prompts.persona_query.clone(),
        );

        let composer = ContextComposer::new(
            refresh.clone(),
            threads.clone(),
            brain.clone(),
            activity.clone(),
            &settings.brain,
            &settings.memory,
            &settings.threads,
        );

        Self {
            refresh,
            composer,
            threads,
            llm,
            brain,
            activity,
            system_prompt: settings.prompts.system_prompt.clone(),
            persona_ttl_seconds: settings.memory.persona_ttl_seconds,
        }
    }

    pub fn cache(&self) -> &MemoryCache {
        self.refresh.cache()
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    // ===== Chat =====

    pub async fn chat(&self, request: MemoryChatRequest) -> EngineResult<ChatReply> {
        let turn = self.memory_turn(request)?;
        self.reply(turn).await
    }

    pub async fn chat_stream(&self, request: MemoryChatRequest) -> EngineResult<ReplyStream> {
        let turn = self.memory_turn(request)?;
        Ok(self.reply_stream(turn))
    }

    pub async fn thread_chat(&self, thread_id: &str, request: ThreadChatRequest) -> EngineResult<ChatReply> {
        let turn = self.thread_turn(thread_id, request)?;
        self.reply(turn).await
    }

    pub async fn thread_chat_stream(
        &self,
        thread_id: &str,
        request: ThreadChatRequest,
    ) -> EngineResult<ReplyStream> {
        let turn = self.thread_turn(thread_id, request)?;
        Ok(self.reply_stream(turn))
    }

    fn memory_turn(&self, request: MemoryChatRequest) -> EngineResult<Turn> {
        let message = require_message(request.message)?;
        let identity = IdentityKey::new(request.user_id, request.knowledge_scope)?;

        Ok(Turn {
            knowledge_scope: identity.knowledge_scope().to_string(),
            identity,
            thread_id: None,
            behavior_override: non_blank(request.behavior_override),
            message,
        })
    }

    /// Resolve effective scope and behavior: per-message override, else the thread's
    fn thread_turn(&self, thread_id: &str, request: ThreadChatRequest) -> EngineResult<Turn> {
        let message = require_message(request.message)?;
        let thread = self.owned_thread(thread_id, &request.user_id)?;

        let knowledge_scope = non_blank(request.knowledge_scope).unwrap_or(thread.knowledge_scope);
        let behavior_override = non_blank(request.behavior_override).or(thread.behavior_override);
        let identity = IdentityKey::new(thread.user_id, Some(knowledge_scope.clone()))?;

        Ok(Turn {
            identity,
            thread_id: Some(thread.thread_id),
            knowledge_scope,
            behavior_override,
            message,
        })
    }

    fn owned_thread(&self, thread_id: &str, user_id: &str) -> EngineResult<Thread> {
        let thread = self.threads.get(thread_id)?;
        if thread.user_id != user_id {
            return Err(EngineError::Unauthorized(format!(
                "thread {} does not belong to user {}",
                thread_id, user_id
            )));
        }
        Ok(thread)
    }

    fn generate_request(&self, turn: &Turn, context: &ComposedContext) -> GenerateRequest {
        GenerateRequest {
            system_prompt: turn
                .behavior_override
                .clone()
                .unwrap_or_else(|| self.system_prompt.clone()),
            context: context.text.clone(),
            message: turn.message.clone(),
        }
    }

    /// Non-streaming reply: the whole reply or an error, never a partial one
    async fn reply(&self, turn: Turn) -> EngineResult<ChatReply> {
        let start = Instant::now();
        let context = self
            .composer
            .compose(&turn.identity, turn.thread_id.as_deref(), &turn.message)
            .await;

        let mut tokens = self
            .llm
            .stream_generate(self.generate_request(&turn, &context))
            .await
            .map_err(|e| self.reply_failed(&turn, e))?;

        let mut response = String::new();
        while let Some(piece) = tokens.next().await {
            let piece = piece.map_err(|e| self.reply_failed(&turn, e))?;
            response.push_str(&piece);
        }

        self.complete_turn(&turn, &response);

        let processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Reply for {} in {}ms ({} chars, context {} chars)",
            turn.identity,
            processing_time_ms,
            response.len(),
            context.context_length()
        );

        Ok(ChatReply {
            response,
            user_id: turn.identity.user_id().to_string(),
            knowledge_scope: turn.knowledge_scope,
            behavior_override: turn.behavior_override,
            thread_id: turn.thread_id,
            context_used: !context.is_empty(),
            context_length: context.context_length(),
            used_long_term: context.used_long_term,
            used_quick: context.used_quick,
            processing_time_ms,
        })
    }

    /// Streaming reply: `context`, then `message` deltas, then `done` or `error`.
    /// Generation runs on its own task, so a reply that finishes is recorded
    /// even when the consumer went away before the last event.
    fn reply_stream(&self, turn: Turn) -> ReplyStream {
        let (sender, receiver) = flume::bounded(STREAM_BUFFER);
        let service = self.clone();

        tokio::spawn(async move {
            service.generate_into(turn, sender).await;
        });

        Box::pin(async_stream::stream! {
            while let Ok(chunk) = receiver.recv_async().await {
                yield chunk;
            }
        })
    }

    async fn generate_into(&self, turn: Turn, sender: flume::Sender<ChatStreamChunk>) {
        let start = Instant::now();
        let context = self
            .composer
            .compose(&turn.identity, turn.thread_id.as_deref(), &turn.message)
            .await;

        emit(
            &sender,
            ChatStreamChunk::Context(ContextInfo {
                user_id: turn.identity.user_id().to_string(),
                knowledge_scope: turn.knowledge_scope.clone(),
                thread_id: turn.thread_id.clone(),
                context_length: context.context_length(),
                used_long_term: context.used_long_term,
                used_quick: context.used_quick,
            }),
        )
        .await;

        let mut tokens = match self.llm.stream_generate(self.generate_request(&turn, &context)).await {
            Ok(tokens) => tokens,
            Err(e) => {
                let error = self.reply_failed(&turn, e);
                emit(&sender, stream_error(&error)).await;
                return;
            }
        };

        let mut response = String::new();
        while let Some(piece) = tokens.next().await {
            match piece {
                Ok(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    response.push_str(&delta);
                    emit(&sender, ChatStreamChunk::Message { delta }).await;
                }
                Err(e) => {
                    let error = self.reply_failed(&turn, e);
                    emit(&sender, stream_error(&error)).await;
                    return;
                }
            }
        }

        self.complete_turn(&turn, &response);

        emit(
            &sender,
            ChatStreamChunk::Done {
                processing_time_ms: start.elapsed().as_millis() as u64,
                response_length: response.len(),
            },
        )
        .await;
    }

    /// Thread appends, then the note/refresh sequence
    fn complete_turn(&self, turn: &Turn, response: &str) {
        if let Some(thread_id) = &turn.thread_id {
            if let Err(e) = self.threads.append_exchange(
                thread_id,
                &turn.message,
                response,
                &turn.knowledge_scope,
                turn.behavior_override.clone(),
            ) {
                warn!("Could not record exchange in thread {}: {}", thread_id, e);
            }
        }

        let noted = self.refresh.note_exchange(&turn.identity, &turn.message, response);
        if !noted.refresh.is_scheduled() {
            info!("Refresh for {} not scheduled: {}", turn.identity, noted.refresh.as_str());
        }
    }

    fn reply_failed(&self, turn: &Turn, error: anyhow::Error) -> EngineError {
        warn!("Reply failed for {}: {:#}", turn.identity, error);

        let mut log = ActivityLog::builder(turn.identity.as_key(), ActivityType::ReplyFailed)
            .error(format!("{:#}", error), "upstream");
        if let Some(thread_id) = &turn.thread_id {
            log = log.thread_id(thread_id);
        }
        self.activity.log(log.build());

        EngineError::upstream(format!("{:#}", error))
    }

    // ===== Memory =====

    pub fn memory_stats(&self, identity: &IdentityKey) -> MemoryStats {
        self.cache().stats(identity)
    }

    pub fn clear_memory(&self, identity: &IdentityKey) -> bool {
        let cleared = self.cache().clear(identity);
        self.activity.log(
            ActivityLog::builder(identity.as_key(), ActivityType::MemoryCleared)
                .status(if cleared { ActivityStatus::Success } else { ActivityStatus::Info })
                .build(),
        );
        cleared
    }

    pub fn persona(&self, identity: &IdentityKey) -> PersonaResponse {
        let record = self.cache().get(identity);
        let now = Utc::now();

        PersonaResponse {
            identity_key: identity.as_key(),
            persona: record.as_ref().and_then(|r| r.persona.clone()),
            persona_updated_at: record.as_ref().and_then(|r| r.persona_updated_at),
            is_stale: record
                .as_ref()
                .map(|r| r.persona_is_stale(self.persona_ttl_seconds, now))
                .unwrap_or(true),
        }
    }

    pub fn refresh_memory(&self, identity: &IdentityKey) -> RefreshOutcome {
        self.refresh.trigger_refresh(identity)
    }

    pub fn memory_health(&self) -> MemoryHealthResponse {
        MemoryHealthResponse {
            status: "healthy".to_string(),
            memory: self.cache().summary(),
            threads: self.threads.count(),
        }
    }

    pub async fn brain_ready(&self) -> EngineResult<()> {
        self.brain.health().await.map_err(EngineError::upstream)
    }

    // ===== Threads =====

    pub fn create_thread(&self, request: CreateThreadRequest) -> EngineResult<Thread> {
        // the owner must be usable as a memory identity
        IdentityKey::user(request.user_id.clone())?;

        let thread = self.threads.create(NewThread {
            user_id: request.user_id,
            knowledge_scope: request.knowledge_scope,
            behavior_override: request.behavior_override,
            title: request.title,
            initial_message: request.initial_message,
        })?;

        self.activity.log(
            ActivityLog::builder(&thread.user_id, ActivityType::ThreadCreated)
                .thread_id(&thread.thread_id)
                .custom("knowledge_scope", thread.knowledge_scope.clone())
                .build(),
        );
        Ok(thread)
    }

    pub fn get_thread(&self, thread_id: &str) -> EngineResult<Thread> {
        self.threads.get(thread_id)
    }

    pub fn list_threads(&self, user_id: &str) -> Vec<ThreadSummary> {
        self.threads.list_for_user(user_id)
    }

    pub fn thread_messages(&self, thread_id: &str, limit: Option<usize>) -> EngineResult<Vec<ThreadMessage>> {
        self.threads.get_messages(thread_id, limit)
    }

    /// Owner-only change of the thread's default scope or behavior.
    /// An empty `behavior_override` clears it.
    pub fn update_thread(&self, thread_id: &str, request: UpdateThreadRequest) -> EngineResult<Thread> {
        self.owned_thread(thread_id, &request.user_id)?;
        let thread = self
            .threads
            .update_settings(thread_id, request.knowledge_scope, request.behavior_override)?;

        self.activity.log(
            ActivityLog::builder(&thread.user_id, ActivityType::ThreadUpdated)
                .thread_id(&thread.thread_id)
                .custom("knowledge_scope", thread.knowledge_scope.clone())
                .custom("has_behavior_override", thread.behavior_override.is_some())
                .build(),
        );
        Ok(thread)
    }

    /// The history a reply in this thread would see, after trimming
    pub fn thread_context(&self, thread_id: &str) -> EngineResult<ThreadContextResponse> {
        let thread = self.threads.get(thread_id)?;
        let identity = IdentityKey::new(thread.user_id.clone(), Some(thread.knowledge_scope.clone()))?;

        let history = self.composer.thread_history(&identity, thread_id);
        let context = history.join("\n");

        Ok(ThreadContextResponse {
            thread_id: thread.thread_id,
            context_length: context.chars().count(),
            context,
            history_messages: history.len(),
            message_count: thread.messages.len(),
        })
    }

    pub fn delete_thread(&self, thread_id: &str, user_id: &str) -> EngineResult<()> {
        self.threads.delete(thread_id, user_id)?;
        self.activity.log(
            ActivityLog::builder(user_id, ActivityType::ThreadDeleted)
                .thread_id(thread_id)
                .build(),
        );
        Ok(())
    }
}

/// Send one event; a consumer that went away does not stop generation
async fn emit(sender: &flume::Sender<ChatStreamChunk>, chunk: ChatStreamChunk) {
    if sender.send_async(chunk).await.is_err() {
        debug!("Stream consumer gone, continuing generation");
    }
}

fn stream_error(error: &EngineError) -> ChatStreamChunk {
    ChatStreamChunk::Error {
        code: error.kind().to_string(),
        message: error.to_string(),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn require_message(message: String) -> EngineResult<String> {
    if message.trim().is_empty() {
        return Err(EngineError::BadRequest("message must not be empty".to_string()));
    }
    Ok(message)
}
