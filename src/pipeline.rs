//! Query pipeline orchestrator.
//!
//! One user turn in, one outcome out. Turn precedence:
//! structured key=value input → literal confirmation replies →
//! introspection → CRUD triggers → language-model query generation.
//!
//! Every backend or model failure is converted to user-facing text at this
//! boundary; nothing escapes to the caller as a raw fault.

use crate::audit::{ActionKind, QueryLog, QueryLogEntry};
use crate::backend::{Record, StorageBackend};
use crate::error::AssistantError;
use crate::filter::{self, FilterOutcome};
use crate::format;
use crate::intent::{self, TriggerRule};
use crate::llm::LanguageModel;
use crate::normalize::{self, Normalized, WrappedQuery};
use crate::prompts;
use crate::regen;
use crate::schema;
use crate::state::{
    ConfirmationReply, ConversationState, OperationKind, PendingOperation, SessionStore,
};
use crate::structured;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Applied when a pending query carries no explicit limit.
const DEFAULT_RESULT_LIMIT: i64 = 10;

lazy_static! {
    static ref FIND_ONE_KEYS_RE: Regex =
        Regex::new(r"db\.(\w+)\.find_one\(\)\.keys\(\)").expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    /// Plain text answer or acknowledgement.
    Reply,
    /// A query is pending; the next turn should be yes/no/rewrite.
    ConfirmQuery,
    /// An operation is pending; the next turn should be key=value input.
    CollectInput,
    /// The user asked to rewrite; the next turn is fresh free text.
    RequestRewrite,
    /// Something went wrong; the message says what and how to proceed.
    Error,
}

/// The orchestrator's one response per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub action: TurnAction,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl TurnOutcome {
    fn reply(message: impl Into<String>) -> Self {
        Self {
            action: TurnAction::Reply,
            message: message.into(),
            entity: None,
            operation: None,
            fields: Vec::new(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            action: TurnAction::Error,
            ..Self::reply(message)
        }
    }

    fn rewrite() -> Self {
        Self {
            action: TurnAction::RequestRewrite,
            ..Self::reply("Please clarify your question:")
        }
    }

    fn confirm(message: String, entity: String) -> Self {
        Self {
            action: TurnAction::ConfirmQuery,
            entity: Some(entity),
            ..Self::reply(message)
        }
    }

    fn collect(rule: &TriggerRule) -> Self {
        Self {
            action: TurnAction::CollectInput,
            message: rule.prompt.to_string(),
            entity: Some(rule.entity.to_string()),
            operation: Some(rule.operation),
            fields: rule.fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

pub struct Pipeline {
    backend: Arc<dyn StorageBackend>,
    primary_llm: Arc<dyn LanguageModel>,
    syntax_llm: Arc<dyn LanguageModel>,
    log: Arc<dyn QueryLog>,
    sessions: SessionStore,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        primary_llm: Arc<dyn LanguageModel>,
        syntax_llm: Arc<dyn LanguageModel>,
        log: Arc<dyn QueryLog>,
    ) -> Self {
        Self {
            backend,
            primary_llm,
            syntax_llm,
            log,
            sessions: SessionStore::new(),
        }
    }

    /// Process one turn for one session. State is taken out of the session
    /// map for the duration of the turn and written back at the end; the
    /// host serializes turns within a session.
    pub async fn process_turn(&self, session: &str, user_text: &str) -> TurnOutcome {
        let mut state = self.sessions.take(session);
        let outcome = self.run_turn(&mut state, user_text).await;
        self.sessions.put(session, state);
        outcome
    }

    async fn run_turn(&self, state: &mut ConversationState, user_text: &str) -> TurnOutcome {
        if user_text.contains('=') {
            return self.structured_turn(state, user_text).await;
        }

        let text = intent::preprocess_country_names(user_text);
        let uq = text.trim().to_lowercase();

        if let Some(reply) = ConfirmationReply::parse(&uq) {
            return self.confirmation_turn(state, user_text, reply).await;
        }

        if intent::is_introspection(&uq) {
            return self.introspection_turn(&uq).await;
        }

        if let Some(mention) = intent::fields_of(&uq) {
            let entities = schema::entity_names(self.backend.as_ref()).await;
            let entity = intent::resolve_entity(&mention, &entities).unwrap_or(mention);
            return TurnOutcome::reply(schema::describe(self.backend.as_ref(), &entity).await);
        }

        if let Some(rule) = intent::match_trigger(&uq) {
            info!("CRUD trigger matched: {} {}", rule.operation, rule.entity);
            state.pending_op = Some(PendingOperation {
                entity: rule.entity.to_string(),
                operation: rule.operation,
            });
            return TurnOutcome::collect(rule);
        }

        self.question_turn(state, &text).await
    }

    // ---------- structured form path ----------

    async fn structured_turn(&self, state: &mut ConversationState, user_text: &str) -> TurnOutcome {
        let input = match structured::parse_structured(user_text) {
            Some(input) => input,
            None => {
                return TurnOutcome::error(
                    "Could not parse structured input. Please use key=value format.",
                )
            }
        };

        let op = match state.pending_op.take() {
            Some(op) => op,
            None => {
                let err = AssistantError::MissingOperationContext(
                    "structured input arrived with no pending operation; please retry your request"
                        .to_string(),
                );
                return TurnOutcome::error(err.to_string());
            }
        };

        match op.operation {
            OperationKind::Insert => self.insert_turn(user_text, &op.entity, input).await,
            OperationKind::Update => self.update_turn(user_text, &op.entity, input).await,
            OperationKind::Delete => self.delete_turn(user_text, &op.entity, input).await,
        }
    }

    async fn insert_turn(&self, user_text: &str, entity: &str, input: Record) -> TurnOutcome {
        match self.backend.insert(entity, input).await {
            Ok(stored) => {
                let preview = serde_json::to_string_pretty(&Value::Object(stored))
                    .unwrap_or_else(|_| "{}".to_string());
                self.log.record(
                    QueryLogEntry::new(user_text, ActionKind::Insert, &preview)
                        .with_entity(entity)
                        .with_matched(1),
                );
                TurnOutcome::reply(format!("Inserted into {}:\n{}", entity, preview))
            }
            Err(e) => self.failed(user_text, ActionKind::Insert, entity, "", e),
        }
    }

    async fn update_turn(&self, user_text: &str, entity: &str, input: Record) -> TurnOutcome {
        let field = input.get("field").and_then(Value::as_str).map(str::to_string);
        let value = input.get("value").cloned().filter(|v| !v.is_null());
        let (field, value) = match (field, value) {
            (Some(field), Some(value)) => (field, value),
            _ => return TurnOutcome::error("'field' and 'value' are required for an update."),
        };

        let filter = match structured::match_filter(entity, &input) {
            Some(filter) => filter,
            None => return TurnOutcome::error("Not enough keys to identify the record."),
        };

        let description = format!(
            "{} => {} = {}",
            Value::Object(filter.clone()),
            field,
            value
        );

        match self
            .backend
            .update_field(entity, &filter, &field, value)
            .await
        {
            Ok(0) => TurnOutcome::reply("No changes made (maybe the value was identical)."),
            Ok(_) => {
                self.log.record(
                    QueryLogEntry::new(user_text, ActionKind::Update, &description)
                        .with_entity(entity)
                        .with_matched(1),
                );
                TurnOutcome::reply(format!("Updated {} in {}.", field, entity))
            }
            Err(e) => self.failed(user_text, ActionKind::Update, entity, &description, e),
        }
    }

    async fn delete_turn(&self, user_text: &str, entity: &str, input: Record) -> TurnOutcome {
        let filter = match structured::match_filter(entity, &input) {
            Some(filter) => filter,
            None => return TurnOutcome::error("Not enough data to perform the delete."),
        };

        let description = Value::Object(filter.clone()).to_string();
        match self.backend.delete(entity, &filter).await {
            Ok(0) => TurnOutcome::reply("No matching entry found to delete."),
            Ok(removed) => {
                self.log.record(
                    QueryLogEntry::new(user_text, ActionKind::Delete, &description)
                        .with_entity(entity)
                        .with_matched(removed),
                );
                TurnOutcome::reply(format!("Deleted entry from {}.", entity))
            }
            Err(e) => self.failed(user_text, ActionKind::Delete, entity, &description, e),
        }
    }

    // ---------- confirmation protocol ----------

    async fn confirmation_turn(
        &self,
        state: &mut ConversationState,
        user_text: &str,
        reply: ConfirmationReply,
    ) -> TurnOutcome {
        match reply {
            ConfirmationReply::No => {
                state.pending_query = None;
                self.log.record(
                    QueryLogEntry::new(user_text, ActionKind::Cancel, "").with_success(false),
                );
                TurnOutcome::reply("Query execution canceled.")
            }
            ConfirmationReply::Rewrite => {
                // Cleared here so a later bare "yes" cannot replay a stale query.
                state.pending_query = None;
                TurnOutcome::rewrite()
            }
            ConfirmationReply::Yes => match state.pending_query.take() {
                Some(wrapped) => {
                    self.execute_wrapped(user_text, &wrapped, ActionKind::Execute)
                        .await
                }
                None => TurnOutcome::reply("No query to execute."),
            },
        }
    }

    // ---------- introspection ----------

    async fn introspection_turn(&self, uq: &str) -> TurnOutcome {
        let entities = schema::entity_names(self.backend.as_ref()).await;
        if let Some(entity) = intent::named_entity_mention(uq, &entities) {
            TurnOutcome::reply(schema::describe(self.backend.as_ref(), &entity).await)
        } else {
            TurnOutcome::reply(schema::describe_all(self.backend.as_ref()).await)
        }
    }

    // ---------- language-model path ----------

    async fn question_turn(&self, state: &mut ConversationState, text: &str) -> TurnOutcome {
        let schema_text = schema::schema_context(self.backend.as_ref()).await;
        let prompt = prompts::build_query_prompt(&schema_text, text);

        let raw = match self.primary_llm.ask(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Primary model call failed: {}", e);
                self.log.record(
                    QueryLogEntry::new(text, ActionKind::Fail, "").with_success(false),
                );
                return TurnOutcome::error(format!("Language model request failed: {}", e));
            }
        };

        match normalize::normalize(&raw) {
            Normalized::Wrapped(wrapped) => {
                self.vet_and_dispatch(state, text, &schema_text, wrapped).await
            }
            Normalized::Unstructured(cleaned) => self.client_command_turn(text, &cleaned).await,
        }
    }

    /// Validate a generated query against the schema, regenerating at most
    /// once, then either execute it (match-all) or park it for
    /// confirmation.
    async fn vet_and_dispatch(
        &self,
        state: &mut ConversationState,
        user_text: &str,
        schema_text: &str,
        wrapped: WrappedQuery,
    ) -> TurnOutcome {
        let mut wrapped = wrapped;
        let mut regenerated = false;

        loop {
            let valid = schema::valid_fields(self.backend.as_ref(), &wrapped.collection).await;
            match filter::apply(&wrapped.query, &valid) {
                FilterOutcome::MatchAll => {
                    wrapped.query = Map::new();
                    return self
                        .execute_wrapped(user_text, &wrapped, ActionKind::Query)
                        .await;
                }
                FilterOutcome::Kept { query, removed } => {
                    if !removed.is_empty() {
                        warn!("Removed invalid fields from generated query: {:?}", removed);
                    }
                    wrapped.query = query;
                    let message = format!(
                        "Should I run this query on `{}`?\nReply with: yes / no / rewrite",
                        wrapped.collection
                    );
                    let entity = wrapped.collection.clone();
                    state.pending_query = Some(wrapped);
                    return TurnOutcome::confirm(message, entity);
                }
                FilterOutcome::Emptied { removed } => {
                    if regenerated {
                        return TurnOutcome::reply(
                            "The regenerated query still does not match the schema. Please rephrase your question.",
                        );
                    }
                    warn!(
                        "Generated query emptied after removing {:?}; asking the syntax model to regenerate",
                        removed
                    );
                    match regen::regenerate(self.syntax_llm.as_ref(), schema_text, user_text, &wrapped)
                        .await
                    {
                        Ok(next) => {
                            wrapped = next;
                            regenerated = true;
                        }
                        Err(e) => {
                            warn!("Regeneration failed: {}", e);
                            self.log.record(
                                QueryLogEntry::new(
                                    user_text,
                                    ActionKind::Fail,
                                    &pending_text(Some(&wrapped)),
                                )
                                .with_entity(&wrapped.collection)
                                .with_success(false),
                            );
                            return TurnOutcome::reply(
                                "Query could not be regenerated. Try rephrasing.",
                            );
                        }
                    }
                }
            }
        }
    }

    async fn execute_wrapped(
        &self,
        user_text: &str,
        wrapped: &WrappedQuery,
        action: ActionKind,
    ) -> TurnOutcome {
        let limit = wrapped.limit.unwrap_or(DEFAULT_RESULT_LIMIT);
        let query_text = pending_text(Some(wrapped));

        match self
            .backend
            .find(&wrapped.collection, &wrapped.query, Some(limit))
            .await
        {
            Ok(records) => {
                info!(
                    "Executed query on `{}`: {} match(es)",
                    wrapped.collection,
                    records.len()
                );
                self.log.record(
                    QueryLogEntry::new(user_text, action, &query_text)
                        .with_entity(&wrapped.collection)
                        .with_matched(records.len() as u64),
                );
                TurnOutcome::reply(format::render(&records))
            }
            Err(e) => self.failed(
                user_text,
                action,
                &wrapped.collection,
                &query_text,
                e,
            ),
        }
    }

    async fn client_command_turn(&self, user_text: &str, cleaned: &str) -> TurnOutcome {
        let command = cleaned.trim();

        if command.contains("list_collection_names") || command.starts_with("show collections") {
            let entities = schema::entity_names(self.backend.as_ref()).await;
            let listing: Vec<String> = entities.iter().map(|e| format!("- {}", e)).collect();
            return TurnOutcome::reply(listing.join("\n"));
        }

        if let Some(captures) = FIND_ONE_KEYS_RE.captures(command) {
            let entity = captures[1].to_string();
            return TurnOutcome::reply(schema::describe(self.backend.as_ref(), &entity).await);
        }

        self.log.record(
            QueryLogEntry::new(user_text, ActionKind::Fail, command).with_success(false),
        );
        TurnOutcome::error(format!("Unrecognized command from the model: {}", command))
    }

    fn failed(
        &self,
        user_text: &str,
        action: ActionKind,
        entity: &str,
        query_text: &str,
        error: AssistantError,
    ) -> TurnOutcome {
        warn!("{} on `{}` failed: {}", action.as_str(), entity, error);
        self.log.record(
            QueryLogEntry::new(user_text, action, query_text)
                .with_entity(entity)
                .with_success(false),
        );
        let message = match action {
            ActionKind::Insert | ActionKind::Update | ActionKind::Delete => {
                format!("Failed to process structured input: {}", error)
            }
            _ => format!("Failed to execute query: {}", error),
        };
        TurnOutcome::error(message)
    }
}

fn pending_text(wrapped: Option<&WrappedQuery>) -> String {
    wrapped
        .and_then(|w| serde_json::to_string(w).ok())
        .unwrap_or_default()
}
