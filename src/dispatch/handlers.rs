//! Built-in task handlers: `process_message`, `index_document` and
//! `publish_message`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::dispatch::broker::Broker;
use crate::dispatch::dispatcher::{Dispatcher, TaskHandler};
use crate::dispatch::item::{TaskContext, TaskOutcome};
use crate::error::Error;
use crate::search::SearchBackend;

pub const PROCESS_MESSAGE: &str = "process_message";
pub const INDEX_DOCUMENT: &str = "index_document";
pub const PUBLISH_MESSAGE: &str = "publish_message";

/// Escapes HTML metacharacters and drops `;` from the input.
pub fn sanitize_input(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            ';' => {}
            c => out.push(c),
        }
    }
    out
}

/// Maps an error to a retry decision: transient backend errors retry.
fn outcome_for(err: Error) -> TaskOutcome {
    if err.is_transient() {
        TaskOutcome::retry(err.to_string())
    } else {
        TaskOutcome::fail(err.to_string())
    }
}

fn decode<T: for<'de> Deserialize<'de>>(payload: &Value) -> Result<T, TaskOutcome> {
    serde_json::from_value(payload.clone())
        .map_err(|e| TaskOutcome::fail(format!("Invalid payload: {}", e)))
}

// == process_message ==
/// Sanitises the string fields of a message object.
#[derive(Debug, Default)]
pub struct ProcessMessage;

impl ProcessMessage {
    pub fn sanitize(message: &Map<String, Value>) -> Map<String, Value> {
        message
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => Value::String(sanitize_input(s)),
                    other => other.clone(),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

#[async_trait]
impl TaskHandler for ProcessMessage {
    async fn handle(&self, payload: &Value, ctx: &TaskContext) -> TaskOutcome {
        let Value::Object(message) = payload else {
            return TaskOutcome::fail("Message must be a JSON object");
        };
        let sanitized = Self::sanitize(message);
        debug!(id = %ctx.id, fields = sanitized.len(), "Processed message");
        TaskOutcome::Success
    }
}

// == index_document ==
#[derive(Debug, Deserialize)]
struct IndexDocumentPayload {
    index: String,
    document: Value,
    #[serde(default)]
    document_id: Option<String>,
}

/// Writes a document to the search backend.
pub struct IndexDocument {
    search: Arc<dyn SearchBackend>,
}

impl IndexDocument {
    pub fn new(search: Arc<dyn SearchBackend>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl TaskHandler for IndexDocument {
    async fn handle(&self, payload: &Value, ctx: &TaskContext) -> TaskOutcome {
        let payload: IndexDocumentPayload = match decode(payload) {
            Ok(payload) => payload,
            Err(outcome) => return outcome,
        };
        match self
            .search
            .index(&payload.index, payload.document_id.as_deref(), &payload.document)
            .await
        {
            Ok(id) => {
                debug!(task = %ctx.id, index = %payload.index, id = %id, "Indexed document");
                TaskOutcome::Success
            }
            Err(e) => outcome_for(e),
        }
    }
}

// == publish_message ==
#[derive(Debug, Deserialize)]
struct PublishMessagePayload {
    #[serde(default)]
    exchange: String,
    routing_key: String,
    message: Value,
}

/// Publishes a raw message to `{exchange}.{routing_key}` on the broker.
pub struct PublishMessage {
    broker: Arc<dyn Broker>,
}

impl PublishMessage {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn destination(exchange: &str, routing_key: &str) -> String {
        if exchange.is_empty() {
            routing_key.to_string()
        } else {
            format!("{}.{}", exchange, routing_key)
        }
    }
}

#[async_trait]
impl TaskHandler for PublishMessage {
    async fn handle(&self, payload: &Value, ctx: &TaskContext) -> TaskOutcome {
        let payload: PublishMessagePayload = match decode(payload) {
            Ok(payload) => payload,
            Err(outcome) => return outcome,
        };
        if payload.routing_key.trim().is_empty() {
            return TaskOutcome::fail("routing_key must not be empty");
        }

        let destination = Self::destination(&payload.exchange, &payload.routing_key);
        let body = payload.message.to_string();
        match self.broker.publish(&destination, body, Duration::ZERO).await {
            Ok(()) => {
                debug!(task = %ctx.id, destination = %destination, "Published message");
                TaskOutcome::Success
            }
            Err(e) => outcome_for(e),
        }
    }
}

/// Registers the built-in work kinds on `dispatcher`.
pub fn register_builtin_handlers(dispatcher: &mut Dispatcher, search: Arc<dyn SearchBackend>) {
    let broker = dispatcher.broker();
    dispatcher.consume(PROCESS_MESSAGE, Arc::new(ProcessMessage));
    dispatcher.consume(INDEX_DOCUMENT, Arc::new(IndexDocument::new(search)));
    dispatcher.consume(PUBLISH_MESSAGE, Arc::new(PublishMessage::new(broker)));
}
