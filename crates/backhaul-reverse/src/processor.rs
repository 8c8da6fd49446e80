//! Maps broker commands to registry reads.

use std::collections::HashMap;
use std::sync::Arc;

use backhaul_collector::Registry;
use backhaul_wire::{Command, Response, Verb, WireError};
use bytes::Bytes;

/// One item handed from the reader task to the processor task.
#[derive(Debug)]
pub enum Inbound {
    /// A well-formed command.
    Command(Command),
    /// A frame that could not be turned into a command. The connection stays
    /// up; the broker gets a protocol error for this frame id.
    Rejected { id: u32, error: WireError },
}

#[derive(Debug)]
struct CachedBody {
    seq: u64,
    body: Bytes,
}

/// Answers commands from the registry's published snapshot.
///
/// Serialized REQUEST bodies are cached per path until the registry
/// publishes a newer snapshot or the broker sends RESET.
pub struct CommandProcessor {
    check_id: String,
    registry: Arc<Registry>,
    cache: HashMap<String, CachedBody>,
}

impl CommandProcessor {
    pub fn new(check_id: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            check_id: check_id.into(),
            registry,
            cache: HashMap::new(),
        }
    }

    pub fn process(&mut self, inbound: Inbound) -> Response {
        match inbound {
            Inbound::Command(command) => self.handle(&command),
            Inbound::Rejected { id, error } => {
                tracing::warn!(frame_id = id, error = %error, "rejecting malformed frame");
                Response::protocol_error(id, error)
            }
        }
    }

    pub fn handle(&mut self, command: &Command) -> Response {
        tracing::debug!(frame_id = command.id, verb = %command.verb, path = %command.path, "handling command");
        match command.verb {
            Verb::Connect => Response::ok(command.id, self.check_id.clone()),
            Verb::Request => self.request(command.id, &command.path),
            Verb::Reset => {
                self.cache.clear();
                Response::ack(command.id)
            }
            Verb::Noop => Response::ack(command.id),
        }
    }

    /// Number of cached response bodies.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn request(&mut self, id: u32, path: &str) -> Response {
        let snapshot = self.registry.flush();
        let key = path.trim_matches('/');

        if let Some(cached) = self.cache.get(key).filter(|c| c.seq == snapshot.seq()) {
            return Response::ok(id, cached.body.clone());
        }

        let Some(metrics) = snapshot.lookup(path) else {
            return Response::not_found(id, path);
        };

        match serde_json::to_vec(&metrics) {
            Ok(json) => {
                let body = Bytes::from(json);
                self.cache.insert(
                    key.to_string(),
                    CachedBody {
                        seq: snapshot.seq(),
                        body: body.clone(),
                    },
                );
                Response::ok(id, body)
            }
            Err(e) => {
                tracing::error!(frame_id = id, path, error = %e, "failed to serialize metrics");
                Response::error(id, format!("serialization failed: {e}"))
            }
        }
    }
}
