use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};

use super::{ModelClient, ModelRequest};

#[derive(Clone, Debug)]
enum Scripted {
    Reply(String),
    Fail(String),
}

/// Offline client that answers from a script.
///
/// Each `generate` call pops the next scripted reply or failure. Prompts are
/// recorded so callers can inspect what would have been sent.
#[derive(Default)]
pub struct StubClient {
    script: VecDeque<Scripted>,
    prompts: Arc<Mutex<Vec<String>>>,
    gate: Option<Receiver<()>>,
}

impl StubClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that answers every request in order with `replies`.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut client = Self::new();
        for reply in replies {
            client = client.then_reply(reply);
        }
        client
    }

    pub fn then_reply(mut self, reply: impl Into<String>) -> Self {
        self.script.push_back(Scripted::Reply(reply.into()));
        self
    }

    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.script.push_back(Scripted::Fail(reason.into()));
        self
    }

    /// Block each `generate` call until a message arrives on `gate`.
    pub fn with_gate(mut self, gate: Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Shared log of prompts received so far.
    pub fn prompt_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

impl ModelClient for StubClient {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn generate(&mut self, request: &ModelRequest) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.prompt.clone());

        if let Some(gate) = &self.gate {
            gate.recv()
                .map_err(|_| anyhow!("stub gate closed before release"))?;
        }

        match self.script.pop_front() {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("stub client has no scripted reply left")),
        }
    }
}
