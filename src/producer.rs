//! Sources of raw dialog data for the generation loop.
//!
//! A [`Producer`] yields one untrusted JSON value per cycle; it is normalized
//! and written by the caller, so producers never touch the output format.

mod chat;
mod monologue;

use anyhow::Result;
use serde_json::Value;

use crate::error::CycleError;
use crate::llm::ChatMessage;

pub use chat::ChatJsonProducer;
pub use monologue::MonologueProducer;

/// Text generation as the producers need it. Implemented by the llama.cpp
/// handle and by scripted models in tests.
pub trait TextModel {
    fn complete(&mut self, prompt: &str, max_tokens: usize) -> Result<String>;
    fn chat(&mut self, messages: &[ChatMessage], max_tokens: usize) -> Result<String>;
}

pub trait Producer {
    fn name(&self) -> &'static str;

    /// Raw data for one cycle. `Value::Null` means "nothing this time" and
    /// still normalizes to an empty record.
    fn generate(&mut self) -> Result<Value, CycleError>;
}

impl<P: Producer + ?Sized> Producer for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn generate(&mut self) -> Result<Value, CycleError> {
        (**self).generate()
    }
}
