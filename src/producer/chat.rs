use log::{debug, info};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CycleError;
use crate::llm::{extract_json, ChatMessage};
use crate::producer::{Producer, TextModel};

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant that outputs strictly valid JSON.";

const USER_PROMPT: &str = "Сгенерируй диалог в жанре киберпанк (Ви с Джонни, анархистом) и верни \
ТОЛЬКО валидный JSON строго следующей структуры:\n\
{\"corp_name\": \"<Имя персонажа>\", \"npc_text\": \"<первая реплика NPC>\", \
\"replies\": [{\"id\": 1, \"text\": \"...\"}, {\"id\": 2, \"text\": \"...\"}], \
\"answers\": {\"1\": \"...\", \"2\": \"...\"}}";

const CHAT_TOKENS: usize = 512;

/// Asks a chat model for the whole record as one JSON object.
pub struct ChatJsonProducer<M> {
    model: M,
}

impl<M: TextModel> ChatJsonProducer<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: TextModel> Producer for ChatJsonProducer<M> {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn generate(&mut self) -> Result<Value, CycleError> {
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(USER_PROMPT)];
        let raw = self.model.chat(&messages, CHAT_TOKENS)?;

        let mut data = extract_json(&raw)?;
        let Some(object) = data.as_object_mut() else {
            return Err(CycleError::UnresolvedJson {
                reason: "model output is JSON but not an object".into(),
                raw,
            });
        };
        let msg_id = Uuid::new_v4().to_string();
        debug!("Assigning msg_id {msg_id}");
        object.insert("msg_id".into(), Value::String(msg_id));

        info!(
            "Chat model produced a dialog for {}",
            object.get("corp_name").and_then(Value::as_str).unwrap_or("<unknown>")
        );
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::test_support::ScriptedModel;
    use crate::record::normalize;

    #[test]
    fn test_generate_extracts_and_stamps_record() {
        let model = ScriptedModel::new([Ok(
            r#"Конечно! {"corp_name": "Johnny", "npc_text": "Wake up, samurai.",
            "replies": [{"id": 1, "text": "Отвали."}, {"id": 2, "text": "Чего?"}],
            "answers": {"1": "Хех.", "2": "Город горит."}} Надеюсь, помог."#,
        )]);
        let mut p = ChatJsonProducer::new(model);

        let value = p.generate().unwrap();
        let msg_id = value["msg_id"].as_str().unwrap();
        assert!(Uuid::parse_str(msg_id).is_ok());

        let record = normalize(&value);
        assert_eq!(record.corp_name.as_deref(), Some("Johnny"));
        assert_eq!(record.replies.len(), 2);
        assert_eq!(record.answers["2"], "Город горит.");
        assert_eq!(record.msg_id.as_deref(), Some(msg_id));
    }

    #[test]
    fn test_generate_rejects_text_without_json() {
        let mut p = ChatJsonProducer::new(ScriptedModel::new([Ok("Извини, не могу.")]));
        assert!(matches!(p.generate(), Err(CycleError::UnresolvedJson { .. })));
    }

    #[test]
    fn test_generate_reports_model_failure() {
        let mut p = ChatJsonProducer::new(ScriptedModel::new([Err("out of memory")]));
        assert!(matches!(p.generate(), Err(CycleError::Model(_))));
    }

    #[test]
    fn test_prompt_sent_as_system_then_user() {
        let mut p = ChatJsonProducer::new(ScriptedModel::new([Ok("{}")]));
        p.generate().unwrap();
        let sent = &p.model.prompts[0];
        assert!(sent.starts_with("[system]: "));
        assert!(sent.contains("\n[user]: "));
    }
}
