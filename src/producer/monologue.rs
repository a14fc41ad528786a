use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::error::CycleError;
use crate::producer::{Producer, TextModel};
use crate::text::{dedup_similar, sanitize};

const CORPS: &[&str] = &["Arasaka", "Militech", "Biotechnica", "Petrochem", "Kang Tao", "Zetatech"];
const SPECIALTIES: &[&str] = &[
    "киберимпланты",
    "военная техника",
    "системы безопасности",
    "нейротехнологии",
];

/// What V says when the model has nothing to offer.
pub const FALLBACK_REPLIES: &[&str] = &[
    "Идите нахуй.",
    "Заткнись, жестянка.",
    "Ты мне мозги плавишь.",
    "Опять реклама? Вот ведь дерьмо.",
    "заебало",
    "Суки как вы заебали.",
];

const FALLBACK_ANSWER: &str = "Сбой рекламной сети.";

const MONOLOGUE_TOKENS: usize = 350;
const REPLY_TOKENS: usize = 60;
const ANSWER_TOKENS: usize = 80;

/// Builds a record from several raw completions: a corporate ad monologue,
/// a few hostile replies from V, and the ad network's comeback.
pub struct MonologueProducer<M, R = StdRng> {
    model: M,
    rng: R,
    reply_candidates: usize,
    similarity_threshold: f64,
}

impl<M: TextModel> MonologueProducer<M> {
    pub fn new(model: M, reply_candidates: usize, similarity_threshold: f64) -> Self {
        Self::with_rng(model, StdRng::from_entropy(), reply_candidates, similarity_threshold)
    }
}

impl<M: TextModel, R: Rng> MonologueProducer<M, R> {
    pub fn with_rng(model: M, rng: R, reply_candidates: usize, similarity_threshold: f64) -> Self {
        Self {
            model,
            rng,
            reply_candidates: reply_candidates.max(1),
            similarity_threshold,
        }
    }

    /// Sanitized completion, empty on failure.
    fn call_model(&mut self, prompt: &str, max_tokens: usize) -> String {
        match self.model.complete(prompt, max_tokens) {
            Ok(text) => sanitize(&text),
            Err(e) => {
                warn!("Model call failed, using empty output: {e:#}");
                String::new()
            }
        }
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items.choose(&mut self.rng).copied().unwrap_or_default()
    }
}

fn monologue_prompt(corp: &str, specialty: &str) -> String {
    format!(
        "Сделай рекламный монолог.\n\
         Корпорация: {corp}\n\
         Специализация: {specialty}\n\
         Стиль: агрессивная реклама киберпанка.\n\
         В ответе выдай только текст, ничего лишнего.\n\
         До 200 слов.\n"
    )
}

fn reply_prompt(corp: &str) -> String {
    format!(
        "Ты — Ви из Cyberpunk 2077, наемник жесткий, с тяжелой судьбой.\n\
         Дай короткий злой негативный ответ на рекламу от {corp}.\n\
         В ответе выдай только текст.\n"
    )
}

fn answer_prompt(corp: &str, specialty: &str) -> String {
    format!(
        "Ты — рекламный ИИ корпорации {corp} ({specialty}).\n\
         Наемник только что грубо отказался от твоего предложения.\n\
         Ответь ему одной-двумя фразами в стиле агрессивной рекламы киберпанка.\n\
         В ответе выдай только текст, ничего лишнего.\n"
    )
}

impl<M: TextModel, R: Rng> Producer for MonologueProducer<M, R> {
    fn name(&self) -> &'static str {
        "monologue"
    }

    fn generate(&mut self) -> Result<Value, CycleError> {
        let corp = self.pick(CORPS);
        let specialty = self.pick(SPECIALTIES);
        info!("Generating ad for {corp} ({specialty})");

        let npc_text = self.call_model(&monologue_prompt(corp, specialty), MONOLOGUE_TOKENS);

        let mut candidates = Vec::with_capacity(self.reply_candidates);
        for _ in 0..self.reply_candidates {
            let mut text = self.call_model(&reply_prompt(corp), REPLY_TOKENS);
            if text.is_empty() {
                text = self.pick(FALLBACK_REPLIES).to_string();
                debug!("Empty reply, falling back to {text:?}");
            }
            candidates.push(text);
        }
        let before = candidates.len();
        let replies = dedup_similar(candidates, self.similarity_threshold);
        if replies.len() < before {
            debug!("Collapsed {} near-duplicate replies", before - replies.len());
        }

        let mut answer = self.call_model(&answer_prompt(corp, specialty), ANSWER_TOKENS);
        if answer.is_empty() {
            answer = FALLBACK_ANSWER.to_string();
        }

        let replies: Vec<Value> = replies
            .into_iter()
            .zip(1..)
            .map(|(text, id)| json!({"id": id, "text": text}))
            .collect();

        Ok(json!({
            "corp_name": corp,
            "npc_text": npc_text,
            "replies": replies,
            "answers": answer,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::test_support::ScriptedModel;
    use crate::record::normalize;

    fn producer(model: ScriptedModel, candidates: usize) -> MonologueProducer<ScriptedModel, StdRng> {
        MonologueProducer::with_rng(model, StdRng::seed_from_u64(7), candidates, 0.7)
    }

    #[test]
    fn test_generate_builds_full_record() {
        let model = ScriptedModel::new([
            Ok("  Arasaka: **лучшие** импланты!  "),
            Ok("Засунь свою рекламу куда подальше."),
            Ok("Идите нахуй."),
            Ok("Мы запомним это, наемник."),
        ]);
        let mut p = producer(model, 2);

        let record = normalize(&p.generate().unwrap());

        assert_eq!(record.npc_text, "Arasaka: лучшие импланты!");
        let texts: Vec<&str> = record.replies.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Засунь свою рекламу куда подальше.", "Идите нахуй."]);
        assert_eq!(record.replies[1].id, 2);
        assert_eq!(record.answers["1"], "Мы запомним это, наемник.");
        assert!(CORPS.contains(&record.corp_name.as_deref().unwrap()));
    }

    #[test]
    fn test_generate_collapses_near_duplicate_replies() {
        let model = ScriptedModel::new([
            Ok("ad"),
            Ok("Заткнись, жестянка."),
            Ok("Заткнись жестянка"),
            Ok("answer"),
        ]);
        let mut p = producer(model, 2);

        let record = normalize(&p.generate().unwrap());
        assert_eq!(record.replies.len(), 1);
        assert_eq!(record.replies[0].text, "Заткнись, жестянка.");
    }

    #[test]
    fn test_generate_falls_back_on_empty_and_failed_calls() {
        let model = ScriptedModel::new([Err("backend gone"), Ok("★★★"), Err("timeout")]);
        let mut p = producer(model, 1);

        let record = normalize(&p.generate().unwrap());
        assert_eq!(record.npc_text, "");
        assert_eq!(record.replies.len(), 1);
        assert!(FALLBACK_REPLIES.contains(&record.replies[0].text.as_str()));
        assert_eq!(record.answers["1"], FALLBACK_ANSWER);
    }

    #[test]
    fn test_prompts_mention_chosen_corp() {
        let mut p = producer(ScriptedModel::default(), 1);
        let record = normalize(&p.generate().unwrap());
        let corp = record.corp_name.unwrap();

        assert_eq!(p.model.prompts.len(), 3);
        assert!(p.model.prompts.iter().all(|prompt| prompt.contains(&corp)));
    }
}
