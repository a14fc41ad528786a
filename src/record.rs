//! The flat single-exchange record written by generation cycles, and the
//! normalizer that coerces untrusted model output into it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::text::sanitize;

/// A player reply in the generated form. `id` links it to the matching key
/// of [`GeneratedRecord::answers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReply {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corp_name: Option<String>,
    pub npc_text: String,
    pub replies: Vec<RecordReply>,
    /// Never empty.
    pub answers: BTreeMap<String, String>,
}

/// Shape of one field of raw producer output. `null` and absent fields are
/// both `Missing`.
#[derive(Debug, Clone, Copy)]
enum RawField<'a> {
    Object(&'a Map<String, Value>),
    Array(&'a [Value]),
    String(&'a str),
    Scalar(&'a Value),
    Missing,
}

impl<'a> RawField<'a> {
    fn of(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => RawField::Missing,
            Some(Value::Object(map)) => RawField::Object(map),
            Some(Value::Array(items)) => RawField::Array(items),
            Some(Value::String(s)) => RawField::String(s),
            Some(scalar) => RawField::Scalar(scalar),
        }
    }

    /// `raw[key]`, or `Missing` when `raw` is not an object.
    fn field(raw: &'a Value, key: &str) -> Self {
        Self::of(raw.get(key))
    }

    fn stringify(self) -> String {
        match self {
            RawField::Missing => String::new(),
            RawField::String(s) => s.to_string(),
            RawField::Scalar(v) => v.to_string(),
            RawField::Array(items) => Value::Array(items.to_vec()).to_string(),
            RawField::Object(map) => Value::Object(map.clone()).to_string(),
        }
    }

    /// Integer reading of an `id`, or `position` if there is none.
    fn coerce_id(self, position: i64) -> i64 {
        match self {
            RawField::Scalar(Value::Bool(b)) => i64::from(*b),
            RawField::Scalar(Value::Number(n)) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                        .map(|f| f.trunc() as i64)
                })
                .unwrap_or(position),
            RawField::String(s) => s.trim().parse().unwrap_or(position),
            _ => position,
        }
    }
}

/// Coerce arbitrary producer output into a [`GeneratedRecord`].
///
/// Total: every field falls back to a default when absent or of the wrong
/// type, and every text is passed through [`sanitize`]. A `null` anywhere is
/// treated as absent, so a `null` answer value becomes `""` rather than the
/// text `null`. Other non-string values are written as their JSON text.
pub fn normalize(raw: &Value) -> GeneratedRecord {
    let npc_text = match RawField::field(raw, "npc_text") {
        RawField::String(s) => sanitize(s),
        _ => String::new(),
    };

    let entries: &[Value] = match RawField::field(raw, "replies") {
        RawField::Array(items) => items,
        // a lone reply sent as a string instead of a list
        RawField::String(_) => raw.get("replies").map(std::slice::from_ref).unwrap_or_default(),
        _ => &[],
    };
    let replies = entries
        .iter()
        .zip(1i64..)
        .map(|(entry, position)| normalize_reply(entry, position))
        .collect();

    let answers = normalize_answers(RawField::field(raw, "answers"));

    let msg_id = match RawField::field(raw, "msg_id") {
        RawField::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };
    let corp_name = match RawField::field(raw, "corp_name") {
        RawField::String(s) => Some(sanitize(s)),
        _ => None,
    };

    GeneratedRecord {
        msg_id,
        corp_name,
        npc_text,
        replies,
        answers,
    }
}

fn normalize_reply(entry: &Value, position: i64) -> RecordReply {
    match RawField::of(Some(entry)) {
        RawField::Object(_) => RecordReply {
            id: RawField::field(entry, "id").coerce_id(position),
            text: sanitize(&RawField::field(entry, "text").stringify()),
        },
        other => RecordReply {
            id: position,
            text: sanitize(&other.stringify()),
        },
    }
}

fn normalize_answers(field: RawField<'_>) -> BTreeMap<String, String> {
    if let RawField::Object(map) = field {
        if !map.is_empty() {
            return map
                .iter()
                .map(|(key, value)| {
                    (key.clone(), sanitize(&RawField::of(Some(value)).stringify()))
                })
                .collect();
        }
    }
    BTreeMap::from([("1".to_string(), sanitize(&field.stringify()))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn reply(id: i64, text: &str) -> RecordReply {
        RecordReply {
            id,
            text: text.into(),
        }
    }

    #[test]
    fn test_normalize_null_gives_defaults() {
        let record = normalize(&Value::Null);
        assert_eq!(record.npc_text, "");
        assert!(record.replies.is_empty());
        assert_eq!(record.answers, BTreeMap::from([("1".into(), "".into())]));
        assert_eq!(record.msg_id, None);
        assert_eq!(record.corp_name, None);
    }

    #[test]
    fn test_normalize_empty_object() {
        let record = normalize(&json!({}));
        assert_eq!(record.npc_text, "");
        assert!(record.replies.is_empty());
        assert_eq!(record.answers.len(), 1);
    }

    #[test]
    fn test_normalize_string_replies_get_positions() {
        let record = normalize(&json!({"replies": ["a", "b"]}));
        assert_eq!(record.replies, vec![reply(1, "a"), reply(2, "b")]);
    }

    #[test]
    fn test_normalize_string_answers() {
        let record = normalize(&json!({"answers": "hello"}));
        assert_eq!(record.answers, BTreeMap::from([("1".into(), "hello".into())]));
    }

    #[test]
    fn test_normalize_bad_id_falls_back_to_position() {
        let record = normalize(&json!({"replies": [{"id": "x", "text": "hi"}]}));
        assert_eq!(record.replies, vec![reply(1, "hi")]);
    }

    #[test]
    fn test_normalize_coerces_ids() {
        let record = normalize(&json!({"replies": [
            {"id": "7", "text": "a"},
            {"id": 3.9, "text": "b"},
            {"id": true, "text": "c"},
            {"text": "d"},
            {"id": [1], "text": "e"},
        ]}));
        let ids: Vec<i64> = record.replies.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 3, 1, 4, 5]);
    }

    #[test]
    fn test_normalize_keeps_empty_and_odd_replies() {
        let record = normalize(&json!({"replies": [{"id": 1}, 42, null, "★"]}));
        assert_eq!(
            record.replies,
            vec![reply(1, ""), reply(2, "42"), reply(3, ""), reply(4, "")]
        );
    }

    #[test]
    fn test_normalize_single_string_reply() {
        let record = normalize(&json!({"replies": "Заткнись, жестянка."}));
        assert_eq!(record.replies, vec![reply(1, "Заткнись, жестянка.")]);
    }

    #[test]
    fn test_normalize_null_answer_is_empty_text() {
        let record = normalize(&json!({"answers": {"1": null, "2": false}}));
        assert_eq!(record.answers["1"], "");
        assert_eq!(record.answers["2"], "false");
    }

    #[test]
    fn test_normalize_answers_mapping_sanitized() {
        let record = normalize(&json!({"answers": {"1": "Да!\u{0000}", "2": 5, "x": null}}));
        assert_eq!(
            record.answers,
            BTreeMap::from([
                ("1".into(), "Да!".into()),
                ("2".into(), "5".into()),
                ("x".into(), "".into()),
            ])
        );
    }

    #[test]
    fn test_normalize_empty_answers_mapping_falls_back() {
        let record = normalize(&json!({"answers": {}}));
        assert_eq!(record.answers.len(), 1);
        assert!(record.answers.contains_key("1"));
    }

    #[test]
    fn test_normalize_wrong_typed_npc_text() {
        let record = normalize(&json!({"npc_text": ["Arasaka"]}));
        assert_eq!(record.npc_text, "");
    }

    #[test]
    fn test_normalize_full_record() {
        let record = normalize(&json!({
            "msg_id": "0b6f7c1e-1111-4a4a-9c9c-222233334444",
            "corp_name": "**Arasaka**",
            "npc_text": "  Купи  имплант!  ",
            "replies": [{"id": 1, "text": "Нет."}, {"id": 2, "text": "Отвали."}],
            "answers": {"1": "Жаль.", "2": "Как знаешь."}
        }));
        assert_eq!(
            record,
            GeneratedRecord {
                msg_id: Some("0b6f7c1e-1111-4a4a-9c9c-222233334444".into()),
                corp_name: Some("Arasaka".into()),
                npc_text: "Купи имплант!".into(),
                replies: vec![reply(1, "Нет."), reply(2, "Отвали.")],
                answers: BTreeMap::from([
                    ("1".into(), "Жаль.".into()),
                    ("2".into(), "Как знаешь.".into()),
                ]),
            }
        );
    }

    #[test]
    fn test_record_json_omits_missing_extensions() {
        let record = normalize(&json!({"npc_text": "hi"}));
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("msg_id").is_none());
        assert!(json.get("corp_name").is_none());
        assert_eq!(json["answers"], json!({"1": ""}));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<f64>().prop_map(Value::from),
            ".{0,12}".prop_map(Value::String),
        ];
        let key = prop_oneof![
            prop::sample::select(vec!["npc_text", "replies", "answers", "id", "text", "msg_id"])
                .prop_map(String::from),
            "[a-z]{0,6}",
        ];
        leaf.prop_recursive(4, 48, 6, move |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::vec((key.clone(), inner), 0..6)
                    .prop_map(|pairs| Value::Object(pairs.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_normalize_is_total(raw in arb_json()) {
            let record = normalize(&raw);
            prop_assert!(!record.answers.is_empty());
            prop_assert_eq!(sanitize(&record.npc_text), record.npc_text.clone());
            for r in &record.replies {
                prop_assert_eq!(sanitize(&r.text), r.text.clone());
            }
            for v in record.answers.values() {
                prop_assert_eq!(sanitize(v), v.clone());
            }
        }

        #[test]
        fn prop_reply_count_matches_input(items in prop::collection::vec(arb_json(), 0..8)) {
            let n = items.len();
            let record = normalize(&json!({"replies": items}));
            prop_assert_eq!(record.replies.len(), n);
        }
    }
}
