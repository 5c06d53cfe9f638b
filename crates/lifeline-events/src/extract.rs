//! Tolerant extraction of JSON payloads from free-form model output.
//!
//! Models wrap JSON in prose, Markdown fences, full-width punctuation, single
//! quotes and trailing commas. `extract_structured` locates the outermost
//! bracketed region of the requested shape, tries it verbatim, then retries
//! without Markdown fences and once more after a repair pass. Clean JSON is
//! returned unchanged.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Array,
    Object,
}

impl JsonShape {
    fn brackets(self) -> (char, char) {
        match self {
            Self::Array => ('[', ']'),
            Self::Object => ('{', '}'),
        }
    }

    fn full_width_brackets(self) -> (char, char) {
        match self {
            Self::Array => ('\u{FF3B}', '\u{FF3D}'),
            Self::Object => ('\u{FF5B}', '\u{FF5D}'),
        }
    }
}

impl fmt::Display for JsonShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array => f.write_str("array"),
            Self::Object => f.write_str("object"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no JSON {shape} found in model output")]
    NoJson { shape: JsonShape },
    #[error("could not parse JSON {shape}: {message}")]
    Invalid { shape: JsonShape, message: String },
}

/// Best-effort extraction of a JSON value of `shape` from `text`.
///
/// The raw bracketed region is tried first so fence markers inside string
/// values survive; fences are only stripped when that fails.
pub fn extract_structured(text: &str, shape: JsonShape) -> Result<Value, ParseError> {
    if let Some(value) =
        bracketed_region(text, shape).and_then(|raw| serde_json::from_str::<Value>(raw).ok())
    {
        return Ok(value);
    }

    let unfenced = strip_code_fences(text);
    let candidate = bracketed_region(&unfenced, shape).ok_or(ParseError::NoJson { shape })?;
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Ok(value);
    }

    let repaired = repair_json_text(candidate);
    serde_json::from_str::<Value>(&repaired).map_err(|error| ParseError::Invalid {
        shape,
        message: error.to_string(),
    })
}

pub fn extract_array(text: &str) -> Result<Vec<Value>, ParseError> {
    match extract_structured(text, JsonShape::Array)? {
        Value::Array(items) => Ok(items),
        other => Err(ParseError::Invalid {
            shape: JsonShape::Array,
            message: format!("expected array, found {other}"),
        }),
    }
}

pub fn extract_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    match extract_structured(text, JsonShape::Object)? {
        Value::Object(map) => Ok(map),
        other => Err(ParseError::Invalid {
            shape: JsonShape::Object,
            message: format!("expected object, found {other}"),
        }),
    }
}

/// Extracts and deserializes in one step.
pub fn extract_as<T: DeserializeOwned>(text: &str, shape: JsonShape) -> Result<T, ParseError> {
    let value = extract_structured(text, shape)?;
    serde_json::from_value(value).map_err(|error| ParseError::Invalid {
        shape,
        message: error.to_string(),
    })
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```[A-Za-z0-9_+-]*").expect("static fence pattern"))
}

fn strip_code_fences(text: &str) -> String {
    fence_pattern().replace_all(text, "").into_owned()
}

fn bracketed_region(text: &str, shape: JsonShape) -> Option<&str> {
    let (open, close) = shape.brackets();
    let (open_wide, close_wide) = shape.full_width_brackets();
    let start = text.find(|ch| ch == open || ch == open_wide)?;
    let (end, last) = text
        .char_indices()
        .rev()
        .find(|(_, ch)| *ch == close || *ch == close_wide)?;
    (end > start).then(|| &text[start..end + last.len_utf8()])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Double,
    FullWidth,
    Single,
}

/// Rewrites common model mistakes into valid JSON.
///
/// Outside string literals: full-width punctuation becomes ASCII, single and
/// curly quotes become string delimiters, trailing commas are dropped, and
/// control characters other than newline and tab are removed. Inside string
/// literals: raw newlines and tabs are escaped, CR and other control
/// characters are removed, and ASCII double quotes inside a literal opened by
/// another quote style are escaped.
fn repair_json_text(candidate: &str) -> String {
    let chars = candidate.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(candidate.len());
    let mut quote: Option<Quote> = None;
    let mut escaped = false;

    for (index, &ch) in chars.iter().enumerate() {
        if let Some(open) = quote {
            if escaped {
                out.push(ch);
                escaped = false;
                continue;
            }
            match (open, ch) {
                (_, '\\') => {
                    out.push(ch);
                    escaped = true;
                }
                (Quote::Double, '"')
                | (Quote::FullWidth, '\u{201C}' | '\u{201D}')
                | (Quote::Single, '\'') => {
                    out.push('"');
                    quote = None;
                }
                (_, '"') => out.push_str("\\\""),
                (_, '\n') => out.push_str("\\n"),
                (_, '\t') => out.push_str("\\t"),
                (_, c) if c.is_control() => {}
                (_, c) => out.push(c),
            }
            continue;
        }

        match ch {
            '"' => {
                quote = Some(Quote::Double);
                out.push('"');
            }
            '\u{201C}' | '\u{201D}' => {
                quote = Some(Quote::FullWidth);
                out.push('"');
            }
            '\'' | '\u{2018}' | '\u{2019}' => {
                quote = Some(Quote::Single);
                out.push('"');
            }
            ',' | '\u{FF0C}' => {
                let closes_container = matches!(
                    next_significant(&chars, index + 1),
                    Some(']' | '}' | '\u{FF3D}' | '\u{FF5D}')
                );
                if !closes_container {
                    out.push(',');
                }
            }
            '\u{FF1A}' => out.push(':'),
            '\u{FF3B}' => out.push('['),
            '\u{FF3D}' => out.push(']'),
            '\u{FF5B}' => out.push('{'),
            '\u{FF5D}' => out.push('}'),
            '\u{3000}' => out.push(' '),
            '\n' | '\t' => out.push(ch),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|ch| !ch.is_whitespace())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::{json, Map, Value};

    use super::{extract_array, extract_as, extract_object, extract_structured, JsonShape, ParseError};

    #[test]
    fn clean_json_round_trips_unchanged() {
        let samples = [
            json!([{ "a": 1, "b": [true, null, "x, y]"] }]),
            json!({ "name": "it's \"quoted\"", "nested": { "list": [1.5, -2] } }),
            json!([]),
            json!(["2025-01-01至2025-01-10", "全角，标点"]),
            json!(["```json", { "note": "use ```code``` blocks" }]),
            json!({ "description": "ends with a fence ```" }),
        ];
        for sample in samples {
            let shape = if sample.is_array() {
                JsonShape::Array
            } else {
                JsonShape::Object
            };
            let rendered = serde_json::to_string(&sample).expect("render");
            assert_eq!(extract_structured(&rendered, shape).expect("extract"), sample);
        }
    }

    #[test]
    fn tolerates_markdown_fences() {
        assert_eq!(
            extract_structured("```json\n[1,2,3]\n```", JsonShape::Array).expect("fenced"),
            json!([1, 2, 3])
        );
        assert_eq!(
            extract_structured("```[4]```", JsonShape::Array).expect("inline"),
            json!([4])
        );
    }

    #[test]
    fn tolerates_trailing_commas() {
        assert_eq!(
            extract_structured(r#"[{"a":1},]"#, JsonShape::Array).expect("trailing"),
            json!([{ "a": 1 }])
        );
        assert_eq!(
            extract_structured("{\"a\": [1, 2,\n ],\n}", JsonShape::Object).expect("nested"),
            json!({ "a": [1, 2] })
        );
    }

    #[test]
    fn strips_surrounding_prose() {
        let text = "Sure! Here are the events:\n[{\"name\": \"Run\"}]\nLet me know if you need more.";
        assert_eq!(
            extract_array(text).expect("array"),
            vec![json!({ "name": "Run" })]
        );
    }

    #[test]
    fn repairs_single_quotes_without_touching_apostrophes_in_strings() {
        let text = r#"[{'name': 'Dinner', 'description': "Tom's birthday"}]"#;
        assert_eq!(
            extract_array(text).expect("array"),
            vec![json!({ "name": "Dinner", "description": "Tom's birthday" })]
        );
    }

    #[test]
    fn normalizes_full_width_punctuation_outside_strings() {
        let text = "［{“name”：“晨跑”，“note”: \"a，b\"}］";
        assert_eq!(
            extract_structured(text, JsonShape::Array).expect("full width"),
            json!([{ "name": "晨跑", "note": "a，b" }])
        );
    }

    #[test]
    fn escapes_raw_newlines_and_drops_control_characters() {
        let text = "[{\"description\": \"line one\r\nline two\u{0007}\"}]";
        assert_eq!(
            extract_array(text).expect("array"),
            vec![json!({ "description": "line one\nline two" })]
        );
    }

    #[test]
    fn missing_brackets_is_no_json() {
        assert_eq!(
            extract_structured("I could not do that.", JsonShape::Array),
            Err(ParseError::NoJson {
                shape: JsonShape::Array
            })
        );
        assert!(matches!(
            extract_structured("] backwards [", JsonShape::Array),
            Err(ParseError::NoJson { .. })
        ));
    }

    #[test]
    fn unrecoverable_text_is_invalid() {
        assert!(matches!(
            extract_structured("[this is {not json]", JsonShape::Array),
            Err(ParseError::Invalid { .. })
        ));
    }

    #[test]
    fn object_and_typed_helpers() {
        let object = extract_object("result: {\"count\": 3}").expect("object");
        assert_eq!(object.get("count"), Some(&json!(3)));

        #[derive(Debug, Deserialize, PartialEq)]
        struct Count {
            count: u32,
        }
        assert_eq!(
            extract_as::<Count>("```json\n{\"count\": 3,}\n```", JsonShape::Object)
                .expect("typed"),
            Count { count: 3 }
        );
        assert!(extract_as::<Count>("{\"count\": \"many\"}", JsonShape::Object).is_err());
    }

    fn text_with_fences_and_quotes() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                Just("```".to_string()),
                Just("```json".to_string()),
                Just("\"".to_string()),
                Just("'".to_string()),
                Just("，".to_string()),
                Just("[".to_string()),
                Just("}".to_string()),
                "[a-z0-9 ]{0,6}",
                any::<String>(),
            ],
            0..5,
        )
        .prop_map(|parts| parts.concat())
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            text_with_fences_and_quotes().prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(text_with_fences_and_quotes(), inner, 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    proptest! {
        #[test]
        fn rendered_arrays_extract_to_themselves(items in prop::collection::vec(json_value(), 0..4)) {
            let value = Value::Array(items);
            let rendered = serde_json::to_string(&value).expect("render");
            prop_assert_eq!(extract_structured(&rendered, JsonShape::Array).expect("array"), value);
        }

        #[test]
        fn rendered_objects_extract_to_themselves(
            entries in prop::collection::btree_map(text_with_fences_and_quotes(), json_value(), 0..4)
        ) {
            let value = Value::Object(entries.into_iter().collect::<Map<_, _>>());
            let pretty = serde_json::to_string_pretty(&value).expect("render");
            prop_assert_eq!(extract_structured(&pretty, JsonShape::Object).expect("object"), value);
        }
    }
}
