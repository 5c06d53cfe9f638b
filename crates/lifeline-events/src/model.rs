//! The event record shared by every pipeline stage.

use std::fmt;

use chrono::NaiveDate;
use lifeline_core::DateSpec;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Fields an LLM-produced child must carry. `event_id` is assigned by the
/// decomposer and `decompose` defaults to terminal, so neither is required.
pub const REQUIRED_CHILD_FIELDS: [&str; 6] = [
    "name",
    "date",
    "type",
    "description",
    "participant",
    "location",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Career,
    Education,
    Relationships,
    FamilyAndLiving,
    PersonalLife,
    Finance,
    Health,
    UnexpectedEvents,
    Other,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::Career,
        EventType::Education,
        EventType::Relationships,
        EventType::FamilyAndLiving,
        EventType::PersonalLife,
        EventType::Finance,
        EventType::Health,
        EventType::UnexpectedEvents,
        EventType::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Career => "Career",
            Self::Education => "Education",
            Self::Relationships => "Relationships",
            Self::FamilyAndLiving => "Family&Living Situation",
            Self::PersonalLife => "Personal Life",
            Self::Finance => "Finance",
            Self::Health => "Health",
            Self::UnexpectedEvents => "Unexpected Events",
            Self::Other => "Other",
        }
    }

    /// Lenient mapping from model output; anything unrecognized is `Other`.
    pub fn from_label(raw: &str) -> Self {
        let normalized = raw
            .trim()
            .to_lowercase()
            .replace(" and ", "&")
            .chars()
            .filter(|ch| !ch.is_whitespace() && *ch != '_' && *ch != '-')
            .collect::<String>();
        match normalized.as_str() {
            "career" | "work" | "工作" | "职业" => Self::Career,
            "education" | "study" | "学习" | "教育" => Self::Education,
            "relationships" | "relationship" | "social" | "人际关系" | "社交" => {
                Self::Relationships
            }
            "family&livingsituation" | "family&living" | "family" | "livingsituation"
            | "家庭与居住" | "家庭&居住" | "家庭" => Self::FamilyAndLiving,
            "personallife" | "personal" | "leisure" | "个人生活" => Self::PersonalLife,
            "finance" | "financial" | "财务" => Self::Finance,
            "health" | "健康" => Self::Health,
            "unexpectedevents" | "unexpected" | "意外事件" | "意外" => Self::UnexpectedEvents,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_label(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub name: String,
    pub relation: String,
}

impl<'de> Deserialize<'de> for Participant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawParticipant {
            Named(String),
            Full {
                name: String,
                #[serde(default)]
                relation: String,
            },
        }

        Ok(match RawParticipant::deserialize(deserializer)? {
            RawParticipant::Named(name) => Participant {
                name,
                relation: String::new(),
            },
            RawParticipant::Full { name, relation } => Participant { name, relation },
        })
    }
}

/// One node of the decomposition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNode {
    /// Display id: roots keep their input id, children are `parent-n`.
    #[serde(
        rename = "event_id",
        alias = "id",
        default,
        deserialize_with = "deserialize_event_id"
    )]
    pub event_id: String,
    pub name: String,
    #[serde(deserialize_with = "deserialize_dates")]
    pub date: Vec<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub participant: Vec<Participant>,
    #[serde(default)]
    pub location: String,
    #[serde(
        default,
        serialize_with = "serialize_decompose",
        deserialize_with = "deserialize_decompose"
    )]
    pub decompose: bool,
    #[serde(default)]
    pub subevent: Vec<EventNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("candidate is not a JSON object")]
    NotObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field value: {0}")]
    InvalidField(String),
}

impl EventNode {
    /// Validates and converts one element of a model-returned child array.
    pub fn from_llm_value(value: &Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotObject)?;
        for field in REQUIRED_CHILD_FIELDS {
            match object.get(field) {
                None | Some(Value::Null) => return Err(ValidationError::MissingField(field)),
                Some(_) => {}
            }
        }

        let mut node: EventNode = serde_json::from_value(value.clone())
            .map_err(|error| ValidationError::InvalidField(error.to_string()))?;
        if node.name.trim().is_empty() {
            return Err(ValidationError::InvalidField("name is empty".to_string()));
        }
        if node.date.iter().all(|entry| entry.trim().is_empty()) {
            return Err(ValidationError::InvalidField("date is empty".to_string()));
        }
        node.event_id.clear();
        node.subevent.clear();
        Ok(node)
    }

    /// Parsed date entries; malformed entries are skipped.
    pub fn date_specs(&self) -> Vec<DateSpec> {
        self.date
            .iter()
            .filter_map(|entry| DateSpec::parse(entry).ok())
            .collect()
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.date_specs().iter().map(DateSpec::start).min()
    }

    pub fn is_leaf(&self) -> bool {
        self.subevent.is_empty()
    }

    /// Copy of this node without its subtree, used for prompts and sibling context.
    pub fn detached(&self) -> Self {
        Self {
            subevent: Vec::new(),
            ..self.clone()
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.subevent.iter().map(EventNode::subtree_len).sum::<usize>()
    }

    pub fn force_terminal(&mut self) {
        self.decompose = false;
        self.subevent.clear();
    }
}

fn deserialize_event_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(raw) => Ok(raw.trim().to_string()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(de::Error::custom(format!(
            "event_id must be a string or number, got {other}"
        ))),
    }
}

fn deserialize_dates<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(raw) => Ok(vec![raw]),
        Value::Array(entries) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(raw) => Ok(raw),
                other => Err(de::Error::custom(format!(
                    "date entries must be strings, got {other}"
                ))),
            })
            .collect(),
        other => Err(de::Error::custom(format!(
            "date must be a string or list of strings, got {other}"
        ))),
    }
}

fn serialize_decompose<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*flag))
}

/// Accepts `0/1`, `"0"/"1"`, and booleans; everything else means terminal.
fn deserialize_decompose<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_u64() == Some(1) || number.as_f64() == Some(1.0),
        Value::String(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true"),
        _ => false,
    })
}
