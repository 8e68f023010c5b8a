//! Custom-rules engine value types (spec C10 / §3 `Rule`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTarget {
    Subject,
    Body,
    From,
    To,
    Header,
    Attachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Contains,
    Equals,
    Regex,
    StartsWith,
    EndsWith,
    LengthGt,
    LengthLt,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub target: ConditionTarget,
    pub operator: ConditionOp,
    pub value: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionKind {
    Tag,
    Log,
    Score,
    Block,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: RuleActionKind,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub score: f64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
}

fn default_true() -> bool {
    true
}
