//! Command and result models.
//!
//! `Command` is what callers submit; `CommandResult` is the single shape every
//! backend maps its reply into.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Maximum characters of a command rendered into log lines.
pub const LOG_TRUNCATE_CHARS: usize = 200;

/// A positional SQL parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
}

impl SqlParam {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// A named key-value command with positional and keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KvCommand {
    /// Command name, case-insensitive (e.g. "set", "HGETALL")
    pub name: String,
    /// Positional arguments. Strings and numbers are sent as-is.
    #[serde(default)]
    pub args: Vec<JsonValue>,
    /// Keyword arguments understood by registered commands (e.g. {"ex": 60})
    #[serde(default)]
    pub kwargs: Map<String, JsonValue>,
}

impl KvCommand {
    pub fn new<I, V>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            kwargs: Map::new(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// A unit of work for the active backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// SQL text for the pooled relational backend
    Sql { text: String, params: Vec<SqlParam> },
    /// Named operation for the key-value backend
    Named(KvCommand),
    /// SQL text executed by the remote proxy
    Remote { sql: String, params: Vec<SqlParam> },
}

impl Command {
    pub fn sql(text: impl Into<String>) -> Self {
        Self::Sql {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn sql_with_params(text: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self::Sql {
            text: text.into(),
            params,
        }
    }

    pub fn named<I, V>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        Self::Named(KvCommand::new(name, args))
    }

    pub fn remote(sql: impl Into<String>) -> Self {
        Self::Remote {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Sql { .. } => "sql",
            Self::Named(_) => "named",
            Self::Remote { .. } => "remote",
        }
    }

    /// Render the command and its arguments for log lines, truncated.
    pub fn describe(&self) -> String {
        let full = match self {
            Self::Sql { text, params } | Self::Remote { sql: text, params } => {
                if params.is_empty() {
                    text.clone()
                } else {
                    format!("{} {:?}", text, params)
                }
            }
            Self::Named(cmd) => {
                let mut out = cmd.name.to_uppercase();
                for arg in &cmd.args {
                    out.push(' ');
                    match arg {
                        JsonValue::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                if !cmd.kwargs.is_empty() {
                    out.push(' ');
                    out.push_str(&JsonValue::Object(cmd.kwargs.clone()).to_string());
                }
                out
            }
        };
        truncate_chars(&full, LOG_TRUNCATE_CHARS)
    }
}

/// Truncate on a char boundary, appending "..." when shortened.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Normalized outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CommandResult {
    /// Rows in the backend's natural order, each a column-name to value map
    RowSet(Vec<Map<String, JsonValue>>),
    /// Rows touched by a mutation
    AffectedCount(u64),
    /// Success without payload
    Acknowledged,
    /// Key-value reply that is neither rows, a count, nor a plain OK
    Value(JsonValue),
}

impl CommandResult {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::RowSet(_) => "row_set",
            Self::AffectedCount(_) => "affected_count",
            Self::Acknowledged => "acknowledged",
            Self::Value(_) => "value",
        }
    }

    pub fn row_count(&self) -> Option<usize> {
        match self {
            Self::RowSet(rows) => Some(rows.len()),
            _ => None,
        }
    }

    pub fn rows(&self) -> Option<&[Map<String, JsonValue>]> {
        match self {
            Self::RowSet(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn affected(&self) -> Option<u64> {
        match self {
            Self::AffectedCount(n) => Some(*n),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&JsonValue> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Short outcome for exit log lines.
    pub fn summary(&self) -> String {
        match self {
            Self::RowSet(rows) => format!("{} row(s)", rows.len()),
            Self::AffectedCount(n) => format!("{} row(s) affected", n),
            Self::Acknowledged => "acknowledged".to_string(),
            Self::Value(v) => truncate_chars(&v.to_string(), LOG_TRUNCATE_CHARS),
        }
    }
}
