//! Key-value command registry.
//!
//! Registered commands have a typed frame builder (positional and keyword
//! arguments) and a reply shape used to decode the server's answer. Names not
//! in the registry go out verbatim on the raw path: upper-cased name followed
//! by the positional arguments.

use crate::db::kv::connection::error_code;
use crate::db::kv::resp::{RespValue, resp_to_json};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{CommandResult, KvCommand};
use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// How a registered command's reply is turned into a `CommandResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// "OK" is acknowledged, anything else becomes a JSON value
    Auto,
    /// Integer reply read as a boolean
    Flag,
    /// PONG becomes `true`
    Pong,
    /// Flat `[k, v, k, v]` array folded into an object
    Pairs,
    /// Flat `[member, score, ...]` array as `[member, score]` pairs
    ScoredPairs,
    /// INFO text parsed into an object
    Info,
    /// SCAN reply as `{cursor, keys}`
    Scan,
}

/// Frame under construction by a builder.
pub struct Frame {
    parts: Vec<Bytes>,
    shape: ReplyShape,
}

impl Frame {
    fn push(&mut self, part: impl Into<Bytes>) {
        self.parts.push(part.into());
    }

    fn push_arg(&mut self, command: &str, value: &JsonValue) -> GatewayResult<()> {
        self.parts.push(arg_bytes(command, value)?);
        Ok(())
    }

    fn push_args(&mut self, command: &str, values: &[JsonValue]) -> GatewayResult<()> {
        for value in values {
            self.push_arg(command, value)?;
        }
        Ok(())
    }
}

type BuildFn = fn(&mut Frame, &KvCommand) -> GatewayResult<()>;

struct CommandSpec {
    verb: &'static [&'static str],
    min_args: usize,
    max_args: Option<usize>,
    kwargs: &'static [&'static str],
    build: BuildFn,
    shape: ReplyShape,
}

/// A command ready for the wire, plus what is needed to decode its reply.
#[derive(Debug, Clone)]
pub struct PreparedCommand {
    pub name: String,
    pub frame: RespValue,
    /// Sent on the raw path (not in the registry)
    pub raw: bool,
    shape: ReplyShape,
}

impl PreparedCommand {
    /// Map a reply to a result. Server errors fail: on the raw path as
    /// `UnsupportedCommand`, otherwise as `BackendExecution` with the error
    /// prefix as code.
    pub fn decode(&self, reply: RespValue, decode_text: bool) -> GatewayResult<CommandResult> {
        if let RespValue::Error(message) = reply {
            return Err(if self.raw {
                GatewayError::unsupported(&self.name, message)
            } else {
                let code = error_code(&message);
                GatewayError::backend(message, code)
            });
        }
        Ok(decode_shape(self.shape, reply, decode_text))
    }
}

pub struct CommandRegistry {
    specs: HashMap<&'static str, CommandSpec>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        use ReplyShape::*;

        let mut specs = HashMap::new();
        let mut add = |name: &'static str,
                       verb: &'static [&'static str],
                       arity: (usize, Option<usize>),
                       kwargs: &'static [&'static str],
                       build: BuildFn,
                       shape: ReplyShape| {
            specs.insert(
                name,
                CommandSpec {
                    verb,
                    min_args: arity.0,
                    max_args: arity.1,
                    kwargs,
                    build,
                    shape,
                },
            );
        };
        let exactly = |n: usize| (n, Some(n));
        let at_least = |n: usize| (n, None);
        let none: &'static [&'static str] = &[];

        // Strings
        add("get", &["GET"], exactly(1), none, positional, Auto);
        add("set", &["SET"], exactly(2), &["ex", "px", "nx", "xx", "keepttl", "get"], build_set, Auto);
        add("setex", &["SETEX"], exactly(3), none, positional, Auto);
        add("getset", &["GETSET"], exactly(2), none, positional, Auto);
        add("mget", &["MGET"], at_least(1), none, positional, Auto);
        add("mset", &["MSET"], at_least(0), &["mapping"], build_mset, Auto);
        add("incr", &["INCR"], exactly(1), none, positional, Auto);
        add("incrby", &["INCRBY"], exactly(2), none, positional, Auto);
        add("decr", &["DECR"], exactly(1), none, positional, Auto);
        add("decrby", &["DECRBY"], exactly(2), none, positional, Auto);
        add("append", &["APPEND"], exactly(2), none, positional, Auto);
        add("strlen", &["STRLEN"], exactly(1), none, positional, Auto);

        // Keys
        add("del", &["DEL"], at_least(1), none, positional, Auto);
        add("delete", &["DEL"], at_least(1), none, positional, Auto);
        add("exists", &["EXISTS"], at_least(1), none, positional, Auto);
        add("expire", &["EXPIRE"], exactly(2), none, positional, Flag);
        add("pexpire", &["PEXPIRE"], exactly(2), none, positional, Flag);
        add("ttl", &["TTL"], exactly(1), none, positional, Auto);
        add("pttl", &["PTTL"], exactly(1), none, positional, Auto);
        add("persist", &["PERSIST"], exactly(1), none, positional, Flag);
        add("type", &["TYPE"], exactly(1), none, positional, Auto);
        add("keys", &["KEYS"], (0, Some(1)), none, build_keys, Auto);
        add("scan", &["SCAN"], (0, Some(1)), &["match", "count"], build_scan, Scan);
        add("rename", &["RENAME"], exactly(2), none, positional, Auto);

        // Hashes
        add("hset", &["HSET"], at_least(1), &["mapping"], build_hset, Auto);
        add("hget", &["HGET"], exactly(2), none, positional, Auto);
        add("hgetall", &["HGETALL"], exactly(1), none, positional, Pairs);
        add("hdel", &["HDEL"], at_least(2), none, positional, Auto);
        add("hexists", &["HEXISTS"], exactly(2), none, positional, Flag);
        add("hkeys", &["HKEYS"], exactly(1), none, positional, Auto);
        add("hvals", &["HVALS"], exactly(1), none, positional, Auto);
        add("hlen", &["HLEN"], exactly(1), none, positional, Auto);
        add("hincrby", &["HINCRBY"], exactly(3), none, positional, Auto);

        // Lists
        add("lpush", &["LPUSH"], at_least(2), none, positional, Auto);
        add("rpush", &["RPUSH"], at_least(2), none, positional, Auto);
        add("lpop", &["LPOP"], (1, Some(2)), none, positional, Auto);
        add("rpop", &["RPOP"], (1, Some(2)), none, positional, Auto);
        add("lrange", &["LRANGE"], exactly(3), none, positional, Auto);
        add("llen", &["LLEN"], exactly(1), none, positional, Auto);

        // Sets
        add("sadd", &["SADD"], at_least(2), none, positional, Auto);
        add("srem", &["SREM"], at_least(2), none, positional, Auto);
        add("smembers", &["SMEMBERS"], exactly(1), none, positional, Auto);
        add("sismember", &["SISMEMBER"], exactly(2), none, positional, Flag);
        add("scard", &["SCARD"], exactly(1), none, positional, Auto);

        // Sorted sets
        add("zadd", &["ZADD"], exactly(2), &["nx", "xx", "ch"], build_zadd, Auto);
        add("zrange", &["ZRANGE"], exactly(3), &["withscores"], build_zrange, Auto);
        add("zscore", &["ZSCORE"], exactly(2), none, positional, Auto);
        add("zrem", &["ZREM"], at_least(2), none, positional, Auto);
        add("zcard", &["ZCARD"], exactly(1), none, positional, Auto);

        // Server and pub/sub
        add("publish", &["PUBLISH"], exactly(2), none, positional, Auto);
        add("ping", &["PING"], (0, Some(1)), none, positional, Pong);
        add("echo", &["ECHO"], exactly(1), none, positional, Auto);
        add("dbsize", &["DBSIZE"], exactly(0), none, positional, Auto);
        add("info", &["INFO"], (0, Some(1)), none, positional, Info);
        add("config_get", &["CONFIG", "GET"], (0, Some(1)), none, build_config_get, Pairs);
        add("flushdb", &["FLUSHDB"], exactly(0), none, positional, Auto);

        Self { specs }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name.trim().to_ascii_lowercase().as_str())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.specs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Build the wire frame for `command`.
    pub fn prepare(&self, command: &KvCommand) -> GatewayResult<PreparedCommand> {
        let name = command.name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(GatewayError::invalid_input("command name cannot be empty"));
        }

        let Some(spec) = self.specs.get(name.as_str()) else {
            return prepare_raw(name, command);
        };

        if let Some(key) = command
            .kwargs
            .keys()
            .find(|k| !spec.kwargs.contains(&k.as_str()))
        {
            return Err(GatewayError::invalid_input(format!(
                "'{}' does not accept keyword argument '{}'",
                name, key
            )));
        }

        let given = command.args.len();
        if given < spec.min_args || spec.max_args.is_some_and(|max| given > max) {
            let expected = match spec.max_args {
                Some(max) if max == spec.min_args => format!("{}", max),
                Some(max) => format!("{} to {}", spec.min_args, max),
                None => format!("at least {}", spec.min_args),
            };
            return Err(GatewayError::invalid_input(format!(
                "'{}' expects {} argument(s), got {}",
                name, expected, given
            )));
        }

        let mut frame = Frame {
            parts: spec.verb.iter().map(|v| Bytes::from_static(v.as_bytes())).collect(),
            shape: spec.shape,
        };
        (spec.build)(&mut frame, command)?;

        Ok(PreparedCommand {
            frame: RespValue::command(frame.parts),
            shape: frame.shape,
            raw: false,
            name,
        })
    }
}

fn prepare_raw(name: String, command: &KvCommand) -> GatewayResult<PreparedCommand> {
    if !command.kwargs.is_empty() {
        return Err(GatewayError::invalid_input(format!(
            "'{}' is not a registered command; keyword arguments are not supported",
            name
        )));
    }
    // Multi-word names ("client list") become separate frame parts
    let mut parts: Vec<Bytes> = name
        .split_whitespace()
        .map(|word| Bytes::from(word.to_ascii_uppercase()))
        .collect();
    for arg in &command.args {
        parts.push(arg_bytes(&name, arg)?);
    }
    if let Some(verb) = session_verb(&parts) {
        return Err(GatewayError::unsupported(
            &name,
            format!(
                "'{}' changes connection session state and cannot run on a pooled connection",
                verb
            ),
        ));
    }
    Ok(PreparedCommand {
        frame: RespValue::command(parts),
        shape: ReplyShape::Auto,
        raw: true,
        name,
    })
}

/// Verbs that change per-connection state, such as the selected database or
/// subscribe mode. A pooled connection must come back as it was opened.
const SESSION_VERBS: &[&str] = &[
    "AUTH",
    "HELLO",
    "RESET",
    "SELECT",
    "QUIT",
    "MULTI",
    "EXEC",
    "DISCARD",
    "WATCH",
    "UNWATCH",
    "SUBSCRIBE",
    "PSUBSCRIBE",
    "SSUBSCRIBE",
    "UNSUBSCRIBE",
    "PUNSUBSCRIBE",
    "SUNSUBSCRIBE",
    "MONITOR",
    "SYNC",
    "PSYNC",
    "READONLY",
    "READWRITE",
];

const SESSION_CLIENT_SUBCOMMANDS: &[&str] = &["REPLY", "TRACKING", "SETNAME", "NO-EVICT", "NO-TOUCH"];

/// The session-changing verb at the head of `parts`, if any.
fn session_verb(parts: &[Bytes]) -> Option<String> {
    let word = |i: usize| {
        parts
            .get(i)
            .map(|p| String::from_utf8_lossy(p).to_ascii_uppercase())
    };
    let verb = word(0)?;
    if SESSION_VERBS.contains(&verb.as_str()) {
        return Some(verb);
    }
    if verb == "CLIENT" {
        let sub = word(1)?;
        if SESSION_CLIENT_SUBCOMMANDS.contains(&sub.as_str()) {
            return Some(format!("{} {}", verb, sub));
        }
    }
    None
}

// =============================================================================
// Argument helpers
// =============================================================================

fn arg_bytes(command: &str, value: &JsonValue) -> GatewayResult<Bytes> {
    match value {
        JsonValue::String(s) => Ok(Bytes::from(s.clone())),
        JsonValue::Number(n) => Ok(Bytes::from(n.to_string())),
        other => Err(GatewayError::invalid_input(format!(
            "'{}': arguments must be strings or numbers, got {}",
            command,
            json_type(other)
        ))),
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn flag(command: &KvCommand, key: &str) -> GatewayResult<bool> {
    match command.kwargs.get(key) {
        None | Some(JsonValue::Null) => Ok(false),
        Some(JsonValue::Bool(b)) => Ok(*b),
        Some(other) => Err(GatewayError::invalid_input(format!(
            "'{}': keyword '{}' must be a boolean, got {}",
            command.name,
            key,
            json_type(other)
        ))),
    }
}

fn int_kwarg(command: &KvCommand, key: &str) -> GatewayResult<Option<i64>> {
    match command.kwargs.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) if n.is_i64() => Ok(n.as_i64()),
        Some(_) => Err(GatewayError::invalid_input(format!(
            "'{}': keyword '{}' must be an integer",
            command.name, key
        ))),
    }
}

fn mapping<'a>(
    command: &'a KvCommand,
    value: Option<&'a JsonValue>,
) -> GatewayResult<Option<&'a Map<String, JsonValue>>> {
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Object(map)) => Ok(Some(map)),
        Some(other) => Err(GatewayError::invalid_input(format!(
            "'{}': mapping must be an object, got {}",
            command.name,
            json_type(other)
        ))),
    }
}

// =============================================================================
// Builders
// =============================================================================

fn positional(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    frame.push_args(&command.name, &command.args)
}

fn build_set(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    frame.push_args(&command.name, &command.args)?;
    let (nx, xx) = (flag(command, "nx")?, flag(command, "xx")?);
    if nx && xx {
        return Err(GatewayError::invalid_input(
            "'set': 'nx' and 'xx' are mutually exclusive",
        ));
    }
    let (ex, px) = (int_kwarg(command, "ex")?, int_kwarg(command, "px")?);
    if ex.is_some() && px.is_some() {
        return Err(GatewayError::invalid_input(
            "'set': 'ex' and 'px' are mutually exclusive",
        ));
    }
    if let Some(seconds) = ex {
        frame.push("EX");
        frame.push(seconds.to_string());
    }
    if let Some(millis) = px {
        frame.push("PX");
        frame.push(millis.to_string());
    }
    if nx {
        frame.push("NX");
    }
    if xx {
        frame.push("XX");
    }
    if flag(command, "keepttl")? {
        frame.push("KEEPTTL");
    }
    if flag(command, "get")? {
        frame.push("GET");
    }
    Ok(())
}

/// Field/value pairs from the `mapping` keyword or trailing positional args.
fn push_pairs(frame: &mut Frame, command: &KvCommand, positional: &[JsonValue]) -> GatewayResult<()> {
    if positional.len() % 2 != 0 {
        return Err(GatewayError::invalid_input(format!(
            "'{}': field/value arguments must come in pairs",
            command.name
        )));
    }
    frame.push_args(&command.name, positional)?;
    let mut count = positional.len() / 2;
    if let Some(map) = mapping(command, command.kwargs.get("mapping"))? {
        for (field, value) in map {
            frame.push(field.clone());
            frame.push_arg(&command.name, value)?;
        }
        count += map.len();
    }
    if count == 0 {
        return Err(GatewayError::invalid_input(format!(
            "'{}' requires at least one field/value pair",
            command.name
        )));
    }
    Ok(())
}

fn build_mset(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    push_pairs(frame, command, &command.args)
}

fn build_hset(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    frame.push_arg(&command.name, &command.args[0])?;
    push_pairs(frame, command, &command.args[1..])
}

fn build_zadd(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    frame.push_arg(&command.name, &command.args[0])?;
    let (nx, xx) = (flag(command, "nx")?, flag(command, "xx")?);
    if nx && xx {
        return Err(GatewayError::invalid_input(
            "'zadd': 'nx' and 'xx' are mutually exclusive",
        ));
    }
    if nx {
        frame.push("NX");
    }
    if xx {
        frame.push("XX");
    }
    if flag(command, "ch")? {
        frame.push("CH");
    }

    let members = mapping(command, command.args.get(1))?.ok_or_else(|| {
        GatewayError::invalid_input("'zadd': second argument must be a member-to-score object")
    })?;
    if members.is_empty() {
        return Err(GatewayError::invalid_input(
            "'zadd' requires at least one member",
        ));
    }
    for (member, score) in members {
        let JsonValue::Number(score) = score else {
            return Err(GatewayError::invalid_input(format!(
                "'zadd': score for '{}' must be a number",
                member
            )));
        };
        frame.push(score.to_string());
        frame.push(member.clone());
    }
    Ok(())
}

fn build_zrange(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    frame.push_args(&command.name, &command.args)?;
    if flag(command, "withscores")? {
        frame.push("WITHSCORES");
        frame.shape = ReplyShape::ScoredPairs;
    }
    Ok(())
}

fn build_scan(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    match command.args.first() {
        Some(cursor) => frame.push_arg(&command.name, cursor)?,
        None => frame.push("0"),
    }
    match command.kwargs.get("match") {
        None | Some(JsonValue::Null) => {}
        Some(pattern) => {
            frame.push("MATCH");
            frame.push_arg(&command.name, pattern)?;
        }
    }
    if let Some(count) = int_kwarg(command, "count")? {
        frame.push("COUNT");
        frame.push(count.to_string());
    }
    Ok(())
}

fn build_keys(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    match command.args.first() {
        Some(pattern) => frame.push_arg(&command.name, pattern),
        None => {
            frame.push("*");
            Ok(())
        }
    }
}

fn build_config_get(frame: &mut Frame, command: &KvCommand) -> GatewayResult<()> {
    build_keys(frame, command)
}

// =============================================================================
// Reply decoding
// =============================================================================

fn decode_shape(shape: ReplyShape, reply: RespValue, decode_text: bool) -> CommandResult {
    match (shape, reply) {
        (_, reply) if reply.is_ok() => CommandResult::Acknowledged,
        (ReplyShape::Flag, RespValue::Integer(n)) => CommandResult::Value(JsonValue::Bool(n != 0)),
        (ReplyShape::Pong, RespValue::SimpleString(s)) if s == "PONG" => {
            CommandResult::Value(JsonValue::Bool(true))
        }
        (ReplyShape::Pairs, RespValue::Array(Some(items))) if items.len() % 2 == 0 => {
            CommandResult::Value(JsonValue::Object(fold_pairs(items, decode_text)))
        }
        (ReplyShape::ScoredPairs, RespValue::Array(Some(items))) if items.len() % 2 == 0 => {
            CommandResult::Value(scored_pairs(items, decode_text))
        }
        (ReplyShape::Info, reply) => match reply.as_text() {
            Some(text) => CommandResult::Value(parse_info(&text)),
            None => CommandResult::Value(resp_to_json(reply, decode_text)),
        },
        (ReplyShape::Scan, RespValue::Array(Some(mut items))) if items.len() == 2 => {
            let keys = items.pop().map(|k| resp_to_json(k, decode_text));
            let cursor = items.pop().and_then(|c| c.as_text()).unwrap_or_default();
            let cursor = cursor
                .parse::<u64>()
                .map(JsonValue::from)
                .unwrap_or(JsonValue::String(cursor));
            CommandResult::Value(serde_json::json!({
                "cursor": cursor,
                "keys": keys.unwrap_or(JsonValue::Array(Vec::new())),
            }))
        }
        (_, reply) => CommandResult::Value(resp_to_json(reply, decode_text)),
    }
}

fn fold_pairs(items: Vec<RespValue>, decode_text: bool) -> Map<String, JsonValue> {
    let mut map = Map::new();
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        let key = match resp_to_json(key, decode_text) {
            JsonValue::String(text) => text,
            other => other.to_string(),
        };
        map.insert(key, resp_to_json(value, decode_text));
    }
    map
}

fn scored_pairs(items: Vec<RespValue>, decode_text: bool) -> JsonValue {
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        let score = score
            .as_text()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| resp_to_json(score, decode_text));
        out.push(JsonValue::Array(vec![resp_to_json(member, decode_text), score]));
    }
    JsonValue::Array(out)
}

/// Parse `INFO` output into a flat object.
///
/// Section headers are skipped. Numeric values become numbers, and values made
/// of `k=v` pairs (keyspace lines) become nested objects.
pub fn parse_info(text: &str) -> JsonValue {
    let mut map = Map::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            map.insert(key.to_string(), info_value(value));
        }
    }
    JsonValue::Object(map)
}

fn info_value(raw: &str) -> JsonValue {
    if raw.contains('=') && raw.split(',').all(|piece| piece.contains('=')) {
        let nested = raw
            .split(',')
            .filter_map(|piece| piece.split_once('='))
            .map(|(k, v)| (k.to_string(), info_scalar(v)))
            .collect();
        return JsonValue::Object(nested);
    }
    info_scalar(raw)
}

fn info_scalar(raw: &str) -> JsonValue {
    if let Ok(n) = raw.parse::<i64>() {
        return JsonValue::from(n);
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return JsonValue::Number(n);
    }
    JsonValue::String(raw.to_string())
}

// =============================================================================
// Command lines
// =============================================================================

/// Split a command line into words, honouring double quotes (with backslash
/// escapes), single quotes (literal, `\'` allowed), and backslash escapes
/// outside quotes.
pub fn parse_command_line(line: &str) -> GatewayResult<Vec<String>> {
    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Double,
        Single,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut mode = Mode::Plain;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Plain => match c {
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                '"' => {
                    mode = Mode::Double;
                    in_word = true;
                }
                '\'' => {
                    mode = Mode::Single;
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_word = true;
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
            Mode::Double => match c {
                '"' => mode = Mode::Plain,
                '\\' => match chars.next() {
                    Some('n') => current.push('\n'),
                    Some('r') => current.push('\r'),
                    Some('t') => current.push('\t'),
                    Some(other) => current.push(other),
                    None => break,
                },
                c => current.push(c),
            },
            Mode::Single => match c {
                '\'' => mode = Mode::Plain,
                '\\' => {
                    let mut lookahead = chars.clone();
                    if lookahead.next() == Some('\'') {
                        current.push('\'');
                        chars = lookahead;
                    } else {
                        current.push('\\');
                    }
                }
                c => current.push(c),
            },
        }
    }

    if mode != Mode::Plain {
        return Err(GatewayError::invalid_input("unbalanced quotes in command line"));
    }
    if in_word {
        words.push(current);
    }
    if words.is_empty() {
        return Err(GatewayError::invalid_input("command line is empty"));
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn words(prepared: &PreparedCommand) -> Vec<String> {
        match &prepared.frame {
            RespValue::Array(Some(parts)) => parts.iter().filter_map(RespValue::as_text).collect(),
            other => panic!("not a command frame: {:?}", other),
        }
    }

    fn cmd(name: &str, args: Vec<JsonValue>) -> KvCommand {
        KvCommand::new(name, args)
    }

    #[test]
    fn test_set_with_kwargs() {
        let registry = CommandRegistry::new();
        let command = cmd("SET", vec![json!("k"), json!(1)])
            .with_kwarg("ex", 60)
            .with_kwarg("nx", true);
        let prepared = registry.prepare(&command).unwrap();
        assert!(!prepared.raw);
        assert_eq!(words(&prepared), ["SET", "k", "1", "EX", "60", "NX"]);
    }

    #[test]
    fn test_kwarg_validation() {
        let registry = CommandRegistry::new();
        let err = registry
            .prepare(&cmd("get", vec![json!("k")]).with_kwarg("ex", 1))
            .unwrap_err();
        assert!(err.to_string().contains("keyword argument 'ex'"));

        let err = registry
            .prepare(&cmd("set", vec![json!("k"), json!("v")]).with_kwarg("nx", true).with_kwarg("xx", true))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));

        let err = registry
            .prepare(&cmd("set", vec![json!("k"), json!("v")]).with_kwarg("ex", "soon"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[test]
    fn test_arity_checked() {
        let registry = CommandRegistry::new();
        let err = registry.prepare(&cmd("get", vec![])).unwrap_err();
        assert!(err.to_string().contains("expects 1 argument(s), got 0"));
        let err = registry.prepare(&cmd("dbsize", vec![json!("x")])).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[test]
    fn test_non_scalar_args_rejected() {
        let registry = CommandRegistry::new();
        for bad in [json!(null), json!(true), json!([1])] {
            let err = registry.prepare(&cmd("get", vec![bad])).unwrap_err();
            assert!(matches!(err, GatewayError::InvalidInput { .. }));
        }
    }

    #[test]
    fn test_alias_and_mappings() {
        let registry = CommandRegistry::new();
        let prepared = registry.prepare(&cmd("delete", vec![json!("a"), json!("b")])).unwrap();
        assert_eq!(words(&prepared), ["DEL", "a", "b"]);

        let hset = cmd("hset", vec![json!("h")]).with_kwarg("mapping", json!({"f": "v", "n": 2}));
        assert_eq!(words(&registry.prepare(&hset).unwrap()), ["HSET", "h", "f", "v", "n", "2"]);

        let mset = cmd("mset", vec![]).with_kwarg("mapping", json!({"a": 1}));
        assert_eq!(words(&registry.prepare(&mset).unwrap()), ["MSET", "a", "1"]);

        assert!(registry.prepare(&cmd("hset", vec![json!("h")])).is_err());
        assert!(registry.prepare(&cmd("mset", vec![json!("a")])).is_err());
    }

    #[test]
    fn test_zadd_and_zrange() {
        let registry = CommandRegistry::new();
        let zadd = cmd("zadd", vec![json!("z"), json!({"alice": 1.5})]).with_kwarg("ch", true);
        assert_eq!(words(&registry.prepare(&zadd).unwrap()), ["ZADD", "z", "CH", "1.5", "alice"]);

        let bad = cmd("zadd", vec![json!("z"), json!({"alice": "high"})]);
        assert!(registry.prepare(&bad).is_err());

        let zrange = cmd("zrange", vec![json!("z"), json!(0), json!(-1)]).with_kwarg("withscores", true);
        let prepared = registry.prepare(&zrange).unwrap();
        assert_eq!(words(&prepared), ["ZRANGE", "z", "0", "-1", "WITHSCORES"]);
        let reply = RespValue::Array(Some(vec![RespValue::bulk("alice"), RespValue::bulk("1.5")]));
        assert_eq!(
            prepared.decode(reply, true).unwrap(),
            CommandResult::Value(json!([["alice", 1.5]]))
        );
    }

    #[test]
    fn test_scan_and_config_get() {
        let registry = CommandRegistry::new();
        let scan = cmd("scan", vec![]).with_kwarg("match", "user:*").with_kwarg("count", 100);
        let prepared = registry.prepare(&scan).unwrap();
        assert_eq!(words(&prepared), ["SCAN", "0", "MATCH", "user:*", "COUNT", "100"]);
        let reply = RespValue::Array(Some(vec![
            RespValue::bulk("17"),
            RespValue::Array(Some(vec![RespValue::bulk("user:1")])),
        ]));
        assert_eq!(
            prepared.decode(reply, true).unwrap(),
            CommandResult::Value(json!({"cursor": 17, "keys": ["user:1"]}))
        );

        let prepared = registry.prepare(&cmd("config_get", vec![json!("maxmemory")])).unwrap();
        assert_eq!(words(&prepared), ["CONFIG", "GET", "maxmemory"]);
        let reply = RespValue::Array(Some(vec![RespValue::bulk("maxmemory"), RespValue::bulk("0")]));
        assert_eq!(
            prepared.decode(reply, true).unwrap(),
            CommandResult::Value(json!({"maxmemory": "0"}))
        );
    }

    #[test]
    fn test_decode_shapes() {
        let registry = CommandRegistry::new();
        let set = registry.prepare(&cmd("set", vec![json!("k"), json!("v")])).unwrap();
        assert_eq!(
            set.decode(RespValue::SimpleString("OK".into()), true).unwrap(),
            CommandResult::Acknowledged
        );

        let ping = registry.prepare(&cmd("ping", vec![])).unwrap();
        assert_eq!(
            ping.decode(RespValue::SimpleString("PONG".into()), true).unwrap(),
            CommandResult::Value(json!(true))
        );

        let exists = registry.prepare(&cmd("hexists", vec![json!("h"), json!("f")])).unwrap();
        assert_eq!(
            exists.decode(RespValue::Integer(0), true).unwrap(),
            CommandResult::Value(json!(false))
        );

        let hgetall = registry.prepare(&cmd("hgetall", vec![json!("h")])).unwrap();
        let reply = RespValue::Array(Some(vec![
            RespValue::bulk("name"),
            RespValue::bulk("ada"),
            RespValue::bulk("age"),
            RespValue::bulk("36"),
        ]));
        assert_eq!(
            hgetall.decode(reply, true).unwrap(),
            CommandResult::Value(json!({"name": "ada", "age": "36"}))
        );

        let get = registry.prepare(&cmd("get", vec![json!("missing")])).unwrap();
        assert_eq!(
            get.decode(RespValue::BulkString(None), true).unwrap(),
            CommandResult::Value(JsonValue::Null)
        );
    }

    #[test]
    fn test_server_errors() {
        let registry = CommandRegistry::new();
        let get = registry.prepare(&cmd("get", vec![json!("k")])).unwrap();
        let err = get
            .decode(RespValue::Error("WRONGTYPE Operation against a key".into()), true)
            .unwrap_err();
        match err {
            GatewayError::BackendExecution { code, .. } => assert_eq!(code.as_deref(), Some("WRONGTYPE")),
            other => panic!("unexpected {:?}", other),
        }

        let raw = registry.prepare(&cmd("frobnicate", vec![json!("x")])).unwrap();
        assert!(raw.raw);
        assert_eq!(words(&raw), ["FROBNICATE", "x"]);
        let err = raw
            .decode(RespValue::Error("ERR unknown command 'FROBNICATE'".into()), true)
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedCommand { .. }));
    }

    #[test]
    fn test_raw_path() {
        let registry = CommandRegistry::new();
        let prepared = registry.prepare(&cmd("client list", vec![])).unwrap();
        assert_eq!(words(&prepared), ["CLIENT", "LIST"]);
        let prepared = registry.prepare(&cmd("object", vec![json!("encoding"), json!("k")])).unwrap();
        assert_eq!(
            prepared.decode(RespValue::bulk("embstr"), true).unwrap(),
            CommandResult::Value(json!("embstr"))
        );
        let err = registry
            .prepare(&cmd("object", vec![]).with_kwarg("x", 1))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
        assert!(registry.prepare(&cmd("  ", vec![])).is_err());
    }

    #[test]
    fn test_session_commands_rejected() {
        let registry = CommandRegistry::new();
        for (name, args) in [
            ("select", vec![json!(5)]),
            ("SUBSCRIBE", vec![json!("news")]),
            ("psubscribe", vec![json!("news.*")]),
            ("monitor", vec![]),
            ("multi", vec![]),
            ("watch", vec![json!("k")]),
            ("auth", vec![json!("secret")]),
            ("hello", vec![json!(3)]),
            ("reset", vec![]),
            ("client", vec![json!("reply"), json!("off")]),
            ("client reply", vec![json!("skip")]),
        ] {
            let err = registry.prepare(&cmd(name, args)).unwrap_err();
            match err {
                GatewayError::UnsupportedCommand { reason, .. } => {
                    assert!(reason.contains("session state"), "{}: {}", name, reason)
                }
                other => panic!("{}: unexpected {:?}", name, other),
            }
        }

        // Read-only CLIENT subcommands still go out on the raw path
        let prepared = registry.prepare(&cmd("client", vec![json!("list")])).unwrap();
        assert!(prepared.raw);
    }

    #[test]
    fn test_binary_hash_fields_keep_their_bytes() {
        let registry = CommandRegistry::new();
        let hgetall = registry.prepare(&cmd("hgetall", vec![json!("h")])).unwrap();
        let reply = || {
            RespValue::Array(Some(vec![
                RespValue::bulk(Bytes::from_static(&[0xff, 0x00, 0x01])),
                RespValue::bulk("v"),
            ]))
        };

        // Invalid UTF-8 field names are base64 even when decoding text
        assert_eq!(
            hgetall.decode(reply(), true).unwrap(),
            CommandResult::Value(json!({"/wAB": "v"}))
        );
        // With text decoding off, field names follow the values
        let reply = RespValue::Array(Some(vec![RespValue::bulk("name"), RespValue::bulk("ada")]));
        assert_eq!(
            hgetall.decode(reply, false).unwrap(),
            CommandResult::Value(json!({"bmFtZQ==": "YWRh"}))
        );
    }

    #[test]
    fn test_parse_info() {
        let text = "# Server\r\nredis_version:7.2.4\r\nuptime_in_seconds:42\r\n\r\n# Memory\r\nmem_fragmentation_ratio:1.25\r\n# Keyspace\r\ndb0:keys=3,expires=1,avg_ttl=0\r\n";
        let info = parse_info(text);
        assert_eq!(info["redis_version"], json!("7.2.4"));
        assert_eq!(info["uptime_in_seconds"], json!(42));
        assert_eq!(info["mem_fragmentation_ratio"], json!(1.25));
        assert_eq!(info["db0"], json!({"keys": 3, "expires": 1, "avg_ttl": 0}));
    }

    #[test]
    fn test_parse_command_line() {
        assert_eq!(parse_command_line("SET k v").unwrap(), ["SET", "k", "v"]);
        assert_eq!(
            parse_command_line(r#"set greeting "hello world""#).unwrap(),
            ["set", "greeting", "hello world"]
        );
        assert_eq!(
            parse_command_line(r#"set k "line\nbreak \"quoted\"""#).unwrap(),
            ["set", "k", "line\nbreak \"quoted\""]
        );
        assert_eq!(
            parse_command_line(r"set k 'it\'s raw \n'").unwrap(),
            ["set", "k", r"it's raw \n"]
        );
        assert_eq!(parse_command_line(r"set k a\ b").unwrap(), ["set", "k", "a b"]);
        assert_eq!(parse_command_line(r#"set k """#).unwrap(), ["set", "k", ""]);
        assert!(parse_command_line(r#"set k "open"#).is_err());
        assert!(parse_command_line("   ").is_err());
    }

    #[test]
    fn test_registry_names() {
        let registry = CommandRegistry::new();
        assert!(registry.contains("HGETALL"));
        assert!(!registry.contains("frobnicate"));
        let names = registry.names();
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(names.contains(&"config_get"));
    }
}
