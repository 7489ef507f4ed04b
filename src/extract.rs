//! Tokenizer and grammar for operator text.
//!
//! Commands: `TARGET COMMAND [with NAME value, NAME value ...]`.
//! Telemetry: `TARGET PACKET ITEM` and `TARGET PACKET ITEM = value`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// Structured form of a command expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub target_name: String,
    pub command_name: String,
    pub params: BTreeMap<String, Value>,
}

impl CommandRequest {
    /// Positional form; names are normalized to uppercase.
    pub fn new(target: &str, command: &str, params: BTreeMap<String, Value>) -> Self {
        Self {
            target_name: target.to_ascii_uppercase(),
            command_name: command.to_ascii_uppercase(),
            params: params
                .into_iter()
                .map(|(name, value)| (name.to_ascii_uppercase(), value))
                .collect(),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_ascii_uppercase(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    text: String,
    quoted: bool,
    comma: bool,
}

impl Token {
    fn value(&self) -> Value {
        if self.quoted {
            Value::String(self.text.clone())
        } else {
            Value::from_literal(&self.text)
        }
    }
}

/// Split on the first whitespace-delimited `with`, case-insensitive.
fn split_with(text: &str) -> (&str, Option<&str>) {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut search = 0;
    while let Some(pos) = lower[search..].find("with") {
        let start = search + pos;
        let end = start + 4;
        let before = start > 0 && bytes[start - 1].is_ascii_whitespace();
        let after = end < bytes.len() && bytes[end].is_ascii_whitespace();
        if before && after {
            return (text[..start].trim_end(), Some(text[end..].trim_start()));
        }
        search = end;
    }
    (text.trim(), None)
}

fn tokenize(text: &str) -> CoreResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == ',' {
            match tokens.last_mut() {
                Some(last) if !last.comma => last.comma = true,
                _ => return Err(CoreError::Syntax(format!("Unexpected comma in: {text}"))),
            }
            i += 1;
            continue;
        }
        let mut token = String::new();
        let mut quoted = false;
        if c == '"' || c == '\'' {
            quoted = true;
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                match chars[i] {
                    '\\' if i + 1 < chars.len() => {
                        token.push(chars[i + 1]);
                        i += 2;
                    }
                    q if q == c => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    other => {
                        token.push(other);
                        i += 1;
                    }
                }
            }
            if !closed {
                return Err(CoreError::Syntax(format!("Unterminated string in: {text}")));
            }
        } else if c == '[' {
            let mut depth = 0;
            let mut quote: Option<char> = None;
            while i < chars.len() {
                let ch = chars[i];
                token.push(ch);
                i += 1;
                if let Some(q) = quote {
                    if ch == '\\' && i < chars.len() {
                        token.push(chars[i]);
                        i += 1;
                    } else if ch == q {
                        quote = None;
                    }
                    continue;
                }
                match ch {
                    '"' | '\'' => quote = Some(ch),
                    '[' => depth += 1,
                    ']' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if depth != 0 {
                return Err(CoreError::Syntax(format!("Unterminated array in: {text}")));
            }
        } else {
            while i < chars.len() && !chars[i].is_whitespace() && chars[i] != ',' {
                token.push(chars[i]);
                i += 1;
            }
        }
        tokens.push(Token {
            text: token,
            quoted,
            comma: false,
        });
    }
    Ok(tokens)
}

/// Parse `TARGET COMMAND with NAME value, ...` into a [`CommandRequest`].
pub fn parse_cmd_text(text: &str) -> CoreResult<CommandRequest> {
    let (head, params_text) = split_with(text);
    let names: Vec<&str> = head.split_whitespace().collect();
    if names.len() != 2 {
        return Err(CoreError::Syntax(format!(
            "Both Target Name and Command Name must be given : {text}"
        )));
    }
    let mut params = BTreeMap::new();
    if let Some(params_text) = params_text {
        let tokens = tokenize(params_text)?;
        let mut i = 0;
        while i < tokens.len() {
            let name = &tokens[i];
            if name.comma || i + 1 >= tokens.len() {
                return Err(CoreError::MissingValue(text.to_string()));
            }
            let value = &tokens[i + 1];
            if i + 2 < tokens.len() && !value.comma {
                return Err(CoreError::MissingComma(text.to_string()));
            }
            params.insert(name.text.to_ascii_uppercase(), value.value());
            i += 2;
        }
    }
    Ok(CommandRequest {
        target_name: names[0].to_ascii_uppercase(),
        command_name: names[1].to_ascii_uppercase(),
        params,
    })
}

/// Parse `TARGET PACKET ITEM`.
pub fn parse_tlm_text(text: &str) -> CoreResult<(String, String, String)> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    match parts.as_slice() {
        [target, packet, item] => Ok((
            target.to_ascii_uppercase(),
            packet.to_ascii_uppercase(),
            item.to_ascii_uppercase(),
        )),
        _ => Err(CoreError::Syntax(format!(
            "Telemetry Item must be specified as 'TargetName PacketName ItemName' : {text}"
        ))),
    }
}

/// Parse `TARGET PACKET ITEM = value`.
pub fn parse_set_tlm_text(text: &str) -> CoreResult<(String, String, String, Value)> {
    let error = || {
        CoreError::Syntax(format!(
            "Set Telemetry Item must be specified as 'TargetName PacketName ItemName = Value' : {text}"
        ))
    };
    let (lhs, rhs) = text.split_once('=').ok_or_else(error)?;
    let rhs = rhs.trim();
    if rhs.is_empty() {
        return Err(error());
    }
    let (target, packet, item) = parse_tlm_text(lhs).map_err(|_| error())?;
    let tokens = tokenize(rhs)?;
    let value = match tokens.as_slice() {
        [single] => single.value(),
        _ => Value::from_literal(rhs),
    };
    Ok((target, packet, item, value))
}
