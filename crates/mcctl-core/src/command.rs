use serde::Deserialize;
use serde_json::{Map, Value};

/// An inbound control-channel payload, decoded once at the bus boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Bare(String),
    Structured {
        command: String,
        args: Map<String, Value>,
    },
}

#[derive(Debug, Deserialize)]
struct StructuredPayload {
    command: String,
    #[serde(default)]
    args: Value,
}

impl ControlMessage {
    /// Structured when the payload is a JSON object carrying a string
    /// `command`; anything else is taken verbatim as a command name.
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => return Self::Bare(raw.trim().to_string()),
        };
        match value {
            Value::String(name) => Self::Bare(name.trim().to_string()),
            Value::Object(_) => match serde_json::from_value::<StructuredPayload>(value) {
                Ok(payload) => Self::Structured {
                    command: payload.command.trim().to_string(),
                    args: match payload.args {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    },
                },
                Err(_) => Self::Bare(raw.trim().to_string()),
            },
            _ => Self::Bare(raw.trim().to_string()),
        }
    }

    pub fn into_command(self) -> ControlCommand {
        match self {
            Self::Bare(name) => ControlCommand {
                name,
                args: Map::new(),
            },
            Self::Structured { command, args } => ControlCommand {
                name: command,
                args,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    pub name: String,
    pub args: Map<String, Value>,
}

impl ControlCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key).filter(|value| !value.is_null())
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arg(key).and_then(Value::as_str)
    }
}

impl From<&str> for ControlCommand {
    fn from(raw: &str) -> Self {
        ControlMessage::decode(raw).into_command()
    }
}
