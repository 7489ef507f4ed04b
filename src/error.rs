use thiserror::Error;

/// What kind of definition a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Target,
    Packet,
    Item,
    Command,
    Parameter,
    LimitsGroup,
    LimitsSet,
    Queue,
}

impl core::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NotFoundKind::Target => write!(f, "Target"),
            NotFoundKind::Packet => write!(f, "Packet"),
            NotFoundKind::Item => write!(f, "Item"),
            NotFoundKind::Command => write!(f, "Command"),
            NotFoundKind::Parameter => write!(f, "Parameter"),
            NotFoundKind::LimitsGroup => write!(f, "Limits group"),
            NotFoundKind::LimitsSet => write!(f, "Limits set"),
            NotFoundKind::Queue => write!(f, "Queue"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{kind} '{name}' does not exist")]
    NotFound { kind: NotFoundKind, name: String },

    #[error("{target} {command} is Disabled")]
    Disabled { target: String, command: String },

    #[error("{0}")]
    Validation(String),

    #[error("'{target} {command}' is Hazardous{}", hazardous_suffix(.description))]
    Hazardous {
        target: String,
        command: String,
        description: Option<String>,
    },

    #[error("Timeout of {timeout}s waiting for cmd ack for {target} {command}")]
    Timeout {
        target: String,
        command: String,
        timeout: f64,
    },

    #[error("Missing comma in command parameters: {0}")]
    MissingComma(String),

    #[error("Missing value for last command parameter: {0}")]
    MissingValue(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Command rejected: {0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn hazardous_suffix(description: &Option<String>) -> String {
    match description {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl CoreError {
    pub fn not_found(kind: NotFoundKind, name: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::not_found(NotFoundKind::Item, "INST HEALTH_STATUS NOPE");
        assert_eq!(
            err.to_string(),
            "Item 'INST HEALTH_STATUS NOPE' does not exist"
        );

        let err = CoreError::Hazardous {
            target: "INST".into(),
            command: "CLEAR".into(),
            description: None,
        };
        assert_eq!(err.to_string(), "'INST CLEAR' is Hazardous");

        let err = CoreError::Timeout {
            target: "INST".into(),
            command: "ABORT".into(),
            timeout: 2.5,
        };
        assert!(err.to_string().contains("INST ABORT"));
    }
}
