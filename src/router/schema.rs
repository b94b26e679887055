//! Declared argument schemas and the validator that turns raw option values
//! into a [`TypedArgs`] bundle.

use serenity::all::{ChannelId, RoleId, UserId};
use std::collections::HashMap;

use crate::error::BotError;

#[derive(Debug, Clone, PartialEq)]
pub enum ArgKind {
    String {
        min_len: Option<usize>,
        max_len: Option<usize>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
    User,
    Channel,
    Role,
    /// A string restricted to a fixed set of values.
    Choice(&'static [&'static str]),
}

impl ArgKind {
    fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } | Self::Choice(_) => "text",
            Self::Integer { .. } => "a whole number",
            Self::Number { .. } => "a number",
            Self::Boolean => "true or false",
            Self::User => "a user",
            Self::Channel => "a channel",
            Self::Role => "a role",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

impl ArgSpec {
    fn new(name: &'static str, description: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
        }
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(
            name,
            description,
            ArgKind::String {
                min_len: None,
                max_len: None,
            },
        )
    }

    pub fn integer(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, ArgKind::Integer { min: None, max: None })
    }

    #[allow(dead_code)]
    pub fn number(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, ArgKind::Number { min: None, max: None })
    }

    pub fn user(name: &'static str, description: &'static str) -> Self {
        Self::new(name, description, ArgKind::User)
    }

    pub fn choice(
        name: &'static str,
        description: &'static str,
        values: &'static [&'static str],
    ) -> Self {
        Self::new(name, description, ArgKind::Choice(values))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Character-length bounds for string arguments.
    pub fn length(mut self, min: usize, max: usize) -> Self {
        if let ArgKind::String { min_len, max_len } = &mut self.kind {
            *min_len = Some(min);
            *max_len = Some(max);
        }
        self
    }

    /// Inclusive bounds for integer and number arguments.
    pub fn range(mut self, lo: i64, hi: i64) -> Self {
        match &mut self.kind {
            ArgKind::Integer { min, max } => {
                *min = Some(lo);
                *max = Some(hi);
            }
            ArgKind::Number { min, max } => {
                *min = Some(lo as f64);
                *max = Some(hi as f64);
            }
            _ => {}
        }
        self
    }

    fn check(&self, value: ArgValue) -> Result<ArgValue, BotError> {
        let mismatch = || {
            BotError::invalid_argument(self.name, format!("expected {}", self.kind.type_name()))
        };

        match (&self.kind, value) {
            (ArgKind::String { min_len, max_len }, ArgValue::String(text)) => {
                let len = text.chars().count();
                if let Some(min) = min_len {
                    if len < *min {
                        return Err(BotError::invalid_argument(
                            self.name,
                            format!("must be at least {} characters", min),
                        ));
                    }
                }
                if let Some(max) = max_len {
                    if len > *max {
                        return Err(BotError::invalid_argument(
                            self.name,
                            format!("must be at most {} characters", max),
                        ));
                    }
                }
                Ok(ArgValue::String(text))
            }
            (ArgKind::Choice(values), ArgValue::String(text)) => {
                if values.iter().any(|allowed| *allowed == text) {
                    Ok(ArgValue::String(text))
                } else {
                    Err(BotError::invalid_argument(
                        self.name,
                        format!("must be one of: {}", values.join(", ")),
                    ))
                }
            }
            (ArgKind::Integer { min, max }, ArgValue::Integer(n)) => {
                check_range(self.name, n as f64, min.map(|m| m as f64), max.map(|m| m as f64))?;
                Ok(ArgValue::Integer(n))
            }
            (ArgKind::Number { min, max }, ArgValue::Number(n)) => {
                if !n.is_finite() {
                    return Err(mismatch());
                }
                check_range(self.name, n, *min, *max)?;
                Ok(ArgValue::Number(n))
            }
            (ArgKind::Number { min, max }, ArgValue::Integer(n)) => {
                check_range(self.name, n as f64, *min, *max)?;
                Ok(ArgValue::Number(n as f64))
            }
            (ArgKind::Boolean, value @ ArgValue::Boolean(_))
            | (ArgKind::User, value @ ArgValue::User(_))
            | (ArgKind::Channel, value @ ArgValue::Channel(_))
            | (ArgKind::Role, value @ ArgValue::Role(_)) => Ok(value),
            _ => Err(mismatch()),
        }
    }
}

fn check_range(
    field: &str,
    value: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), BotError> {
    match (min, max) {
        (Some(lo), Some(hi)) if value < lo || value > hi => Err(BotError::invalid_argument(
            field,
            format!("must be between {} and {}", lo, hi),
        )),
        (Some(lo), None) if value < lo => Err(BotError::invalid_argument(
            field,
            format!("must be at least {}", lo),
        )),
        (None, Some(hi)) if value > hi => Err(BotError::invalid_argument(
            field,
            format!("must be at most {}", hi),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArgSchema {
    specs: Vec<ArgSpec>,
}

impl ArgSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn specs(&self) -> &[ArgSpec] {
        &self.specs
    }

    /// Checks raw option values against the schema.
    ///
    /// Fails on the first unknown, repeated, mistyped or out-of-range value,
    /// then on the first missing required argument in declaration order.
    pub fn validate(&self, raw: &[(String, ArgValue)]) -> Result<TypedArgs, BotError> {
        let mut values = HashMap::with_capacity(raw.len());

        for (name, value) in raw {
            let spec = self
                .specs
                .iter()
                .find(|spec| spec.name == name.as_str())
                .ok_or_else(|| {
                    BotError::invalid_argument(name.as_str(), "is not an option of this command")
                })?;

            if values.contains_key(spec.name) {
                return Err(BotError::invalid_argument(spec.name, "was given more than once"));
            }

            values.insert(spec.name, spec.check(value.clone())?);
        }

        if let Some(missing) = self
            .specs
            .iter()
            .find(|spec| spec.required && !values.contains_key(spec.name))
        {
            return Err(BotError::invalid_argument(missing.name, "is required"));
        }

        Ok(TypedArgs { values })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    User(UserId),
    Channel(ChannelId),
    Role(RoleId),
}

/// Validated arguments, keyed by declared option name.
#[derive(Debug, Clone, Default)]
pub struct TypedArgs {
    values: HashMap<&'static str, ArgValue>,
}

impl TypedArgs {
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            ArgValue::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name)? {
            ArgValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    #[allow(dead_code)]
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn user(&self, name: &str) -> Option<UserId> {
        match self.values.get(name)? {
            ArgValue::User(id) => Some(*id),
            _ => None,
        }
    }

    /// Required string argument. The schema guarantees presence.
    pub fn required_str(&self, name: &str) -> Result<&str, BotError> {
        self.str(name)
            .ok_or_else(|| BotError::invalid_argument(name, "is required"))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn play_schema() -> ArgSchema {
        ArgSchema::new()
            .arg(ArgSpec::string("query", "URL or search terms").required().length(1, 10))
            .arg(ArgSpec::integer("position", "Queue position").range(1, 100))
    }

    fn raw(pairs: &[(&str, ArgValue)]) -> Vec<(String, ArgValue)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_valid_arguments() {
        let args = play_schema()
            .validate(&raw(&[
                ("query", ArgValue::String("lofi".into())),
                ("position", ArgValue::Integer(3)),
            ]))
            .unwrap();

        assert_eq!(args.str("query"), Some("lofi"));
        assert_eq!(args.integer("position"), Some(3));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_missing_required() {
        let err = play_schema()
            .validate(&raw(&[("position", ArgValue::Integer(3))]))
            .unwrap_err();
        assert_eq!(err, BotError::invalid_argument("query", "is required"));
    }

    #[test]
    fn test_out_of_range_and_too_long() {
        let err = play_schema()
            .validate(&raw(&[
                ("query", ArgValue::String("x".into())),
                ("position", ArgValue::Integer(0)),
            ]))
            .unwrap_err();
        assert_eq!(err, BotError::invalid_argument("position", "must be between 1 and 100"));

        let err = play_schema()
            .validate(&raw(&[("query", ArgValue::String("x".repeat(11)))]))
            .unwrap_err();
        assert_eq!(
            err,
            BotError::invalid_argument("query", "must be at most 10 characters")
        );
    }

    #[test]
    fn test_type_mismatch_and_unknown() {
        let err = play_schema()
            .validate(&raw(&[("query", ArgValue::Integer(1))]))
            .unwrap_err();
        assert_eq!(err, BotError::invalid_argument("query", "expected text"));

        let err = play_schema()
            .validate(&raw(&[
                ("query", ArgValue::String("a".into())),
                ("volume", ArgValue::Integer(1)),
            ]))
            .unwrap_err();
        assert_eq!(
            err,
            BotError::invalid_argument("volume", "is not an option of this command")
        );
    }

    #[test]
    fn test_choice() {
        let schema = ArgSchema::new().arg(
            ArgSpec::choice("mode", "Loop mode", &["off", "track", "queue"]).required(),
        );

        assert!(schema
            .validate(&raw(&[("mode", ArgValue::String("track".into()))]))
            .is_ok());
        let err = schema
            .validate(&raw(&[("mode", ArgValue::String("forever".into()))]))
            .unwrap_err();
        assert_eq!(
            err,
            BotError::invalid_argument("mode", "must be one of: off, track, queue")
        );
    }

    #[test]
    fn test_number_accepts_integer() {
        let schema = ArgSchema::new().arg(ArgSpec::number("ratio", "Ratio").range(0, 2));
        let args = schema
            .validate(&raw(&[("ratio", ArgValue::Integer(1))]))
            .unwrap();
        assert_eq!(args.number("ratio"), Some(1.0));
    }
}
