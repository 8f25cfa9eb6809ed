// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed service configuration.
//!
//! The orchestrator delivers configuration as a flat string map. A service
//! declares the fields it expects in a [`ConfigSchema`]; the runtime decodes
//! every field up front into a [`ConfigView`], which the service then turns
//! into its own struct through [`FromConfigView`].

use std::collections::HashMap;

use tracing::warn;

use crate::config::ConfigError;

/// Value type of a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Long,
    Double,
    Bool,
    Str,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Int => "int",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Bool => "bool",
            FieldKind::Str => "string",
        }
    }
}

/// One declared config field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub default: Option<&'static str>,
}

impl ConfigField {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            default: None,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub const fn long(name: &'static str) -> Self {
        Self::new(name, FieldKind::Long)
    }

    pub const fn double(name: &'static str) -> Self {
        Self::new(name, FieldKind::Double)
    }

    pub const fn bool(name: &'static str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub const fn string(name: &'static str) -> Self {
        Self::new(name, FieldKind::Str)
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// The full set of fields a service expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSchema {
    fields: Vec<ConfigField>,
}

impl ConfigSchema {
    pub fn new(fields: impl IntoIterator<Item = ConfigField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Schema with no fields, for services that take no configuration.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[ConfigField] {
        &self.fields
    }
}

/// A decoded config value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(String),
}

/// Config decoded against a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigView {
    values: HashMap<String, ConfigValue>,
    raw: HashMap<String, String>,
}

impl ConfigView {
    /// Decode every schema field from the raw map.
    ///
    /// A missing key takes the field's declared default, or the empty string
    /// when there is none. The empty string decodes to the zero value of the
    /// field's kind. Keys that the schema does not mention stay reachable
    /// through [`raw`](Self::raw).
    pub fn build(schema: &ConfigSchema, raw: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut values = HashMap::with_capacity(schema.fields.len());

        for field in &schema.fields {
            let text = match raw.get(field.name) {
                Some(value) => value.as_str(),
                None => match field.default {
                    Some(default) => default,
                    None => {
                        warn!(field = field.name, "Config field missing and no default declared, using empty value");
                        ""
                    }
                },
            };
            values.insert(field.name.to_string(), parse_value(field, text)?);
        }

        Ok(Self {
            values,
            raw: raw.clone(),
        })
    }

    pub fn value(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        match self.values.get(name)? {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn long(&self, name: &str) -> Option<i64> {
        match self.values.get(name)? {
            ConfigValue::Long(v) => Some(*v),
            ConfigValue::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn double(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            ConfigValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name)? {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            ConfigValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// The map as delivered by the orchestrator
    pub fn raw(&self) -> &HashMap<String, String> {
        &self.raw
    }
}

/// A service configuration struct built from a decoded view.
pub trait FromConfigView: Sized + Send + 'static {
    fn schema() -> ConfigSchema;

    fn from_view(view: &ConfigView) -> anyhow::Result<Self>;
}

/// For services without configuration.
impl FromConfigView for () {
    fn schema() -> ConfigSchema {
        ConfigSchema::empty()
    }

    fn from_view(_view: &ConfigView) -> anyhow::Result<Self> {
        Ok(())
    }
}

/// Build a typed config straight from the orchestrator's map.
pub fn decode_config<C: FromConfigView>(raw: &HashMap<String, String>) -> Result<C, ConfigError> {
    let view = ConfigView::build(&C::schema(), raw)?;
    C::from_view(&view).map_err(|e| ConfigError::Rejected(format!("{:#}", e)))
}

fn parse_value(field: &ConfigField, text: &str) -> Result<ConfigValue, ConfigError> {
    let invalid = || ConfigError::InvalidField {
        field: field.name.to_string(),
        kind: field.kind.name(),
        value: text.to_string(),
    };
    let trimmed = text.trim();

    Ok(match field.kind {
        FieldKind::Str => ConfigValue::Str(text.to_string()),
        FieldKind::Bool => ConfigValue::Bool(trimmed.eq_ignore_ascii_case("true")),
        FieldKind::Int if trimmed.is_empty() => ConfigValue::Int(0),
        FieldKind::Long if trimmed.is_empty() => ConfigValue::Long(0),
        FieldKind::Double if trimmed.is_empty() => ConfigValue::Double(0.0),
        FieldKind::Int => {
            let v = decode_integer(trimmed).ok_or_else(invalid)?;
            ConfigValue::Int(i32::try_from(v).map_err(|_| invalid())?)
        }
        FieldKind::Long => ConfigValue::Long(decode_integer(trimmed).ok_or_else(invalid)?),
        FieldKind::Double => ConfigValue::Double(trimmed.parse().map_err(|_| invalid())?),
    })
}

/// Integer literal with an optional sign and radix prefix:
/// `0x`/`0X`/`#` for hex, a leading `0` for octal, decimal otherwise.
fn decode_integer(text: &str) -> Option<i64> {
    let (negative, body) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(hex) = body.strip_prefix('#') {
        (16, hex)
    } else if body.len() > 1 && body.starts_with('0') {
        (8, &body[1..])
    } else {
        (10, body)
    };

    if digits.is_empty() || digits.starts_with(['-', '+']) {
        return None;
    }

    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}
