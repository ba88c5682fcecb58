use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signature::{Annotation, DeclaredType, Metadata};
use crate::value::{Converter, Value, ValueType};

#[derive(Debug, Error)]
pub enum OptionError {
    #[error(
        "Annotation {annotation} for parameter {param:?} is not callable. \
         Declare the option type with Option(type=...) metadata instead."
    )]
    NotConvertible { param: String, annotation: String },
    #[error("Found non-keyword session parameters {}", .0.join(", "))]
    NonKeywordParams(Vec<String>),
    #[error("{annotation} metadata must be an Option")]
    NotAnOption { annotation: String },
    #[error("{annotation} has extra metadata {extra:?}")]
    ExtraMetadata {
        annotation: String,
        extra: Vec<String>,
    },
    #[error("Option only supports flags, but got {0:?}")]
    InvalidFlag(String),
    #[error("Option flags must not be empty")]
    EmptyFlags,
}

impl OptionError {
    /// True for errors about a parameter's type rather than its value.
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            OptionError::NotConvertible { .. } | OptionError::NonKeywordParams(_)
        )
    }
}

/// What the parser does when it sees a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Store,
    StoreTrue,
    StoreFalse,
    Append,
    Count,
}

impl Action {
    pub fn takes_value(self) -> bool {
        matches!(self, Action::Store | Action::Append)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Store => "store",
            Action::StoreTrue => "store_true",
            Action::StoreFalse => "store_false",
            Action::Append => "append",
            Action::Count => "count",
        }
    }
}

/// Normalized description of one command-line option.
///
/// Unset fields are `None`. Specs are compared structurally: two parameters
/// may share a flag only when their resolved specs are equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSpec {
    pub flags: Option<Vec<String>>,
    pub action: Option<Action>,
    pub choices: Option<Vec<String>>,
    pub default: Option<Value>,
    pub dest: Option<String>,
    pub help: Option<String>,
    pub metavar: Option<String>,
    pub required: Option<bool>,
    pub value_type: Option<ValueType>,
}

impl OptionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(self, flag: impl Into<String>) -> Self {
        self.flags([flag])
    }

    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = Some(flags.into_iter().map(Into::into).collect());
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn metavar(mut self, metavar: impl Into<String>) -> Self {
        self.metavar = Some(metavar.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn converter<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.value_type(ValueType::Custom(Converter::new(name, func)))
    }

    /// The first flag, used to identify the option inside a parser.
    pub fn primary_flag(&self) -> Option<&str> {
        self.flags
            .as_ref()
            .and_then(|flags| flags.first())
            .map(String::as_str)
    }

    pub fn effective_action(&self) -> Action {
        self.action.unwrap_or(Action::Store)
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }

    pub fn validate_flags(&self) -> Result<(), OptionError> {
        let Some(flags) = self.flags.as_ref() else {
            return Ok(());
        };
        if flags.is_empty() {
            return Err(OptionError::EmptyFlags);
        }
        for flag in flags {
            if !flag.starts_with('-') {
                return Err(OptionError::InvalidFlag(flag.clone()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for OptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<String> = Vec::new();
        if let Some(flags) = &self.flags {
            fields.push(format!("flags={flags:?}"));
        }
        if let Some(action) = self.action {
            fields.push(format!("action={:?}", action.as_str()));
        }
        if let Some(choices) = &self.choices {
            fields.push(format!("choices={choices:?}"));
        }
        if let Some(default) = &self.default {
            fields.push(format!("default={default}"));
        }
        if let Some(dest) = &self.dest {
            fields.push(format!("dest={dest:?}"));
        }
        if let Some(help) = &self.help {
            fields.push(format!("help={help:?}"));
        }
        if let Some(metavar) = &self.metavar {
            fields.push(format!("metavar={metavar:?}"));
        }
        if let Some(required) = self.required {
            fields.push(format!("required={required}"));
        }
        if let Some(value_type) = &self.value_type {
            fields.push(format!("type={value_type}"));
        }
        write!(f, "Option({})", fields.join(", "))
    }
}

/// Turns one declared parameter into a normalized [`OptionSpec`].
pub fn resolve(
    param: &str,
    default: Option<&Value>,
    annotation: &Annotation,
) -> Result<OptionSpec, OptionError> {
    let mut spec = match annotation.metadata.split_first() {
        None => OptionSpec::default(),
        Some((Metadata::Option(spec), extra)) => {
            if !extra.is_empty() {
                return Err(OptionError::ExtraMetadata {
                    annotation: annotation.to_string(),
                    extra: extra.iter().map(Metadata::to_string).collect(),
                });
            }
            spec.clone()
        }
        Some((Metadata::Other(_), _)) => {
            return Err(OptionError::NotAnOption {
                annotation: annotation.to_string(),
            });
        }
    };
    spec.validate_flags()?;

    if spec.value_type.is_none() {
        match &annotation.declared {
            DeclaredType::Converter(value_type) => spec.value_type = Some(value_type.clone()),
            DeclaredType::Opaque(_) => {
                return Err(OptionError::NotConvertible {
                    param: param.to_string(),
                    annotation: annotation.to_string(),
                });
            }
        }
    }

    if spec.value_type == Some(ValueType::Bool) {
        let truthy = default.map(Value::is_truthy).unwrap_or(false);
        spec = OptionSpec {
            action: Some(if truthy {
                Action::StoreFalse
            } else {
                Action::StoreTrue
            }),
            value_type: None,
            default: None,
            ..spec
        };
    } else if let Some(default) = default {
        spec.default = Some(default.clone());
    } else {
        spec.required = Some(true);
    }

    if spec.flags.is_none() {
        spec.flags = Some(vec![format!("--{}", param.replace('_', "-"))]);
    }
    if spec.dest.is_none() {
        spec.dest = Some(param.to_string());
    }
    Ok(spec)
}
