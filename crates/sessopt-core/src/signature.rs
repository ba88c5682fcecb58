//! Declared parameters of session bodies.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::option::{resolve, OptionError, OptionSpec};
use crate::value::{Value, ValueType};

/// The declared type of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclaredType {
    /// A type that can convert one raw string.
    Converter(ValueType),
    /// A type that cannot; it needs an explicit option type.
    Opaque(String),
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Converter(value_type) => write!(f, "{value_type}"),
            DeclaredType::Opaque(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    Option(OptionSpec),
    Other(String),
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metadata::Option(spec) => write!(f, "{spec}"),
            Metadata::Other(text) => write!(f, "{text:?}"),
        }
    }
}

/// A parameter's type plus whatever metadata was attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub declared: DeclaredType,
    pub metadata: Vec<Metadata>,
}

impl Annotation {
    pub fn of(value_type: ValueType) -> Self {
        Self {
            declared: DeclaredType::Converter(value_type),
            metadata: Vec::new(),
        }
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        Self {
            declared: DeclaredType::Opaque(name.into()),
            metadata: Vec::new(),
        }
    }

    pub fn with_option(self, spec: OptionSpec) -> Self {
        self.with_metadata(Metadata::Option(spec))
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.push(metadata);
        self
    }

    pub fn has_option(&self) -> bool {
        matches!(self.metadata.first(), Some(Metadata::Option(_)))
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.metadata.is_empty() {
            return write!(f, "{}", self.declared);
        }
        write!(f, "Annotated[{}", self.declared)?;
        for metadata in &self.metadata {
            write!(f, ", {metadata}")?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    #[default]
    Keyword,
    VarPositional,
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Value>,
    pub annotation: Annotation,
}

impl Param {
    pub fn new(name: impl Into<String>, annotation: Annotation) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Keyword,
            default: None,
            annotation,
        }
    }

    pub fn typed(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, Annotation::of(value_type))
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Ordered parameters of a session body, not counting the session context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn push(&mut self, param: Param) {
        self.params.push(param);
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOption {
    pub param: String,
    pub spec: OptionSpec,
}

/// Resolves every command-line parameter of `signature`.
///
/// Parameters in `bound` are supplied by the caller (parametrization) and
/// skipped. With `explicit_only` set, only parameters carrying an
/// [`OptionSpec`] in their metadata become options.
pub fn resolve_options(
    signature: &Signature,
    bound: &HashSet<String>,
    explicit_only: bool,
) -> Result<Vec<ResolvedOption>, OptionError> {
    let params: Vec<&Param> = signature
        .params()
        .iter()
        .filter(|param| !bound.contains(&param.name))
        .collect();

    let non_keyword: Vec<String> = params
        .iter()
        .filter(|param| param.kind != ParamKind::Keyword)
        .map(|param| param.name.clone())
        .collect();
    if !non_keyword.is_empty() {
        return Err(OptionError::NonKeywordParams(non_keyword));
    }

    params
        .into_iter()
        .filter(|param| !explicit_only || param.annotation.has_option())
        .map(|param| {
            let spec = resolve(&param.name, param.default.as_ref(), &param.annotation)?;
            Ok(ResolvedOption {
                param: param.name.clone(),
                spec,
            })
        })
        .collect()
}
