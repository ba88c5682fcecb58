//! Declarative session definitions read from `sessopt.toml`.

use serde::Deserialize;

use crate::config::{ConfigError, GroupConfig};
use crate::group::{SessionDef, SessionGroup, SetupDef};
use crate::option::{Action, OptionSpec};
use crate::signature::{Annotation, Metadata, Param, ParamKind, Signature};
use crate::value::{Value, ValueType};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub group: GroupConfig,
    #[serde(default, rename = "setup")]
    pub setups: Vec<SetupEntry>,
    #[serde(default, rename = "session")]
    pub sessions: Vec<SessionEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionEntry {
    pub name: Option<String>,
    pub function: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Kept in declaration order; the first table varies slowest.
    #[serde(default)]
    pub parametrize: toml::Table,
    #[serde(default, rename = "param")]
    pub params: Vec<ParamEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupEntry {
    pub function: Option<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default, rename = "param")]
    pub params: Vec<ParamEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamEntry {
    pub name: String,
    #[serde(rename = "type", default = "default_type_name")]
    pub type_name: String,
    pub default: Option<Value>,
    #[serde(default)]
    pub kind: ParamKind,
    pub option: Option<OptionEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionEntry {
    pub flags: Option<Vec<String>>,
    pub action: Option<Action>,
    pub choices: Option<Vec<String>>,
    pub default: Option<Value>,
    pub dest: Option<String>,
    pub help: Option<String>,
    pub metavar: Option<String>,
    pub required: Option<bool>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub extra_metadata: Vec<String>,
}

fn default_type_name() -> String {
    "str".to_string()
}

impl OptionEntry {
    fn to_spec(&self, param: &str) -> Result<OptionSpec, ConfigError> {
        let value_type = match self.type_name.as_deref() {
            None => None,
            Some(name) => Some(ValueType::from_name(name).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "parameter {param:?}: unknown option type {name:?}"
                ))
            })?),
        };
        Ok(OptionSpec {
            flags: self.flags.clone(),
            action: self.action,
            choices: self.choices.clone(),
            default: self.default.clone(),
            dest: self.dest.clone(),
            help: self.help.clone(),
            metavar: self.metavar.clone(),
            required: self.required,
            value_type,
        })
    }
}

impl ParamEntry {
    pub fn to_param(&self) -> Result<Param, ConfigError> {
        let mut annotation = match ValueType::from_name(&self.type_name) {
            Some(value_type) => Annotation::of(value_type),
            None => Annotation::opaque(self.type_name.clone()),
        };
        if let Some(option) = &self.option {
            annotation = annotation.with_option(option.to_spec(&self.name)?);
            for extra in &option.extra_metadata {
                annotation = annotation.with_metadata(Metadata::Other(extra.clone()));
            }
        }
        let mut param = Param::new(self.name.clone(), annotation).kind(self.kind);
        param.default = self.default.clone();
        Ok(param)
    }
}

fn signature_of(params: &[ParamEntry]) -> Result<Signature, ConfigError> {
    let mut signature = Signature::new();
    for entry in params {
        signature.push(entry.to_param()?);
    }
    Ok(signature)
}

impl Manifest {
    /// Builds a group whose session bodies only log the values they receive.
    pub fn build_group(&self) -> Result<SessionGroup, ConfigError> {
        let mut group = SessionGroup::new(self.group.clone());

        for (idx, entry) in self.setups.iter().enumerate() {
            let function = entry
                .function
                .clone()
                .unwrap_or_else(|| format!("setup_{idx}"));
            let def = SetupDef::new(function, |ctx, args| {
                ctx.log(format_args!("setup {args}"));
                Ok(())
            })
            .signature(signature_of(&entry.params)?);
            group.setup(entry.prefixes.iter().cloned(), def)?;
        }

        for (idx, entry) in self.sessions.iter().enumerate() {
            let function = match (&entry.function, &entry.name) {
                (Some(function), _) => function.clone(),
                (None, Some(name)) => name.replace('-', "_"),
                (None, None) => {
                    return Err(ConfigError::Invalid(format!(
                        "session #{} needs a name or a function",
                        idx + 1
                    )))
                }
            };
            let mut def = SessionDef::new(function, |ctx, args| {
                ctx.log(args);
                Ok(())
            })
            .signature(signature_of(&entry.params)?);
            if let Some(name) = &entry.name {
                def = def.name(name.clone());
            }
            for tag in &entry.tags {
                def = def.tag(tag.clone());
            }
            for (param, values) in &entry.parametrize {
                let values = values.clone().try_into::<Vec<Value>>().map_err(|err| {
                    ConfigError::Invalid(format!(
                        "session #{}: parametrize {param:?} must be a list of values ({err})",
                        idx + 1
                    ))
                })?;
                def = def.parametrize(param.clone(), values);
            }
            group.session(def)?;
        }
        Ok(group)
    }
}
