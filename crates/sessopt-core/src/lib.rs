//! Core types for sessopt: typed session options, a shared flag table and
//! automatic tagging of sessions by name.

pub mod config;
pub mod group;
pub mod manifest;
pub mod option;
pub mod parser;
pub mod signature;
pub mod tagging;
pub mod value;

pub use config::{AutoTagMode, ConfigError, GroupConfig};
pub use group::{GroupError, SessionContext, SessionDef, SessionGroup, SetupDef};
pub use option::{Action, OptionError, OptionSpec};
pub use parser::{GroupParser, ParsedArgs, ParserError};
pub use signature::{Annotation, Param, ParamKind, Signature};
pub use tagging::AutoTag;
pub use value::{Value, ValueType};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
