//! The flag table shared by every session of a group.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use clap::builder::PossibleValuesParser;
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::option::{Action, OptionError, OptionSpec};
use crate::value::{Value, ValueType};

const HELP_ID: &str = "help";

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Conflicting session options:\nnew:      {new}\nexisting: {existing}")]
    Conflict {
        new: Box<OptionSpec>,
        existing: Box<OptionSpec>,
    },
    #[error("Unsupported flag {0:?}: use -x or --long-name")]
    UnsupportedFlag(String),
    #[error(transparent)]
    Option(#[from] OptionError),
    #[error("{0}")]
    Help(String),
    #[error("{0}")]
    Clap(#[from] clap::Error),
    #[error("argument {flag}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },
}

/// Values parsed for one session, keyed by destination name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParsedArgs {
    values: BTreeMap<String, Value>,
}

impl ParsedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_float)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl fmt::Display for ParsedArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (name, value)) in self.values.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Registry of flag → option plus the `clap` command built from it.
#[derive(Debug, Clone, Default)]
pub struct GroupParser {
    specs: Vec<OptionSpec>,
    by_flag: HashMap<String, usize>,
}

impl GroupParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self) -> &[OptionSpec] {
        &self.specs
    }

    pub fn option_for_flag(&self, flag: &str) -> Option<&OptionSpec> {
        self.by_flag.get(flag).map(|&idx| &self.specs[idx])
    }

    /// Registers `spec` under each of its flags.
    ///
    /// Returns `false` when an identical spec was already registered. A flag
    /// already bound to a different spec is a conflict and nothing is
    /// registered.
    pub fn add_option(&mut self, spec: OptionSpec) -> Result<bool, ParserError> {
        spec.validate_flags()?;
        let flags = spec.flags.clone().ok_or(OptionError::EmptyFlags)?;
        for flag in &flags {
            check_flag_syntax(flag)?;
        }

        let mut already_exists = false;
        for flag in &flags {
            if let Some(existing) = self.option_for_flag(flag) {
                if *existing != spec {
                    return Err(ParserError::Conflict {
                        new: Box::new(spec),
                        existing: Box::new(existing.clone()),
                    });
                }
                already_exists = true;
            }
        }
        if already_exists {
            return Ok(false);
        }

        debug!(flags = ?flags, "registering option");
        let idx = self.specs.len();
        for flag in flags {
            self.by_flag.insert(flag, idx);
        }
        self.specs.push(spec);
        Ok(true)
    }

    /// Registers several specs at once: either all of them are added or,
    /// on the first conflict, none are.
    pub fn add_options<I>(&mut self, specs: I) -> Result<usize, ParserError>
    where
        I: IntoIterator<Item = OptionSpec>,
    {
        let mut staged = self.clone();
        let mut added = 0;
        for spec in specs {
            if staged.add_option(spec)? {
                added += 1;
            }
        }
        *self = staged;
        Ok(added)
    }

    /// Builds the command for one session. Every registered option is
    /// accepted, but only the session's own options may be required.
    pub fn command(&self, name: &str, own: &HashSet<&str>) -> Command {
        let mut command = Command::new(name.to_string())
            .no_binary_name(true)
            .disable_help_flag(true)
            .args_override_self(true);

        for spec in &self.specs {
            let Some(id) = spec.primary_flag() else {
                continue;
            };
            let required = spec.is_required() && own.contains(id);
            command = command.arg(to_arg(id, spec, required));
        }

        if !self.by_flag.contains_key("--help") {
            let mut help = Arg::new(HELP_ID)
                .long("help")
                .action(ArgAction::Help)
                .help("Print help");
            if !self.by_flag.contains_key("-h") {
                help = help.short('h');
            }
            command = command.arg(help);
        }
        command
    }

    /// Parses `posargs` and returns the values of `own` options.
    pub fn parse<'a, I>(
        &self,
        name: &str,
        own: I,
        posargs: &[String],
    ) -> Result<ParsedArgs, ParserError>
    where
        I: IntoIterator<Item = &'a OptionSpec>,
    {
        let own: HashSet<&str> = own
            .into_iter()
            .filter_map(OptionSpec::primary_flag)
            .collect();
        let matches = self
            .command(name, &own)
            .try_get_matches_from(posargs)
            .map_err(|err| match err.kind() {
                ErrorKind::DisplayHelp => ParserError::Help(err.render().to_string()),
                _ => ParserError::Clap(err),
            })?;

        let mut parsed = ParsedArgs::new();
        for spec in &self.specs {
            let Some(id) = spec.primary_flag() else {
                continue;
            };
            if !own.contains(id) {
                continue;
            }
            if let Some(value) = extract(id, spec, &matches)? {
                parsed.insert(dest_name(spec), value);
            }
        }
        Ok(parsed)
    }
}

/// Destination of a spec: its `dest`, else its first long flag, else its
/// first flag, without dashes.
pub fn dest_name(spec: &OptionSpec) -> String {
    if let Some(dest) = &spec.dest {
        return dest.clone();
    }
    let flags = spec.flags.as_deref().unwrap_or_default();
    let flag = flags
        .iter()
        .find(|flag| flag.starts_with("--"))
        .or_else(|| flags.first())
        .map(String::as_str)
        .unwrap_or_default();
    flag.trim_start_matches('-').replace('-', "_")
}

fn check_flag_syntax(flag: &str) -> Result<(), ParserError> {
    let valid = match flag.strip_prefix("--") {
        Some(long) => !long.is_empty() && !long.starts_with('-'),
        None => {
            let mut chars = flag.chars().skip(1);
            matches!((chars.next(), chars.next()), (Some(c), None) if c != '-')
        }
    };
    if valid {
        Ok(())
    } else {
        Err(ParserError::UnsupportedFlag(flag.to_string()))
    }
}

fn to_arg(id: &str, spec: &OptionSpec, required: bool) -> Arg {
    let action = spec.effective_action();
    let mut arg = Arg::new(id.to_string()).required(required);

    let mut has_long = false;
    let mut has_short = false;
    for flag in spec.flags.iter().flatten() {
        if let Some(long) = flag.strip_prefix("--") {
            arg = if has_long {
                arg.visible_alias(long.to_string())
            } else {
                arg.long(long.to_string())
            };
            has_long = true;
        } else if let Some(short) = flag.chars().nth(1) {
            arg = if has_short {
                arg.visible_short_alias(short)
            } else {
                arg.short(short)
            };
            has_short = true;
        }
    }

    arg = match action {
        Action::Store => arg.action(ArgAction::Set),
        Action::Append => arg.action(ArgAction::Append),
        Action::StoreTrue => arg.action(ArgAction::SetTrue),
        Action::StoreFalse => arg.action(ArgAction::SetFalse),
        Action::Count => arg.action(ArgAction::Count),
    };

    if action.takes_value() {
        let value_name = spec
            .metavar
            .clone()
            .unwrap_or_else(|| dest_name(spec).to_uppercase());
        arg = arg
            .num_args(1)
            .value_name(value_name)
            .allow_negative_numbers(true);
        arg = match &spec.choices {
            Some(choices) => arg.value_parser(PossibleValuesParser::new(choices.clone())),
            None => arg.value_parser(clap::value_parser!(String)),
        };
    }

    if let Some(help) = &spec.help {
        arg = arg.help(help.clone());
    }
    arg
}

fn convert(flag: &str, spec: &OptionSpec, raw: &str) -> Result<Value, ParserError> {
    spec.value_type
        .as_ref()
        .unwrap_or(&ValueType::Str)
        .convert(raw)
        .map_err(|reason| ParserError::InvalidValue {
            flag: flag.to_string(),
            value: raw.to_string(),
            reason,
        })
}

fn extract(
    id: &str,
    spec: &OptionSpec,
    matches: &ArgMatches,
) -> Result<Option<Value>, ParserError> {
    let value = match spec.effective_action() {
        Action::StoreTrue | Action::StoreFalse => Some(Value::Bool(matches.get_flag(id))),
        Action::Count => match matches.get_count(id) {
            0 => spec.default.clone().or(Some(Value::Int(0))),
            count => Some(Value::Int(i64::from(count))),
        },
        Action::Append => match matches.get_many::<String>(id) {
            Some(raws) => Some(Value::List(
                raws.map(|raw| convert(id, spec, raw))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            None => spec.default.clone(),
        },
        Action::Store => match matches.get_one::<String>(id) {
            Some(raw) => Some(convert(id, spec, raw)?),
            None => spec.default.clone(),
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    fn number() -> OptionSpec {
        OptionSpec::new()
            .flag("--number")
            .dest("number")
            .default_value(0)
            .value_type(ValueType::Int)
    }

    #[test]
    fn identical_options_are_deduplicated() {
        let mut parser = GroupParser::new();
        assert!(parser.add_option(number()).expect("first"));
        assert!(!parser.add_option(number()).expect("second"));
        assert_eq!(parser.options().len(), 1);
    }

    #[test]
    fn different_options_on_one_flag_conflict() {
        let mut parser = GroupParser::new();
        parser.add_option(number()).expect("first");
        let err = parser
            .add_option(number().help("different"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Conflicting session options"));
        assert!(message.contains("help=\"different\""));
        assert_eq!(parser.options().len(), 1);
    }

    #[test]
    fn conflict_on_secondary_flag_registers_nothing() {
        let mut parser = GroupParser::new();
        parser
            .add_option(OptionSpec::new().flag("--verbose").action(Action::StoreTrue))
            .expect("verbose");
        let err = parser
            .add_option(
                OptionSpec::new()
                    .flags(["-V", "--verbose"])
                    .action(Action::Count),
            )
            .unwrap_err();
        assert!(matches!(err, ParserError::Conflict { .. }));
        assert!(parser.option_for_flag("-V").is_none());
    }

    #[test]
    fn batch_with_a_conflict_registers_nothing() {
        let mut parser = GroupParser::new();
        parser.add_option(number()).expect("number");
        let err = parser
            .add_options([
                OptionSpec::new().flag("--fresh").action(Action::StoreTrue),
                number().help("different"),
            ])
            .unwrap_err();
        assert!(matches!(err, ParserError::Conflict { .. }));
        assert!(parser.option_for_flag("--fresh").is_none());
        assert_eq!(parser.options().len(), 1);

        let added = parser
            .add_options([number(), OptionSpec::new().flag("--fresh").action(Action::StoreTrue)])
            .expect("batch");
        assert_eq!(added, 1);
        assert!(parser.option_for_flag("--fresh").is_some());
    }

    #[test]
    fn unsupported_flag_shapes_are_rejected() {
        let mut parser = GroupParser::new();
        for flag in ["-long", "---x", "--", "-"] {
            let err = parser.add_option(OptionSpec::new().flag(flag)).unwrap_err();
            assert!(matches!(err, ParserError::UnsupportedFlag(_)), "{flag}");
        }
    }

    #[test]
    fn parses_typed_values_and_defaults() {
        let mut parser = GroupParser::new();
        let spec = number();
        parser.add_option(spec.clone()).expect("add");

        let parsed = parser.parse("demo", [&spec], &[]).expect("parse");
        assert_eq!(parsed.get_int("number"), Some(0));

        let parsed = parser
            .parse("demo", [&spec], &args(&["--number", "-3"]))
            .expect("parse");
        assert_eq!(parsed.get_int("number"), Some(-3));
    }

    #[test]
    fn repeated_flags_keep_the_last_value() {
        let mut parser = GroupParser::new();
        let count = number();
        let fix = OptionSpec::new().flag("--fix").action(Action::StoreTrue);
        parser.add_option(count.clone()).expect("number");
        parser.add_option(fix.clone()).expect("fix");

        let parsed = parser
            .parse(
                "demo",
                [&count, &fix],
                &args(&["--number", "1", "--fix", "--number", "2", "--fix"]),
            )
            .expect("parse");
        assert_eq!(parsed.get_int("number"), Some(2));
        assert_eq!(parsed.get_bool("fix"), Some(true));
    }

    #[test]
    fn invalid_values_report_the_flag() {
        let mut parser = GroupParser::new();
        let spec = number();
        parser.add_option(spec.clone()).expect("add");
        let err = parser
            .parse("demo", [&spec], &args(&["--number", "four"]))
            .unwrap_err();
        match err {
            ParserError::InvalidValue { flag, value, .. } => {
                assert_eq!(flag, "--number");
                assert_eq!(value, "four");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_required_option_names_the_flag() {
        let mut parser = GroupParser::new();
        let spec = OptionSpec::new()
            .flag("--python")
            .dest("python")
            .required(true)
            .value_type(ValueType::Str);
        parser.add_option(spec.clone()).expect("add");
        let err = parser.parse("demo", [&spec], &[]).unwrap_err();
        assert!(matches!(err, ParserError::Clap(_)));
        assert!(err.to_string().contains("--python"));
    }

    #[test]
    fn other_sessions_required_options_are_optional() {
        let mut parser = GroupParser::new();
        let mine = number();
        let theirs = OptionSpec::new()
            .flag("--python")
            .dest("python")
            .required(true)
            .value_type(ValueType::Str);
        parser.add_option(mine.clone()).expect("mine");
        parser.add_option(theirs).expect("theirs");

        let parsed = parser
            .parse("demo", [&mine], &args(&["--python", "3.12"]))
            .expect("parse");
        assert_eq!(parsed.get_int("number"), Some(0));
        assert!(!parsed.contains("python"));
    }

    #[test]
    fn flags_actions_produce_bools_counts_and_lists() {
        let mut parser = GroupParser::new();
        let fix = OptionSpec::new().flag("--fix").action(Action::StoreTrue);
        let color = OptionSpec::new().flag("--color").action(Action::StoreFalse);
        let verbose = OptionSpec::new().flags(["-v", "--verbose"]).action(Action::Count);
        let only = OptionSpec::new()
            .flag("--only")
            .action(Action::Append)
            .value_type(ValueType::Int);
        for spec in [&fix, &color, &verbose, &only] {
            parser.add_option(spec.clone()).expect("add");
        }

        let parsed = parser
            .parse(
                "demo",
                [&fix, &color, &verbose, &only],
                &args(&["--fix", "-v", "-v", "--only", "1", "--only", "2"]),
            )
            .expect("parse");
        assert_eq!(parsed.get_bool("fix"), Some(true));
        assert_eq!(parsed.get_bool("color"), Some(true));
        assert_eq!(parsed.get_int("verbose"), Some(2));
        assert_eq!(
            parsed.get("only"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2)]))
        );

        let parsed = parser
            .parse("demo", [&fix, &color, &verbose, &only], &args(&["--color"]))
            .expect("parse");
        assert_eq!(parsed.get_bool("fix"), Some(false));
        assert_eq!(parsed.get_bool("color"), Some(false));
        assert_eq!(parsed.get_int("verbose"), Some(0));
        assert!(!parsed.contains("only"));
    }

    #[test]
    fn choices_are_enforced() {
        let mut parser = GroupParser::new();
        let spec = OptionSpec::new()
            .flag("--mode")
            .choices(["fast", "slow"])
            .default_value("fast");
        parser.add_option(spec.clone()).expect("add");
        let parsed = parser
            .parse("demo", [&spec], &args(&["--mode", "slow"]))
            .expect("parse");
        assert_eq!(parsed.get_str("mode"), Some("slow"));
        assert!(parser
            .parse("demo", [&spec], &args(&["--mode", "other"]))
            .is_err());
    }

    #[test]
    fn help_is_reported_separately() {
        let mut parser = GroupParser::new();
        let spec = number().help("how many things");
        parser.add_option(spec.clone()).expect("add");
        let err = parser.parse("demo", [&spec], &args(&["--help"])).unwrap_err();
        match err {
            ParserError::Help(text) => assert!(text.contains("how many things")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dest_falls_back_to_long_flag() {
        let spec = OptionSpec::new().flags(["-p", "--python-version"]);
        assert_eq!(dest_name(&spec), "python_version");
        let spec = OptionSpec::new().flag("-p");
        assert_eq!(dest_name(&spec), "p");
    }
}
