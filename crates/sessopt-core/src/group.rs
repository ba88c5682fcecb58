//! Session groups: registration, tagging and dispatch of session bodies.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{AutoTagMode, GroupConfig};
use crate::option::OptionError;
use crate::parser::{GroupParser, ParsedArgs, ParserError};
use crate::signature::{resolve_options, ResolvedOption, Signature};
use crate::tagging::{depth_tags, AutoTag, TagSlot};
use crate::value::Value;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error(transparent)]
    Option(#[from] OptionError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error("Session {0:?} is already defined")]
    DuplicateSession(String),
    #[error("Unknown session {0:?}")]
    UnknownSession(String),
    #[error("No sessions tagged {0:?}")]
    UnknownTag(String),
    #[error("Session {name:?} failed: {source}")]
    Session {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

pub type SessionFn = dyn Fn(&mut SessionContext, &ParsedArgs) -> anyhow::Result<()> + Send + Sync;

/// What a running session body sees besides its parsed arguments.
#[derive(Debug, Clone)]
pub struct SessionContext {
    name: String,
    posargs: Vec<String>,
    messages: Vec<String>,
}

impl SessionContext {
    fn new(name: &str, posargs: &[String]) -> Self {
        Self {
            name: name.to_string(),
            posargs: posargs.to_vec(),
            messages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn posargs(&self) -> &[String] {
        &self.posargs
    }

    pub fn log(&mut self, message: impl fmt::Display) {
        let message = message.to_string();
        info!(session = %self.name, "{message}");
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

/// Declaration of one session: its body, its parameters and how to name it.
pub struct SessionDef {
    function: String,
    name: Option<String>,
    signature: Signature,
    tags: Vec<String>,
    parametrize: Vec<(String, Vec<Value>)>,
    body: Arc<SessionFn>,
}

impl SessionDef {
    /// `function` is the body's identifier; unless a name is given the
    /// session is called after it with `_` replaced by `-`.
    pub fn new<F>(function: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut SessionContext, &ParsedArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            function: function.into(),
            name: None,
            signature: Signature::new(),
            tags: Vec::new(),
            parametrize: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    pub fn param(mut self, param: crate::signature::Param) -> Self {
        self.signature.push(param);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Runs the body once per value, with `param` bound to it. Several
    /// tables multiply.
    pub fn parametrize<I, V>(mut self, param: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.parametrize
            .push((param.into(), values.into_iter().map(Into::into).collect()));
        self
    }
}

impl fmt::Debug for SessionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDef")
            .field("function", &self.function)
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("tags", &self.tags)
            .field("parametrize", &self.parametrize)
            .finish_non_exhaustive()
    }
}

/// A hook that runs before every session whose name starts with one of its
/// prefixes.
pub struct SetupDef {
    function: String,
    signature: Signature,
    body: Arc<SessionFn>,
}

impl SetupDef {
    pub fn new<F>(function: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut SessionContext, &ParsedArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            function: function.into(),
            signature: Signature::new(),
            body: Arc::new(body),
        }
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    pub fn param(mut self, param: crate::signature::Param) -> Self {
        self.signature.push(param);
        self
    }
}

struct Session {
    name: String,
    function: String,
    tags: Vec<String>,
    options: Vec<ResolvedOption>,
    parametrize: Vec<(String, Vec<Value>)>,
    slot: Option<TagSlot>,
    body: Arc<SessionFn>,
}

struct Setup {
    function: String,
    prefixes: Vec<String>,
    options: Vec<ResolvedOption>,
    body: Arc<SessionFn>,
}

impl Setup {
    fn applies_to(&self, session: &str) -> bool {
        self.prefixes.is_empty()
            || self
                .prefixes
                .iter()
                .any(|prefix| session.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub function: String,
    pub tags: Vec<String>,
    pub flags: Vec<String>,
    pub parametrize: Vec<String>,
}

/// A set of sessions sharing one flag table and one tag engine.
pub struct SessionGroup {
    config: GroupConfig,
    parser: GroupParser,
    auto_tag: AutoTag<usize>,
    sessions: Vec<Session>,
    by_name: HashMap<String, usize>,
    setups: Vec<Setup>,
}

impl Default for SessionGroup {
    fn default() -> Self {
        Self::new(GroupConfig::default())
    }
}

impl SessionGroup {
    pub fn new(config: GroupConfig) -> Self {
        let auto_tag = AutoTag::with_separator(config.separator.clone());
        Self {
            config,
            parser: GroupParser::new(),
            auto_tag,
            sessions: Vec::new(),
            by_name: HashMap::new(),
            setups: Vec::new(),
        }
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn parser(&self) -> &GroupParser {
        &self.parser
    }

    /// Registers a session and its command-line options.
    pub fn session(&mut self, def: SessionDef) -> Result<&str, GroupError> {
        let base = def
            .name
            .clone()
            .unwrap_or_else(|| def.function.replace('_', "-"));
        let name = match self.config.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => {
                format!("{prefix}{}{base}", self.config.separator)
            }
            _ => base,
        };
        if self.by_name.contains_key(&name) {
            return Err(GroupError::DuplicateSession(name));
        }

        let bound: HashSet<String> = def
            .parametrize
            .iter()
            .map(|(param, _)| param.clone())
            .collect();
        let options = self.register_options(&def.signature, &bound)?;

        let idx = self.sessions.len();
        let slot = match self.config.auto_tag {
            AutoTagMode::Branching => Some(self.auto_tag.add(&name, idx)),
            AutoTagMode::Off | AutoTagMode::Depth(_) => None,
        };
        debug!(session = %name, options = options.len(), "registered session");

        self.by_name.insert(name.clone(), idx);
        self.sessions.push(Session {
            name,
            function: def.function,
            tags: def.tags,
            options,
            parametrize: def.parametrize,
            slot,
            body: def.body,
        });
        Ok(&self.sessions[idx].name)
    }

    /// Registers a setup hook. An empty prefix list applies it everywhere.
    pub fn setup<I, S>(&mut self, prefixes: I, def: SetupDef) -> Result<(), GroupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = self.register_options(&def.signature, &HashSet::new())?;
        self.setups.push(Setup {
            function: def.function,
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            options,
            body: def.body,
        });
        Ok(())
    }

    fn register_options(
        &mut self,
        signature: &Signature,
        bound: &HashSet<String>,
    ) -> Result<Vec<ResolvedOption>, GroupError> {
        let options = resolve_options(signature, bound, self.config.explicit_options)?;
        self.parser
            .add_options(options.iter().map(|option| option.spec.clone()))?;
        Ok(options)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_names(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|session| session.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<&Session, GroupError> {
        self.by_name
            .get(name)
            .map(|&idx| &self.sessions[idx])
            .ok_or_else(|| GroupError::UnknownSession(name.to_string()))
    }

    /// Declared, group-wide and automatic tags of a session, sorted.
    pub fn tags(&self, name: &str) -> Result<Vec<String>, GroupError> {
        let session = self.lookup(name)?;
        Ok(self.session_tags(session))
    }

    fn session_tags(&self, session: &Session) -> Vec<String> {
        let mut tags: BTreeSet<String> = session.tags.iter().cloned().collect();
        tags.extend(self.config.tags.iter().cloned());
        match self.config.auto_tag {
            AutoTagMode::Off => {}
            AutoTagMode::Branching => {
                if let Some(slot) = session.slot {
                    tags.extend(self.auto_tag.tags(slot).iter().cloned());
                }
            }
            AutoTagMode::Depth(depth) => {
                tags.extend(depth_tags(
                    &session.name,
                    self.config.prefix.as_deref(),
                    depth,
                    &self.config.separator,
                ));
            }
        }
        tags.into_iter().collect()
    }

    /// Sessions carrying `tag`, in declaration order.
    pub fn sessions_with_tag(&self, tag: &str) -> Vec<&str> {
        self.sessions
            .iter()
            .filter(|session| self.session_tags(session).iter().any(|t| t == tag))
            .map(|session| session.name.as_str())
            .collect()
    }

    /// Every tag in use mapped to its sessions.
    pub fn tag_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for session in &self.sessions {
            for tag in self.session_tags(session) {
                index.entry(tag).or_default().push(session.name.clone());
            }
        }
        index
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|session| SessionSummary {
                name: session.name.clone(),
                function: session.function.clone(),
                tags: self.session_tags(session),
                flags: session
                    .options
                    .iter()
                    .filter_map(|option| option.spec.flags.as_ref())
                    .flatten()
                    .cloned()
                    .collect(),
                parametrize: session
                    .parametrize
                    .iter()
                    .map(|(param, _)| param.clone())
                    .collect(),
            })
            .collect()
    }

    /// Parses the session's own options out of `posargs`.
    pub fn parse_args(&self, name: &str, posargs: &[String]) -> Result<ParsedArgs, GroupError> {
        let session = self.lookup(name)?;
        Ok(self.parse_options(&session.name, &session.options, posargs)?)
    }

    fn parse_options(
        &self,
        name: &str,
        options: &[ResolvedOption],
        posargs: &[String],
    ) -> Result<ParsedArgs, ParserError> {
        self.parser
            .parse(name, options.iter().map(|option| &option.spec), posargs)
    }

    /// Runs one session: every argument is parsed before any hook or body
    /// runs, then matching setup hooks and the body run once per
    /// parametrization.
    pub fn run(&self, name: &str, posargs: &[String]) -> Result<(), GroupError> {
        let session = self.lookup(name)?;
        let args = self.parse_options(&session.name, &session.options, posargs)?;
        let setups = self
            .setups
            .iter()
            .filter(|setup| setup.applies_to(&session.name))
            .map(|setup| {
                self.parse_options(&session.name, &setup.options, posargs)
                    .map(|args| (setup, args))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for bound in combinations(&session.parametrize) {
            let mut ctx = SessionContext::new(&session.name, posargs);
            for (setup, setup_args) in &setups {
                debug!(session = %session.name, setup = %setup.function, "running setup");
                (setup.body)(&mut ctx, setup_args).map_err(|err| GroupError::Session {
                    name: session.name.clone(),
                    source: err.into(),
                })?;
            }

            let mut call_args = args.clone();
            for (param, value) in bound {
                call_args.insert(param, value);
            }
            info!(session = %session.name, args = %call_args, "running session");
            (session.body)(&mut ctx, &call_args).map_err(|err| GroupError::Session {
                name: session.name.clone(),
                source: err.into(),
            })?;
        }
        Ok(())
    }

    /// Runs every session tagged `tag` in declaration order, stopping at the
    /// first failure.
    pub fn run_tag(&self, tag: &str, posargs: &[String]) -> Result<Vec<String>, GroupError> {
        let names: Vec<String> = self
            .sessions_with_tag(tag)
            .into_iter()
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(GroupError::UnknownTag(tag.to_string()));
        }
        for name in &names {
            self.run(name, posargs)?;
        }
        Ok(names)
    }
}

impl fmt::Debug for SessionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGroup")
            .field("config", &self.config)
            .field("sessions", &self.session_names().collect::<Vec<_>>())
            .field("options", &self.parser.options().len())
            .field("setups", &self.setups.len())
            .finish()
    }
}

/// Cartesian product of parametrize tables; a single empty binding when
/// there are none.
fn combinations(tables: &[(String, Vec<Value>)]) -> Vec<Vec<(String, Value)>> {
    let mut out: Vec<Vec<(String, Value)>> = vec![Vec::new()];
    for (param, values) in tables {
        let mut next = Vec::with_capacity(out.len() * values.len());
        for prefix in &out {
            for value in values {
                let mut binding = prefix.clone();
                binding.push((param.clone(), value.clone()));
                next.push(binding);
            }
        }
        out = next;
    }
    out
}
