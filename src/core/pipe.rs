//! Pipe descriptor model and builder
//!
//! A pipe is one step of a pipeline. `PipeDescriptor::build` normalizes
//! whatever the caller handed us (a command, a store name, a throttle
//! interval or a keyword) into an immutable descriptor. All shape checks
//! happen here, so a malformed definition never reaches the executor.

use crate::core::error::DefinitionError;
use crate::core::value::Command;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const FN_INPUT: &str = "input";
pub const FN_OUTPUT: &str = "output";
pub const FN_WAIT: &str = "wait";
pub const FN_THROTTLE: &str = "throttle";
pub const FN_ERROR: &str = "error";

/// Synthetic dependency names every scratch store answers to
pub const DEP_NEXT: &str = "next";
pub const DEP_SET: &str = "set";
pub const DEP_ERROR: &str = "error";

/// What a pipe is built from
#[derive(Debug, Clone)]
pub enum Specifier {
    /// An ordinary pipe with a fixed body
    Call(Command),
    /// A keyword, or the name of a command injected from the store
    Named(String),
    /// Throttle gate with the given interval in milliseconds
    Throttle(u64),
}

impl From<Command> for Specifier {
    fn from(cmd: Command) -> Self {
        Specifier::Call(cmd)
    }
}

impl From<&str> for Specifier {
    fn from(name: &str) -> Self {
        Specifier::Named(name.to_string())
    }
}

impl From<String> for Specifier {
    fn from(name: String) -> Self {
        Specifier::Named(name)
    }
}

impl From<u64> for Specifier {
    fn from(ms: u64) -> Self {
        Specifier::Throttle(ms)
    }
}

/// Raw input/output shape as written by the user or in YAML
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Io {
    /// Nothing declared
    #[default]
    #[serde(skip)]
    Empty,
    Name(String),
    Count(u64),
    /// Positional re-mapping: name -> argument index
    Map(BTreeMap<String, usize>),
    List(Vec<IoItem>),
}

/// One entry of an `Io::List`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IoItem {
    Name(String),
    Count(u64),
    Map(BTreeMap<String, usize>),
    Blank,
}

impl Io {
    pub fn is_empty(&self) -> bool {
        matches!(self, Io::Empty)
    }
}

impl From<()> for Io {
    fn from(_: ()) -> Self {
        Io::Empty
    }
}

impl From<&str> for Io {
    fn from(name: &str) -> Self {
        Io::Name(name.to_string())
    }
}

impl From<String> for Io {
    fn from(name: String) -> Self {
        Io::Name(name)
    }
}

impl From<u64> for Io {
    fn from(n: u64) -> Self {
        Io::Count(n)
    }
}

impl From<BTreeMap<String, usize>> for Io {
    fn from(map: BTreeMap<String, usize>) -> Self {
        Io::Map(map)
    }
}

impl From<Vec<IoItem>> for Io {
    fn from(items: Vec<IoItem>) -> Self {
        Io::List(items)
    }
}

impl From<Vec<&str>> for Io {
    fn from(names: Vec<&str>) -> Self {
        Io::List(names.into_iter().map(IoItem::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Io {
    fn from(names: [&str; N]) -> Self {
        Io::List(names.into_iter().map(IoItem::from).collect())
    }
}

impl From<&str> for IoItem {
    fn from(name: &str) -> Self {
        IoItem::Name(name.to_string())
    }
}

impl From<u64> for IoItem {
    fn from(n: u64) -> Self {
        IoItem::Count(n)
    }
}

/// Where a pipe input comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSlot {
    /// Positional call argument at the same index
    Positional,
    /// Scratch-store lookup
    Named(String),
    /// Data object assembled from positional arguments
    Remap(BTreeMap<String, usize>),
}

impl InputSlot {
    pub fn name(&self) -> Option<&str> {
        match self {
            InputSlot::Named(name) => Some(name),
            _ => None,
        }
    }
}

/// Where a declared output is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Same,
    Renamed(String),
    /// Target key is read from the scratch store under this name
    Dynamic(String),
}

/// One parsed output declaration, e.g. `result:$target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputName {
    /// The entry exactly as declared; fulfillment is counted against it
    pub declared: String,
    /// Name the pipe writes
    pub key: String,
    pub target: OutputTarget,
}

impl OutputName {
    pub fn parse(entry: &str) -> Result<Self, DefinitionError> {
        if entry.is_empty() {
            return Err(DefinitionError::MalformedOutput("empty output name".to_string()));
        }

        let Some((key, renamed)) = entry.split_once(':') else {
            return Ok(Self {
                declared: entry.to_string(),
                key: entry.to_string(),
                target: OutputTarget::Same,
            });
        };

        if key.is_empty() || renamed.is_empty() || renamed.contains(':') {
            return Err(DefinitionError::MalformedOutput(format!(
                "\"{}\" should look like `original:renamed`",
                entry
            )));
        }

        let target = match renamed.strip_prefix('$') {
            Some("") => {
                return Err(DefinitionError::MalformedOutput(format!(
                    "\"{}\" has an empty dynamic key",
                    entry
                )))
            }
            Some(dynamic) => OutputTarget::Dynamic(dynamic.to_string()),
            None => OutputTarget::Renamed(renamed.to_string()),
        };

        Ok(Self {
            declared: entry.to_string(),
            key: key.to_string(),
            target,
        })
    }
}

/// Classification of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeKind {
    Step,
    Injected,
    Input,
    Output,
    Wait,
    Throttle,
    ErrorHandler,
}

/// Throttle state; shared by every invocation of the owning pipeline
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    interval: Duration,
    last_permitted: Arc<Mutex<Option<Instant>>>,
}

impl ThrottleGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_permitted: Arc::new(Mutex::new(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Permit when at least `interval` has passed since the last permit
    pub fn permit(&self) -> bool {
        self.permit_at(Instant::now())
    }

    fn permit_at(&self, now: Instant) -> bool {
        let mut last = self
            .last_permitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.saturating_duration_since(at) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Error handler body
#[derive(Debug, Clone)]
pub(crate) enum Handler {
    Call(Command),
    Named(String),
}

#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    Call(Command),
    Injected,
    Input(Vec<String>),
    Output(Vec<OutputName>),
    Wait(Duration),
    Throttle(ThrottleGate),
    ErrorHandler(Handler),
}

/// Immutable, normalized definition of one pipe
#[derive(Debug, Clone)]
pub struct PipeDescriptor {
    pub(crate) behavior: Behavior,
    kind: PipeKind,
    name: String,
    inputs: Vec<InputSlot>,
    outputs: Vec<OutputName>,
    auto_advance: bool,
    negate: bool,
    optional: bool,
}

impl PipeDescriptor {
    /// Normalize a pipe definition
    pub fn build(
        specifier: impl Into<Specifier>,
        input: impl Into<Io>,
        output: impl Into<Io>,
    ) -> Result<Self, DefinitionError> {
        let input = input.into();
        let output = output.into();

        match specifier.into() {
            Specifier::Call(cmd) => Self::call(cmd, input, output),
            Specifier::Throttle(ms) => Ok(Self::throttle(Duration::from_millis(ms))),
            Specifier::Named(name) => match name.as_str() {
                FN_INPUT => Self::input(require(FN_INPUT, input)?),
                FN_OUTPUT => Self::output(require(FN_OUTPUT, input)?),
                FN_WAIT => Ok(Self::wait(millis(FN_WAIT, require(FN_WAIT, input)?)?)),
                FN_THROTTLE => Ok(Self::throttle(millis(
                    FN_THROTTLE,
                    require(FN_THROTTLE, input)?,
                )?)),
                // `error` takes the handler as its input and the handler's inputs as output
                FN_ERROR => match require(FN_ERROR, input)? {
                    Io::Name(handler) => Self::error_handler(Specifier::Named(handler), output),
                    _ => Err(DefinitionError::ExpectedNames(FN_ERROR.to_string())),
                },
                _ => Self::injected(&name, input, output),
            },
        }
    }

    /// Build the designated error handler of a pipeline
    pub fn error_handler(
        handler: impl Into<Specifier>,
        input: impl Into<Io>,
    ) -> Result<Self, DefinitionError> {
        let (handler, name) = match handler.into() {
            Specifier::Call(cmd) => {
                let name = cmd.name().to_string();
                (Handler::Call(cmd), name)
            }
            Specifier::Named(name) if !name.is_empty() => (Handler::Named(name.clone()), name),
            Specifier::Named(name) => return Err(DefinitionError::UnsupportedSpecifier(name)),
            Specifier::Throttle(ms) => {
                return Err(DefinitionError::UnsupportedSpecifier(ms.to_string()))
            }
        };

        let input = match input.into() {
            Io::Empty => Io::Name(DEP_ERROR.to_string()),
            io => io,
        };
        let inputs = names(FN_ERROR, input)?
            .into_iter()
            .map(InputSlot::Named)
            .collect::<Vec<_>>();

        Ok(Self {
            behavior: Behavior::ErrorHandler(handler),
            kind: PipeKind::ErrorHandler,
            name,
            auto_advance: !requests_next(&inputs),
            inputs,
            outputs: Vec::new(),
            negate: false,
            optional: false,
        })
    }

    fn call(cmd: Command, input: Io, output: Io) -> Result<Self, DefinitionError> {
        let inputs = normalize_input(input)?;
        let outputs = normalize_output(output)?;
        Ok(Self {
            name: cmd.name().to_string(),
            behavior: Behavior::Call(cmd),
            kind: PipeKind::Step,
            auto_advance: !requests_next(&inputs),
            inputs,
            outputs,
            negate: false,
            optional: false,
        })
    }

    fn injected(name: &str, input: Io, output: Io) -> Result<Self, DefinitionError> {
        let (negate, rest) = match name.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        let (optional, resolved) = match rest.strip_suffix('?') {
            Some(resolved) => (true, resolved),
            None => (false, rest),
        };

        if resolved.is_empty() {
            return Err(DefinitionError::UnsupportedSpecifier(name.to_string()));
        }

        let inputs = normalize_input(input)?;
        let outputs = normalize_output(output)?;
        Ok(Self {
            behavior: Behavior::Injected,
            kind: PipeKind::Injected,
            name: resolved.to_string(),
            auto_advance: !requests_next(&inputs),
            inputs,
            outputs,
            negate,
            optional,
        })
    }

    fn input(input: Io) -> Result<Self, DefinitionError> {
        Ok(Self::keyword(
            PipeKind::Input,
            Behavior::Input(names(FN_INPUT, input)?),
        ))
    }

    fn output(input: Io) -> Result<Self, DefinitionError> {
        let mappings = names(FN_OUTPUT, input)?
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| OutputName::parse(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::keyword(PipeKind::Output, Behavior::Output(mappings)))
    }

    fn wait(delay: Duration) -> Self {
        let mut pipe = Self::keyword(PipeKind::Wait, Behavior::Wait(delay));
        pipe.inputs = vec![InputSlot::Named(DEP_NEXT.to_string())];
        pipe.auto_advance = false;
        pipe
    }

    fn throttle(interval: Duration) -> Self {
        Self::keyword(PipeKind::Throttle, Behavior::Throttle(ThrottleGate::new(interval)))
    }

    fn keyword(kind: PipeKind, behavior: Behavior) -> Self {
        let name = match kind {
            PipeKind::Input => FN_INPUT,
            PipeKind::Output => FN_OUTPUT,
            PipeKind::Wait => FN_WAIT,
            PipeKind::Throttle => FN_THROTTLE,
            _ => FN_ERROR,
        };
        Self {
            behavior,
            kind,
            name: name.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            auto_advance: true,
            negate: false,
            optional: false,
        }
    }

    pub fn kind(&self) -> PipeKind {
        self.kind
    }

    /// Name used for injection and diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputName] {
        &self.outputs
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    pub fn negate(&self) -> bool {
        self.negate
    }

    pub fn optional(&self) -> bool {
        self.optional
    }

    pub fn is_injected(&self) -> bool {
        self.kind == PipeKind::Injected
    }

    /// Declared output a write to `key` fulfills, if any
    pub fn output_for(&self, key: &str) -> Option<&OutputName> {
        self.outputs.iter().find(|o| o.key == key)
    }
}

fn requests_next(inputs: &[InputSlot]) -> bool {
    inputs.iter().any(|slot| slot.name() == Some(DEP_NEXT))
}

fn require(kind: &str, io: Io) -> Result<Io, DefinitionError> {
    match io {
        Io::Empty => Err(DefinitionError::MissingInput(kind.to_string())),
        io => Ok(io),
    }
}

fn millis(kind: &str, io: Io) -> Result<Duration, DefinitionError> {
    match io {
        Io::Count(ms) => Ok(Duration::from_millis(ms)),
        _ => Err(DefinitionError::ExpectedMillis(kind.to_string())),
    }
}

fn names(kind: &str, io: Io) -> Result<Vec<String>, DefinitionError> {
    match io {
        Io::Name(name) => Ok(vec![name]),
        Io::List(items) => items
            .into_iter()
            .map(|item| match item {
                IoItem::Name(name) => Ok(name),
                _ => Err(DefinitionError::ExpectedNames(kind.to_string())),
            })
            .collect(),
        _ => Err(DefinitionError::ExpectedNames(kind.to_string())),
    }
}

fn slot_for(name: String) -> InputSlot {
    if name.is_empty() {
        InputSlot::Positional
    } else {
        InputSlot::Named(name)
    }
}

/// Largest positional count an input may skip
const MAX_POSITIONAL: u64 = u16::MAX as u64;

fn positional_count(n: u64) -> Result<usize, DefinitionError> {
    usize::try_from(n)
        .ok()
        .filter(|_| n <= MAX_POSITIONAL)
        .ok_or_else(|| {
            DefinitionError::MalformedInput(format!(
                "count {} exceeds the limit of {}",
                n, MAX_POSITIONAL
            ))
        })
}

fn normalize_input(io: Io) -> Result<Vec<InputSlot>, DefinitionError> {
    let slots = match io {
        Io::Empty => Vec::new(),
        Io::Name(name) => vec![slot_for(name)],
        Io::Count(n) => vec![InputSlot::Positional; positional_count(n)?],
        Io::Map(map) => vec![InputSlot::Remap(map)],
        Io::List(items) => {
            let mut slots = Vec::with_capacity(items.len());
            for (idx, item) in items.into_iter().enumerate() {
                match item {
                    // A leading count skips that many positional arguments
                    IoItem::Count(n) if idx == 0 => {
                        let n = positional_count(n)?;
                        slots.extend(std::iter::repeat(InputSlot::Positional).take(n))
                    }
                    IoItem::Count(n) => {
                        return Err(DefinitionError::MalformedInput(format!(
                            "count {} is only allowed as the first item",
                            n
                        )))
                    }
                    IoItem::Name(name) => slots.push(slot_for(name)),
                    IoItem::Map(map) => slots.push(InputSlot::Remap(map)),
                    IoItem::Blank => slots.push(InputSlot::Positional),
                }
            }
            slots
        }
    };
    Ok(slots)
}

fn normalize_output(io: Io) -> Result<Vec<OutputName>, DefinitionError> {
    match io {
        Io::Empty => Ok(Vec::new()),
        Io::Name(name) => Ok(vec![OutputName::parse(&name)?]),
        Io::List(items) => items
            .into_iter()
            .map(|item| match item {
                IoItem::Name(name) => OutputName::parse(&name),
                other => Err(DefinitionError::MalformedOutput(format!(
                    "expected an output name, got {:?}",
                    other
                ))),
            })
            .collect(),
        other => Err(DefinitionError::MalformedOutput(format!(
            "should be either a name or a list of names, got {:?}",
            other
        ))),
    }
}
