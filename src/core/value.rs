//! Values flowing through stores and pipes
//!
//! A store slot holds either plain data, a callable command, or one of the
//! two synthetic handles a running pipe can ask for (`next` and `set`).
//! Booleans are plain data but double as flow-control flags when a pipe
//! resolves them by name.

use crate::core::error::PipelineError;
use crate::execution::{Next, Setter};
use serde::{Serialize, Serializer};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Key/value map used for store snapshots and batched writes
pub type Map = HashMap<String, Value>;

/// Boxed future returned by async commands
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type SyncFn = dyn Fn(Args) -> Result<Value, PipelineError> + Send + Sync;
type AsyncFn = dyn Fn(Args) -> BoxFuture<Result<Value, PipelineError>> + Send + Sync;

/// A value held by a store or passed to a pipe
#[derive(Clone)]
pub enum Value {
    /// Plain data
    Data(Json),
    /// A callable registered under a name
    Command(Command),
    /// Continuation handle of the running invocation
    Next(Next),
    /// Scratch-store setter of the running pipe
    Set(Setter),
}

impl Value {
    pub fn null() -> Self {
        Value::Data(Json::Null)
    }

    pub fn as_data(&self) -> Option<&Json> {
        match self {
            Value::Data(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_data().and_then(Json::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(Json::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_data().and_then(Json::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_data().and_then(Json::as_f64)
    }

    pub fn as_object(&self) -> Option<&serde_json::Map<String, Json>> {
        self.as_data().and_then(Json::as_object)
    }

    /// True only for the boolean `b` itself, never for values that merely coerce to it
    pub fn is_exactly(&self, b: bool) -> bool {
        self.as_bool() == Some(b)
    }

    /// Loose truthiness used for fault slots
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Data(Json::Null) => false,
            Value::Data(Json::Bool(b)) => *b,
            Value::Data(Json::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::Data(Json::String(s)) => !s.is_empty(),
            _ => true,
        }
    }

    /// JSON view of the value; handles become their display string
    pub fn to_json(&self) -> Json {
        match self {
            Value::Data(json) => json.clone(),
            other => Json::String(other.to_string()),
        }
    }

    /// Entries of a data mapping; `None` for anything that is not an object
    pub fn to_map(&self) -> Option<Map> {
        self.as_object().map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), Value::Data(v.clone())))
                .collect()
        })
    }

    /// Build a `{ "error": fault }` mapping, the data-level way to raise a fault
    pub fn fault(fault: impl Into<Json>) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("error".to_string(), fault.into());
        Value::Data(Json::Object(map))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(Json::String(s)) => write!(f, "{}", s),
            Value::Data(json) => write!(f, "{}", json),
            Value::Command(cmd) => write!(f, "[command {}]", cmd.name()),
            Value::Next(_) => write!(f, "[next]"),
            Value::Set(_) => write!(f, "[set]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(json) => f.debug_tuple("Data").field(json).finish(),
            Value::Command(cmd) => f.debug_tuple("Command").field(&cmd.name()).finish(),
            Value::Next(_) => f.write_str("Next"),
            Value::Set(_) => f.write_str("Set"),
        }
    }
}

/// Data serializes as itself; handles serialize as their display form
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Command(a), Value::Command(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::Data(json)
    }
}

impl From<Command> for Value {
    fn from(cmd: Command) -> Self {
        Value::Command(cmd)
    }
}

macro_rules! data_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Data(Json::from(v))
                }
            }
        )*
    };
}

data_from!(bool, i32, i64, u32, u64, f64, &str, String);

/// How a name resolved in the command registry
#[derive(Clone)]
pub enum Dependency {
    /// Something that can be called
    Callable(Command),
    /// A plain boolean used directly for flow control
    Flag(bool),
    /// Nothing registered under that name
    Missing,
    /// Registered, but neither callable nor a flag
    Invalid,
}

impl Dependency {
    pub fn from_slot(slot: Option<&Value>) -> Self {
        match slot {
            Some(Value::Command(cmd)) => Dependency::Callable(cmd.clone()),
            Some(Value::Data(Json::Bool(b))) => Dependency::Flag(*b),
            Some(_) => Dependency::Invalid,
            None => Dependency::Missing,
        }
    }
}

#[derive(Clone)]
enum Body {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

/// A callable pipe body
///
/// Used both for ordinary pipes and for commands registered in a store and
/// injected by name.
#[derive(Clone)]
pub struct Command {
    name: Arc<str>,
    body: Body,
}

impl Command {
    /// Wrap a synchronous closure; diagnostics call it `function`
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<Value, PipelineError> + Send + Sync + 'static,
    {
        Self::named("function", f)
    }

    pub fn named<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Result<Value, PipelineError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Body::Sync(Arc::new(f)),
        }
    }

    /// Wrap a closure returning a future; the driver awaits it before
    /// interpreting the result
    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, PipelineError>> + Send + 'static,
    {
        Self::named_async("function", f)
    }

    pub fn named_async<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, PipelineError>> + Send + 'static,
    {
        let body: Arc<AsyncFn> = Arc::new(move |args| Box::pin(f(args)));
        Self {
            name: Arc::from(name.into()),
            body: Body::Async(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        matches!(self.body, Body::Async(_))
    }

    pub fn ptr_eq(&self, other: &Command) -> bool {
        match (&self.body, &other.body) {
            (Body::Sync(a), Body::Sync(b)) => Arc::ptr_eq(a, b),
            (Body::Async(a), Body::Async(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) async fn call(&self, args: Args) -> Result<Value, PipelineError> {
        match &self.body {
            Body::Sync(f) => f(args),
            Body::Async(f) => f(args).await,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("async", &self.is_async())
            .finish()
    }
}

/// Resolved positional inputs handed to a pipe
///
/// A `None` slot means the input was undefined: the name was absent from
/// the scratch store, or the positional argument was not supplied.
#[derive(Clone, Default)]
pub struct Args {
    values: Vec<Option<Value>>,
    scratch: Option<Arc<Map>>,
}

impl Args {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self {
            values,
            scratch: None,
        }
    }

    pub(crate) fn with_scratch(mut self, scratch: Map) -> Self {
        self.scratch = Some(Arc::new(scratch));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx).and_then(Option::as_ref)
    }

    pub fn data(&self, idx: usize) -> Option<&Json> {
        self.get(idx).and_then(Value::as_data)
    }

    pub fn is_defined(&self, idx: usize) -> bool {
        self.get(idx).is_some()
    }

    /// First continuation handle among the inputs
    pub fn next(&self) -> Option<Next> {
        self.iter().find_map(|v| match v {
            Some(Value::Next(next)) => Some(next.clone()),
            _ => None,
        })
    }

    /// First setter among the inputs
    pub fn setter(&self) -> Option<Setter> {
        self.iter().find_map(|v| match v {
            Some(Value::Set(set)) => Some(set.clone()),
            _ => None,
        })
    }

    /// Snapshot of the scratch store; only error handlers receive one
    pub fn scratch(&self) -> Option<&Map> {
        self.scratch.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&Value>> {
        self.values.iter().map(Option::as_ref)
    }

    pub(crate) fn slots_mut(&mut self) -> &mut Vec<Option<Value>> {
        &mut self.values
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values.into_iter().map(Some).collect())
    }
}
