//! Crate-level error taxonomy. Decode/validate/link errors are one-shot and
//! all-or-nothing; traps abort only the call that raised them.

use thiserror::Error;

use crate::types::{FuncType, ValType};

pub use crate::decode::DecodeError;

/// Error from [`crate::load_module`]: either the bytes are malformed or the
/// module is well-formed but unsafe to run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A well-formed module failed semantic validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{space} index {index} out of range")]
    IndexOutOfRange { space: &'static str, index: u32 },

    #[error("duplicate export name `{name}`")]
    DuplicateExport { name: String },

    #[error("at most one memory is supported")]
    MultipleMemories,

    #[error("at most one table is supported")]
    MultipleTables,

    #[error("memory of {pages} initial pages exceeds the {ceiling} page ceiling")]
    MemoryTooLarge { pages: u32, ceiling: u32 },

    #[error("start function must have type () -> (), found {found}")]
    BadStartSignature { found: FuncType },

    #[error("global initializer type mismatch: global is {expected}, initializer yields {found}")]
    GlobalInitTypeMismatch { expected: ValType, found: ValType },

    #[error("global initializer references non-imported global {index}")]
    GlobalInitForwardRef { index: u32 },

    #[error("global initializer references mutable global {index}")]
    GlobalInitMutable { index: u32 },

    #[error("type {index} declares {arity} results, exceeding the single-result limit")]
    ResultArity { index: u32, arity: usize },

    #[error("in function {func} at offset {offset}: {msg}")]
    Body {
        func: u32,
        offset: usize,
        msg: &'static str,
    },
}

/// Registering a host function under an already-taken name pair.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("host function {module}.{field} is already registered")]
    DuplicateImport { module: String, field: String },
}

/// Outcome of a registry lookup that did not produce a callback.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no host function registered under this name")]
    NotFound,

    #[error("signature mismatch: registered {registered}, import expects {expected}")]
    SignatureMismatch {
        registered: FuncType,
        expected: FuncType,
    },
}

/// Import resolution or segment initialization failed; nothing was
/// committed to the store.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("unresolved import {module}.{field}")]
    UnresolvedImport { module: String, field: String },

    #[error("import {module}.{field}: expected a {expected}, found a {found}")]
    ImportKindMismatch {
        module: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("import {module}.{field}: signature mismatch, expected {expected}, found {found}")]
    ImportSignatureMismatch {
        module: String,
        field: String,
        expected: FuncType,
        found: FuncType,
    },

    #[error("import {module}.{field}: limits are not satisfied by the provided {kind}")]
    ImportLimitsMismatch {
        module: String,
        field: String,
        kind: &'static str,
    },

    #[error("import {module}.{field}: global type mismatch")]
    ImportGlobalTypeMismatch { module: String, field: String },

    #[error("element segment for table {table} is out of bounds")]
    ElementOutOfBounds { table: u32 },

    #[error("data segment for memory {memory} is out of bounds")]
    DataOutOfBounds { memory: u32 },
}

/// A declared initial size exceeds a format or host ceiling.
#[derive(Debug, Error)]
pub enum ResourceLimitError {
    #[error("memory initial size of {pages} pages exceeds the {ceiling} page ceiling")]
    MemoryTooLarge { pages: u32, ceiling: u32 },

    #[error("memory initial size of {pages} pages exceeds the declared maximum {max}")]
    MemoryExceedsMax { pages: u32, max: u32 },

    #[error("table initial size of {entries} entries exceeds the declared maximum {max}")]
    TableExceedsMax { entries: u32, max: u32 },
}

/// Error from [`crate::instantiate`].
#[derive(Debug, Error)]
pub enum InstantiateError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    ResourceLimit(#[from] ResourceLimitError),

    /// Re-asserted defensively at link time (normally caught by validation).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("start function trapped")]
    StartTrap(#[source] Trap),
}

/// The named export does not exist on the instance.
#[derive(Debug, Error)]
#[error("no export named `{name}`")]
pub struct NoSuchExportError {
    pub name: String,
}

/// The caller's arguments do not match the exported function's signature.
/// Raised before any execution; never reported as a trap.
#[derive(Debug, Error)]
#[error("arity mismatch: function expects {expected}, caller passed ({given})", given = .given.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "))]
pub struct ArityError {
    pub expected: FuncType,
    pub given: Vec<ValType>,
}

/// Error from [`crate::call`].
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Arity(#[from] ArityError),

    #[error(transparent)]
    Trap(#[from] Trap),
}

/// Error from [`crate::invoke`].
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    NoSuchExport(#[from] NoSuchExportError),

    #[error("export `{name}` is a {kind}, not a function")]
    NotAFunction { name: String, kind: &'static str },

    #[error(transparent)]
    Arity(#[from] ArityError),

    #[error(transparent)]
    Trap(#[from] Trap),
}

impl From<CallError> for InvokeError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Arity(e) => InvokeError::Arity(e),
            CallError::Trap(t) => InvokeError::Trap(t),
        }
    }
}

/// Failure reported by a host callback. Wrapped into [`Trap::Host`] so
/// module code observes a consistent failure type, while the embedder can
/// still match on the variant to tell host faults from in-module traps.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostError(Box<dyn std::error::Error + Send + Sync>);

impl HostError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }

    pub fn msg(msg: impl Into<String>) -> Self {
        Self(msg.into().into())
    }

    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync) {
        self.0.as_ref()
    }
}

/// Runtime fault. Terminates the current call only; the store and its
/// instances remain usable afterwards.
#[derive(Debug, Error)]
pub enum Trap {
    #[error("unreachable instruction executed")]
    Unreachable,

    #[error("integer divide by zero")]
    IntegerDivideByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,

    #[error("out of bounds memory access")]
    MemoryOutOfBounds,

    #[error("undefined table element")]
    UndefinedElement,

    #[error("uninitialized table element")]
    UninitializedElement,

    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,

    #[error("call stack exhausted")]
    StackOverflow,

    #[error("fuel budget exhausted")]
    OutOfFuel,

    #[error("host function failed")]
    Host(#[source] HostError),
}
