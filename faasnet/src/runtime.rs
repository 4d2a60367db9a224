//! Function execution engine.
//!
//! The federation protocol only needs a narrow capability from the engine:
//! create a runtime, check/register/export a module by name, and call a
//! function with two i32 arguments. [`ExecutionEngine`] is that seam.
//!
//! [`ManifestEngine`] is the in-memory implementation. Its bytecode is a JSON
//! [`ModuleManifest`] that maps function names to i32 operations with
//! wasm-like semantics: add/sub/mul wrap, div/rem trap on zero and overflow.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{FunctionName, ModuleName};

/// Opaque identifier of one engine runtime. One per node, never destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuntimeHandle(pub u64);

impl std::fmt::Display for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rt{}", self.0)
    }
}

/// Engine failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The handle was not produced by this engine.
    #[error("unknown runtime {0}")]
    UnknownRuntime(RuntimeHandle),
    /// The module is not loaded in this runtime.
    #[error("module {0} is not registered")]
    ModuleNotRegistered(ModuleName),
    /// The module is already loaded in this runtime.
    #[error("module {0} is already registered")]
    AlreadyRegistered(ModuleName),
    /// The module does not export the function.
    #[error("module {module} has no function {function}")]
    UnknownFunction {
        /// Module searched.
        module: ModuleName,
        /// Missing function.
        function: FunctionName,
    },
    /// The bytecode could not be loaded.
    #[error("invalid bytecode for module {module}: {reason}")]
    InvalidBytecode {
        /// Module being registered.
        module: ModuleName,
        /// Loader diagnostic.
        reason: String,
    },
    /// The function trapped.
    #[error("{module}::{function} trapped: {reason}")]
    Trap {
        /// Module executed.
        module: ModuleName,
        /// Function executed.
        function: FunctionName,
        /// Trap description.
        reason: &'static str,
    },
}

/// Capability interface to a function execution engine.
///
/// Methods take `&self`; engines that keep state use interior mutability so a
/// single engine can back several nodes.
pub trait ExecutionEngine {
    /// Create a fresh, empty runtime.
    fn create_runtime(&self) -> RuntimeHandle;

    /// Whether `module` is loaded in `runtime`. Unknown runtimes hold nothing.
    fn is_registered(&self, runtime: RuntimeHandle, module: &ModuleName) -> bool;

    /// Load `bytes` as `module` into `runtime`.
    fn register(
        &self,
        runtime: RuntimeHandle,
        module: &ModuleName,
        bytes: &[u8],
    ) -> Result<(), EngineError>;

    /// Call `module::function(arg1, arg2)`.
    fn execute(
        &self,
        runtime: RuntimeHandle,
        module: &ModuleName,
        function: &FunctionName,
        arg1: i32,
        arg2: i32,
    ) -> Result<i32, EngineError>;

    /// The bytecode `module` was registered with.
    fn export_bytes(&self, runtime: RuntimeHandle, module: &ModuleName)
    -> Result<Vec<u8>, EngineError>;
}

/// A binary i32 operation a manifest function can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Signed division; traps on zero divisor and `MIN / -1`.
    Div,
    /// Signed remainder; traps on zero divisor.
    Rem,
    /// Smaller argument.
    Min,
    /// Larger argument.
    Max,
}

impl Operation {
    /// Apply the operation, returning a trap reason on failure.
    pub fn apply(self, a: i32, b: i32) -> Result<i32, &'static str> {
        match self {
            Operation::Add => Ok(a.wrapping_add(b)),
            Operation::Sub => Ok(a.wrapping_sub(b)),
            Operation::Mul => Ok(a.wrapping_mul(b)),
            Operation::Div if b == 0 => Err("integer divide by zero"),
            Operation::Div => a.checked_div(b).ok_or("integer overflow"),
            Operation::Rem if b == 0 => Err("integer divide by zero"),
            // i32::MIN % -1 is 0 in wasm rather than a trap
            Operation::Rem => Ok(a.wrapping_rem(b)),
            Operation::Min => Ok(a.min(b)),
            Operation::Max => Ok(a.max(b)),
        }
    }
}

/// Bytecode understood by [`ManifestEngine`].
///
/// ```
/// use faasnet::runtime::{ModuleManifest, Operation};
///
/// let manifest = ModuleManifest::new().with_function("sum", Operation::Add);
/// let bytes = manifest.to_bytes().expect("serialize");
/// assert_eq!(bytes, br#"{"functions":{"sum":"add"}}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Exported functions by name.
    pub functions: BTreeMap<String, Operation>,
}

impl ModuleManifest {
    /// An empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an exported function.
    pub fn with_function(mut self, name: impl Into<String>, operation: Operation) -> Self {
        self.functions.insert(name.into(), operation);
        self
    }

    /// Serialize to bytecode.
    ///
    /// # Errors
    ///
    /// Propagates the JSON serializer's error.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse bytecode.
    ///
    /// # Errors
    ///
    /// Fails on invalid JSON or a function name that could never be called.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let manifest: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        for name in manifest.functions.keys() {
            FunctionName::new(name.as_str()).map_err(|e| e.to_string())?;
        }
        Ok(manifest)
    }

    /// The stock `sum` module: `sum(a, b) = a + b`.
    pub fn stock_sum() -> Self {
        Self::new().with_function("sum", Operation::Add)
    }

    /// The stock `div` module: `div(a, b) = a / b`.
    pub fn stock_div() -> Self {
        Self::new().with_function("div", Operation::Div)
    }
}

#[derive(Debug)]
struct LoadedModule {
    manifest: ModuleManifest,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct EngineInner {
    runtimes: Vec<HashMap<ModuleName, LoadedModule>>,
}

impl EngineInner {
    fn runtime(
        &self,
        handle: RuntimeHandle,
    ) -> Result<&HashMap<ModuleName, LoadedModule>, EngineError> {
        self.runtimes
            .get(handle.0 as usize)
            .ok_or(EngineError::UnknownRuntime(handle))
    }

    fn module(
        &self,
        handle: RuntimeHandle,
        module: &ModuleName,
    ) -> Result<&LoadedModule, EngineError> {
        self.runtime(handle)?
            .get(module)
            .ok_or_else(|| EngineError::ModuleNotRegistered(module.clone()))
    }
}

/// In-memory [`ExecutionEngine`] running [`ModuleManifest`] bytecode.
///
/// Clones share the same runtimes.
#[derive(Debug, Clone, Default)]
pub struct ManifestEngine {
    inner: Rc<RefCell<EngineInner>>,
}

impl ManifestEngine {
    /// An engine with no runtimes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runtimes created so far.
    pub fn runtime_count(&self) -> usize {
        self.inner.borrow().runtimes.len()
    }
}

impl ExecutionEngine for ManifestEngine {
    fn create_runtime(&self) -> RuntimeHandle {
        let mut inner = self.inner.borrow_mut();
        inner.runtimes.push(HashMap::new());
        RuntimeHandle(inner.runtimes.len() as u64 - 1)
    }

    fn is_registered(&self, runtime: RuntimeHandle, module: &ModuleName) -> bool {
        self.inner.borrow().module(runtime, module).is_ok()
    }

    fn register(
        &self,
        runtime: RuntimeHandle,
        module: &ModuleName,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.borrow_mut();
        let modules = inner
            .runtimes
            .get_mut(runtime.0 as usize)
            .ok_or(EngineError::UnknownRuntime(runtime))?;
        if modules.contains_key(module) {
            return Err(EngineError::AlreadyRegistered(module.clone()));
        }
        let manifest =
            ModuleManifest::from_bytes(bytes).map_err(|reason| EngineError::InvalidBytecode {
                module: module.clone(),
                reason,
            })?;
        debug!(%runtime, %module, functions = manifest.functions.len(), "module loaded");
        modules.insert(
            module.clone(),
            LoadedModule {
                manifest,
                bytes: bytes.to_vec(),
            },
        );
        Ok(())
    }

    fn execute(
        &self,
        runtime: RuntimeHandle,
        module: &ModuleName,
        function: &FunctionName,
        arg1: i32,
        arg2: i32,
    ) -> Result<i32, EngineError> {
        let inner = self.inner.borrow();
        let loaded = inner.module(runtime, module)?;
        let operation = loaded
            .manifest
            .functions
            .get(function.as_str())
            .ok_or_else(|| EngineError::UnknownFunction {
                module: module.clone(),
                function: function.clone(),
            })?;
        operation
            .apply(arg1, arg2)
            .map_err(|reason| EngineError::Trap {
                module: module.clone(),
                function: function.clone(),
                reason,
            })
    }

    fn export_bytes(
        &self,
        runtime: RuntimeHandle,
        module: &ModuleName,
    ) -> Result<Vec<u8>, EngineError> {
        Ok(self.inner.borrow().module(runtime, module)?.bytes.clone())
    }
}
