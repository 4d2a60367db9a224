//! Per-node module cache over an [`ExecutionEngine`] runtime.

use tracing::debug;

use crate::runtime::{EngineError, ExecutionEngine, RuntimeHandle};
use crate::types::{FunctionName, ModuleName};

/// Modules loaded into one node's runtime.
///
/// The cache owns the node's [`RuntimeHandle`] for its whole lifetime and
/// makes registration idempotent: fetching bytecode the node already holds
/// is a no-op.
#[derive(Debug)]
pub struct ModuleCache<E> {
    engine: E,
    runtime: RuntimeHandle,
}

impl<E: ExecutionEngine> ModuleCache<E> {
    /// Create a runtime on `engine` and wrap it.
    pub fn new(engine: E) -> Self {
        let runtime = engine.create_runtime();
        Self { engine, runtime }
    }

    /// Handle of the runtime backing this cache.
    pub fn runtime(&self) -> RuntimeHandle {
        self.runtime
    }

    /// The engine backing this cache.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Whether `module` is loaded.
    pub fn is_registered(&self, module: &ModuleName) -> bool {
        self.engine.is_registered(self.runtime, module)
    }

    /// Load `module` unless it is already present.
    ///
    /// Returns `true` if the module was loaded by this call.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error for invalid bytecode.
    pub fn ensure_registered(&self, module: &ModuleName, bytes: &[u8]) -> Result<bool, EngineError> {
        if self.is_registered(module) {
            return Ok(false);
        }
        self.engine.register(self.runtime, module, bytes)?;
        debug!(runtime = %self.runtime, %module, size = bytes.len(), "module cached");
        Ok(true)
    }

    /// Run `module::function(arg1, arg2)` if the module is loaded.
    ///
    /// Returns `Ok(None)` with no side effect when the module is absent.
    ///
    /// # Errors
    ///
    /// Fails if the module is present but the call does not succeed.
    pub fn try_execute_local(
        &self,
        module: &ModuleName,
        function: &FunctionName,
        arg1: i32,
        arg2: i32,
    ) -> Result<Option<i32>, EngineError> {
        if !self.is_registered(module) {
            return Ok(None);
        }
        self.engine
            .execute(self.runtime, module, function, arg1, arg2)
            .map(Some)
    }

    /// Bytecode of `module`, or `None` if it is not loaded.
    ///
    /// # Errors
    ///
    /// Propagates engine failures other than absence.
    pub fn export_bytes(&self, module: &ModuleName) -> Result<Option<Vec<u8>>, EngineError> {
        if !self.is_registered(module) {
            return Ok(None);
        }
        self.engine.export_bytes(self.runtime, module).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ManifestEngine, ModuleManifest};

    fn name(s: &str) -> ModuleName {
        ModuleName::new(s).expect("valid")
    }

    #[test]
    fn ensure_registered_is_idempotent() {
        let cache = ModuleCache::new(ManifestEngine::new());
        let bytes = ModuleManifest::stock_sum().to_bytes().expect("bytes");

        assert_eq!(cache.ensure_registered(&name("sum"), &bytes), Ok(true));
        assert_eq!(cache.ensure_registered(&name("sum"), &bytes), Ok(false));
        // different bytes under the same name are ignored too
        assert_eq!(cache.ensure_registered(&name("sum"), b"garbage"), Ok(false));
        assert!(cache.is_registered(&name("sum")));
    }

    #[test]
    fn try_execute_local_miss_has_no_effect() {
        let cache = ModuleCache::new(ManifestEngine::new());
        let sum = FunctionName::new("sum").expect("valid");
        assert_eq!(cache.try_execute_local(&name("sum"), &sum, 1, 2), Ok(None));
        assert!(!cache.is_registered(&name("sum")));
        assert_eq!(cache.export_bytes(&name("sum")), Ok(None));
    }

    #[test]
    fn try_execute_local_hit_matches_engine() {
        let engine = ManifestEngine::new();
        let cache = ModuleCache::new(engine.clone());
        let bytes = ModuleManifest::stock_sum().to_bytes().expect("bytes");
        cache.ensure_registered(&name("sum"), &bytes).expect("register");
        let sum = FunctionName::new("sum").expect("valid");

        let direct = engine
            .execute(cache.runtime(), &name("sum"), &sum, 10, 10)
            .expect("execute");
        assert_eq!(
            cache.try_execute_local(&name("sum"), &sum, 10, 10),
            Ok(Some(direct))
        );
        assert_eq!(cache.export_bytes(&name("sum")), Ok(Some(bytes)));
    }

    #[test]
    fn invalid_bytecode_leaves_cache_empty() {
        let cache = ModuleCache::new(ManifestEngine::new());
        assert!(cache.ensure_registered(&name("sum"), b"nope").is_err());
        assert!(!cache.is_registered(&name("sum")));
    }
}
