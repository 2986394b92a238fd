//! One pooled unit of converter state.
//!
//! A [`RuntimeHandle`] holds the two long-lived references every conversion
//! needs (the imported module and its entry point), resolved once at
//! construction. A handle is either fully initialised or never constructed:
//! [`RuntimeHandle::initialize`] returns an error instead of a half-built
//! value, and any reference obtained before the failure is dropped (and so
//! released) on the way out.

use crate::config::ConverterConfig;
use crate::error::{ConvertError, ForeignError, InitStage};
use crate::runtime::ForeignRuntime;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Identifier assigned by the pool, unique for the pool's lifetime.
pub type HandleId = u64;

/// A runtime context plus its resolved conversion entry points.
pub struct RuntimeHandle<R: ForeignRuntime> {
    id: HandleId,
    runtime: Arc<R>,
    module: Option<R::Object>,
    entry_point: Option<R::Object>,
}

impl<R: ForeignRuntime> RuntimeHandle<R> {
    /// Start the runtime for this handle and resolve the module and entry point
    /// named in `config`.
    pub fn initialize(
        runtime: Arc<R>,
        config: &ConverterConfig,
        id: HandleId,
    ) -> Result<Self, ConvertError> {
        runtime
            .start()
            .map_err(|e| ConvertError::init(InitStage::RuntimeStart, e))?;

        let module = runtime
            .import(&config.module)
            .map_err(|e| ConvertError::init(InitStage::ModuleImport, e))?;

        let entry_point = runtime
            .get_attr(&module, &config.entry_point)
            .map_err(|e| ConvertError::init(InitStage::EntryPointLookup, e))?;

        if !runtime.is_callable(&entry_point) {
            return Err(ConvertError::init(
                InitStage::EntryPointNotCallable,
                ForeignError::new(format!(
                    "{}.{} is not callable",
                    config.module, config.entry_point
                )),
            ));
        }

        debug!(
            "Handle {} ready: {}.{}",
            id, config.module, config.entry_point
        );

        Ok(Self {
            id,
            runtime,
            module: Some(module),
            entry_point: Some(entry_point),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// `true` until [`RuntimeHandle::cleanup`] has run.
    pub fn is_initialized(&self) -> bool {
        self.module.is_some() && self.entry_point.is_some()
    }

    /// The resolved entry point, or `None` after cleanup.
    pub fn entry_point(&self) -> Option<&R::Object> {
        self.entry_point.as_ref()
    }

    /// Release the entry point, then the module. Safe to call repeatedly.
    ///
    /// The runtime itself is shared by every handle of a pool and is torn
    /// down by the pool once the last handle is gone.
    pub fn cleanup(&mut self) {
        if !self.is_initialized() {
            return;
        }
        self.runtime.enter(|| {
            drop(self.entry_point.take());
            drop(self.module.take());
        });
        debug!("Handle {} cleaned up", self.id);
    }
}

impl<R: ForeignRuntime> Drop for RuntimeHandle<R> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<R: ForeignRuntime> fmt::Debug for RuntimeHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("id", &self.id)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
