//! The seam between the bridge and an embedded runtime.
//!
//! [`ForeignRuntime`] is the minimal object protocol the bridge needs:
//! import a module, read attributes, call things, build a string and an
//! argument tuple, and read a string back. Two implementations ship:
//!
//! * [`python::PythonRuntime`] (feature `python`): CPython through pyo3.
//! * [`fake::FakeRuntime`]: an in-process collaborator with the same shape,
//!   used to exercise every bridge step without a Python installation.
//!
//! ## Reference ownership
//!
//! Every value handed out by a runtime is an owned [`ForeignRuntime::Object`].
//! Dropping it releases the foreign reference, so scope exit is the only
//! release mechanism the bridge relies on: intermediates die on every return
//! path, success or failure, exactly once.

use crate::error::ForeignError;

#[cfg(feature = "python")]
pub mod python;

pub mod fake;

/// An embedded interpreter-like runtime that can host the converter.
pub trait ForeignRuntime: Send + Sync + 'static {
    /// An owned reference to a foreign value. Dropping it releases the value.
    type Object: Send + 'static;

    /// Bring the runtime up for a new handle. Called once per handle before
    /// any import. Must fail after [`ForeignRuntime::teardown`].
    fn start(&self) -> Result<(), ForeignError> {
        Ok(())
    }

    /// Import a module by name.
    fn import(&self, module: &str) -> Result<Self::Object, ForeignError>;

    /// Read attribute `name` from `obj`.
    fn get_attr(&self, obj: &Self::Object, name: &str) -> Result<Self::Object, ForeignError>;

    /// Whether `obj` can be called.
    fn is_callable(&self, obj: &Self::Object) -> bool;

    /// Whether `obj` is the runtime's null value (`None` in Python).
    fn is_none(&self, obj: &Self::Object) -> bool;

    /// Call `callable` with no arguments (`args = None`) or with the
    /// positional container built by [`ForeignRuntime::new_args`].
    fn call(
        &self,
        callable: &Self::Object,
        args: Option<&Self::Object>,
    ) -> Result<Self::Object, ForeignError>;

    /// Marshal a Rust string into a foreign string.
    fn new_str(&self, value: &str) -> Result<Self::Object, ForeignError>;

    /// Build a positional-argument container, taking ownership of `items`.
    fn new_args(&self, items: Vec<Self::Object>) -> Result<Self::Object, ForeignError>;

    /// Copy a foreign string into a Rust `String`.
    fn decode_str(&self, obj: &Self::Object) -> Result<String, ForeignError>;

    /// Run `f` with the runtime entered for the current thread (for CPython:
    /// with the GIL held), so references dropped inside `f` are released
    /// immediately rather than deferred.
    fn enter<T>(&self, f: impl FnOnce() -> T) -> T {
        f()
    }

    /// Tear the runtime down. Called at most once per pool, after every
    /// handle has been cleaned up. Must be idempotent.
    fn teardown(&self) {}
}
