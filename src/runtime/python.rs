//! CPython runtime through pyo3.
//!
//! ## One interpreter, many handles
//!
//! CPython offers a single process-wide interpreter, and pyo3 does not
//! support finalising and re-initialising it. `PythonRuntime` therefore
//! represents that one interpreter; each pool handle owns its *own* module
//! and entry-point references on top of it, and every foreign call runs with
//! the GIL held, which serialises bytecode execution across handles.
//!
//! [`ForeignRuntime::teardown`] cannot call `Py_Finalize`. It runs a final
//! garbage collection and marks the runtime finalised; from then on every
//! operation fails with a [`ForeignError`] instead of reaching Python.

use crate::error::ForeignError;
use crate::runtime::ForeignRuntime;
use pyo3::prelude::*;
use pyo3::types::{PyString, PyTuple};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// The embedded CPython interpreter.
pub struct PythonRuntime {
    python_paths: Vec<PathBuf>,
    finalized: AtomicBool,
}

impl PythonRuntime {
    /// Boot the interpreter and prepend `python_paths` to `sys.path`.
    pub fn new(python_paths: &[PathBuf]) -> Result<Self, ForeignError> {
        pyo3::prepare_freethreaded_python();

        Python::with_gil(|py| -> PyResult<()> {
            info!("Embedded Python {}", py.version());
            let sys_path = py.import("sys")?.getattr("path")?;
            for dir in python_paths.iter().rev() {
                let dir = dir.to_string_lossy().into_owned();
                debug!("sys.path += {}", dir);
                sys_path.call_method1("insert", (0, dir))?;
            }
            Ok(())
        })
        .map_err(foreign)?;

        Ok(Self {
            python_paths: python_paths.to_vec(),
            finalized: AtomicBool::new(false),
        })
    }

    /// Directories that were prepended to `sys.path`.
    pub fn python_paths(&self) -> &[PathBuf] {
        &self.python_paths
    }

    fn ensure_live(&self) -> Result<(), ForeignError> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(ForeignError::new("Python runtime has been torn down"));
        }
        Ok(())
    }
}

/// Flatten a Python exception into its `"Type: message"` form, logging the
/// traceback at debug level.
fn foreign(err: PyErr) -> ForeignError {
    Python::with_gil(|py| {
        if let Some(tb) = err.traceback(py) {
            if let Ok(formatted) = tb.format() {
                debug!("Python traceback:\n{}", formatted);
            }
        }
    });
    ForeignError::new(err.to_string())
}

impl ForeignRuntime for PythonRuntime {
    type Object = Py<PyAny>;

    fn start(&self) -> Result<(), ForeignError> {
        self.ensure_live()?;
        pyo3::prepare_freethreaded_python();
        Ok(())
    }

    fn import(&self, module: &str) -> Result<Py<PyAny>, ForeignError> {
        self.ensure_live()?;
        Python::with_gil(|py| py.import(module).map(|m| m.into_any().unbind())).map_err(foreign)
    }

    fn get_attr(&self, obj: &Py<PyAny>, name: &str) -> Result<Py<PyAny>, ForeignError> {
        self.ensure_live()?;
        Python::with_gil(|py| obj.bind(py).getattr(name).map(Bound::unbind)).map_err(foreign)
    }

    fn is_callable(&self, obj: &Py<PyAny>) -> bool {
        Python::with_gil(|py| obj.bind(py).is_callable())
    }

    fn is_none(&self, obj: &Py<PyAny>) -> bool {
        Python::with_gil(|py| obj.bind(py).is_none())
    }

    fn call(
        &self,
        callable: &Py<PyAny>,
        args: Option<&Py<PyAny>>,
    ) -> Result<Py<PyAny>, ForeignError> {
        self.ensure_live()?;
        Python::with_gil(|py| -> PyResult<Py<PyAny>> {
            let callable = callable.bind(py);
            let out = match args {
                None => callable.call0()?,
                Some(args) => {
                    let tuple = args.bind(py).downcast::<PyTuple>().map_err(PyErr::from)?;
                    callable.call1(tuple.clone())?
                }
            };
            Ok(out.unbind())
        })
        .map_err(foreign)
    }

    fn new_str(&self, value: &str) -> Result<Py<PyAny>, ForeignError> {
        self.ensure_live()?;
        Ok(Python::with_gil(|py| {
            PyString::new(py, value).into_any().unbind()
        }))
    }

    fn new_args(&self, items: Vec<Py<PyAny>>) -> Result<Py<PyAny>, ForeignError> {
        self.ensure_live()?;
        Python::with_gil(|py| PyTuple::new(py, items).map(|t| t.into_any().unbind()))
            .map_err(foreign)
    }

    fn decode_str(&self, obj: &Py<PyAny>) -> Result<String, ForeignError> {
        self.ensure_live()?;
        Python::with_gil(|py| obj.bind(py).extract::<String>()).map_err(foreign)
    }

    fn enter<T>(&self, f: impl FnOnce() -> T) -> T {
        Python::with_gil(|_py| f())
    }

    fn teardown(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        Python::with_gil(|py| {
            if let Ok(gc) = py.import("gc") {
                let _ = gc.call_method0("collect");
            }
        });
        info!("Python runtime finalised");
    }
}
