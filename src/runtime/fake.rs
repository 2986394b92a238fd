//! In-process stand-in for the Python converter.
//!
//! `FakeRuntime` answers the same object protocol the bridge drives against
//! CPython (`import markitdown`, `MarkItDown()`, `.convert(path)`,
//! `.text_content`) from a table of scripted documents. It counts every
//! live foreign reference it hands out, so tests can assert that a bridge
//! call released all of its intermediates, and it can be told to fail any
//! single bridge step or initialization stage on demand.
//!
//! ```rust
//! use markitdown_bridge::{Converter, ConverterConfig, FakeRuntime};
//! use std::sync::Arc;
//!
//! let runtime = Arc::new(FakeRuntime::new().with_document("doc.txt", "# Hello"));
//! let converter = Converter::new(runtime, ConverterConfig::default()).unwrap();
//! let output = converter.convert_sync("doc.txt").unwrap();
//! assert_eq!(output.markdown, "# Hello");
//! ```

use crate::config::{DEFAULT_METHOD, DEFAULT_TEXT_FIELD, DEFAULT_TITLE_FIELD};
use crate::error::{BridgeStep, ForeignError, InitStage};
use crate::runtime::ForeignRuntime;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Script {
    Text {
        markdown: String,
        title: Option<String>,
    },
    Raise(String),
}

#[derive(Debug)]
enum Value {
    Module,
    EntryPoint,
    NotCallable,
    Converter,
    Method,
    Str(String),
    Args(Vec<FakeObject>),
    ConvertResult {
        markdown: String,
        title: Option<String>,
    },
    None,
}

/// Decrements the live-reference counter when the owning object is dropped.
#[derive(Debug)]
struct LiveToken(Arc<AtomicUsize>);

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A reference handed out by [`FakeRuntime`].
#[derive(Debug)]
pub struct FakeObject {
    value: Value,
    _live: LiveToken,
}

/// Scripted runtime implementing the converter's object shape.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    documents: HashMap<String, Script>,
    read_from_disk: bool,
    fail_step: Mutex<Option<BridgeStep>>,
    fail_init: Mutex<Option<InitStage>>,
    invocation_delay: Mutex<Duration>,
    live: Arc<AtomicUsize>,
    starts: AtomicUsize,
    imports: AtomicUsize,
    invocations: AtomicUsize,
    teardowns: AtomicUsize,
    torn_down: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// `convert(path).text_content` returns `markdown`.
    pub fn with_document(self, path: impl Into<String>, markdown: impl Into<String>) -> Self {
        self.with_script(
            path,
            Script::Text {
                markdown: markdown.into(),
                title: None,
            },
        )
    }

    /// Like [`FakeRuntime::with_document`], with a `title` attribute.
    pub fn with_titled_document(
        self,
        path: impl Into<String>,
        markdown: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        self.with_script(
            path,
            Script::Text {
                markdown: markdown.into(),
                title: Some(title.into()),
            },
        )
    }

    /// `convert(path)` raises with `message`.
    pub fn with_failure(self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.with_script(path, Script::Raise(message.into()))
    }

    /// Unscripted paths are read from disk and returned verbatim.
    pub fn reading_from_disk(mut self) -> Self {
        self.read_from_disk = true;
        self
    }

    fn with_script(mut self, path: impl Into<String>, script: Script) -> Self {
        self.documents.insert(path.into(), script);
        self
    }

    /// Make one bridge step fail on every subsequent call (`None` clears it).
    pub fn fail_at(&self, step: Option<BridgeStep>) {
        *self.fail_step.lock().unwrap_or_else(PoisonError::into_inner) = step;
    }

    /// Make one initialization stage fail for new handles (`None` clears it).
    pub fn fail_init(&self, stage: Option<InitStage>) {
        *self.fail_init.lock().unwrap_or_else(PoisonError::into_inner) = stage;
    }

    /// Sleep this long inside every `convert` invocation.
    pub fn set_invocation_delay(&self, delay: Duration) {
        *self
            .invocation_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// References handed out and not yet dropped.
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn imports(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn object(&self, value: Value) -> FakeObject {
        self.live.fetch_add(1, Ordering::SeqCst);
        FakeObject {
            value,
            _live: LiveToken(Arc::clone(&self.live)),
        }
    }

    fn failing(&self, step: BridgeStep) -> bool {
        *self.fail_step.lock().unwrap_or_else(PoisonError::into_inner) == Some(step)
    }

    fn failing_init(&self, stage: InitStage) -> bool {
        *self.fail_init.lock().unwrap_or_else(PoisonError::into_inner) == Some(stage)
    }

    fn ensure_live(&self) -> Result<(), ForeignError> {
        if self.is_torn_down() {
            return Err(ForeignError::new("RuntimeError: runtime has been torn down"));
        }
        Ok(())
    }

    fn run_convert(&self, path: &str) -> Result<Value, ForeignError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .invocation_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.failing(BridgeStep::Invocation) {
            return Err(ForeignError::new("RuntimeError: injected invocation failure"));
        }
        match self.documents.get(path) {
            Some(Script::Text { markdown, title }) => Ok(Value::ConvertResult {
                markdown: markdown.clone(),
                title: title.clone(),
            }),
            Some(Script::Raise(message)) => Err(ForeignError::new(message.clone())),
            None if self.read_from_disk => std::fs::read_to_string(path)
                .map(|markdown| Value::ConvertResult {
                    markdown,
                    title: None,
                })
                .map_err(|e| ForeignError::new(format!("FileNotFoundError: {path}: {e}"))),
            None => Err(ForeignError::new(format!(
                "FileNotFoundError: [Errno 2] No such file or directory: '{path}'"
            ))),
        }
    }
}

impl ForeignRuntime for FakeRuntime {
    type Object = FakeObject;

    fn start(&self) -> Result<(), ForeignError> {
        self.ensure_live()?;
        if self.failing_init(InitStage::RuntimeStart) {
            return Err(ForeignError::new("RuntimeError: interpreter failed to start"));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn import(&self, module: &str) -> Result<FakeObject, ForeignError> {
        self.ensure_live()?;
        if self.failing_init(InitStage::ModuleImport) {
            return Err(ForeignError::new(format!(
                "ModuleNotFoundError: No module named '{module}'"
            )));
        }
        self.imports.fetch_add(1, Ordering::SeqCst);
        Ok(self.object(Value::Module))
    }

    fn get_attr(&self, obj: &FakeObject, name: &str) -> Result<FakeObject, ForeignError> {
        self.ensure_live()?;
        let missing = || ForeignError::new(format!("AttributeError: no attribute '{name}'"));
        match &obj.value {
            Value::Module => {
                if self.failing_init(InitStage::EntryPointLookup) {
                    Err(missing())
                } else if self.failing_init(InitStage::EntryPointNotCallable) {
                    Ok(self.object(Value::NotCallable))
                } else {
                    Ok(self.object(Value::EntryPoint))
                }
            }
            Value::Converter => {
                if self.failing(BridgeStep::MethodLookup) || name != DEFAULT_METHOD {
                    Err(missing())
                } else {
                    Ok(self.object(Value::Method))
                }
            }
            Value::ConvertResult { markdown, title } => {
                if name == DEFAULT_TITLE_FIELD {
                    Ok(match title {
                        Some(t) => self.object(Value::Str(t.clone())),
                        None => self.object(Value::None),
                    })
                } else if self.failing(BridgeStep::FieldExtraction) || name != DEFAULT_TEXT_FIELD {
                    Err(missing())
                } else {
                    Ok(self.object(Value::Str(markdown.clone())))
                }
            }
            _ => Err(missing()),
        }
    }

    fn is_callable(&self, obj: &FakeObject) -> bool {
        matches!(obj.value, Value::EntryPoint | Value::Method)
    }

    fn is_none(&self, obj: &FakeObject) -> bool {
        matches!(obj.value, Value::None)
    }

    fn call(
        &self,
        callable: &FakeObject,
        args: Option<&FakeObject>,
    ) -> Result<FakeObject, ForeignError> {
        self.ensure_live()?;
        match (&callable.value, args.map(|a| &a.value)) {
            (Value::EntryPoint, None) => {
                if self.failing(BridgeStep::Instantiate) {
                    Err(ForeignError::new("TypeError: converter construction failed"))
                } else {
                    Ok(self.object(Value::Converter))
                }
            }
            (Value::Method, Some(Value::Args(items))) => match items.as_slice() {
                [FakeObject {
                    value: Value::Str(path),
                    ..
                }] => self.run_convert(path).map(|v| self.object(v)),
                _ => Err(ForeignError::new(
                    "TypeError: convert() takes exactly one str argument",
                )),
            },
            _ => Err(ForeignError::new("TypeError: object is not callable")),
        }
    }

    fn new_str(&self, value: &str) -> Result<FakeObject, ForeignError> {
        self.ensure_live()?;
        if self.failing(BridgeStep::ArgumentMarshal) {
            return Err(ForeignError::new("UnicodeDecodeError: injected"));
        }
        Ok(self.object(Value::Str(value.to_string())))
    }

    fn new_args(&self, items: Vec<FakeObject>) -> Result<FakeObject, ForeignError> {
        self.ensure_live()?;
        if self.failing(BridgeStep::ArgumentContainer) {
            return Err(ForeignError::new("MemoryError: injected"));
        }
        Ok(self.object(Value::Args(items)))
    }

    fn decode_str(&self, obj: &FakeObject) -> Result<String, ForeignError> {
        self.ensure_live()?;
        match &obj.value {
            Value::Str(_) if self.failing(BridgeStep::ResultDecode) => {
                Err(ForeignError::new("UnicodeEncodeError: injected"))
            }
            Value::Str(s) => Ok(s.clone()),
            other => Err(ForeignError::new(format!(
                "TypeError: expected str, got {other:?}"
            ))),
        }
    }

    fn teardown(&self) {
        if !self.torn_down.swap(true, Ordering::SeqCst) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}
