//! The foreign call sequence behind one conversion.
//!
//! ```text
//! entry_point()            1. Instantiate
//!   .convert               2. MethodLookup (+ callable check)
//!   str(path)              3. ArgumentMarshal
//!   (path,)                4. ArgumentContainer
//!   .convert((path,))      5. Invocation
//!   result.text_content    6. FieldExtraction
//!   → String               7. ResultDecode
//! ```
//!
//! Each intermediate is an owned [`ForeignRuntime::Object`] bound to a local,
//! so it is released when the function returns, on success and at every
//! `?`. The whole sequence runs inside [`ForeignRuntime::enter`], which keeps
//! those releases immediate.

use crate::config::ConverterConfig;
use crate::error::{BridgeStep, ConvertError, ForeignError};
use crate::handle::RuntimeHandle;
use crate::runtime::ForeignRuntime;
use tracing::debug;

/// Text pulled out of one successful bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub markdown: String,
    pub title: Option<String>,
}

/// Run the conversion of `path` on `handle`.
///
/// The handle must be checked out by the caller for the whole call.
pub fn call_convert<R: ForeignRuntime>(
    handle: &RuntimeHandle<R>,
    path: &str,
    config: &ConverterConfig,
) -> Result<Extracted, ConvertError> {
    let rt = handle.runtime();
    let entry_point = handle.entry_point().ok_or_else(|| {
        ConvertError::Internal(format!("handle {} used after cleanup", handle.id()))
    })?;

    rt.enter(|| -> Result<Extracted, ConvertError> {
        let instance = rt
            .call(entry_point, None)
            .map_err(|e| ConvertError::bridge(BridgeStep::Instantiate, e))?;

        let method = rt
            .get_attr(&instance, &config.method)
            .map_err(|e| ConvertError::bridge(BridgeStep::MethodLookup, e))?;
        if !rt.is_callable(&method) {
            return Err(ConvertError::bridge(
                BridgeStep::MethodLookup,
                ForeignError::new(format!("{}.{} is not callable", config.entry_point, config.method)),
            ));
        }

        let arg = rt
            .new_str(path)
            .map_err(|e| ConvertError::bridge(BridgeStep::ArgumentMarshal, e))?;

        let args = rt
            .new_args(vec![arg])
            .map_err(|e| ConvertError::bridge(BridgeStep::ArgumentContainer, e))?;

        let result = rt
            .call(&method, Some(&args))
            .map_err(|e| ConvertError::bridge(BridgeStep::Invocation, e))?;

        let field = rt
            .get_attr(&result, &config.text_field)
            .map_err(|e| ConvertError::bridge(BridgeStep::FieldExtraction, e))?;

        let markdown = rt
            .decode_str(&field)
            .map_err(|e| ConvertError::bridge(BridgeStep::ResultDecode, e))?;

        let title = config
            .title_field
            .as_deref()
            .and_then(|name| read_title(rt, &result, name));

        debug!(
            "Handle {} converted '{}' → {} bytes",
            handle.id(),
            path,
            markdown.len()
        );
        Ok(Extracted { markdown, title })
    })
}

/// Best-effort read of an optional string attribute. Missing, `None` or
/// non-string values all yield `None`.
fn read_title<R: ForeignRuntime>(rt: &R, result: &R::Object, name: &str) -> Option<String> {
    let value = match rt.get_attr(result, name) {
        Ok(v) => v,
        Err(e) => {
            debug!("No '{}' on conversion result: {}", name, e);
            return None;
        }
    };
    if rt.is_none(&value) {
        return None;
    }
    rt.decode_str(&value)
        .ok()
        .filter(|t| !t.trim().is_empty())
}
