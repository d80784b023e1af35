//! External tools executed on behalf of the agent.
//!
//! Tools are registered during `initialize`. When the agent later calls one,
//! the session runs the handler itself and answers the request; the consumer
//! of the turn never sees it.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::wire::event::ToolReturnValue;
use crate::wire::params::{ExternalTool, ExternalToolFunction};
use crate::{AppError, Result};

/// Future returned by a [`ToolHandler`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Executes one tool call.
///
/// Implementations receive the decoded JSON arguments and return the text
/// handed back to the model. An `Err` is reported to the agent as a tool
/// failure (`is_error: true`) carrying the error text.
pub trait ToolHandler: Send + Sync {
    /// Run the tool.
    fn call(&self, arguments: Value) -> ToolFuture<'_>;
}

struct FnHandler<F, A, O> {
    f: F,
    _marker: PhantomData<fn(A) -> O>,
}

impl<A, O, F, Fut> ToolHandler for FnHandler<F, A, O>
where
    A: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    fn call(&self, arguments: Value) -> ToolFuture<'_> {
        let args = serde_json::from_value::<A>(arguments)
            .map_err(|err| AppError::Protocol(format!("invalid tool arguments: {err}")));
        let fut = args.map(|args| (self.f)(args));
        Box::pin(async move {
            let output = fut?.await?;
            stringify_output(&output)
        })
    }
}

/// Strings pass through verbatim; anything else is JSON-encoded.
fn stringify_output<O: Serialize>(output: &O) -> Result<String> {
    match serde_json::to_value(output)? {
        Value::String(text) => Ok(text),
        other => Ok(other.to_string()),
    }
}

/// A named tool: its definition plus the handler that runs it.
#[derive(Clone)]
pub struct Tool {
    def: ExternalTool,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.def.function.name)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Build a tool from a handler.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `name` is empty or `parameters` is not a
    /// JSON schema of `"type": "object"`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: impl ToolHandler + 'static,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::Config("tool name must not be empty".into()));
        }
        if parameters.get("type").and_then(Value::as_str) != Some("object") {
            return Err(AppError::Config(format!(
                "tool {name}: parameters must be a JSON schema with \"type\": \"object\""
            )));
        }
        Ok(Self {
            def: ExternalTool {
                tool_type: "function".to_owned(),
                function: ExternalToolFunction {
                    name,
                    description: description.into(),
                    parameters,
                },
            },
            handler: Arc::new(handler),
        })
    }

    /// Build a tool from an async closure taking typed arguments.
    ///
    /// # Errors
    ///
    /// Same as [`Tool::new`].
    pub fn from_fn<A, O, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Result<Self>
    where
        A: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self::new(
            name,
            description,
            parameters,
            FnHandler {
                f,
                _marker: PhantomData,
            },
        )
    }

    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.function.name
    }

    /// Wire definition sent in `initialize`.
    #[must_use]
    pub fn definition(&self) -> &ExternalTool {
        &self.def
    }

    /// Run the tool on raw JSON `arguments` (absent means `{}`) and wrap the
    /// outcome as a tool result.
    pub async fn invoke(&self, arguments: Option<&str>) -> ToolReturnValue {
        let args = match arguments.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => Ok(Value::Object(serde_json::Map::new())),
            Some(raw) => serde_json::from_str::<Value>(raw)
                .map_err(|err| AppError::Protocol(format!("tool arguments are not JSON: {err}"))),
        };
        let outcome = match args {
            Ok(args) => self.handler.call(args).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(text) => {
                debug!(tool = self.name(), "tool call succeeded");
                ToolReturnValue::ok(text)
            }
            Err(err) => {
                warn!(tool = self.name(), error = %err, "tool call failed");
                ToolReturnValue::error(err.to_string())
            }
        }
    }
}

/// Tools registered with a session, by name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Index `tools` by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on a duplicate name.
    pub fn new(tools: Vec<Tool>) -> Result<Self> {
        let mut registry = Self::default();
        for tool in tools {
            let name = tool.name().to_owned();
            if registry.tools.contains_key(&name) {
                return Err(AppError::Config(format!("duplicate tool name: {name}")));
            }
            registry.order.push(name.clone());
            registry.tools.insert(name, tool);
        }
        Ok(registry)
    }

    /// Look up a tool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// `true` when no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ExternalTool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.def.clone())
            .collect()
    }
}
