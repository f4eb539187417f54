//! Tool trait, closure tools, and name-based dispatch.
//!
//! Dispatch never fails outward: unknown tools, malformed arguments, tool
//! errors, panics and oversized output all come back as an error-flagged
//! [`ToolResult`] so the model can correct itself.

use crate::message::{ToolResult, ToolUse};
use crate::tokens::validate_tool_output;
use anyhow::{Context, anyhow, bail};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Boxed future returned by [`Tool::call`].
pub type ToolFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send + 'a>>;

// ── Definitions ────────────────────────────────────────────────────

/// Provider-agnostic tool description: name, description and JSON Schema
/// for the parameters object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Arguments for a tool call: named (JSON object) or positional (JSON array).
#[derive(Clone, Debug, PartialEq)]
pub enum ToolArgs {
    Named(serde_json::Map<String, serde_json::Value>),
    Positional(Vec<serde_json::Value>),
}

impl TryFrom<serde_json::Value> for ToolArgs {
    type Error = anyhow::Error;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Object(map) => Ok(ToolArgs::Named(map)),
            serde_json::Value::Array(items) => Ok(ToolArgs::Positional(items)),
            other => bail!(
                "The provided tool parameters, {other} could not be interpreted as a mapping of arguments."
            ),
        }
    }
}

impl ToolArgs {
    pub fn into_value(self) -> serde_json::Value {
        match self {
            ToolArgs::Named(map) => serde_json::Value::Object(map),
            ToolArgs::Positional(items) => serde_json::Value::Array(items),
        }
    }

    /// Deserialize into a typed argument struct. Positional arguments bind
    /// to struct fields in declaration order.
    pub fn parse<T: DeserializeOwned>(self) -> anyhow::Result<T> {
        serde_json::from_value(self.into_value()).context("invalid tool arguments")
    }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the model can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Tool for Clock {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("now", "Current unix time", json!({"type": "object"}))
///     }
///
///     fn call(&self, _args: ToolArgs) -> ToolFuture<'_> {
///         Box::pin(async { Ok(json!(chrono::Utc::now().timestamp())) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDef;

    /// Run the tool. The returned value is serialized to JSON for the model;
    /// an `Err` becomes an error result carrying the error chain.
    fn call(&self, args: ToolArgs) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().name
    }
}

// ── FnTool ─────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<dyn Fn(ToolArgs) -> ToolFuture<'static> + Send + Sync>;

/// A closure-based tool that parses its arguments into `A` and serializes
/// the handler's return value.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct AddArgs { a: i64, b: i64 }
///
/// let add = FnTool::new(
///     ToolDef::new("add", "Add two numbers", json_schema_for::<AddArgs>()),
///     |args: AddArgs| async move { Ok(args.a + args.b) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
}

impl FnTool {
    pub fn new<A, R, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased = move |args: ToolArgs| -> ToolFuture<'static> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let parsed: A = args.parse()?;
                let value = (*handler)(parsed).await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(value)?)
            })
        };
        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn call(&self, args: ToolArgs) -> ToolFuture<'_> {
        (self.handler)(args)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.name)
            .finish()
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// Registered tools, unique by name and kept in registration order.
///
/// Cloning is cheap: tools are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    validate_args: bool,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .field("validate_args", &self.validate_args)
            .finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate arguments against each tool's JSON Schema before calling it.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.tools.iter().position(|t| t.name() == name) {
            Some(idx) => self.tools[idx] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve and run a model's tool request.
    pub async fn dispatch(&self, tool_use: &ToolUse) -> ToolResult {
        let tool = match self.get(&tool_use.name) {
            Some(tool) if !tool_use.is_error => tool,
            _ => return self.reject(tool_use),
        };

        let arguments = tool_use.parameters.to_string();
        log_tool_call(&tool_use.name, &arguments);
        let start = Instant::now();

        let result = match self.invoke(tool.as_ref(), &tool_use.parameters).await {
            Ok(output) => ToolResult {
                tool_use_id: tool_use.id.clone(),
                output,
                is_error: false,
            },
            Err(err) => {
                info!("[tool] {} failed: {err}", tool_use.name);
                ToolResult {
                    tool_use_id: tool_use.id.clone(),
                    output: format!("{err:?}\n{err}"),
                    is_error: true,
                }
            }
        };

        debug!(
            "[tool] {} completed in {:.0}ms ({} bytes)",
            tool_use.name,
            start.elapsed().as_secs_f64() * 1000.0,
            result.output.len()
        );
        result
    }

    fn reject(&self, tool_use: &ToolUse) -> ToolResult {
        let mut output = format!(
            "ERROR: Failed to use tool {}.\n\
             Do NOT use the same tool name and parameters again - that will lead to the same error.",
            tool_use.id
        );
        if tool_use.is_error {
            output.push('\n');
            output.push_str(tool_use.error_message.as_deref().unwrap_or("unknown error"));
        } else {
            output.push_str(&format!(
                "\nNo tool exists with the name '{}'. Valid tool names are: {}",
                tool_use.name,
                self.names().join(", ")
            ));
        }
        debug!("[tool] {} rejected before execution", tool_use.name);
        ToolResult {
            tool_use_id: tool_use.id.clone(),
            output,
            is_error: true,
        }
    }

    async fn invoke(&self, tool: &dyn Tool, parameters: &serde_json::Value) -> anyhow::Result<String> {
        let args = ToolArgs::try_from(parameters.clone())?;

        if self.validate_args
            && let Some(error) = validate_tool_arguments(&tool.definition(), parameters)
        {
            bail!(error);
        }

        let value = AssertUnwindSafe(tool.call(args))
            .catch_unwind()
            .await
            .map_err(|payload| anyhow!("tool panicked: {}", panic_message(payload.as_ref())))??;

        let output = serde_json::to_string(&value)?;
        validate_tool_output(&output)?;
        Ok(output)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against a tool's declared JSON Schema.
///
/// Returns `None` if valid (or if the schema itself cannot be compiled).
pub fn validate_tool_arguments(def: &ToolDef, arguments: &serde_json::Value) -> Option<String> {
    let validator = jsonschema::validator_for(&def.parameters).ok()?;

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "argument validation failed for tool '{}':\n{}",
            def.name,
            errors.join("\n")
        ))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", arguments.len());
    trace!("[tool] {name} arguments: {arguments}");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
