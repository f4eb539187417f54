//! Tool abstractions for model function-calling.
//!
//! Every capability the model can invoke is a [`Tool`] implementor. Tools are
//! collected into a [`ToolSet`], which exports definitions for providers and
//! turns a model's [`ToolUse`](crate::message::ToolUse) request into a
//! [`ToolResult`](crate::message::ToolResult), never an error.
//!
//! # Defining tools
//!
//! - **[`FnTool`]**: closure-based, deserializes arguments into a typed
//!   struct. Best for stateless tools.
//! - **`impl Tool`**: full struct with [`Tool::definition()`] and
//!   [`Tool::call()`]. Best for tools that own state.

pub mod core;

pub use self::core::{FnTool, Tool, ToolArgs, ToolDef, ToolFuture, ToolSet, log_tool_call};
