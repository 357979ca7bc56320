//! Core agent primitives shared by the copilot workspace.
//! The crate exposes the language model contract, the tool-call grammar, and
//! the generic agent loop that turns model output into tool invocations. It
//! also provides the decorators that cache model responses and absorb rate
//! limits.

pub mod agent;
pub mod cache;
pub mod language_model;
pub mod resilient;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tool;

pub use agent::{Agent, AgentBehavior, AgentConfig, AgentError, AgentResult};
pub use cache::{CacheError, CacheKey, CachedModel, ResponseCache};
pub use language_model::{
    LanguageModelClient, LanguageModelError, LanguageModelResponse, LanguageModelUsage, Message,
    ModelOptions, Role,
};
pub use resilient::{apology, is_error_response, ResilientModel, RetryPolicy};
pub use tool::{ParameterSpec, ToolCall, ToolDescriptor};

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 20;
pub const DEFAULT_TOOL_RESULT_LIMIT: usize = 2000;
