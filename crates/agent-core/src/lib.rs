//! Copilot runtime: the coordinating conversation agent, the browser
//! sub-agents it delegates to, the clarify-then-plan dialogue and the bridge
//! that lets non-async callers reach all of it.

pub mod agents;
pub mod bridge;
pub mod dispatcher;
pub mod planner;
pub mod runtime;

pub use agents::{
    AnswerHandlingAgent, ConversationAgent, MissingInfoAgent, NavigationAgent, PageAnalysisAgent,
    StepPlannerAgent,
};
pub use bridge::{BridgeError, RuntimeHandle, RuntimeWorker, DEFAULT_DEADLINE};
pub use dispatcher::{
    ConnectionRoute, Dispatcher, NavigationRoute, PageAnalysisRoute, PageContext, ToolRoute,
    ANALYZE_PAGE_TOOL, BROWSE_WEB_TOOL,
};
pub use planner::{
    AutomationTask, ClarificationPlanner, ClarificationQuestion, PlanStep, PlannerError,
    PlannerState,
};
pub use runtime::{CopilotRuntime, CopilotRuntimeBuilder, RuntimeError};
