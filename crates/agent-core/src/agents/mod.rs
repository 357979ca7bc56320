//! Concrete agent behaviors: the coordinating conversation agent, its two
//! browser sub-agents and the single-purpose planning agents.

mod conversation;
mod navigation;
mod page_analysis;
mod planning;

pub use conversation::ConversationAgent;
pub use navigation::NavigationAgent;
pub use page_analysis::PageAnalysisAgent;
pub use planning::{AnswerHandlingAgent, MissingInfoAgent, StepPlannerAgent};

/// How tool-using agents are told to phrase a tool call.
pub(crate) const TOOL_CALL_FORMAT: &str = "\
Choose the appropriate tool based on the user's question. If no tool is needed, reply directly.

IMPORTANT: When you need to use a tool, you must ONLY respond with the exact JSON object format below, nothing else:
{
    \"tool\": \"tool-name\",
    \"arguments\": {
        \"argument-name\": \"value\"
    }
}

After receiving the tool's response, provide only a brief status update.
";
