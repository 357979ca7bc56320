use ai_agent::AgentBehavior;
use async_trait::async_trait;

/// Answers questions about the page the navigation agent last saw.
#[derive(Debug, Default)]
pub struct PageAnalysisAgent {
    page_context: String,
}

impl PageAnalysisAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_page_context(&mut self, page_context: &str) {
        self.page_context = page_context.to_string();
    }

    pub fn page_context(&self) -> &str {
        &self.page_context
    }
}

#[async_trait]
impl AgentBehavior for PageAnalysisAgent {
    fn name(&self) -> &str {
        "page_analysis"
    }

    fn system_prompt(&self, _tools_description: &str) -> String {
        format!(
            "You are a browser automation agent.\n\
             PAGE CONTEXT INFORMATION:\n{}\n\
             INSTRUCTIONS:\n\
             - Use the context above to answer user questions\n\
             - If information isn't in the context, say so clearly.",
            self.page_context
        )
    }
}
