use ai_agent::AgentBehavior;
use async_trait::async_trait;
use tracing::debug;

const MISSING_INFO_PROMPT: &str = r#"Review steps that you need to accomplish the task requested by the user using web browser automation and list set of questions you absolutely need to know before you can complete this action. For each question, provide the reason why it is necessary to be answered to successfully complete the task. Output questions as a JSON in the following format:

[
{
  "question": "What level of access should Kartik Talamadupula have?",
  "possible_answers": ["Read", "Write", "Admin"],
  "reason": "This information is required to configure the correct permissions level in the system and ensure the user has appropriate access rights for their role."
}
]

Do not include "unknown" in the list of possible answers. Ensure no two questions ask for the same underlying information in different ways. If nothing is missing, respond with [].
Only respond with JSON and nothing else."#;

/// Lists the questions that must be answered before a task can be planned.
/// Keeps its history so it does not ask the same thing twice.
#[derive(Debug, Default)]
pub struct MissingInfoAgent;

#[async_trait]
impl AgentBehavior for MissingInfoAgent {
    fn name(&self) -> &str {
        "missing_info"
    }

    fn system_prompt(&self, _tools_description: &str) -> String {
        MISSING_INFO_PROMPT.to_string()
    }
}

/// Turns a question and the user's answer into one declarative statement.
#[derive(Debug, Default)]
pub struct AnswerHandlingAgent {
    question: String,
    answer: String,
}

impl AnswerHandlingAgent {
    pub fn set_exchange(&mut self, question: &str, answer: &str) {
        debug!(question, answer, "answer handling exchange set");
        self.question = question.to_string();
        self.answer = answer.to_string();
    }
}

#[async_trait]
impl AgentBehavior for AnswerHandlingAgent {
    fn name(&self) -> &str {
        "answer_handling"
    }

    fn system_prompt(&self, _tools_description: &str) -> String {
        format!(
            "Create a statement from question '{}' and answer '{}'. Respond with that statement and nothing else.",
            self.question, self.answer
        )
    }
}

#[derive(Debug, Default)]
pub struct StepPlannerAgent {
    task_description: String,
}

impl StepPlannerAgent {
    pub fn set_task_description(&mut self, description: &str) {
        self.task_description = description.to_string();
    }
}

#[async_trait]
impl AgentBehavior for StepPlannerAgent {
    fn name(&self) -> &str {
        "step_planner"
    }

    fn system_prompt(&self, _tools_description: &str) -> String {
        format!(
            r#"You are a web browser automation expert. Your task is to create a detailed, step-by-step plan for accomplishing the given task.

TASK DESCRIPTION:
{}

REQUIREMENTS:
1. Break down the task into clear, actionable steps
2. For each prerequisite, include a verification step to check if it's already met
3. For every navigation/interaction step, include a validation step to confirm the browser is in the expected state
4. Use specific, unambiguous language for actions (e.g., "Click the blue 'Submit' button" rather than "Submit")
5. Include error handling considerations where appropriate
6. Assume the browser starts from a blank page unless specified otherwise

OUTPUT FORMAT:
Respond with a JSON array only. Each step should be an object with these fields:
- "step_description": Brief description of what this step accomplishes
- "action": Specific action to perform (e.g., "Navigate to https://example.com", "Click element with text 'Login'")
- "validation_action": How to verify the step succeeded (e.g., "Page title contains 'Dashboard'", "Login button is no longer visible")
- "error_handling": (optional) What to do if the step fails

EXAMPLE:
[
  {{
    "step_description": "Navigate to the main page",
    "action": "Navigate to https://github.com",
    "validation_action": "GitHub logo is visible"
  }},
  {{
    "step_description": "Access repository settings",
    "action": "Click on the 'Settings' tab in the repository navigation",
    "validation_action": "'General' section is visible"
  }}
]

Output only the JSON array, no additional text or explanations."#,
            self.task_description
        )
    }
}
