use std::fmt;
use std::sync::Arc;

use ai_agent::{Agent, AgentConfig, AgentError, LanguageModelClient};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::agents::{AnswerHandlingAgent, MissingInfoAgent, StepPlannerAgent};

/// One question emitted by the missing-information agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub question: String,
    #[serde(default)]
    pub possible_answers: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

impl ClarificationQuestion {
    /// Renders the question the way it is shown to the user.
    pub fn prompt(&self) -> String {
        let mut text = format!("Question: {}", self.question);
        if !self.possible_answers.is_empty() {
            text.push_str(&format!(
                "\nPossible answers: {}",
                self.possible_answers.join(", ")
            ));
        }
        if !self.reason.is_empty() {
            text.push_str(&format!("\nReason: {}", self.reason));
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_description: String,
    pub action: String,
    pub validation_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationTask {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerState {
    Idle,
    AwaitingAnswer,
    PlanReady,
}

impl fmt::Display for PlannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlannerState::Idle => "idle",
            PlannerState::AwaitingAnswer => "awaiting_answer",
            PlannerState::PlanReady => "plan_ready",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("`{operation}` is not valid while the planner is {state}")]
    InvalidState {
        operation: &'static str,
        state: PlannerState,
    },
    #[error("missing-information response is not a question list: {0}")]
    MalformedQuestions(String),
    #[error("step plan response is not a list of steps: {0}")]
    MalformedPlan(String),
    #[error("task description is empty")]
    EmptyDescription,
    #[error("answer produced an empty statement")]
    EmptyStatement,
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Clarify-then-plan dialogue: asks one missing question at a time until
/// the task is fully specified, then produces an ordered step plan.
pub struct ClarificationPlanner {
    missing_info: Agent<MissingInfoAgent>,
    answers: Agent<AnswerHandlingAgent>,
    steps: Agent<StepPlannerAgent>,
    state: PlannerState,
    pending: Option<ClarificationQuestion>,
}

impl ClarificationPlanner {
    pub fn new(model: Arc<dyn LanguageModelClient>, config: AgentConfig) -> Self {
        Self {
            missing_info: Agent::new(MissingInfoAgent, model.clone(), config.clone()),
            answers: Agent::new(AnswerHandlingAgent::default(), model.clone(), config.clone()),
            steps: Agent::new(StepPlannerAgent::default(), model, config),
            state: PlannerState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn pending_question(&self) -> Option<&ClarificationQuestion> {
        self.pending.as_ref()
    }

    /// Asks the missing-information agent about `description`. Returns true
    /// when a question is now waiting for an answer.
    pub async fn check_for_missing_information(
        &mut self,
        description: &str,
    ) -> Result<bool, PlannerError> {
        self.expect_not(PlannerState::AwaitingAnswer, "check_for_missing_information")?;
        info!(description, "checking task for missing information");

        let response = self.missing_info.process(description).await?;
        let trimmed = response.trim();
        let questions: Vec<ClarificationQuestion> = if trimmed.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(trimmed).map_err(|err| {
                warn!(error = %err, response = trimmed, "unparseable question list");
                PlannerError::MalformedQuestions(err.to_string())
            })?
        };

        match questions.into_iter().next() {
            Some(question) => {
                info!(question = %question.question, "clarification needed");
                self.pending = Some(question);
                self.state = PlannerState::AwaitingAnswer;
                Ok(true)
            }
            None => {
                self.pending = None;
                self.state = PlannerState::PlanReady;
                Ok(false)
            }
        }
    }

    pub fn prepare_question(&self) -> Result<String, PlannerError> {
        match (&self.state, &self.pending) {
            (PlannerState::AwaitingAnswer, Some(question)) => Ok(question.prompt()),
            _ => Err(self.invalid("prepare_question")),
        }
    }

    /// Converts the user's answer to the pending question into a statement
    /// that can be fed back into [`Self::check_for_missing_information`].
    pub async fn process_answer(&mut self, answer: &str) -> Result<String, PlannerError> {
        let question = match (&self.state, &self.pending) {
            (PlannerState::AwaitingAnswer, Some(question)) => question.question.clone(),
            _ => return Err(self.invalid("process_answer")),
        };

        self.answers.behavior_mut().set_exchange(&question, answer);
        let statement = self.answers.process_task("?").await?.final_text;
        let statement = statement.trim();
        if statement.is_empty() {
            return Err(PlannerError::EmptyStatement);
        }

        self.pending = None;
        self.state = PlannerState::Idle;
        Ok(statement.to_string())
    }

    pub async fn prepare_plan(
        &mut self,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<AutomationTask, PlannerError> {
        if self.state != PlannerState::PlanReady {
            return Err(self.invalid("prepare_plan"));
        }
        if description.trim().is_empty() {
            return Err(PlannerError::EmptyDescription);
        }

        info!(id, name, "preparing plan");
        self.steps.behavior_mut().set_task_description(description);
        let response = self.steps.process_task("?").await?.final_text;
        let steps: Vec<PlanStep> = serde_json::from_str(response.trim()).map_err(|err| {
            warn!(error = %err, "unparseable step plan");
            PlannerError::MalformedPlan(err.to_string())
        })?;
        info!(id, steps = steps.len(), "plan prepared");

        Ok(AutomationTask {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            steps,
        })
    }

    /// Starts a fresh dialogue, forgetting earlier questions.
    pub fn reset(&mut self) {
        self.state = PlannerState::Idle;
        self.pending = None;
        self.missing_info.reset_conversation();
    }

    fn expect_not(
        &self,
        forbidden: PlannerState,
        operation: &'static str,
    ) -> Result<(), PlannerError> {
        if self.state == forbidden {
            return Err(self.invalid(operation));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> PlannerError {
        PlannerError::InvalidState {
            operation,
            state: self.state,
        }
    }
}
