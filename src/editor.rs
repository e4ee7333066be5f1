use thiserror::Error;
use tracing::{debug, info};

use crate::{
    api::ApiClient,
    error::{ApiError, ValidationErrors},
    types::{AgentConfiguration, ConversationStep},
};

const NAME_MAX: usize = 100;
const TEXT_MAX: usize = 500;
const STEP_LABEL_MAX: usize = 100;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("configuration is not in edit mode")]
    NotEditing,
    #[error("step {index} is out of range ({len} steps)")]
    StepOutOfRange { index: usize, len: usize },
    #[error("{list} entry {index} is out of range ({len} entries)")]
    EntryOutOfRange {
        list: &'static str,
        index: usize,
        len: usize,
    },
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMove {
    Up,
    Down,
}

/// Holds the saved configuration and, while editing, a draft copy. Edits only
/// touch the draft; `save` replaces the whole configuration on the backend.
#[derive(Debug, Clone)]
pub struct ConfigurationEditor {
    saved: AgentConfiguration,
    draft: Option<AgentConfiguration>,
}

impl ConfigurationEditor {
    /// Loads `id`, else the first active configuration, else the first one,
    /// else starts from the built-in template.
    pub async fn load(api: &ApiClient, id: Option<i64>) -> Result<Self, ApiError> {
        let config = match id {
            Some(id) => api.get_configuration(id).await?,
            None => {
                let mut configs = api.list_configurations().await?;
                let preferred = configs
                    .iter()
                    .position(|config| config.is_active)
                    .unwrap_or(0);
                if configs.is_empty() {
                    debug!("no stored configuration; starting from the template");
                    AgentConfiguration::logistics_template()
                } else {
                    configs.swap_remove(preferred)
                }
            }
        };
        Ok(Self::from_configuration(config))
    }

    pub fn from_configuration(mut config: AgentConfiguration) -> Self {
        config.conversation_flow.sort_by_key(|step| step.order);
        config.renumber_steps();
        Self {
            saved: config,
            draft: None,
        }
    }

    /// The draft while editing, otherwise the saved configuration.
    pub fn configuration(&self) -> &AgentConfiguration {
        self.draft.as_ref().unwrap_or(&self.saved)
    }

    pub fn saved(&self) -> &AgentConfiguration {
        &self.saved
    }

    pub fn is_editing(&self) -> bool {
        self.draft.is_some()
    }

    pub fn is_new(&self) -> bool {
        self.saved.id.is_none()
    }

    pub fn begin_edit(&mut self) {
        if self.draft.is_none() {
            self.draft = Some(self.saved.clone());
        }
    }

    pub fn cancel_edit(&mut self) {
        if self.draft.take().is_some() {
            debug!("discarded configuration draft");
        }
    }

    fn draft_mut(&mut self) -> Result<&mut AgentConfiguration, EditorError> {
        self.draft.as_mut().ok_or(EditorError::NotEditing)
    }

    pub fn set_agent_name(&mut self, name: impl Into<String>) -> Result<(), EditorError> {
        self.draft_mut()?.agent_name = name.into();
        Ok(())
    }

    pub fn set_greeting(&mut self, greeting: impl Into<String>) -> Result<(), EditorError> {
        self.draft_mut()?.greeting = greeting.into();
        Ok(())
    }

    pub fn set_primary_objective(
        &mut self,
        objective: impl Into<String>,
    ) -> Result<(), EditorError> {
        self.draft_mut()?.primary_objective = objective.into();
        Ok(())
    }

    pub fn set_active(&mut self, active: bool) -> Result<(), EditorError> {
        self.draft_mut()?.is_active = active;
        Ok(())
    }

    /// Appends a step and returns its index.
    pub fn add_step(&mut self, step: ConversationStep) -> Result<usize, EditorError> {
        let draft = self.draft_mut()?;
        draft.conversation_flow.push(step);
        draft.renumber_steps();
        Ok(draft.conversation_flow.len() - 1)
    }

    /// Replaces the label, prompt and `required` flag of a step, keeping its
    /// backend id and position.
    pub fn update_step(
        &mut self,
        index: usize,
        step: ConversationStep,
    ) -> Result<(), EditorError> {
        let draft = self.draft_mut()?;
        let len = draft.conversation_flow.len();
        let existing = draft
            .conversation_flow
            .get_mut(index)
            .ok_or(EditorError::StepOutOfRange { index, len })?;
        existing.step = step.step;
        existing.prompt = step.prompt;
        existing.required = step.required;
        Ok(())
    }

    pub fn remove_step(&mut self, index: usize) -> Result<ConversationStep, EditorError> {
        let draft = self.draft_mut()?;
        let len = draft.conversation_flow.len();
        if index >= len {
            return Err(EditorError::StepOutOfRange { index, len });
        }
        let removed = draft.conversation_flow.remove(index);
        draft.renumber_steps();
        Ok(removed)
    }

    /// Swaps a step with its neighbour. Returns `false` when the step is
    /// already at that edge.
    pub fn move_step(&mut self, index: usize, direction: StepMove) -> Result<bool, EditorError> {
        let draft = self.draft_mut()?;
        let len = draft.conversation_flow.len();
        if index >= len {
            return Err(EditorError::StepOutOfRange { index, len });
        }
        let target = match direction {
            StepMove::Up if index == 0 => return Ok(false),
            StepMove::Up => index - 1,
            StepMove::Down if index + 1 == len => return Ok(false),
            StepMove::Down => index + 1,
        };
        draft.conversation_flow.swap(index, target);
        draft.renumber_steps();
        Ok(true)
    }

    pub fn add_fallback(&mut self, response: impl Into<String>) -> Result<(), EditorError> {
        self.draft_mut()?.fallback_responses.push(response.into());
        Ok(())
    }

    pub fn remove_fallback(&mut self, index: usize) -> Result<String, EditorError> {
        let draft = self.draft_mut()?;
        remove_entry(&mut draft.fallback_responses, "fallback_responses", index)
    }

    pub fn add_ending_condition(
        &mut self,
        condition: impl Into<String>,
    ) -> Result<(), EditorError> {
        self.draft_mut()?.call_ending_conditions.push(condition.into());
        Ok(())
    }

    pub fn remove_ending_condition(&mut self, index: usize) -> Result<String, EditorError> {
        let draft = self.draft_mut()?;
        remove_entry(
            &mut draft.call_ending_conditions,
            "call_ending_conditions",
            index,
        )
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_configuration(self.configuration())
    }

    /// Validates, then POSTs a new configuration or PUTs over the known id.
    /// The backend's answer becomes the saved state and edit mode ends.
    pub async fn save(&mut self, api: &ApiClient) -> Result<&AgentConfiguration, EditorError> {
        let mut config = self.configuration().clone();
        config.renumber_steps();
        validate_configuration(&config)?;

        let stored = match config.id {
            Some(id) => api.update_configuration(id, &config).await?,
            None => api.create_configuration(&config).await?,
        };
        info!(id = ?stored.id, name = %stored.agent_name, "configuration saved");

        *self = Self::from_configuration(stored);
        Ok(&self.saved)
    }
}

fn remove_entry(
    entries: &mut Vec<String>,
    list: &'static str,
    index: usize,
) -> Result<String, EditorError> {
    if index >= entries.len() {
        return Err(EditorError::EntryOutOfRange {
            list,
            index,
            len: entries.len(),
        });
    }
    Ok(entries.remove(index))
}

fn check_text(errors: &mut ValidationErrors, field: String, value: &str, max: usize) {
    if value.trim().is_empty() {
        errors.add(field, "is required");
    } else if value.chars().count() > max {
        errors.add(field, format!("must be at most {max} characters"));
    }
}

/// Field rules enforced by the backend, checked before any request.
pub fn validate_configuration(config: &AgentConfiguration) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_text(&mut errors, "agent_name".into(), &config.agent_name, NAME_MAX);
    check_text(&mut errors, "greeting".into(), &config.greeting, TEXT_MAX);
    check_text(
        &mut errors,
        "primary_objective".into(),
        &config.primary_objective,
        TEXT_MAX,
    );

    if config.conversation_flow.is_empty() {
        errors.add("conversation_flow", "at least one step is required");
    }
    for (index, step) in config.conversation_flow.iter().enumerate() {
        check_text(
            &mut errors,
            format!("conversation_flow[{index}].step"),
            &step.step,
            STEP_LABEL_MAX,
        );
        check_text(
            &mut errors,
            format!("conversation_flow[{index}].prompt"),
            &step.prompt,
            TEXT_MAX,
        );
    }

    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(editor: &ConfigurationEditor) -> Vec<String> {
        editor
            .configuration()
            .conversation_flow
            .iter()
            .map(|step| step.step.clone())
            .collect()
    }

    fn editing_template() -> ConfigurationEditor {
        let mut editor =
            ConfigurationEditor::from_configuration(AgentConfiguration::logistics_template());
        editor.begin_edit();
        editor
    }

    #[test]
    fn edits_require_edit_mode() {
        let mut editor =
            ConfigurationEditor::from_configuration(AgentConfiguration::logistics_template());

        assert!(matches!(
            editor.set_agent_name("Dispatcher"),
            Err(EditorError::NotEditing)
        ));
        assert!(matches!(
            editor.move_step(1, StepMove::Down),
            Err(EditorError::NotEditing)
        ));
        assert_eq!(editor.configuration().agent_name, "Logistics Assistant");
    }

    #[test]
    fn moving_down_then_up_restores_order() {
        let mut editor = editing_template();
        let original = labels(&editor);
        assert_eq!(original.len(), 5);

        assert!(editor.move_step(1, StepMove::Down).expect("move down"));
        assert_eq!(labels(&editor)[2], original[1]);
        assert!(editor.move_step(2, StepMove::Up).expect("move up"));

        assert_eq!(labels(&editor), original);
        let orders: Vec<u32> = editor
            .configuration()
            .conversation_flow
            .iter()
            .map(|step| step.order)
            .collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn moving_past_an_edge_is_a_no_op() {
        let mut editor = editing_template();
        let before = labels(&editor);

        assert!(!editor.move_step(0, StepMove::Up).expect("edge"));
        assert!(!editor.move_step(4, StepMove::Down).expect("edge"));
        assert!(matches!(
            editor.move_step(5, StepMove::Up),
            Err(EditorError::StepOutOfRange { index: 5, len: 5 })
        ));
        assert_eq!(labels(&editor), before);
    }

    #[test]
    fn structural_changes_renumber_steps() {
        let mut editor = editing_template();
        editor.remove_step(0).expect("remove");
        let index = editor
            .add_step(ConversationStep::new("Follow-up", "Schedule a callback", false))
            .expect("add");

        let flow = &editor.configuration().conversation_flow;
        assert_eq!(index, 4);
        assert_eq!(flow[0].step, "Load Confirmation");
        assert_eq!(flow[4].order, 5);
        assert!(flow.iter().enumerate().all(|(i, step)| step.order == i as u32 + 1));
    }

    #[test]
    fn cancel_discards_the_draft() {
        let mut editor = editing_template();
        editor.set_greeting("Changed").expect("edit");
        editor.add_fallback("Sorry?").expect("edit");
        editor.cancel_edit();

        assert!(!editor.is_editing());
        assert_eq!(editor.configuration(), editor.saved());
        assert_eq!(editor.configuration().fallback_responses.len(), 3);
    }

    #[test]
    fn validation_reports_each_field() {
        let mut editor = editing_template();
        editor.set_agent_name("   ").expect("edit");
        editor.set_greeting("x".repeat(501)).expect("edit");
        editor
            .update_step(2, ConversationStep::new("", "Verify", true))
            .expect("edit");

        let errors = editor.validate().unwrap_err();
        assert_eq!(
            errors.fields(),
            vec!["agent_name", "conversation_flow[2].step", "greeting"]
        );
        assert_eq!(errors.get("greeting"), Some("must be at most 500 characters"));
    }

    #[test]
    fn empty_flow_is_invalid() {
        let mut editor = editing_template();
        for _ in 0..5 {
            editor.remove_step(0).expect("remove");
        }
        let errors = editor.validate().unwrap_err();
        assert!(errors.contains("conversation_flow"));
    }

    #[test]
    fn removing_missing_entries_is_reported() {
        let mut editor = editing_template();
        assert_eq!(
            editor.remove_ending_condition(3).expect("remove"),
            "Driver hangs up"
        );
        assert!(matches!(
            editor.remove_fallback(9),
            Err(EditorError::EntryOutOfRange {
                list: "fallback_responses",
                ..
            })
        ));
    }
}
