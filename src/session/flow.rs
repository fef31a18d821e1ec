//! Linear flow definitions: the scripts and intake forms a tracker drives.
//!
//! A flow is an ordered list of stages. Scripts just read their stages out
//! one by one and end with a closing line; intake forms record each answer
//! under the stage's field name and end with a generated analysis.

use serde::{Deserialize, Serialize};

/// The two shapes a flow can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    FixedScript,
    StagedIntake,
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FixedScript => "fixed_script",
            Self::StagedIntake => "staged_intake",
        };
        write!(f, "{s}")
    }
}

/// One step of a flow.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Field the answer is stored under (intake forms only).
    pub field: String,
    /// Question sent verbatim when no generated one is available.
    pub question: String,
    /// Template sent to the completion provider to phrase the question.
    /// Placeholders `{field}` are filled from the answers collected so far.
    pub follow_up: Option<String>,
}

impl Stage {
    pub fn new(field: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            question: question.into(),
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, template: impl Into<String>) -> Self {
        self.follow_up = Some(template.into());
        self
    }
}

/// What happens after the last stage.
#[derive(Debug, Clone)]
pub enum Finish {
    /// Send a fixed closing line.
    Closing(String),
    /// Ask the provider for an analysis of everything collected.
    Analysis {
        system_prompt: String,
        template: String,
        temperature: Option<f32>,
    },
}

/// A complete flow definition.
#[derive(Debug, Clone)]
pub struct LinearFlow {
    pub name: String,
    /// Line sent before the first question.
    pub opening: Option<String>,
    pub stages: Vec<Stage>,
    pub finish: Finish,
    /// System prompt used when phrasing follow-up questions.
    pub question_system_prompt: Option<String>,
}

impl LinearFlow {
    /// A fixed question script.
    pub fn script<I, S>(name: &str, opening: Option<&str>, lines: I, closing: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages = lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| Stage::new(format!("step_{i}"), line))
            .collect();
        Self {
            name: name.to_string(),
            opening: opening.map(str::to_string),
            stages,
            finish: Finish::Closing(closing.to_string()),
            question_system_prompt: None,
        }
    }

    /// A staged intake form ending in an analysis.
    pub fn intake(
        name: &str,
        opening: Option<&str>,
        stages: Vec<Stage>,
        system_prompt: &str,
        template: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            opening: opening.map(str::to_string),
            stages,
            finish: Finish::Analysis {
                system_prompt: system_prompt.to_string(),
                template: template.to_string(),
                temperature: None,
            },
            question_system_prompt: Some(system_prompt.to_string()),
        }
    }

    pub fn with_question_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.question_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_analysis_temperature(mut self, value: f32) -> Self {
        if let Finish::Analysis { temperature, .. } = &mut self.finish {
            *temperature = Some(value);
        }
        self
    }

    pub fn kind(&self) -> FlowKind {
        match self.finish {
            Finish::Closing(_) => FlowKind::FixedScript,
            Finish::Analysis { .. } => FlowKind::StagedIntake,
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Name of the stage at `step`, or `"completed"` past the end.
    pub fn stage_name(&self, step: usize) -> &str {
        self.stages
            .get(step)
            .map(|s| s.field.as_str())
            .unwrap_or("completed")
    }
}

/// Fill `{field}` placeholders from `fields`. Unknown placeholders stay as-is.
pub fn render(template: &str, fields: &[(String, String)]) -> String {
    fields.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_kind_and_names() {
        let flow = LinearFlow::script("talk", Some("hi"), ["a", "b"], "bye");
        assert_eq!(flow.kind(), FlowKind::FixedScript);
        assert_eq!(flow.len(), 2);
        assert_eq!(flow.stage_name(1), "step_1");
        assert_eq!(flow.stage_name(2), "completed");
    }

    #[test]
    fn intake_kind() {
        let flow = LinearFlow::intake(
            "intake",
            None,
            vec![Stage::new("request", "q")],
            "sys",
            "{request}",
        )
        .with_analysis_temperature(0.5);
        assert_eq!(flow.kind(), FlowKind::StagedIntake);
        match flow.finish {
            Finish::Analysis { temperature, .. } => assert_eq!(temperature, Some(0.5)),
            Finish::Closing(_) => panic!("expected analysis"),
        }
    }

    #[test]
    fn render_fills_known_placeholders() {
        let fields = vec![
            ("request".to_string(), "не сплю".to_string()),
            ("emotions".to_string(), "тревога".to_string()),
        ];
        let out = render("Запрос: {request}. Чувства: {emotions}. {thoughts}", &fields);
        assert_eq!(out, "Запрос: не сплю. Чувства: тревога. {thoughts}");
    }

    #[test]
    fn kind_display_matches_serde() {
        for kind in [FlowKind::FixedScript, FlowKind::StagedIntake] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(format!("\"{kind}\""), json);
        }
    }
}
