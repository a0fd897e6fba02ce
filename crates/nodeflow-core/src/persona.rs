//! Review personas used by the agent node's quality check.

use serde::{Deserialize, Serialize};

/// Persona that writes the final summary. It also reviews during quality
/// checks but is left out of the aggregated score.
pub const SUMMARIZER_ID: &str = "summarizer";

/// A named evaluation profile producing one independent review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub evaluation_criteria: Vec<String>,
}

impl Persona {
    pub fn new(id: &str, role: &str, focus: &[&str]) -> Self {
        let focus: Vec<String> = focus.iter().map(|s| s.to_string()).collect();
        Self {
            id: id.to_string(),
            role: role.to_string(),
            evaluation_criteria: focus.clone(),
            focus_areas: focus,
        }
    }

    pub fn is_summarizer(&self) -> bool {
        self.id == SUMMARIZER_ID
    }
}

/// The built-in persona table.
pub fn default_personas() -> Vec<Persona> {
    vec![
        Persona::new(
            "technical_expert",
            "an expert who checks technical accuracy and detail",
            &["technical accuracy", "implementation details", "best practices"],
        ),
        Persona::new(
            "user_experience",
            "an expert who evaluates from the user's point of view",
            &["usability", "understandability", "user-friendliness"],
        ),
        Persona::new(
            "business_analyst",
            "an expert who evaluates business value and practicality",
            &["business value", "practicality", "ROI"],
        ),
        Persona::new(
            SUMMARIZER_ID,
            "an expert who analyzes results and summarizes them clearly",
            &["overview", "key points", "next steps", "supplementary information"],
        ),
    ]
}
