use nodeflow_core::persona::Persona;

use super::plan::PlannedTask;
use super::state::AgentRunState;

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".into();
    }
    items
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn plan_prompt(state: &AgentRunState) -> String {
    let capabilities = state.enabled_capabilities();
    let behavior = serde_json::to_string(&state.behavior).unwrap_or_default();
    let context = serde_json::to_string_pretty(&state.context).unwrap_or_default();
    format!(
        r#"Goal: {goal}
Constraints:
{constraints}
Available capabilities: {capabilities}
Behavior settings: {behavior}
Current context:
{context}

Create a concrete task plan that achieves this goal.
For every task give a description, the resources it needs, its dependencies
and the expected result.

Respond with ONLY valid JSON in this format:
{{
  "tasks": [
    {{
      "description": "what to do",
      "resources": ["required resource"],
      "dependencies": ["task this depends on"],
      "expected_result": "what the task produces"
    }}
  ],
  "fallback_plans": ["alternative plan"]
}}"#,
        goal = state.goal,
        constraints = bullet_list(&state.constraints),
        capabilities = if capabilities.is_empty() {
            "(none)".to_string()
        } else {
            capabilities.join(", ")
        },
    )
}

pub fn task_prompt(task: &PlannedTask, state: &AgentRunState, search: Option<&str>) -> String {
    let task_json = serde_json::to_string_pretty(task).unwrap_or_default();
    let context = serde_json::to_string_pretty(&state.context).unwrap_or_default();
    let research = match search {
        Some(results) => format!("\nWeb search results for this task:\n{}\n", results),
        None => String::new(),
    };
    format!(
        r#"Carry out the following task.

Task:
{task_json}

Context:
{context}
{research}
Rules:
1. Mark any statement that needs fact-checking as "needs verification".
2. Label uncertain information as "speculation".
3. Always cite sources when you have them.
4. Prefix judgements based on assumptions with "Assumption:".
5. Record concrete steps and results for any research you actually did.
6. Never claim to have done research or experiments you did not do.

Respond with ONLY valid JSON in this format:
{{
  "status": "success" | "failure",
  "output": "the result of the task",
  "error": "error message if the task failed",
  "next_steps": ["next step"],
  "assumptions": ["assumption"],
  "verification_needed": ["item to verify"],
  "sources": ["source"]
}}"#
    )
}

pub fn review_prompt(persona: &Persona, content: &str) -> String {
    format!(
        r#"You are {role}.
Evaluate the content below and suggest improvements.

Content:
{content}

Focus areas: {focus}
Evaluation criteria: {criteria}

Score each of the following from 0.0 to 1.0:
1. Purpose achievement
2. Constraint compliance
3. Quality standards
4. Feasibility

Rules:
1. Evaluate only facts you can actually confirm.
2. Label evaluations based on guesses as "speculation".
3. Mark items that need checking as "needs verification".
4. Avoid improvement suggestions without concrete grounds.

Respond with ONLY valid JSON in this format:
{{
  "scores": {{
    "purpose_achievement": 0.0,
    "constraint_compliance": 0.0,
    "quality_standards": 0.0,
    "feasibility": 0.0
  }},
  "overall_score": 0.0,
  "strengths": ["confirmed strength"],
  "weaknesses": ["confirmed weakness"],
  "improvements": ["concrete improvement"],
  "priority": "high" | "medium" | "low",
  "verification_needed": ["item to verify"],
  "assumptions": ["assumption"]
}}"#,
        role = persona.role,
        focus = persona.focus_areas.join(", "),
        criteria = persona.evaluation_criteria.join(", "),
    )
}

pub fn improvement_prompt(content: &str, improvements: &[String]) -> String {
    format!(
        "Apply the following improvements to the content.\n\n\
         Original content:\n{content}\n\n\
         Improvements:\n{}\n\n\
         Return only the improved content.",
        bullet_list(improvements)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::node::AgentNodeConfig;
    use nodeflow_core::persona::default_personas;

    fn state() -> AgentRunState {
        let mut config = AgentNodeConfig {
            goal: "Write a launch post".into(),
            constraints: vec!["under 200 words".into()],
            ..Default::default()
        };
        config.capabilities.insert("web_search".into(), true);
        config.capabilities.insert("review".into(), false);
        AgentRunState::new(config, Some("draft notes"))
    }

    #[test]
    fn test_plan_prompt_contents() {
        let prompt = plan_prompt(&state());
        assert!(prompt.contains("Goal: Write a launch post"));
        assert!(prompt.contains("- under 200 words"));
        assert!(prompt.contains("Available capabilities: web_search\n"));
        assert!(prompt.contains("draft notes"));
        assert!(prompt.contains("\"fallback_plans\""));
    }

    #[test]
    fn test_task_prompt_includes_search_results() {
        let task = PlannedTask {
            description: "Research competitors".into(),
            ..Default::default()
        };
        let with = task_prompt(&task, &state(), Some("**Acme**"));
        let without = task_prompt(&task, &state(), None);
        assert!(with.contains("Web search results for this task:\n**Acme**"));
        assert!(!without.contains("Web search results"));
        assert!(with.contains("Research competitors"));
    }

    #[test]
    fn test_review_prompt_uses_persona() {
        let persona = &default_personas()[0];
        let prompt = review_prompt(persona, "the content");
        assert!(prompt.starts_with(&format!("You are {}.", persona.role)));
        assert!(prompt.contains("technical accuracy"));
    }

    #[test]
    fn test_improvement_prompt_lists_items() {
        let prompt = improvement_prompt("body", &["Shorten intro".into()]);
        assert!(prompt.contains("Original content:\nbody"));
        assert!(prompt.contains("- Shorten intro"));
    }
}
