//! System instruction assembly.
//!
//! Deterministic text built from the agent configuration, a focused
//! objective when the student picked one, and optional source context.

use crate::agent::config::{AgentConfig, Guardrails};

/// Builds the system instruction for one turn.
pub fn build_system_prompt(
    config: &AgentConfig,
    focused_objective: Option<usize>,
    source_context: Option<&str>,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    let mut identity = config.agent_type.identity().to_string();
    identity.push_str(&format!(
        "\nYour name is {}. {}",
        config.name, config.description
    ));
    sections.push(identity);

    let rules = guardrail_rules(&config.guardrails);
    if !rules.is_empty() {
        sections.push(format!("Rules you must follow:\n{}", bullet_list(&rules)));
    }

    if !config.objectives.is_empty() {
        let listed: Vec<String> = config
            .objectives
            .iter()
            .map(|o| o.text.clone())
            .collect();
        sections.push(format!(
            "Learning objectives for this student:\n{}",
            bullet_list(&listed)
        ));

        if let Some(index) = focused_objective {
            if let Some(objective) = config.objectives.get(index) {
                sections.push(format!(
                    "The student is currently working toward: {}. Steer the \
                     conversation toward this objective.",
                    objective.text
                ));
            }
        }
    }

    let mut scaffolding = format!(
        "Scaffolding level: {}.",
        config.scaffolding_level.as_str()
    );
    if !config.scaffolding_behaviors.is_empty() {
        scaffolding.push_str(&format!(
            "\nApply these behaviors:\n{}",
            bullet_list(&config.scaffolding_behaviors)
        ));
    }
    sections.push(scaffolding);

    if let Some(context) = source_context {
        if !context.trim().is_empty() {
            sections.push(format!(
                "Ground your answers in the following course material. If the \
                 material does not cover a question, say so.\n---\n{}\n---",
                context
            ));
        }
    }

    sections.join("\n\n")
}

fn guardrail_rules(guardrails: &Guardrails) -> Vec<String> {
    let mut rules = Vec::new();
    if guardrails.no_direct_answers {
        rules.push(
            "Never give the final answer outright. Guide the student toward it \
             with questions and hints."
                .to_string(),
        );
    }
    if guardrails.stay_on_topic {
        rules.push(
            "Stay on the subject of this course. Politely redirect off-topic \
             questions back to the material."
                .to_string(),
        );
    }
    if guardrails.age_appropriate {
        rules.push("Keep all content and examples age-appropriate for students.".to_string());
    }
    if guardrails.no_personal_data {
        rules.push(
            "Never ask for or store personal information about the student.".to_string(),
        );
    }
    if guardrails.cite_sources {
        rules.push(
            "When you draw on course material, name the source you used.".to_string(),
        );
    }
    for avoid in &guardrails.custom_avoid {
        let avoid = avoid.trim();
        if !avoid.is_empty() {
            rules.push(format!("Avoid: {}", avoid));
        }
    }
    rules
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
