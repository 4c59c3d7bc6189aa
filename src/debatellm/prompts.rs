//! Prompt templates for each debate round.
//!
//! Round 1 asks every agent for an independent proposal. Later rounds show
//! each agent the other agents' previous responses and ask for a verdict on
//! every section. All prompts end with the JSON response schema that
//! [`parse_response`](crate::parser::parse_response) expects.

use crate::debatellm::response::Response;

/// Response schema and output rules appended to every system prompt.
pub const RESPONSE_FORMAT: &str = r#"
Respond with exactly one JSON object and nothing else: no prose before or after it, no markdown fences.

{
  "sections": [
    {
      "title": "Architecture",
      "content": "Implementation-level detail for this section",
      "verdict": "approve",
      "reasoning": "Why you chose this verdict"
    }
  ],
  "overall_verdict": "approve",
  "change_requests": [],
  "summary": "One paragraph summary",
  "project_title": "short-kebab-case-name"
}

Rules:
- "verdict" and "overall_verdict" must be one of "approve", "reject", "suggest_changes".
- Cover at least: Architecture, Data Model, API Design, Authentication, Frontend, State Management, Deployment, Security, Testing.
- "change_requests" is an array of plain strings.
- "project_title" is a 2-4 word kebab-case name for the project.

Each section's "content" must be specific enough to implement without follow-up questions:
- every file to create or modify, with its full path;
- code for key interfaces, types, function signatures and non-trivial logic;
- exact dependency names and versions for new packages;
- the order in which to build things;
- edge cases, error handling and fallback behaviour;
- for APIs, every endpoint or message with its request and response shape."#;

/// Sent instead of the original prompt when a reply could not be parsed.
pub const CORRECTIVE_PROMPT: &str = "Your previous response was not valid JSON matching the required schema. \
Reply again with ONLY the JSON object. No markdown fences and no explanation.";

/// System prompt for the proposal round.
pub fn system_prompt_round1(agent_name: &str, stack: Option<&str>, codebase_context: Option<&str>) -> String {
    let stack_line = stack
        .filter(|s| !s.is_empty())
        .map(|s| format!("\nPreferred tech stack: {}", s))
        .unwrap_or_default();

    let codebase_block = codebase_context
        .filter(|c| !c.is_empty())
        .map(|context| {
            format!(
                "\n\nYou can explore the existing codebase with read-only tools (read, glob, grep, codesearch). \
Use them before proposing anything: read the key files, check dependencies and follow the patterns already in use. \
Your specification must build on what exists rather than contradict it.\n\nCodebase snapshot:\n{}",
                context
            )
        })
        .unwrap_or_default();

    format!(
        "You are {name}, a senior software architect taking part in a design debate.\n\n\
Given a project description, write an implementation-ready technical specification split into logical sections. \
Make concrete, opinionated technology choices and justify them. Write detail a developer can follow directly, not summaries.{stack}\n\n\
This is round 1: you are proposing, not reviewing, so set every verdict to \"approve\".{codebase}\n\n\
Your final message must be the JSON specification.\n{format}",
        name = agent_name,
        stack = stack_line,
        codebase = codebase_block,
        format = RESPONSE_FORMAT
    )
}

/// System prompt for review rounds.
pub fn system_prompt_round_n(agent_name: &str, round: usize) -> String {
    format!(
        "You are {name}, continuing round {round} of a design debate.\n\n\
You will be shown the other participants' latest proposals. Give every section a verdict:\n\
- \"approve\" when you agree with it;\n\
- \"reject\" when you fundamentally disagree, explaining why;\n\
- \"suggest_changes\" when it is close but needs specific modifications.\n\n\
Aim to converge. Approve reasonable approaches even if you would have done them slightly differently, \
and reserve rejections and suggestions for meaningful disagreements.\n{format}",
        name = agent_name,
        round = round,
        format = RESPONSE_FORMAT
    )
}

/// User prompt for the proposal round.
pub fn user_prompt_round1(task: &str) -> String {
    format!(
        "Design a technical specification for the following project:\n\n{}\n\nRespond with JSON only.",
        task
    )
}

/// User prompt for review rounds. `others` holds every other agent's
/// previous response in configured order.
pub fn user_prompt_round_n(others: &[(&str, &Response)]) -> String {
    let render = |response: &Response| {
        serde_json::to_string_pretty(response).unwrap_or_else(|_| format!("{:?}", response))
    };

    match others {
        [(name, response)] => format!(
            "The other agent ({}) proposed the following specification. Review it and respond with JSON only:\n\n{}",
            name,
            render(response)
        ),
        _ => {
            let blocks: Vec<String> = others
                .iter()
                .map(|(name, response)| format!("=== {} ===\n{}", name, render(response)))
                .collect();
            format!(
                "The other agents proposed the following specifications. Review them all and respond with JSON only:\n\n{}",
                blocks.join("\n\n")
            )
        }
    }
}
