//! Per-round consensus aggregation.
//!
//! The title universe of a round is the **union** of every responding
//! agent's section titles. A title is agreed only when every responding
//! agent produced it and approved it; an agent that left a title out counts
//! as disagreeing. Agreed sections take their final content from the first
//! responding agent in configured order. Disputed sections never get a
//! resolved final content, and divergent content is never merged.

use crate::debatellm::response::{agent_map, Response, Verdict};
use serde::{Deserialize, Serialize};

/// Aggregated view of one section title across all agents in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusSection {
    pub title: String,
    pub agreed: bool,
    /// Content per agent in configured order, serialized as an object keyed
    /// by agent name. Agents that did not produce the title map to an empty
    /// string.
    #[serde(with = "agent_map")]
    pub agent_contents: Vec<(String, String)>,
    /// Resolved content; empty unless `agreed`.
    pub final_content: String,
}

impl ConsensusSection {
    /// Content `agent` gave this section, if the agent responded this round.
    pub fn content_of(&self, agent: &str) -> Option<&str> {
        self.agent_contents
            .iter()
            .find(|(name, _)| name == agent)
            .map(|(_, content)| content.as_str())
    }
}

/// Build the consensus for one round.
///
/// `responses` must be ordered by the configured agent order; the first
/// entry supplies the final content of agreed sections. Output order follows
/// first appearance of each title, walking agents in that same order.
pub fn build_consensus(responses: &[(String, Response)]) -> Vec<ConsensusSection> {
    let mut titles: Vec<&str> = Vec::new();
    for (_, response) in responses {
        for section in &response.sections {
            if !titles.contains(&section.title.as_str()) {
                titles.push(&section.title);
            }
        }
    }

    titles
        .into_iter()
        .map(|title| {
            let mut agent_contents = Vec::with_capacity(responses.len());
            let mut agreed = !responses.is_empty();

            for (name, response) in responses {
                let section = response.section(title);
                agent_contents.push((
                    name.clone(),
                    section.map(|s| s.content.clone()).unwrap_or_default(),
                ));
                if section.map(|s| s.verdict) != Some(Verdict::Approve) {
                    agreed = false;
                }
            }

            let final_content = if agreed {
                responses
                    .first()
                    .and_then(|(_, r)| r.section(title))
                    .map(|s| s.content.clone())
                    .unwrap_or_default()
            } else {
                String::new()
            };

            ConsensusSection {
                title: title.to_string(),
                agreed,
                agent_contents,
                final_content,
            }
        })
        .collect()
}

/// `(agreed, disputed)` counts for logging.
pub fn tally(consensus: &[ConsensusSection]) -> (usize, usize) {
    let agreed = consensus.iter().filter(|s| s.agreed).count();
    (agreed, consensus.len() - agreed)
}
