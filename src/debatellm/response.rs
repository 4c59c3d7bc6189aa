//! Agent response data model.
//!
//! A [`Response`] is what one agent produces in one round: an ordered list of
//! [`Section`]s, each carrying the agent's [`Verdict`] on it, plus an overall
//! verdict and free-text extras. Responses are produced by the
//! [`parser`](crate::parser) module from untrusted model output and are
//! always normalized: every verdict is one of exactly three values and
//! `sections` is never empty.
//!
//! # Example
//!
//! ```rust
//! use debatellm::response::Verdict;
//!
//! assert_eq!(Verdict::normalize("LGTM!"), Verdict::Approve);
//! assert_eq!(Verdict::normalize("Denied."), Verdict::Reject);
//! assert_eq!(Verdict::normalize("maybe later"), Verdict::SuggestChanges);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// An agent's judgment on a section or on a whole proposal.
///
/// The set is closed: after normalization no other value can exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The agent accepts the content as-is.
    Approve,
    /// The agent fundamentally disagrees with the content.
    Reject,
    /// The content is close but needs modification.
    SuggestChanges,
}

impl Verdict {
    /// Map an arbitrary model-produced verdict string onto the closed set.
    ///
    /// The input is lower-cased and stripped of everything except ASCII
    /// letters and underscores before matching. Anything unrecognized falls
    /// back to [`Verdict::SuggestChanges`]; the function never guesses
    /// [`Verdict::Approve`].
    ///
    /// The mapping is total and idempotent:
    /// `Verdict::normalize(Verdict::normalize(s).as_str()) == Verdict::normalize(s)`.
    pub fn normalize(raw: &str) -> Verdict {
        let cleaned: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_lowercase() || *c == '_')
            .collect();

        if cleaned.starts_with("approve")
            || matches!(
                cleaned.as_str(),
                "accept" | "accepted" | "agree" | "agreed" | "lgtm"
            )
        {
            Verdict::Approve
        } else if cleaned.starts_with("reject")
            || matches!(cleaned.as_str(), "deny" | "denied" | "disagree" | "disagreed")
        {
            Verdict::Reject
        } else {
            Verdict::SuggestChanges
        }
    }

    /// Normalize a loosely-typed JSON value. Non-string values are treated
    /// as unrecognized.
    pub fn from_value(value: Option<&serde_json::Value>) -> Verdict {
        match value.and_then(|v| v.as_str()) {
            Some(s) => Verdict::normalize(s),
            None => Verdict::SuggestChanges,
        }
    }

    /// The canonical wire spelling of this verdict.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approve => "approve",
            Verdict::Reject => "reject",
            Verdict::SuggestChanges => "suggest_changes",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One titled part of a proposed specification, with the producing agent's
/// verdict on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section heading; consensus is keyed on exact title equality.
    pub title: String,
    /// The proposed specification text for this section.
    pub content: String,
    /// The agent's judgment on this section.
    pub verdict: Verdict,
    /// Why the agent reached its verdict. Empty when the model omitted it.
    #[serde(default)]
    pub reasoning: String,
}

/// A single agent's complete answer for one round.
///
/// Each round's response replaces the agent's previous one; responses are
/// never merged across rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sections in the order the agent produced them. Never empty.
    pub sections: Vec<Section>,
    /// The agent's judgment on the proposal as a whole.
    pub overall_verdict: Verdict,
    /// Concrete changes the agent wants, flattened to plain strings.
    #[serde(default)]
    pub change_requests: Vec<String>,
    /// One-paragraph summary.
    #[serde(default)]
    pub summary: String,
    /// Short kebab-case project name suggested by the agent.
    #[serde(default)]
    pub project_title: String,
}

impl Response {
    /// Find a section by exact title.
    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title == title)
    }

    /// `true` when the overall verdict is [`Verdict::Approve`].
    pub fn approves(&self) -> bool {
        self.overall_verdict == Verdict::Approve
    }
}

/// Named responses in configured agent order.
pub type AgentResponses = Vec<(String, Response)>;

/// Serde adapter that writes `Vec<(String, T)>` entries such as
/// [`AgentResponses`] as a JSON object keyed by agent name, keeping entry
/// order in both directions.
///
/// ```rust
/// use debatellm::response::{agent_map, AgentResponses};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Snapshot {
///     #[serde(with = "agent_map")]
///     agents: AgentResponses,
/// }
/// ```
pub mod agent_map {
    use serde::de::{Deserialize, MapAccess, Visitor};
    use serde::{Deserializer, Serialize, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<T: Serialize, S: Serializer>(
        entries: &[(String, T)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(entries.iter().map(|(name, value)| (name, value)))
    }

    pub fn deserialize<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, T)>, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = Vec<(String, T)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map keyed by agent name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_synonyms() {
        assert_eq!(Verdict::normalize("approve"), Verdict::Approve);
        assert_eq!(Verdict::normalize("Approved"), Verdict::Approve);
        assert_eq!(Verdict::normalize("  LGTM! "), Verdict::Approve);
        assert_eq!(Verdict::normalize("accepted"), Verdict::Approve);
        assert_eq!(Verdict::normalize("Agree"), Verdict::Approve);
        assert_eq!(Verdict::normalize("REJECTED"), Verdict::Reject);
        assert_eq!(Verdict::normalize("Denied."), Verdict::Reject);
        assert_eq!(Verdict::normalize("disagree"), Verdict::Reject);
        assert_eq!(Verdict::normalize("suggest changes"), Verdict::SuggestChanges);
        assert_eq!(Verdict::normalize("suggest_changes"), Verdict::SuggestChanges);
    }

    #[test]
    fn test_unknown_never_approves() {
        for raw in ["", "yes?", "ok", "not approved", "👍", "42", "maybe"] {
            assert_eq!(
                Verdict::normalize(raw),
                Verdict::SuggestChanges,
                "{raw:?} must fall back to suggest_changes"
            );
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "LGTM", "Denied", "approve", "reject", "suggest_changes", "hmm", "", "Agreed!!",
            "REJECT: bad", "needs work",
        ];
        for raw in inputs {
            let once = Verdict::normalize(raw);
            let twice = Verdict::normalize(once.as_str());
            assert_eq!(once, twice, "normalize not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_from_value_non_string() {
        assert_eq!(
            Verdict::from_value(Some(&serde_json::json!(true))),
            Verdict::SuggestChanges
        );
        assert_eq!(Verdict::from_value(None), Verdict::SuggestChanges);
        assert_eq!(
            Verdict::from_value(Some(&serde_json::json!("approve"))),
            Verdict::Approve
        );
    }

    #[test]
    fn test_verdict_wire_format() {
        let json = serde_json::to_string(&Verdict::SuggestChanges).unwrap();
        assert_eq!(json, "\"suggest_changes\"");
    }

    #[test]
    fn test_agent_map_keeps_order() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(with = "agent_map")]
            agents: AgentResponses,
        }

        let response = Response {
            sections: vec![Section {
                title: "A".into(),
                content: "c".into(),
                verdict: Verdict::Approve,
                reasoning: String::new(),
            }],
            overall_verdict: Verdict::Reject,
            change_requests: vec![],
            summary: String::new(),
            project_title: String::new(),
        };
        let wrapper = Wrapper {
            agents: vec![("zeta".into(), response.clone()), ("alpha".into(), response)],
        };

        let text = serde_json::to_string(&wrapper).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        assert!(text.contains("\"overall_verdict\":\"reject\""));

        let back: Wrapper = serde_json::from_str(&text).unwrap();
        let names: Vec<&str> = back.agents.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
