//! # Participants — Registry of Eligible Chat Entrants
//!
//! The registry holds every chat participant seen since monitoring began,
//! keyed by the stable channel id the participant source reports. Display
//! names are not identities: two entrants may share a name but never an id.
//!
//! Batches arrive from the external participant source through
//! `POST /api/chat-participants`. Re-sending an id merges into the existing
//! entry (the latest display name and URL win) instead of adding a duplicate,
//! which makes the source's habit of re-posting its full list harmless.
//! Records without an id are rejected rather than given a synthesized id that
//! could later collide with a real one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A registered entrant.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub source_url: Option<String>,
    pub first_seen: DateTime<Utc>,
}

/// A participant record as posted by the participant source.
///
/// The source sends `name`, newer clients send `displayName`; both are accepted.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IncomingParticipant {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "name", alias = "displayName")]
    pub display_name: Option<String>,
    #[serde(default, alias = "sourceUrl")]
    pub url: Option<String>,
}

/// Outcome of merging one batch into the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub updated: usize,
    pub rejected: usize,
}

impl MergeSummary {
    /// Whether the merge changed anything viewers can see.
    pub fn changed(&self) -> bool {
        self.added > 0 || self.updated > 0
    }
}

/// Insertion-ordered, id-deduplicated participant set.
#[derive(Clone, Debug, Default)]
pub struct ParticipantRegistry {
    entries: Vec<Participant>,
    index: HashMap<String, usize>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All participants in first-seen order.
    pub fn all(&self) -> &[Participant] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Insert or update a single participant. Returns `true` when the id was new.
    pub fn upsert(&mut self, id: &str, display_name: &str, source_url: Option<String>) -> bool {
        if let Some(&i) = self.index.get(id) {
            let entry = &mut self.entries[i];
            entry.display_name = display_name.to_string();
            entry.source_url = source_url;
            return false;
        }
        self.index.insert(id.to_string(), self.entries.len());
        self.entries.push(Participant {
            id: id.to_string(),
            display_name: display_name.to_string(),
            source_url,
            first_seen: Utc::now(),
        });
        true
    }

    /// Merge a batch from the participant source.
    pub fn merge_batch(&mut self, batch: &[IncomingParticipant]) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for record in batch {
            let id = match record.id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => id,
                _ => {
                    tracing::warn!(
                        name = record.display_name.as_deref().unwrap_or(""),
                        "rejected participant record without id"
                    );
                    summary.rejected += 1;
                    continue;
                }
            };
            let name = record
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(id);
            let url = record.url.clone().filter(|u| !u.is_empty());

            if let Some(existing) = self.get(id) {
                if existing.display_name == name && existing.source_url == url {
                    continue;
                }
                self.upsert(id, name, url);
                summary.updated += 1;
            } else {
                self.upsert(id, name, url);
                summary.added += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(id: Option<&str>, name: &str) -> IncomingParticipant {
        IncomingParticipant {
            id: id.map(String::from),
            display_name: Some(name.to_string()),
            url: None,
        }
    }

    #[test]
    fn new_registry_is_empty() {
        let reg = ParticipantRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn merge_adds_new_ids_in_order() {
        let mut reg = ParticipantRegistry::new();
        let summary = reg.merge_batch(&[incoming(Some("UC1"), "ayse"), incoming(Some("UC2"), "mehmet")]);
        assert_eq!(summary.added, 2);
        assert_eq!(reg.all()[0].id, "UC1");
        assert_eq!(reg.all()[1].id, "UC2");
    }

    #[test]
    fn duplicate_id_updates_instead_of_duplicating() {
        let mut reg = ParticipantRegistry::new();
        reg.merge_batch(&[incoming(Some("UC1"), "old name")]);
        let summary = reg.merge_batch(&[IncomingParticipant {
            id: Some("UC1".into()),
            display_name: Some("new name".into()),
            url: Some("https://example.com/UC1".into()),
        }]);
        assert_eq!(summary, MergeSummary { added: 0, updated: 1, rejected: 0 });
        assert_eq!(reg.len(), 1);
        let p = reg.get("UC1").unwrap();
        assert_eq!(p.display_name, "new name");
        assert_eq!(p.source_url.as_deref(), Some("https://example.com/UC1"));
    }

    #[test]
    fn resending_identical_batch_changes_nothing() {
        let mut reg = ParticipantRegistry::new();
        let batch = [incoming(Some("UC1"), "ayse")];
        reg.merge_batch(&batch);
        let summary = reg.merge_batch(&batch);
        assert!(!summary.changed());
    }

    #[test]
    fn same_display_name_different_ids_are_distinct() {
        let mut reg = ParticipantRegistry::new();
        reg.merge_batch(&[incoming(Some("UC1"), "ali"), incoming(Some("UC2"), "ali")]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn records_without_id_are_rejected() {
        let mut reg = ParticipantRegistry::new();
        let summary = reg.merge_batch(&[incoming(None, "ghost"), incoming(Some("  "), "blank")]);
        assert_eq!(summary.rejected, 2);
        assert!(reg.is_empty());
    }

    #[test]
    fn missing_name_falls_back_to_id() {
        let mut reg = ParticipantRegistry::new();
        reg.merge_batch(&[IncomingParticipant {
            id: Some("UC9".into()),
            display_name: None,
            url: None,
        }]);
        assert_eq!(reg.get("UC9").unwrap().display_name, "UC9");
    }

    #[test]
    fn incoming_accepts_name_alias() {
        let p: IncomingParticipant =
            serde_json::from_str(r#"{"id":"UC1","name":"ayse","url":"u"}"#).unwrap();
        assert_eq!(p.display_name.as_deref(), Some("ayse"));
        let p: IncomingParticipant =
            serde_json::from_str(r#"{"id":"UC1","displayName":"ayse"}"#).unwrap();
        assert_eq!(p.display_name.as_deref(), Some("ayse"));
    }

    #[test]
    fn clear_empties_registry() {
        let mut reg = ParticipantRegistry::new();
        reg.merge_batch(&[incoming(Some("UC1"), "ayse")]);
        reg.clear();
        assert!(reg.is_empty());
        assert!(!reg.contains("UC1"));
    }
}
