use super::record::NotamRecord;
use std::collections::HashSet;

/// Result of comparing two successive record sets for one airport code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDiff {
    pub added: Vec<NotamRecord>,
    pub removed: Vec<NotamRecord>,
}

impl RecordDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Identity for change detection. Falls back from `id` through `number` to a
/// content fingerprint so providers that omit a stable id still diff sanely.
fn identity_key(record: &NotamRecord) -> &str {
    if !record.id.is_empty() {
        return &record.id;
    }
    if let Some(number) = record.number.as_deref().filter(|n| !n.is_empty()) {
        return number;
    }
    record
        .q_line
        .as_deref()
        .filter(|q| !q.is_empty())
        .unwrap_or(&record.summary)
}

/// Pure set difference over identity keys, O(n+m). Empty inputs are empty
/// sets; the function never fails.
pub fn diff(previous: &[NotamRecord], next: &[NotamRecord]) -> RecordDiff {
    let previous_keys: HashSet<&str> = previous.iter().map(identity_key).collect();
    let next_keys: HashSet<&str> = next.iter().map(identity_key).collect();

    RecordDiff {
        added: next
            .iter()
            .filter(|r| !previous_keys.contains(identity_key(r)))
            .cloned()
            .collect(),
        removed: previous
            .iter()
            .filter(|r| !next_keys.contains(identity_key(r)))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notam::record::{Classification, Provider};

    fn record(id: &str) -> NotamRecord {
        NotamRecord {
            id: id.to_string(),
            code: "KJFK".parse().unwrap(),
            number: None,
            classification: Classification::Other,
            valid_from: None,
            valid_to: None,
            issued: None,
            summary: format!("summary for {id}"),
            body: String::new(),
            q_line: None,
            source: Provider::Primary,
        }
    }

    #[test]
    fn identical_sets_diff_to_empty() {
        let set = vec![record("KJFK-1"), record("KJFK-2")];
        assert!(diff(&set, &set).is_empty());
    }

    #[test]
    fn one_addition_is_detected_symmetrically() {
        let a = vec![record("KJFK-1")];
        let b = vec![record("KJFK-1"), record("KJFK-2")];

        let forward = diff(&a, &b);
        assert_eq!(forward.added.len(), 1);
        assert_eq!(forward.added[0].id, "KJFK-2");
        assert!(forward.removed.is_empty());

        let backward = diff(&b, &a);
        assert!(backward.added.is_empty());
        assert_eq!(backward.removed.len(), 1);
        assert_eq!(backward.removed[0].id, "KJFK-2");
    }

    #[test]
    fn dropped_notice_appears_only_in_removed() {
        let first = vec![record("KJFK-1"), record("KJFK-2"), record("KJFK-3")];
        let second = vec![record("KJFK-1"), record("KJFK-3")];
        let result = diff(&first, &second);
        assert!(result.added.is_empty());
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].id, "KJFK-2");
    }

    #[test]
    fn empty_inputs_are_empty_sets() {
        let set = vec![record("KJFK-1")];
        assert_eq!(diff(&[], &set).added.len(), 1);
        assert_eq!(diff(&set, &[]).removed.len(), 1);
        assert!(diff(&[], &[]).is_empty());
    }

    #[test]
    fn falls_back_to_number_then_fingerprint() {
        let mut by_number = record("");
        by_number.number = Some("A1/24".to_string());
        let mut by_summary = record("");
        by_summary.summary = "unique text".to_string();

        let prev = vec![by_number.clone(), by_summary.clone()];
        assert!(diff(&prev, &prev).is_empty());

        let mut renumbered = by_number.clone();
        renumbered.number = Some("A2/24".to_string());
        let result = diff(&prev, &[renumbered, by_summary]);
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.removed.len(), 1);
    }
}
