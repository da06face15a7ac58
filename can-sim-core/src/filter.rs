//! Message filter list
//!
//! Maps every known CAN identifier to a filtered flag. Filtered messages are
//! neither sent nor processed on reception.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterList {
    entries: BTreeMap<u32, bool>,
}

/// Parse a message id: `0x` prefix for hexadecimal, decimal otherwise
pub fn parse_message_id(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl FilterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list with every id unfiltered
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            entries: ids.into_iter().map(|id| (id, false)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Unknown ids are never filtered
    pub fn is_filtered(&self, id: u32) -> bool {
        self.entries.get(&id).copied().unwrap_or(false)
    }

    /// Set the state of a known id; false for unknown ids
    pub fn set_state(&mut self, id: u32, filtered: bool) -> bool {
        match self.entries.get_mut(&id) {
            Some(state) => {
                *state = filtered;
                true
            }
            None => {
                log::warn!("Message 0x{:X} is not known and cannot be filtered", id);
                false
            }
        }
    }

    /// Apply a bulk filter.
    ///
    /// With ids, `exclude = true` filters exactly those ids and
    /// `exclude = false` filters everything else. Without ids every message
    /// gets the `exclude` state. Invalid or unknown ids, and an include list
    /// that would leave nothing unfiltered, fail and leave the list unchanged.
    pub fn apply(&mut self, ids: &[String], exclude: bool) -> bool {
        let mut updated = self.clone();

        if ids.is_empty() {
            updated.entries.values_mut().for_each(|state| *state = exclude);
        } else {
            updated.entries.values_mut().for_each(|state| *state = !exclude);
            for text in ids {
                let id = match parse_message_id(text) {
                    Some(id) => id,
                    None => {
                        log::warn!("{} is not a valid message ID", text);
                        return false;
                    }
                };
                if !updated.set_state(id, exclude) {
                    return false;
                }
            }
            if updated.included_count() == 0 {
                log::warn!("Filter would exclude every message");
                return false;
            }
        }

        *self = updated;
        !self.entries.is_empty()
    }

    /// Number of ids that are not filtered
    pub fn included_count(&self) -> usize {
        self.entries.values().filter(|filtered| !**filtered).count()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn filtered_ids(&self) -> BTreeSet<u32> {
        self.entries
            .iter()
            .filter(|(_, filtered)| **filtered)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> FilterList {
        FilterList::from_ids(1..=10)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exclude_filters_exactly_given_ids() {
        let mut filters = list();
        assert!(filters.apply(&ids(&["1", "3", "5", "7", "9"]), true));
        for id in 1..=10 {
            assert_eq!(filters.is_filtered(id), id % 2 == 1, "id {}", id);
        }
    }

    #[test]
    fn test_include_filters_complement() {
        let mut filters = list();
        assert!(filters.apply(&ids(&["1", "3", "5", "7", "9"]), false));
        for id in 1..=10 {
            assert_eq!(filters.is_filtered(id), id % 2 == 0, "id {}", id);
        }
    }

    #[test]
    fn test_hex_ids() {
        let mut filters = FilterList::from_ids([0x128, 0x129, 0x8000_00a8]);
        assert!(filters.apply(&ids(&["0x129"]), true));
        assert!(filters.is_filtered(0x129));
        assert!(!filters.is_filtered(0x128));
        assert_eq!(parse_message_id("2147483816"), Some(0x8000_00a8));
        assert_eq!(parse_message_id("0x1g"), None);
    }

    #[test]
    fn test_failed_apply_leaves_state() {
        let mut filters = list();
        assert!(filters.apply(&ids(&["2"]), true));
        let before = filters.clone();

        // Include list with only unknown ids
        assert!(!filters.apply(&ids(&["500"]), false));
        assert!(!filters.apply(&ids(&["abc"]), true));
        // Excluding everything explicitly leaves nothing to include
        let all: Vec<String> = (1..=10).map(|id| id.to_string()).collect();
        assert!(!filters.apply(&all, true));
        assert_eq!(filters, before);
    }

    #[test]
    fn test_individual_states() {
        let mut filters = list();
        assert!(filters.apply(&[], false));
        assert_eq!(filters.included_count(), 10);
        assert!(filters.set_state(3, true));
        assert!(filters.set_state(6, true));
        assert!(!filters.set_state(500, false));
        assert!(!filters.is_filtered(500));
        assert_eq!(filters.filtered_ids().into_iter().collect::<Vec<_>>(), vec![3, 6]);

        assert!(filters.apply(&[], true));
        assert_eq!(filters.included_count(), 0);
    }
}
