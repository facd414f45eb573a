//! Active and dismissed alert state.

use std::collections::HashSet;

use crate::alert::{Alert, AlertSeverity};

/// Holds the live alert set and the ids suppressed for the life of the
/// process.
///
/// `active` and `dismissed` never share an id, and `dismissed` only grows.
#[derive(Debug, Default)]
pub struct AlertStore {
    active:    Vec<Alert>,
    dismissed: HashSet<String>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert candidates that are neither active nor dismissed. Returns the
    /// alerts that were actually inserted, in candidate order.
    pub fn merge(&mut self, candidates: Vec<Alert>) -> Vec<Alert> {
        let mut inserted = Vec::new();
        for alert in candidates {
            if self.dismissed.contains(&alert.id) || self.contains(&alert.id) {
                continue;
            }
            inserted.push(alert.clone());
            self.active.push(alert);
        }
        inserted
    }

    /// Mark an active alert acknowledged. Returns `false` if no such alert.
    pub fn acknowledge(&mut self, id: &str) -> bool {
        match self.active.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Remove `id` from the active set and suppress it permanently. Returns
    /// `true` if an active alert was removed.
    pub fn dismiss(&mut self, id: &str) -> bool {
        let before = self.active.len();
        self.active.retain(|a| a.id != id);
        self.dismissed.insert(id.to_string());
        self.active.len() != before
    }

    /// Dismiss every acknowledged alert. Returns how many were cleared.
    pub fn clear_acknowledged(&mut self) -> usize {
        let (cleared, kept): (Vec<Alert>, Vec<Alert>) =
            std::mem::take(&mut self.active).into_iter().partition(|a| a.acknowledged);
        self.active = kept;
        self.dismissed.extend(cleared.iter().map(|a| a.id.clone()));
        cleared.len()
    }

    // -------------------------------------------------------------- //
    //  Views                                                         //
    // -------------------------------------------------------------- //

    pub fn active_alerts(&self) -> &[Alert] {
        &self.active
    }

    pub fn contains(&self, id: &str) -> bool {
        self.active.iter().any(|a| a.id == id)
    }

    pub fn is_dismissed(&self, id: &str) -> bool {
        self.dismissed.contains(id)
    }

    pub fn dismissed_ids(&self) -> &HashSet<String> {
        &self.dismissed
    }

    pub fn acknowledged_count(&self) -> usize {
        self.active.iter().filter(|a| a.acknowledged).count()
    }

    pub fn emergency_count(&self) -> usize {
        self.count_severity(AlertSeverity::Emergency)
    }

    pub fn critical_count(&self) -> usize {
        self.count_severity(AlertSeverity::Critical)
    }

    fn count_severity(&self, severity: AlertSeverity) -> usize {
        self.active.iter().filter(|a| a.severity == severity).count()
    }
}
