use crate::state::{new_state, Shared};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Origine d'un changement de cible active, pour les logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOrigin {
    Mqtt,
    Http,
}

impl TargetOrigin {
    fn as_str(self) -> &'static str {
        match self {
            TargetOrigin::Mqtt => "mqtt",
            TargetOrigin::Http => "http",
        }
    }
}

/// Type de capteur -> id de l'instance sélectionnée.
///
/// Purement indicatif : ne filtre jamais ce que le cache de mesures accepte.
#[derive(Clone)]
pub struct ActiveTargets {
    table: Shared<HashMap<String, String>>,
}

impl Default for ActiveTargets {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveTargets {
    pub fn new() -> Self {
        Self {
            table: new_state(HashMap::new()),
        }
    }

    /// Écrasement inconditionnel, sans vérifier que le capteur a déjà publié.
    pub fn set_active(&self, class: &str, instance_id: &str, origin: TargetOrigin) {
        self.table.lock().insert(class.to_string(), instance_id.to_string());
        info!(class, instance_id, origin = origin.as_str(), "active target updated");
    }

    #[allow(dead_code)] // lu par l'automatisation côté capteurs, pas par les routes HTTP
    pub fn get_active(&self, class: &str) -> Option<String> {
        self.table.lock().get(class).cloned()
    }

    /// Copie ordonnée de toute la table.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.table
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let targets = ActiveTargets::new();
        assert_eq!(targets.get_active("bayi"), None);
        targets.set_active("bayi", "10", TargetOrigin::Http);
        assert_eq!(targets.get_active("bayi"), Some("10".into()));
        assert_eq!(targets.get_active("balita"), None);
    }

    #[test]
    fn test_last_write_wins_across_origins() {
        let targets = ActiveTargets::new();
        targets.set_active("balita", "7", TargetOrigin::Http);
        targets.set_active("balita", "8", TargetOrigin::Mqtt);
        assert_eq!(targets.get_active("balita"), Some("8".into()));
        targets.set_active("balita", "7", TargetOrigin::Http);
        assert_eq!(targets.get_active("balita"), Some("7".into()));
    }

    #[test]
    fn test_snapshot_is_one_entry_per_class() {
        let targets = ActiveTargets::new();
        targets.set_active("bayi", "1", TargetOrigin::Mqtt);
        targets.set_active("bayi", "2", TargetOrigin::Mqtt);
        targets.set_active("balita", "3", TargetOrigin::Http);
        let snap = targets.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("bayi").map(String::as_str), Some("2"));
        assert_eq!(snap.get("balita").map(String::as_str), Some("3"));
    }
}
