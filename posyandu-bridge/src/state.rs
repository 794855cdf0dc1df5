use crate::cache::ReadingCache;
use crate::targets::ActiveTargets;
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Propriétaire des deux maps en mémoire. Un clone donne un autre handle sur
/// les mêmes maps ; chaque map a son propre verrou.
#[derive(Clone, Default)]
pub struct BridgeState {
    pub readings: ReadingCache,
    pub targets: ActiveTargets,
}

impl BridgeState {
    pub fn new() -> Self {
        Self::default()
    }
}
