mod tests_contract;
mod tests_manager;

use crate::engine::{AnyEngine, ArrayEngine, BPlusTreeEngine, HashEngine, OrderedEngine};

/// The in-memory backends, for contract-wide tests. The LSM variant
/// needs a data directory and is exercised separately.
pub(crate) fn memory_backends() -> Vec<AnyEngine> {
    vec![
        AnyEngine::Array(ArrayEngine::new()),
        AnyEngine::Ordered(OrderedEngine::new()),
        AnyEngine::Hash(HashEngine::new()),
        AnyEngine::BPlusTree(BPlusTreeEngine::new()),
    ]
}
