use serde::Serialize;

/// What one lifecycle controller did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleMetrics {
    pub received: u64,
    pub printed: u64,
    pub abandoned: u64,
    pub rejected: u64,
    /// Print triggers the platform explicitly acknowledged.
    pub acknowledged: u64,
    pub busy_ms: u64,
}

impl LifecycleMetrics {
    pub fn finished(&self) -> u64 {
        self.printed + self.abandoned + self.rejected
    }
}
