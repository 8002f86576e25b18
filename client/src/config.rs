//! Coordinator configuration.

/// Tunables for [`BatchCoordinator`](crate::BatchCoordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Path the batch envelope is POSTed to
    pub batch_path: String,
    /// Path prefix for per-record sub-request paths
    pub classes_path: String,
    /// Maximum sub-requests per envelope; longer request lists are split
    /// into sequential chunks
    pub batch_limit: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_path: "/batch".to_string(),
            classes_path: "/classes".to_string(),
            batch_limit: 50,
        }
    }
}

impl CoordinatorConfig {
    /// Builder-style override for the batch endpoint.
    pub fn with_batch_path(mut self, path: impl Into<String>) -> Self {
        self.batch_path = path.into();
        self
    }

    /// Builder-style override for the class path prefix.
    pub fn with_classes_path(mut self, path: impl Into<String>) -> Self {
        self.classes_path = path.into();
        self
    }

    /// Builder-style override for the envelope chunk size.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }
}
