//! Store key layout, namespaced by queue name.

/// Builds every key a queue reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    namespace: String,
}

impl QueueKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Sorted set: id -> negative backlog count, or the claimed sentinel.
    pub fn backlog(&self) -> String {
        format!("{}:backlog", self.namespace)
    }

    /// List of claimed ids waiting for a consumer.
    pub fn pending(&self) -> String {
        format!("{}:pending", self.namespace)
    }

    /// Set of ids with an outstanding claim or lease.
    pub fn leased(&self) -> String {
        format!("{}:leased", self.namespace)
    }

    pub fn items(&self, id: &str) -> String {
        format!("{}:items:{id}", self.namespace)
    }

    /// Per-id dequeue lease holding its expiry epoch.
    pub fn lease(&self, id: &str) -> String {
        format!("{}:lease:{id}", self.namespace)
    }

    /// Short-lived lock serializing schedulers that claim the same id.
    pub fn claim_lock(&self, id: &str) -> String {
        format!("{}:claim:{id}", self.namespace)
    }

    pub fn simple(&self) -> String {
        format!("{}:simple", self.namespace)
    }

    pub fn chrono_index(&self) -> String {
        format!("{}:chrono:index", self.namespace)
    }

    pub fn chrono_items(&self) -> String {
        format!("{}:chrono:items", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let keys = QueueKeys::new("orders");
        assert_eq!(keys.backlog(), "orders:backlog");
        assert_eq!(keys.pending(), "orders:pending");
        assert_eq!(keys.leased(), "orders:leased");
        assert_eq!(keys.items("order-7"), "orders:items:order-7");
        assert_eq!(keys.lease("order-7"), "orders:lease:order-7");
    }
}
