//! The connection-local subscription table: `subscriptionId -> closer`.
//! Insertion order is preserved so a socket close can tear subscriptions
//! down in reverse insertion order, per the cleanup ordering rule.

use std::collections::HashMap;

use crate::collaborators::Unsubscribe;

#[derive(Default)]
pub struct SubscriptionTable {
    order: Vec<String>,
    closers: HashMap<String, Unsubscribe>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, subscription_id: &str) -> bool {
        self.closers.contains_key(subscription_id)
    }

    pub fn insert(&mut self, subscription_id: String, closer: Unsubscribe) {
        self.order.push(subscription_id.clone());
        self.closers.insert(subscription_id, closer);
    }

    /// Removes and invokes the closer. Returns `false` if the id was already
    /// gone, which callers treat as a no-op (idempotent unsubscribe).
    pub fn remove(&mut self, subscription_id: &str) -> bool {
        match self.closers.remove(subscription_id) {
            Some(closer) => {
                self.order.retain(|id| id != subscription_id);
                closer();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        let ids: Vec<String> = self.order.drain(..).collect();
        for id in ids.into_iter().rev() {
            if let Some(closer) = self.closers.remove(&id) {
                closer();
            }
        }
    }
}
