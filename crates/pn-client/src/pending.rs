//! Pending request table

use std::collections::HashMap;

use serde_json::Value;
use tokio::time::Instant;

use pn_core::ClientError;

/// Invoked once with the decoded response or the reason none will arrive
pub type ResponseCallback = Box<dyn FnOnce(Result<Value, ClientError>) + Send>;

/// An outstanding correlated request
pub struct PendingRequest {
    /// Route the request was sent to; selects the response schema
    pub route: String,
    /// Completion callback
    pub callback: ResponseCallback,
    /// When the request gives up waiting, if bounded
    pub deadline: Option<Instant>,
}

impl PendingRequest {
    /// Complete the request
    pub fn complete(self, result: Result<Value, ClientError>) {
        (self.callback)(result)
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("route", &self.route)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Requests awaiting a response, keyed by message id
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<u32, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track request `id`
    pub fn insert(&mut self, id: u32, request: PendingRequest) {
        self.entries.insert(id, request);
    }

    /// Remove and return request `id`
    pub fn take(&mut self, id: u32) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every request whose deadline is at or before `now`
    pub fn take_expired(&mut self, now: Instant) -> Vec<(u32, PendingRequest)> {
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, r)| r.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();

        let mut taken: Vec<(u32, PendingRequest)> = expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|r| (id, r)))
            .collect();
        taken.sort_by_key(|(id, _)| *id);
        taken
    }

    /// Remove every request
    pub fn drain(&mut self) -> Vec<(u32, PendingRequest)> {
        let mut taken: Vec<_> = self.entries.drain().collect();
        taken.sort_by_key(|(id, _)| *id);
        taken
    }

    /// Earliest request deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().filter_map(|r| r.deadline).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(route: &str, deadline: Option<Instant>) -> PendingRequest {
        PendingRequest {
            route: route.to_string(),
            callback: Box::new(|_| {}),
            deadline,
        }
    }

    #[test]
    fn test_take_is_one_shot() {
        let mut pending = PendingRequests::new();
        pending.insert(1, request("chat.say", None));

        assert!(pending.contains(1));
        assert_eq!(pending.take(1).map(|r| r.route), Some("chat.say".to_string()));
        assert!(pending.take(1).is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_expired() {
        let t0 = Instant::now();
        let mut pending = PendingRequests::new();
        pending.insert(1, request("a", Some(t0 + Duration::from_secs(1))));
        pending.insert(2, request("b", Some(t0 + Duration::from_secs(3))));
        pending.insert(3, request("c", None));

        assert_eq!(pending.next_deadline(), Some(t0 + Duration::from_secs(1)));

        let expired = pending.take_expired(t0 + Duration::from_secs(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, 1);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.next_deadline(), Some(t0 + Duration::from_secs(3)));
    }

    #[test]
    fn test_drain_in_id_order() {
        let mut pending = PendingRequests::new();
        for id in [3, 1, 2] {
            pending.insert(id, request("r", None));
        }
        let ids: Vec<u32> = pending.drain().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(pending.is_empty());
    }
}
