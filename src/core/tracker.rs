//! Per-request service timing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::sink::lock;

struct ServiceTimer {
    name: String,
    running_since: Option<Instant>,
    cost: Duration,
}

impl ServiceTimer {
    fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.cost += since.elapsed();
        }
    }
}

struct TrackerState {
    log_id: String,
    services: Vec<ServiceTimer>,
    stack: Vec<usize>,
}

/// Log id plus a stack of named timers.
///
/// Starting a service pauses the one below it on the stack, so each
/// service is charged only for its own time. Whatever is left of the
/// total is the handler's own time (`self_t`).
pub struct Tracker {
    started: Instant,
    state: Mutex<TrackerState>,
}

impl Tracker {
    pub fn new(log_id: Option<&str>) -> Self {
        let log_id = log_id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(generate_log_id);
        Self {
            started: Instant::now(),
            state: Mutex::new(TrackerState {
                log_id,
                services: Vec::new(),
                stack: Vec::new(),
            }),
        }
    }

    pub fn log_id(&self) -> String {
        lock(&self.state).log_id.clone()
    }

    /// Replace the log id. Empty ids are ignored.
    pub fn set_log_id(&self, log_id: &str) {
        if !log_id.is_empty() {
            lock(&self.state).log_id = log_id.to_string();
        }
    }

    /// Start timing `name`, pausing the current service.
    pub fn start(&self, name: &str) {
        let mut state = lock(&self.state);
        if let Some(&top) = state.stack.last() {
            state.services[top].pause();
        }
        let index = match state.services.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                state.services.push(ServiceTimer {
                    name: name.to_string(),
                    running_since: None,
                    cost: Duration::ZERO,
                });
                state.services.len() - 1
            }
        };
        state.services[index].resume();
        state.stack.push(index);
    }

    /// Stop the current service and resume the one below it.
    pub fn end(&self) {
        let mut state = lock(&self.state);
        let Some(top) = state.stack.pop() else {
            return;
        };
        state.services[top].pause();
        if let Some(&below) = state.stack.last() {
            state.services[below].resume();
        }
    }

    /// Time `name` until the returned guard is dropped.
    pub fn scope(&self, name: &str) -> TrackerScope<'_> {
        self.start(name);
        TrackerScope { tracker: self }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Accumulated time per service, in start order.
    pub fn service_costs(&self) -> Vec<(String, Duration)> {
        let state = lock(&self.state);
        state
            .services
            .iter()
            .map(|s| {
                let running = s.running_since.map(|t| t.elapsed()).unwrap_or_default();
                (s.name.clone(), s.cost + running)
            })
            .collect()
    }

    /// Log fields: `logid`, `<service>_t`, `all_t` and `self_t`, in milliseconds.
    pub fn fields(&self) -> Vec<(String, serde_json::Value)> {
        let total = self.elapsed();
        let costs = self.service_costs();
        let spent: Duration = costs.iter().map(|(_, cost)| *cost).sum();

        let mut fields = Vec::with_capacity(costs.len() + 3);
        fields.push(("logid".to_string(), serde_json::json!(self.log_id())));
        for (name, cost) in costs {
            fields.push((format!("{}_t", name), serde_json::json!(cost.as_millis() as u64)));
        }
        fields.push(("all_t".to_string(), serde_json::json!(total.as_millis() as u64)));
        fields.push((
            "self_t".to_string(),
            serde_json::json!(total.saturating_sub(spent).as_millis() as u64),
        ));
        fields
    }
}

/// Ends a tracked service on drop.
pub struct TrackerScope<'a> {
    tracker: &'a Tracker,
}

impl Drop for TrackerScope<'_> {
    fn drop(&mut self) {
        self.tracker.end();
    }
}

/// 16 hex chars from a random UUID.
pub fn generate_log_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_id_from_header_or_generated() {
        assert_eq!(Tracker::new(Some("abc")).log_id(), "abc");

        let generated = Tracker::new(None).log_id();
        assert_eq!(generated.len(), 16);
        assert!(generated.chars().all(|c| c.is_ascii_hexdigit()));

        let tracker = Tracker::new(Some(""));
        assert_eq!(tracker.log_id().len(), 16);
        tracker.set_log_id("");
        assert_ne!(tracker.log_id(), "");
        tracker.set_log_id("custom");
        assert_eq!(tracker.log_id(), "custom");
    }

    #[test]
    fn test_nested_services_pause_outer() {
        let tracker = Tracker::new(Some("id"));
        tracker.start("db");
        std::thread::sleep(Duration::from_millis(20));
        tracker.start("cache");
        std::thread::sleep(Duration::from_millis(40));
        tracker.end();
        tracker.end();

        let costs: std::collections::HashMap<_, _> = tracker.service_costs().into_iter().collect();
        assert!(costs["cache"] >= Duration::from_millis(40));
        assert!(costs["db"] >= Duration::from_millis(20));
        assert!(costs["db"] < Duration::from_millis(40));
    }

    #[test]
    fn test_end_without_start_is_ignored() {
        let tracker = Tracker::new(None);
        tracker.end();
        assert!(tracker.service_costs().is_empty());
    }

    #[test]
    fn test_fields_names() {
        let tracker = Tracker::new(Some("log-1"));
        {
            let _scope = tracker.scope("rpc");
        }

        let fields = tracker.fields();
        let names: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["logid", "rpc_t", "all_t", "self_t"]);
        assert_eq!(fields[0].1, serde_json::json!("log-1"));
    }
}
