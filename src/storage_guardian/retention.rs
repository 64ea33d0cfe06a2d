//! Retention policy
//!
//! Per-scenario retention overrides over a global default, in days.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Retention policy: global default plus per-scenario overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub default_days: u32,
    pub scenario_days: HashMap<String, u32>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            default_days: 30,
            scenario_days: HashMap::new(),
        }
    }
}

impl RetentionPolicy {
    /// Effective retention for a scenario folder
    pub fn effective_days(&self, scenario: &str) -> u32 {
        self.scenario_days
            .get(scenario)
            .copied()
            .unwrap_or(self.default_days)
    }

    /// Set retention for a scope (`None` = global default)
    pub fn set_days(&mut self, scope: Option<&str>, days: u32) {
        match scope {
            Some(scenario) => {
                self.scenario_days.insert(scenario.to_string(), days);
            }
            None => self.default_days = days,
        }
    }

    /// Get retention for a scope (`None` = global default)
    pub fn get_days(&self, scope: Option<&str>) -> u32 {
        match scope {
            Some(scenario) => self.effective_days(scenario),
            None => self.default_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_override() {
        let mut policy = RetentionPolicy::default();
        policy.set_days(None, 14);
        policy.set_days(Some("Lab_A"), 3);

        assert_eq!(policy.get_days(None), 14);
        assert_eq!(policy.effective_days("Lab_A"), 3);
        assert_eq!(policy.effective_days("Warehouse"), 14);
    }
}
