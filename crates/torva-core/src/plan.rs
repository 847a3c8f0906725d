//! Plan descriptors consumed by the quota gates and the completion commit.
//!
//! Plans are immutable value objects keyed by name. The subscription row
//! snapshots a plan's numbers at assignment time; changing this table never
//! re-dates already-completed torrents.

const GIB: u64 = 1024 * 1024 * 1024;

/// Limits attached to a subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Stable plan name.
    pub name: &'static str,
    /// Monthly transfer allowance in GiB; `None` means unlimited.
    pub monthly_limit_gib: Option<u32>,
    /// Maximum simultaneous torrents in `pending`/`downloading`.
    pub concurrent_limit: u32,
    /// Days a completed torrent is retained before the sweeper removes it.
    pub retention_days: u32,
}

/// Every plan the platform sells, cheapest first.
pub const ALL: &[Plan] = &[
    Plan {
        name: "free",
        monthly_limit_gib: Some(2),
        concurrent_limit: 1,
        retention_days: 1,
    },
    Plan {
        name: "starter",
        monthly_limit_gib: Some(50),
        concurrent_limit: 3,
        retention_days: 7,
    },
    Plan {
        name: "pro",
        monthly_limit_gib: Some(500),
        concurrent_limit: 10,
        retention_days: 30,
    },
    Plan {
        name: "unlimited",
        monthly_limit_gib: None,
        concurrent_limit: 25,
        retention_days: 90,
    },
];

impl Plan {
    /// Look up a plan by name.
    #[must_use]
    pub fn named(name: &str) -> Option<Self> {
        ALL.iter().copied().find(|plan| plan.name == name)
    }

    /// The plan every new user starts on.
    #[must_use]
    pub fn free() -> Self {
        ALL[0]
    }

    /// Monthly transfer allowance in bytes; `None` means unlimited.
    #[must_use]
    pub fn monthly_limit_bytes(&self) -> Option<u64> {
        self.monthly_limit_gib.map(|gib| u64::from(gib) * GIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_lookup_covers_the_table() {
        for plan in ALL {
            assert_eq!(Plan::named(plan.name), Some(*plan));
        }
        assert_eq!(Plan::named("platinum"), None);
    }

    #[test]
    fn free_plan_is_the_default() {
        let free = Plan::free();
        assert_eq!(free.name, "free");
        assert_eq!(free.concurrent_limit, 1);
        assert_eq!(free.retention_days, 1);
        assert_eq!(free.monthly_limit_bytes(), Some(2 * GIB));
    }

    #[test]
    fn unlimited_plan_has_no_byte_cap() {
        let unlimited = Plan::named("unlimited").expect("unlimited plan");
        assert_eq!(unlimited.monthly_limit_bytes(), None);
        assert_eq!(unlimited.retention_days, 90);
    }
}
