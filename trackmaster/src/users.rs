//! Process-wide store of per-user running totals.

use std::collections::HashMap;
use std::sync::Mutex;

use trackreduce::{ActivityStats, AggregateStatistics, UserStatistics};

#[derive(Debug, Default)]
pub struct UserStatsStore {
    users: Mutex<HashMap<String, UserStatistics>>,
}

impl UserStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> std::sync::MutexGuard<'_, HashMap<String, UserStatistics>> {
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold a completed route into `user`'s totals, creating the user on
    /// first sight. Returns a snapshot of the updated totals.
    pub fn register_route(&self, user: &str, stats: &ActivityStats) -> UserStatistics {
        let mut users = self.users();
        let entry = users
            .entry(user.to_string())
            .or_insert_with(|| UserStatistics::new(user));
        entry.register_route(stats);
        entry.clone()
    }

    pub fn get(&self, user: &str) -> Option<UserStatistics> {
        self.users().get(user).cloned()
    }

    /// Totals and per-user averages over every known user.
    pub fn aggregate(&self) -> AggregateStatistics {
        AggregateStatistics::from_users(self.users().values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackreduce::RouteId;

    fn stats(distance: f64) -> ActivityStats {
        ActivityStats {
            route_id: RouteId(1),
            distance,
            average_speed: 0.0,
            elevation_gain: 5.0,
            time: 60.0,
            segments: vec![],
        }
    }

    #[test]
    fn test_totals_accumulate_per_user() {
        let store = UserStatsStore::new();
        store.register_route("alice", &stats(2.0));
        let alice = store.register_route("alice", &stats(3.0));
        store.register_route("bob", &stats(10.0));

        assert_eq!(alice.routes_recorded, 2);
        assert_eq!(alice.total_distance, 5.0);
        assert_eq!(store.get("bob").unwrap().routes_recorded, 1);
        assert!(store.get("carol").is_none());

        let all = store.aggregate();
        assert_eq!(all.user_count, 2);
        assert_eq!(all.routes_recorded, 3);
        assert_eq!(all.total_distance, 15.0);
    }
}
