//! Hit-and-run detection.
//!
//! A snatch is a hit-and-run when the user completed the download but did not
//! accumulate the configured minimum seedtime within the grace period. Each
//! detector pass marks fresh violations, adds one warning per violation to the
//! offending user, and disables leeching once the warnings reach the
//! threshold.
//!
//! The pass runs on a 6 hour timer and on demand from the admin surface. The
//! clear-warnings admin action is the inverse: warnings reset to zero and
//! leeching is re-enabled.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::HitAndRun;
use crate::core::databases::Database;
use crate::core::gate::GateCache;
use crate::core::UserId;
use crate::shared::clock::DurationSinceUnixEpoch;

const SECONDS_PER_DAY: u64 = 86_400;

/// What one detector pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub new_violations: usize,
    pub users_warned: usize,
    pub users_disabled: usize,
}

pub struct HnrDetector {
    config: HitAndRun,
    database: Arc<dyn Database>,
    gate: Arc<GateCache>,
}

impl HnrDetector {
    #[must_use]
    pub fn new(config: HitAndRun, database: Arc<dyn Database>, gate: Arc<GateCache>) -> Self {
        Self { config, database, gate }
    }

    /// One detection pass.
    ///
    /// # Errors
    ///
    /// Will return a database [`Error`](crate::core::databases::error::Error)
    /// if the candidate query fails. Per-user update failures are logged and
    /// skipped so one bad row cannot stall the whole pass.
    pub fn run_pass(&self, now: DurationSinceUnixEpoch) -> Result<PassSummary, crate::core::databases::error::Error> {
        let grace = Duration::from_secs(u64::from(self.config.grace_period_days) * SECONDS_PER_DAY);
        let cutoff = now.saturating_sub(grace);

        let candidates = self.database.find_hnr_candidates(cutoff, self.config.min_seedtime)?;

        let mut summary = PassSummary::default();
        let mut violations_per_user: HashMap<UserId, u32> = HashMap::new();

        for snatch in &candidates {
            if let Err(err) = self.database.mark_snatch_hnr(snatch.user_id, snatch.torrent_id) {
                warn!(
                    "failed to mark snatch ({}, {}) as hit-and-run: {err}",
                    snatch.user_id, snatch.torrent_id
                );
                continue;
            }

            summary.new_violations += 1;
            *violations_per_user.entry(snatch.user_id).or_default() += 1;
        }

        for (user_id, violations) in violations_per_user {
            let total = match self.database.increment_hnr_warnings(user_id, violations) {
                Ok(total) => total,
                Err(err) => {
                    warn!("failed to add {violations} warnings to user {user_id}: {err}");
                    continue;
                }
            };

            summary.users_warned += 1;

            let can_leech = total < self.config.max_warnings;
            if !can_leech {
                summary.users_disabled += 1;
            }

            if let Err(err) = self.database.set_can_leech(user_id, can_leech) {
                warn!("failed to update leech flag for user {user_id}: {err}");
                continue;
            }

            if let Some(entry) = self.gate.user_by_id(user_id) {
                entry.set_can_leech(can_leech);
            }
        }

        if summary.new_violations > 0 {
            info!(
                "hit-and-run pass: {} new violations, {} users disabled",
                summary.new_violations, summary.users_disabled
            );
        }

        Ok(summary)
    }

    /// The admin clear-warnings action: warnings back to zero, leeching back
    /// on, in the store and the gate cache.
    ///
    /// # Errors
    ///
    /// Will return a database [`Error`](crate::core::databases::error::Error)
    /// if the update fails.
    pub fn clear_warnings(&self, user_id: UserId) -> Result<(), crate::core::databases::error::Error> {
        self.database.clear_hnr_warnings(user_id)?;

        if let Some(entry) = self.gate.user_by_id(user_id) {
            entry.set_can_leech(true);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{HnrDetector, PassSummary};
    use crate::config::HitAndRun;
    use crate::core::databases::sqlite::Sqlite;
    use crate::core::databases::Database;
    use crate::core::gate::GateCache;
    use crate::shared::bit_torrent::info_hash::InfoHash;

    const DAY: u64 = 86_400;

    fn config() -> HitAndRun {
        HitAndRun {
            min_seedtime: 3600,
            grace_period_days: 14,
            max_warnings: 2,
        }
    }

    struct Harness {
        database: Arc<Sqlite>,
        detector: HnrDetector,
    }

    impl Harness {
        fn new() -> Self {
            let database = Arc::new({
                let database = Sqlite::new_in_memory();
                database.create_database_tables().unwrap();
                database
            });

            let detector = HnrDetector::new(config(), database.clone(), Arc::new(GateCache::new()));

            Self { database, detector }
        }

        fn seed_snatch(&self, user_id: i64, info_hash_byte: u8, completed_at_secs: u64, seedtime: u64) {
            let info_hash = InfoHash([info_hash_byte; 20]);
            let torrent = self.database.get_or_insert_torrent(&info_hash).unwrap();
            self.database
                .upsert_snatch(user_id, torrent.id, Duration::from_secs(completed_at_secs))
                .unwrap();
            if seedtime > 0 {
                self.database
                    .record_seedtime(user_id, torrent.id, seedtime, Duration::from_secs(completed_at_secs))
                    .unwrap();
            }
        }

        /// Users are created by the external admin surface; tests insert them
        /// directly.
        fn seed_user(&self, passkey: &str) -> i64 {
            let conn = self.database.connection_for_tests();
            conn.execute("INSERT INTO users (passkey) VALUES (?1)", [passkey]).unwrap();
            conn.last_insert_rowid()
        }
    }

    #[test]
    fn a_pass_with_no_candidates_should_do_nothing() {
        let harness = Harness::new();

        let summary = harness.detector.run_pass(Duration::from_secs(100 * DAY)).unwrap();

        assert_eq!(summary, PassSummary::default());
    }

    #[test]
    fn an_under_seeded_snatch_past_the_grace_period_should_become_a_violation() {
        let harness = Harness::new();
        let user_id = harness.seed_user("00000000000000000000000000000001");

        // Completed on day 10, now is day 30: grace of 14 days has passed.
        harness.seed_snatch(user_id, 1, 10 * DAY, 60);

        let summary = harness.detector.run_pass(Duration::from_secs(30 * DAY)).unwrap();

        assert_eq!(summary.new_violations, 1);
        assert_eq!(summary.users_warned, 1);
        assert_eq!(summary.users_disabled, 0);

        let user = harness.database.get_user(user_id).unwrap().unwrap();
        assert_eq!(user.hnr_warnings, 1);
        assert!(user.can_leech);
    }

    #[test]
    fn a_snatch_inside_the_grace_period_or_with_enough_seedtime_should_not_be_flagged() {
        let harness = Harness::new();
        let user_id = harness.seed_user("00000000000000000000000000000001");

        // Fresh snatch, grace still running.
        harness.seed_snatch(user_id, 1, 25 * DAY, 0);
        // Old snatch but seeded past the minimum.
        harness.seed_snatch(user_id, 2, 5 * DAY, 7200);

        let summary = harness.detector.run_pass(Duration::from_secs(30 * DAY)).unwrap();

        assert_eq!(summary.new_violations, 0);
    }

    #[test]
    fn reaching_max_warnings_should_disable_leeching() {
        let harness = Harness::new();
        let user_id = harness.seed_user("00000000000000000000000000000001");

        harness.seed_snatch(user_id, 1, 10 * DAY, 0);
        harness.seed_snatch(user_id, 2, 11 * DAY, 0);

        let summary = harness.detector.run_pass(Duration::from_secs(30 * DAY)).unwrap();

        assert_eq!(summary.new_violations, 2);
        assert_eq!(summary.users_disabled, 1);

        let user = harness.database.get_user(user_id).unwrap().unwrap();
        assert_eq!(user.hnr_warnings, 2);
        assert!(!user.can_leech);
    }

    #[test]
    fn a_second_pass_should_not_flag_the_same_snatch_again() {
        let harness = Harness::new();
        let user_id = harness.seed_user("00000000000000000000000000000001");

        harness.seed_snatch(user_id, 1, 10 * DAY, 0);

        harness.detector.run_pass(Duration::from_secs(30 * DAY)).unwrap();
        let second = harness.detector.run_pass(Duration::from_secs(31 * DAY)).unwrap();

        assert_eq!(second.new_violations, 0);

        let user = harness.database.get_user(user_id).unwrap().unwrap();
        assert_eq!(user.hnr_warnings, 1);
    }

    #[test]
    fn clearing_warnings_should_reenable_leeching() {
        let harness = Harness::new();
        let user_id = harness.seed_user("00000000000000000000000000000001");

        harness.seed_snatch(user_id, 1, 10 * DAY, 0);
        harness.seed_snatch(user_id, 2, 11 * DAY, 0);
        harness.detector.run_pass(Duration::from_secs(30 * DAY)).unwrap();

        harness.detector.clear_warnings(user_id).unwrap();

        let user = harness.database.get_user(user_id).unwrap().unwrap();
        assert_eq!(user.hnr_warnings, 0);
        assert!(user.can_leech);
    }
}
