//! The bonus point economy.
//!
//! Sustained seeding earns points, weighted towards rare torrents: each hourly
//! pass awards every active seeder of a swarm
//! `base × √seeders / max(1, leechers)` points. A torrent with few seeders
//! relative to its leechers rewards seeding the most.
//!
//! Points are redeemable for synthetic upload credit at the configured
//! conversion rate. Redemption is the single path on which `User.uploaded`
//! grows without matching transfer.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::BonusPoints;
use crate::core::databases::{Database, RedeemOutcome};
use crate::core::error::Error;
use crate::core::swarm::SwarmRegistry;
use crate::core::UserId;

/// What one calculator pass did.
#[derive(Debug, Default, PartialEq)]
pub struct PassSummary {
    pub swarms_scanned: usize,
    pub seeders_rewarded: usize,
    pub points_awarded: f64,
}

pub struct BonusCalculator {
    config: BonusPoints,
    database: Arc<dyn Database>,
}

impl BonusCalculator {
    #[must_use]
    pub fn new(config: BonusPoints, database: Arc<dyn Database>) -> Self {
        Self { config, database }
    }

    /// The points one seeder of a swarm earns this pass.
    #[must_use]
    pub fn points_per_seeder(&self, seeders: u32, leechers: u32) -> f64 {
        if seeders == 0 {
            return 0.0;
        }

        self.config.base_points * f64::from(seeders).sqrt() / f64::from(leechers.max(1))
    }

    /// One award pass over every active swarm.
    pub async fn run_pass(&self, swarms: &SwarmRegistry) -> PassSummary {
        let snapshots = swarms.snapshot_active_swarms().await;

        let mut summary = PassSummary {
            swarms_scanned: snapshots.len(),
            ..Default::default()
        };

        let mut accumulator: HashMap<UserId, f64> = HashMap::new();

        for (info_hash, counts, peers) in snapshots {
            let points = self.points_per_seeder(counts.seeders, counts.leechers);
            if points <= 0.0 {
                continue;
            }

            debug!("swarm {info_hash}: {points:.4} points per seeder");

            for peer in peers {
                if !peer.is_seeder() {
                    continue;
                }
                let Some(user_id) = peer.user_id else {
                    // UDP peers are anonymous and cannot earn points.
                    continue;
                };

                *accumulator.entry(user_id).or_default() += points;
                summary.seeders_rewarded += 1;
            }
        }

        for (user_id, points) in accumulator {
            match self.database.add_bonus_points(user_id, points) {
                Ok(()) => summary.points_awarded += points,
                Err(err) => warn!("failed to award {points:.4} bonus points to user {user_id}: {err}"),
            }
        }

        if summary.points_awarded > 0.0 {
            info!(
                "bonus pass: awarded {:.2} points across {} seeders",
                summary.points_awarded, summary.seeders_rewarded
            );
        }

        summary
    }

    /// It redeems `points` for upload credit at the configured rate.
    ///
    /// # Errors
    ///
    /// Will return [`Error::UserNotFound`], [`Error::InsufficientPoints`], or
    /// a transient error when the store fails.
    pub fn redeem(&self, user_id: UserId, points: f64) -> Result<u64, Error> {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let upload_credit = (points * self.config.conversion_rate as f64) as u64;

        match self.database.redeem_bonus_points(user_id, points, upload_credit)? {
            RedeemOutcome::Redeemed => Ok(upload_credit),
            RedeemOutcome::UserNotFound => Err(Error::UserNotFound),
            RedeemOutcome::InsufficientPoints => Err(Error::InsufficientPoints),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::BonusCalculator;
    use crate::config::BonusPoints;
    use crate::core::databases::sqlite::Sqlite;
    use crate::core::databases::Database;
    use crate::core::error::Error;

    fn calculator() -> (BonusCalculator, Arc<Sqlite>) {
        let database = Arc::new({
            let database = Sqlite::new_in_memory();
            database.create_database_tables().unwrap();
            database
        });

        let calculator = BonusCalculator::new(
            BonusPoints {
                base_points: 2.0,
                conversion_rate: 1_000_000,
            },
            database.clone(),
        );

        (calculator, database)
    }

    fn seed_user(database: &Sqlite) -> i64 {
        let conn = database.connection_for_tests();
        conn.execute("INSERT INTO users (passkey) VALUES ('00000000000000000000000000000001')", [])
            .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn rarity_should_weight_the_award() {
        let (calculator, _database) = calculator();

        // No seeders, no award.
        assert_eq!(calculator.points_per_seeder(0, 100), 0.0);

        // 4 seeders, 1 leecher: 2.0 * 2 / 1
        assert!((calculator.points_per_seeder(4, 1) - 4.0).abs() < f64::EPSILON);

        // 4 seeders, 8 leechers: 2.0 * 2 / 8
        assert!((calculator.points_per_seeder(4, 8) - 0.5).abs() < f64::EPSILON);

        // Zero leechers counts as one, not a division by zero.
        assert!((calculator.points_per_seeder(1, 0) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn demand_should_dilute_the_per_seeder_award() {
        let (calculator, _database) = calculator();

        assert!(calculator.points_per_seeder(2, 40) < calculator.points_per_seeder(2, 4));
        assert!(calculator.points_per_seeder(4, 10) > calculator.points_per_seeder(1, 10));
    }

    #[test]
    fn redemption_should_convert_points_into_upload_credit() {
        let (calculator, database) = calculator();
        let user_id = seed_user(&database);
        database.add_bonus_points(user_id, 10.0).unwrap();

        let credit = calculator.redeem(user_id, 2.5).unwrap();

        assert_eq!(credit, 2_500_000);
        let user = database.get_user(user_id).unwrap().unwrap();
        assert_eq!(user.uploaded, 2_500_000);
        assert!((user.bonus_points - 7.5).abs() < f64::EPSILON);
    }

    #[test]
    fn redemption_should_reject_missing_users_and_short_balances() {
        let (calculator, database) = calculator();
        let user_id = seed_user(&database);
        database.add_bonus_points(user_id, 1.0).unwrap();

        assert!(matches!(calculator.redeem(user_id, 5.0), Err(Error::InsufficientPoints)));
        assert!(matches!(calculator.redeem(9999, 1.0), Err(Error::UserNotFound)));
    }
}
