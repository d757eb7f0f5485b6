//! Event projection engine.
//!
//! One decoded event becomes exactly one idempotent state transition.
//! Creates use the store's conditional write, read-modify-writes go through
//! the CAS loop in `store::update_doc`, so redelivered webhooks and backfill
//! replays land on the documents they already produced.
//!
//! A missing referenced entity is an error log and a no-op, never a retry:
//! the entity may simply not have synced yet, and a later replay will catch
//! up.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::U256;
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use crate::chain::codec::{FieldValue, Fields};
use crate::chain::registry::{EventKind, EventSpec};
use crate::model::{
    col, Contest, ContestStatus, Leaderboard, LeaderboardPosition, LeaderboardRule,
    LeaderboardRules, MarketSnapshot, Position, Registration, Side, Speculation,
    SpeculationStatus, WinningSide, PRECISION,
};
use crate::store::{create_doc, get_doc, update_doc, DocumentStore};

/// Where an event came from. `is_sync` marks backfill replays so handlers
/// can relax wall-clock guards that only make sense for live traffic.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub is_sync: bool,
}

pub struct Projector {
    store: Arc<dyn DocumentStore>,
}

impl Projector {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Apply one decoded event. Errors here are per-event; the dispatcher
    /// logs them and moves on to the next log in the delivery.
    pub async fn apply(
        &self,
        spec: &EventSpec,
        values: &[FieldValue],
        ctx: &EventContext,
    ) -> anyhow::Result<()> {
        let f = Fields(values);
        match spec.kind {
            EventKind::ContestCreated => self.contest_created(&f).await,
            EventKind::SpeculationCreated => self.speculation_created(&f, ctx).await,
            EventKind::SpeculationLocked => self.speculation_locked(&f).await,
            EventKind::SpeculationScored => self.speculation_scored(&f).await,
            EventKind::PositionCreated => self.position_created(&f).await,
            EventKind::PositionMatched => self.position_matched(&f).await,
            EventKind::WinningsClaimed => self.winnings_claimed(&f).await,
            EventKind::LeaderboardCreated => self.leaderboard_created(&f).await,
            EventKind::LeaderboardRuleUpdated => self.leaderboard_rule_updated(&f).await,
            EventKind::UserRegistered => self.user_registered(&f).await,
            EventKind::NewHighestRoi => self.new_highest_roi(&f).await,
            EventKind::LeaderboardPositionCreated => self.leaderboard_position_created(&f).await,
        }
    }

    /// ContestCreated(contestId, providerId, creator)
    ///
    /// The reconciler usually gets there first, so the common case is
    /// flagging an existing feed-sourced contest as created on-chain. A
    /// contest the feeds have never seen is written as `Unverified` under
    /// its chain id and picked up by a later refresh.
    async fn contest_created(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let contest_id = f.u256_key(0)?;
        let provider_id = f.str(1)?.to_string();

        if self.store.get(col::CONTESTS, &contest_id).await?.is_some() {
            debug!(contest_id, "contest already projected, skipping");
            return Ok(());
        }

        enum Prior {
            Fresh,
            Duplicate,
            Conflict(String),
        }
        let mut prior = Prior::Fresh;
        let updated = update_doc::<Contest, _>(&*self.store, col::CONTESTS, &provider_id, |c| {
            match &c.contest_id {
                Some(existing) if *existing == contest_id => {
                    prior = Prior::Duplicate;
                    return;
                }
                Some(existing) => {
                    prior = Prior::Conflict(existing.clone());
                    return;
                }
                None => prior = Prior::Fresh,
            }
            c.contest_id = Some(contest_id.clone());
            c.created = true;
            if c.status.rank() < ContestStatus::Created.rank() {
                c.status = ContestStatus::Created;
            }
            c.updated_at = Utc::now();
        })
        .await?;

        match (updated, prior) {
            (Some(_), Prior::Fresh) => {
                info!(contest_id, provider_id, "contest flagged as created on-chain");
                Ok(())
            }
            (Some(_), Prior::Duplicate) => {
                debug!(contest_id, provider_id, "contest already flagged, skipping");
                Ok(())
            }
            (Some(_), Prior::Conflict(existing)) => {
                // The provider document already belongs to a different
                // chain id. That is a data problem worth surfacing.
                error!(
                    contest_id,
                    provider_id,
                    existing,
                    "provider contest already bound to another chain id"
                );
                Ok(())
            }
            (None, _) => {
                let now = Utc::now();
                let contest = Contest {
                    contest_id: Some(contest_id.clone()),
                    jsonodds_id: Some(provider_id.clone()),
                    rundown_id: None,
                    sportspage_id: None,
                    sport: 0,
                    away_team: String::new(),
                    home_team: String::new(),
                    match_time: now,
                    snapshot: MarketSnapshot::default(),
                    status: ContestStatus::Unverified,
                    created: true,
                    score_away: None,
                    score_home: None,
                    scored_at: None,
                    updated_at: now,
                };
                if create_doc(&*self.store, col::CONTESTS, &contest_id, &contest).await? {
                    info!(contest_id, provider_id, "unverified contest created from chain event");
                } else {
                    debug!(contest_id, "lost create race, contest already present");
                }
                Ok(())
            }
        }
    }

    /// SpeculationCreated(speculationId, contestId, lockTime, scorer,
    /// theNumber, creator)
    async fn speculation_created(&self, f: &Fields<'_>, ctx: &EventContext) -> anyhow::Result<()> {
        let speculation_id = f.u256_key(0)?;
        let contest_id = f.u256_key(1)?;
        let lock_time = unix_time(f.u256(2)?)?;
        let scorer = f.address_key(3)?;
        let threshold = f.i64(4)?;
        let creator = f.address_key(5)?;

        if self.store.get(col::SPECULATIONS, &speculation_id).await?.is_some() {
            debug!(speculation_id, "speculation already projected, skipping");
            return Ok(());
        }

        // Different primary id, same proposition: the scorer contract plus
        // threshold fully determines what is being wagered on.
        let tuple = (contest_id.clone(), scorer.clone(), threshold);
        for key in self.store.list_keys(col::SPECULATIONS, "").await? {
            if let Some(existing) =
                get_doc::<Speculation>(&*self.store, col::SPECULATIONS, &key).await?
            {
                if existing.business_tuple() == tuple {
                    warn!(
                        speculation_id,
                        duplicate_of = key,
                        contest_id,
                        scorer,
                        threshold,
                        "functional duplicate speculation, skipping"
                    );
                    return Ok(());
                }
            }
        }

        if !ctx.is_sync && lock_time <= Utc::now() {
            info!(speculation_id, %lock_time, "speculation already past lock time, skipping");
            return Ok(());
        }

        let speculation = Speculation {
            speculation_id: speculation_id.clone(),
            contest_id,
            scorer,
            threshold,
            creator,
            lock_time,
            status: SpeculationStatus::Open,
            winning_side: None,
            updated_at: Utc::now(),
        };
        if create_doc(&*self.store, col::SPECULATIONS, &speculation_id, &speculation).await? {
            info!(speculation_id, "speculation created");
        } else {
            debug!(speculation_id, "lost create race, speculation already present");
        }
        Ok(())
    }

    /// SpeculationLocked(speculationId)
    async fn speculation_locked(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let speculation_id = f.u256_key(0)?;
        let updated =
            update_doc::<Speculation, _>(&*self.store, col::SPECULATIONS, &speculation_id, |s| {
                s.status = SpeculationStatus::Closed;
                s.updated_at = Utc::now();
            })
            .await?;
        if updated.is_none() {
            error!(speculation_id, "locked speculation not found");
        }
        Ok(())
    }

    /// SpeculationScored(speculationId, contestId, winningSide)
    async fn speculation_scored(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let speculation_id = f.u256_key(0)?;
        let side_wire = f.u64(2)?;
        let Some(winning_side) = WinningSide::from_wire(side_wire) else {
            warn!(speculation_id, side_wire, "unrecognized winning side, skipping");
            return Ok(());
        };
        let updated =
            update_doc::<Speculation, _>(&*self.store, col::SPECULATIONS, &speculation_id, |s| {
                s.status = SpeculationStatus::Closed;
                s.winning_side = Some(winning_side);
                s.updated_at = Utc::now();
            })
            .await?;
        if updated.is_none() {
            error!(speculation_id, "scored speculation not found");
        }
        Ok(())
    }

    /// PositionCreated(speculationId, user, oddsPairId, side,
    /// unmatchedAmount, upperOdds, lowerOdds, unmatchedExpiry)
    async fn position_created(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let speculation_id = f.u256_key(0)?;
        let user = f.address_key(1)?;
        let odds_pair_id = f.u256_key(2)?;
        let side = wire_side(f.u64(3)?)?;
        let unmatched_amount = f.amount(4)?;
        let stored_upper_odds = f.u64(5)?;
        let stored_lower_odds = f.u64(6)?;
        let expiry = f.u256(7)?;

        let position = Position {
            speculation_id: speculation_id.clone(),
            user,
            odds_pair_id,
            side,
            matched_amount: 0,
            unmatched_amount,
            unmatched_expiry: if expiry.is_zero() { None } else { Some(unix_time(expiry)?) },
            stored_upper_odds,
            stored_lower_odds,
            counterparties: Default::default(),
            claimed: false,
            payout: 0,
            updated_at: Utc::now(),
        };
        let key = position.doc_key();
        if create_doc(&*self.store, col::POSITIONS, &key, &position).await? {
            info!(position = key, unmatched_amount, "position created");
        } else {
            debug!(position = key, "position already projected, skipping");
        }
        Ok(())
    }

    /// PositionMatched(speculationId, maker, taker, oddsPairId, makerSide,
    /// takerAmount)
    ///
    /// The taker consumes part of the maker's unmatched stake. The amount
    /// consumed is the taker's stake priced at the maker's stored odds for
    /// the opposite side:
    ///
    ///   consumed = takerAmount * (oppositeOdds - PRECISION) / PRECISION
    ///
    /// The two counterparty records are deliberately asymmetric, mirroring
    /// the contract's accounting: the maker records the taker's contributed
    /// amount, the taker records the maker's consumed amount.
    async fn position_matched(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let speculation_id = f.u256_key(0)?;
        let maker = f.address_key(1)?;
        let taker = f.address_key(2)?;
        let odds_pair_id = f.u256_key(3)?;
        let maker_side = wire_side(f.u64(4)?)?;
        let taker_amount = f.amount(5)?;

        let maker_key = Position::key(&speculation_id, &maker, &odds_pair_id, maker_side);
        let mut consumed: u128 = 0;
        let updated =
            update_doc::<Position, _>(&*self.store, col::POSITIONS, &maker_key, |p| {
                let opposite_odds = match maker_side {
                    Side::Upper => p.stored_lower_odds,
                    Side::Lower => p.stored_upper_odds,
                };
                let margin = u128::from(opposite_odds.saturating_sub(PRECISION));
                // taker_amount can be anything that fit the uint256->u128
                // narrowing; widen through U256 and saturate on the way
                // back instead of wrapping.
                let wide = U256::from(taker_amount) * U256::from(margin) / U256::from(PRECISION);
                consumed = u128::try_from(wide).unwrap_or(u128::MAX);
                p.matched_amount = p.matched_amount.saturating_add(consumed);
                p.unmatched_amount = p.unmatched_amount.saturating_sub(consumed);
                let entry = p.counterparties.entry(taker.clone()).or_insert(0);
                *entry = entry.saturating_add(taker_amount);
                p.updated_at = Utc::now();
            })
            .await?;
        let Some(maker_pos) = updated else {
            error!(position = maker_key, "matched maker position not found");
            return Ok(());
        };

        let taker_side = maker_side.opposite();
        let taker_key = Position::key(&speculation_id, &taker, &odds_pair_id, taker_side);
        loop {
            let updated =
                update_doc::<Position, _>(&*self.store, col::POSITIONS, &taker_key, |p| {
                    p.matched_amount = p.matched_amount.saturating_add(taker_amount);
                    let entry = p.counterparties.entry(maker.clone()).or_insert(0);
                    *entry = entry.saturating_add(consumed);
                    p.updated_at = Utc::now();
                })
                .await?;
            if updated.is_some() {
                break;
            }
            let position = Position {
                speculation_id: speculation_id.clone(),
                user: taker.clone(),
                odds_pair_id: odds_pair_id.clone(),
                side: taker_side,
                matched_amount: taker_amount,
                unmatched_amount: 0,
                unmatched_expiry: None,
                stored_upper_odds: maker_pos.stored_upper_odds,
                stored_lower_odds: maker_pos.stored_lower_odds,
                counterparties: [(maker.clone(), consumed)].into_iter().collect(),
                claimed: false,
                payout: 0,
                updated_at: Utc::now(),
            };
            if create_doc(&*self.store, col::POSITIONS, &taker_key, &position).await? {
                break;
            }
            // Lost the create race to a concurrent delivery; fold into the
            // now-existing document instead.
        }

        info!(
            maker = maker_key,
            taker = taker_key,
            taker_amount,
            consumed,
            "positions matched"
        );
        Ok(())
    }

    /// WinningsClaimed(speculationId, user, oddsPairId, side, payout)
    async fn winnings_claimed(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let speculation_id = f.u256_key(0)?;
        let user = f.address_key(1)?;
        let odds_pair_id = f.u256_key(2)?;
        let side = wire_side(f.u64(3)?)?;
        let payout = f.amount(4)?;

        let key = Position::key(&speculation_id, &user, &odds_pair_id, side);
        let updated = update_doc::<Position, _>(&*self.store, col::POSITIONS, &key, |p| {
            p.claimed = true;
            p.payout = payout;
            p.updated_at = Utc::now();
        })
        .await?;
        if updated.is_none() {
            error!(position = key, "claimed position not found");
        } else {
            info!(position = key, payout, "winnings claimed");
        }
        Ok(())
    }

    /// LeaderboardCreated(leaderboardId, entryFee, initialPrizePool)
    async fn leaderboard_created(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let leaderboard_id = f.u256_key(0)?;
        let leaderboard = Leaderboard {
            leaderboard_id: leaderboard_id.clone(),
            entry_fee: f.u256_key(1)?,
            prize_pool: f.u256_key(2)?,
            registration_deadline: None,
            current_participants: 0,
            total_positions: 0,
            speculations: Default::default(),
            rules: LeaderboardRules::default(),
            current_highest_roi: None,
            current_winner: None,
            updated_at: Utc::now(),
        };
        if create_doc(&*self.store, col::LEADERBOARDS, &leaderboard_id, &leaderboard).await? {
            info!(leaderboard_id, "leaderboard created");
        } else {
            debug!(leaderboard_id, "leaderboard already projected, skipping");
        }
        Ok(())
    }

    /// LeaderboardRuleUpdated(leaderboardId, ruleKey, value)
    ///
    /// Rule keys are short ASCII strings packed into a bytes32. Anything
    /// outside the closed rule set is rejected without a write.
    async fn leaderboard_rule_updated(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let leaderboard_id = f.u256_key(0)?;
        let raw_key = f.b256(1)?;
        let value = f.u256(2)?;

        let trimmed: Vec<u8> =
            raw_key.iter().copied().take_while(|b| *b != 0).collect();
        let Some(rule) = std::str::from_utf8(&trimmed).ok().and_then(LeaderboardRule::parse)
        else {
            warn!(leaderboard_id, rule_key = %raw_key, "unrecognized leaderboard rule, rejected");
            return Ok(());
        };

        let deadline = match rule {
            LeaderboardRule::RegistrationDeadline => Some(unix_time(value)?),
            _ => None,
        };
        let max_positions = match rule {
            LeaderboardRule::MaxPositions => Some(
                u64::try_from(value).map_err(|_| anyhow::anyhow!("maxPositions out of range"))?,
            ),
            _ => None,
        };

        let updated =
            update_doc::<Leaderboard, _>(&*self.store, col::LEADERBOARDS, &leaderboard_id, |l| {
                match rule {
                    LeaderboardRule::MaxPositions => l.rules.max_positions = max_positions,
                    LeaderboardRule::MinBankroll => {
                        l.rules.min_bankroll = Some(value.to_string())
                    }
                    LeaderboardRule::MaxBankroll => {
                        l.rules.max_bankroll = Some(value.to_string())
                    }
                    LeaderboardRule::RegistrationDeadline => {
                        l.rules.registration_deadline = deadline;
                        l.registration_deadline = deadline;
                    }
                }
                l.updated_at = Utc::now();
            })
            .await?;
        if updated.is_none() {
            error!(leaderboard_id, ?rule, "rule update for unknown leaderboard");
        }
        Ok(())
    }

    /// UserRegistered(leaderboardId, user, declaredBankroll, paidEntry)
    ///
    /// The participant count and prize pool only move on the first
    /// projection of a given registration; a redelivery that loses the
    /// conditional create never touches the leaderboard.
    async fn user_registered(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let leaderboard_id = f.u256_key(0)?;
        let user = f.address_key(1)?;
        let declared_bankroll = f.u256_key(2)?;
        let paid_entry = f.bool(3)?;

        let key = Registration::key(&leaderboard_id, &user);
        let registration = Registration {
            leaderboard_id: leaderboard_id.clone(),
            user: user.clone(),
            declared_bankroll,
            submitted_roi: 0,
            is_current_winner: false,
            updated_at: Utc::now(),
        };
        if !create_doc(&*self.store, col::REGISTRATIONS, &key, &registration).await? {
            debug!(registration = key, "registration already projected, skipping");
            return Ok(());
        }

        let updated =
            update_doc::<Leaderboard, _>(&*self.store, col::LEADERBOARDS, &leaderboard_id, |l| {
                l.current_participants += 1;
                if paid_entry {
                    // uint256 amounts as decimal strings; a corrupt field
                    // degrades to zero rather than poisoning the document.
                    let pool = U256::from_str(&l.prize_pool).unwrap_or_default();
                    let fee = U256::from_str(&l.entry_fee).unwrap_or_default();
                    l.prize_pool = (pool + fee).to_string();
                }
                l.updated_at = Utc::now();
            })
            .await?;
        if updated.is_none() {
            error!(leaderboard_id, user, "registration for unknown leaderboard");
        } else {
            info!(leaderboard_id, user, paid_entry, "user registered");
        }
        Ok(())
    }

    /// NewHighestROI(leaderboardId, user, roi)
    ///
    /// Sets the new winner, then sweeps every other registration on the
    /// leaderboard and clears any stale winner flag. The sweep makes the
    /// at-most-one-winner invariant hold even if a past pointer update was
    /// lost.
    async fn new_highest_roi(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let leaderboard_id = f.u256_key(0)?;
        let user = f.address_key(1)?;
        let roi = f.i64(2)?;

        let winner_key = Registration::key(&leaderboard_id, &user);
        let updated =
            update_doc::<Registration, _>(&*self.store, col::REGISTRATIONS, &winner_key, |r| {
                r.is_current_winner = true;
                r.submitted_roi = roi;
                r.updated_at = Utc::now();
            })
            .await?;
        if updated.is_none() {
            error!(registration = winner_key, "roi leader has no registration");
        }

        let updated =
            update_doc::<Leaderboard, _>(&*self.store, col::LEADERBOARDS, &leaderboard_id, |l| {
                l.current_highest_roi = Some(roi);
                l.current_winner = Some(user.clone());
                l.updated_at = Utc::now();
            })
            .await?;
        if updated.is_none() {
            error!(leaderboard_id, "roi event for unknown leaderboard");
        }

        let prefix = format!("{leaderboard_id}-");
        for key in self.store.list_keys(col::REGISTRATIONS, &prefix).await? {
            if key == winner_key {
                continue;
            }
            let Some(reg) =
                get_doc::<Registration>(&*self.store, col::REGISTRATIONS, &key).await?
            else {
                continue;
            };
            if reg.is_current_winner {
                warn!(registration = key, "clearing stale winner flag");
                update_doc::<Registration, _>(&*self.store, col::REGISTRATIONS, &key, |r| {
                    r.is_current_winner = false;
                    r.updated_at = Utc::now();
                })
                .await?;
            }
        }
        Ok(())
    }

    /// LeaderboardPositionCreated(leaderboardId, speculationId, user,
    /// oddsPairId, side, amount)
    async fn leaderboard_position_created(&self, f: &Fields<'_>) -> anyhow::Result<()> {
        let leaderboard_id = f.u256_key(0)?;
        let speculation_id = f.u256_key(1)?;
        let user = f.address_key(2)?;
        let odds_pair_id = f.u256_key(3)?;
        let side = wire_side(f.u64(4)?)?;
        let amount = f.amount(5)?;

        let key =
            LeaderboardPosition::key(&leaderboard_id, &speculation_id, &user, &odds_pair_id, side);
        let row = LeaderboardPosition {
            leaderboard_id: leaderboard_id.clone(),
            speculation_id: speculation_id.clone(),
            user,
            odds_pair_id,
            side,
            amount,
            updated_at: Utc::now(),
        };
        if !create_doc(&*self.store, col::LEADERBOARD_POSITIONS, &key, &row).await? {
            debug!(leaderboard_position = key, "row already projected, skipping");
            return Ok(());
        }

        let updated =
            update_doc::<Leaderboard, _>(&*self.store, col::LEADERBOARDS, &leaderboard_id, |l| {
                l.speculations.insert(speculation_id.clone());
                l.total_positions += 1;
                l.updated_at = Utc::now();
            })
            .await?;
        if updated.is_none() {
            error!(leaderboard_id, "leaderboard position for unknown leaderboard");
        }
        Ok(())
    }
}

fn wire_side(v: u64) -> anyhow::Result<Side> {
    Side::from_wire(v).with_context(|| format!("invalid side {v} on the wire"))
}

fn unix_time(secs: U256) -> anyhow::Result<DateTime<Utc>> {
    let secs = i64::try_from(secs).map_err(|_| anyhow::anyhow!("timestamp out of range"))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .with_context(|| format!("invalid unix timestamp {secs}"))
}
