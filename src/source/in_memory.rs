use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::{OutcomeSource, SourceError};
use crate::round::{
    Bet, BetKind, Chips, Color, DrawTimestamp, EpochMillis, Outcome, Participant, RoundSnapshot,
    Winner, MAX_NUMBER,
};
use crate::time::{Clock, SystemClock};

const LOG_TARGET: &str = "source::in_memory";

pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct InMemorySourceConfig {
    pub betting_window: Duration,
    /// Seed for draws that are not scripted. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for InMemorySourceConfig {
    fn default() -> Self {
        Self {
            betting_window: Duration::from_secs(30),
            seed: None,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_reads: u32,
    failing_draws: u32,
    silent_draws: u32,
}

struct Ledger {
    players: BTreeMap<String, Participant>,
    current_bets: Vec<Bet>,
    betting_end_time: Option<EpochMillis>,
    last_result: Option<Outcome>,
    history: Vec<u8>,
    last_timestamp_us: i64,
    scripted: VecDeque<u8>,
    rng: StdRng,
    faults: Faults,
    reads: u64,
    draws: u64,
}

impl Ledger {
    fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            current_bets: self.current_bets.clone(),
            betting_window_end_epoch_ms: self.betting_end_time,
            last_outcome: self.last_result.clone(),
            history: self.history.clone(),
        }
    }

    /// Microsecond timestamps that never repeat, even when the clock stands still.
    fn next_timestamp(&mut self, now_ms: EpochMillis) -> DrawTimestamp {
        let now_us = now_ms.saturating_mul(1_000);
        self.last_timestamp_us = now_us.max(self.last_timestamp_us + 1);
        DrawTimestamp::new(self.last_timestamp_us.to_string())
    }

    fn settle(&mut self, number: u8, drawn_at: DrawTimestamp) -> Outcome {
        let mut winners = Vec::new();
        for bet in std::mem::take(&mut self.current_bets) {
            if !bet.bet_kind.covers(number, &bet.numbers) {
                continue;
            }
            let payout = bet.amount + bet.amount * bet.bet_kind.payout_multiplier();
            if let Some(player) = self.players.get_mut(&bet.participant_id) {
                player.balance += payout;
            }
            winners.push(Winner {
                participant_id: bet.participant_id,
                participant_name: bet.participant_name,
                bet_kind: bet.bet_kind,
                bet_amount: bet.amount,
                payout,
            });
        }

        self.history.push(number);
        if self.history.len() > HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.betting_end_time = None;

        let outcome = Outcome {
            number,
            color: Color::of(number),
            drawn_at,
            winners,
        };
        self.last_result = Some(outcome.clone());
        outcome
    }
}

/// Simulated ledger for offline play and tests.
///
/// Clones share the same ledger, so a test can keep a handle for scripting draws and
/// injecting faults while a driver owns another.
#[derive(Clone)]
pub struct InMemoryOutcomeSource {
    inner: Arc<RwLock<Ledger>>,
    clock: Arc<dyn Clock>,
    betting_window: Duration,
}

impl InMemoryOutcomeSource {
    pub fn new(config: InMemorySourceConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: InMemorySourceConfig, clock: Arc<dyn Clock>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(RwLock::new(Ledger {
                players: BTreeMap::new(),
                current_bets: Vec::new(),
                betting_end_time: None,
                last_result: None,
                history: Vec::new(),
                last_timestamp_us: 0,
                scripted: VecDeque::new(),
                rng,
                faults: Faults::default(),
                reads: 0,
                draws: 0,
            })),
            clock,
            betting_window: config.betting_window,
        }
    }

    /// Queues winning numbers for upcoming draws, ahead of the random generator.
    pub fn script_draws(&self, numbers: impl IntoIterator<Item = u8>) {
        self.inner.write().scripted.extend(numbers);
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.inner.write().faults.failing_reads = count;
    }

    pub fn fail_next_draw(&self) {
        self.inner.write().faults.failing_draws += 1;
    }

    /// The next draw is acknowledged but leaves the ledger untouched.
    pub fn ignore_next_draw(&self) {
        self.inner.write().faults.silent_draws += 1;
    }

    /// Settles the open bets immediately, as a host elsewhere would.
    pub fn settle_now(&self, number: u8) -> Result<Outcome, SourceError> {
        ensure_number(number)?;
        let now = self.clock.now_ms();
        let mut ledger = self.inner.write();
        let drawn_at = ledger.next_timestamp(now);
        ledger.draws += 1;
        Ok(ledger.settle(number, drawn_at))
    }

    /// Opens a betting window directly on the ledger, as a remote host would.
    pub fn open_window_until(&self, end_time_epoch_ms: EpochMillis) {
        self.inner.write().betting_end_time = Some(end_time_epoch_ms);
    }

    pub fn read_count(&self) -> u64 {
        self.inner.read().reads
    }

    pub fn draw_count(&self) -> u64 {
        self.inner.read().draws
    }

    pub fn balance_of(&self, participant_id: &str) -> Option<Chips> {
        self.inner
            .read()
            .players
            .get(participant_id)
            .map(|player| player.balance)
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        self.inner.read().snapshot()
    }
}

fn ensure_number(number: u8) -> Result<(), SourceError> {
    if number > MAX_NUMBER {
        return Err(SourceError::Rejected(format!("{number} is not on the wheel")));
    }
    Ok(())
}

fn validate_bet(bet_kind: BetKind, numbers: &[u8], amount: Chips) -> Result<(), SourceError> {
    if amount == 0 {
        return Err(SourceError::Rejected("bet amount must be positive".into()));
    }
    if let Some(number) = numbers.iter().find(|number| **number > MAX_NUMBER) {
        return Err(SourceError::Rejected(format!("{number} is not on the wheel")));
    }
    if bet_kind == BetKind::Straight && numbers.len() != 1 {
        return Err(SourceError::Rejected(
            "straight bets cover exactly one number".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl OutcomeSource for InMemoryOutcomeSource {
    async fn read_round_snapshot(&self) -> Result<RoundSnapshot, SourceError> {
        let mut ledger = self.inner.write();
        ledger.reads += 1;
        if ledger.faults.failing_reads > 0 {
            ledger.faults.failing_reads -= 1;
            return Err(SourceError::Unavailable("injected read failure".into()));
        }
        Ok(ledger.snapshot())
    }

    async fn read_participants(&self) -> Result<Vec<Participant>, SourceError> {
        Ok(self.inner.read().players.values().cloned().collect())
    }

    async fn start_round(&self) -> Result<(), SourceError> {
        let now = self.clock.now_ms();
        let window_ms = EpochMillis::try_from(self.betting_window.as_millis())
            .map_err(|_| SourceError::Rejected("betting window too long".into()))?;
        let end = now.saturating_add(window_ms);
        self.inner.write().betting_end_time = Some(end);
        info!(target: LOG_TARGET, end_time_epoch_ms = end, "betting window opened");
        Ok(())
    }

    async fn draw_outcome(&self) -> Result<(), SourceError> {
        let now = self.clock.now_ms();
        let mut ledger = self.inner.write();
        if ledger.faults.failing_draws > 0 {
            ledger.faults.failing_draws -= 1;
            return Err(SourceError::Unavailable("injected draw failure".into()));
        }
        if ledger.faults.silent_draws > 0 {
            ledger.faults.silent_draws -= 1;
            debug!(target: LOG_TARGET, "draw acknowledged without settling");
            return Ok(());
        }
        if ledger.current_bets.is_empty() {
            return Err(SourceError::Rejected("no open bets to settle".into()));
        }
        let number = match ledger.scripted.pop_front() {
            Some(number) => number,
            None => ledger.rng.gen_range(0..=MAX_NUMBER),
        };
        ensure_number(number)?;
        let drawn_at = ledger.next_timestamp(now);
        ledger.draws += 1;
        let outcome = ledger.settle(number, drawn_at);
        info!(
            target: LOG_TARGET,
            number = outcome.number,
            drawn_at = %outcome.drawn_at,
            winners = outcome.winners.len(),
            "outcome drawn"
        );
        Ok(())
    }

    async fn place_bet(
        &self,
        participant_id: &str,
        bet_kind: BetKind,
        numbers: &[u8],
        amount: Chips,
    ) -> Result<(), SourceError> {
        validate_bet(bet_kind, numbers, amount)?;
        let mut ledger = self.inner.write();
        let player = ledger
            .players
            .get_mut(participant_id)
            .ok_or_else(|| SourceError::Rejected("not registered".into()))?;
        if player.balance < amount {
            return Err(SourceError::Rejected("insufficient balance".into()));
        }
        player.balance -= amount;
        let participant_name = player.display_name.clone();
        ledger.current_bets.push(Bet {
            participant_id: participant_id.to_string(),
            participant_name,
            bet_kind,
            numbers: numbers.to_vec(),
            amount,
        });
        debug!(
            target: LOG_TARGET,
            participant = participant_id,
            ?bet_kind,
            amount,
            "bet placed"
        );
        Ok(())
    }

    async fn register_participant(
        &self,
        participant_id: &str,
        name: &str,
        initial_balance: Chips,
    ) -> Result<(), SourceError> {
        let mut ledger = self.inner.write();
        if ledger.players.contains_key(participant_id) {
            debug!(
                target: LOG_TARGET,
                participant = participant_id,
                "already registered"
            );
            return Ok(());
        }
        ledger.players.insert(
            participant_id.to_string(),
            Participant {
                id: participant_id.to_string(),
                display_name: name.to_string(),
                balance: initial_balance,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn ledger(clock: &ManualClock) -> InMemoryOutcomeSource {
        InMemoryOutcomeSource::with_clock(
            InMemorySourceConfig {
                seed: Some(7),
                ..Default::default()
            },
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn straight_win_pays_thirty_five_to_one_plus_stake() {
        let clock = ManualClock::new(1_000);
        let source = ledger(&clock);
        source.register_participant("b", "Bea", 1_000).await.unwrap();
        source
            .place_bet("b", BetKind::Straight, &[17], 50)
            .await
            .unwrap();
        assert_eq!(source.balance_of("b"), Some(950));

        source.script_draws([17]);
        source.draw_outcome().await.unwrap();

        let snapshot = source.read_round_snapshot().await.unwrap();
        let outcome = snapshot.last_outcome.unwrap();
        assert_eq!(outcome.number, 17);
        assert_eq!(outcome.payout_for("b"), 1_800);
        assert_eq!(source.balance_of("b"), Some(2_750));
        assert!(snapshot.current_bets.is_empty());
        assert_eq!(snapshot.history, vec![17]);
    }

    #[tokio::test]
    async fn start_round_opens_a_thirty_second_window() {
        let clock = ManualClock::new(1_000);
        let source = ledger(&clock);
        source.start_round().await.unwrap();
        let snapshot = source.read_round_snapshot().await.unwrap();
        assert_eq!(snapshot.betting_window_end_epoch_ms, Some(31_000));
    }

    #[tokio::test]
    async fn bets_are_validated() {
        let clock = ManualClock::new(0);
        let source = ledger(&clock);
        source.register_participant("a", "Ann", 10).await.unwrap();

        for (kind, numbers, amount) in [
            (BetKind::Red, vec![], 0),
            (BetKind::Red, vec![], 11),
            (BetKind::Straight, vec![], 1),
            (BetKind::Straight, vec![37], 1),
        ] {
            let err = source.place_bet("a", kind, &numbers, amount).await.unwrap_err();
            assert!(matches!(err, SourceError::Rejected(_)), "{kind:?} {numbers:?} {amount}");
        }
        let err = source
            .place_bet("ghost", BetKind::Red, &[], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Rejected(_)));
        assert_eq!(source.balance_of("a"), Some(10));
    }

    #[tokio::test]
    async fn draw_timestamps_are_unique_under_a_frozen_clock() {
        let clock = ManualClock::new(5_000);
        let source = ledger(&clock);
        source.register_participant("a", "Ann", 100).await.unwrap();
        source.script_draws([1, 2]);

        source.place_bet("a", BetKind::Red, &[], 1).await.unwrap();
        source.draw_outcome().await.unwrap();
        let first = source.snapshot().last_outcome.unwrap().drawn_at;

        source.place_bet("a", BetKind::Red, &[], 1).await.unwrap();
        source.draw_outcome().await.unwrap();
        let second = source.snapshot().last_outcome.unwrap().drawn_at;

        assert_eq!(first.as_str(), "5000000");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn history_keeps_the_last_ten_numbers() {
        let clock = ManualClock::new(0);
        let source = ledger(&clock);
        for number in 0..12 {
            source.settle_now(number).unwrap();
        }
        assert_eq!(source.snapshot().history, (2..12).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let clock = ManualClock::new(0);
        let source = ledger(&clock);
        source.fail_next_reads(2);
        assert!(source.read_round_snapshot().await.is_err());
        assert!(source.read_round_snapshot().await.is_err());
        assert!(source.read_round_snapshot().await.is_ok());
        assert_eq!(source.read_count(), 3);

        source.register_participant("a", "Ann", 100).await.unwrap();
        source.place_bet("a", BetKind::Odd, &[], 5).await.unwrap();
        source.fail_next_draw();
        assert!(source.draw_outcome().await.is_err());
        assert!(source.snapshot().last_outcome.is_none());
        assert_eq!(source.snapshot().current_bets.len(), 1);
    }

    #[tokio::test]
    async fn drawing_without_bets_is_rejected() {
        let clock = ManualClock::new(0);
        let source = ledger(&clock);
        let err = source.draw_outcome().await.unwrap_err();
        assert!(matches!(err, SourceError::Rejected(_)));
        assert_eq!(source.draw_count(), 0);
    }
}
