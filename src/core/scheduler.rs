//! Tick-driven round state machine.
//!
//! ```text
//!   Idle --build--> Voting --time up / resolve--> Cooldown --time up--> Idle
//! ```
//!
//! The scheduler itself does no I/O. [`RoundScheduler::tick`] reports what
//! the driver has to do (build a round, apply a winner); the driver performs
//! the remote calls and feeds the results back.

use thiserror::Error;

use crate::candidate::EffectCandidate;
use crate::prng::Prng;
use crate::round::{Resolution, RoundOption, RoundStage, RoundState, VoteOutcome, OPTION_COUNT};
use crate::sampler::{self, SampleError};
use crate::weights::WeightConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoundError {
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("cannot build a round while {0:?}")]
    NotIdle(RoundStage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickEvent {
    Paused,
    /// Time left in the current stage after this tick.
    Countdown { stage: RoundStage, time_left: u32 },
    /// Cooldown ran out; the next tick builds a round.
    CooldownOver,
    /// Voting closed. The scheduler is now in Cooldown; the caller applies
    /// the winner (if any).
    VotingClosed(Option<Resolution>),
    /// Idle: the caller should build a round, refreshing the menu first when
    /// `refresh_menu` is set.
    RoundDue { refresh_menu: bool },
}

#[derive(Debug)]
pub struct RoundScheduler {
    round: RoundState,
    paused: bool,
    tick_secs: u32,
    rng: Prng,
    rounds_built: u64,
}

impl RoundScheduler {
    /// `tick_secs` is how much time one tick takes off the countdown.
    pub fn new(tick_secs: u32, rng: Prng) -> Self {
        Self {
            round: RoundState::new(),
            paused: false,
            tick_secs: tick_secs.max(1),
            rng,
            rounds_built: 0,
        }
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn stage(&self) -> RoundStage {
        self.round.stage
    }

    pub fn time_left(&self) -> u32 {
        self.round.time_left
    }

    pub fn rounds_built(&self) -> u64 {
        self.rounds_built
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Override the remaining time of the current stage; 0 ends it on the
    /// next tick.
    pub fn set_time_left(&mut self, secs: u32) {
        self.round.time_left = secs;
    }

    /// Drop any round in progress.
    pub fn reset(&mut self) {
        self.round.clear();
    }

    pub fn tick(&mut self, cfg: &WeightConfig) -> TickEvent {
        if self.paused {
            return TickEvent::Paused;
        }
        let stage = self.round.stage;
        match stage {
            RoundStage::Cooldown if self.round.time_left == 0 => {
                self.round.stage = RoundStage::Idle;
                TickEvent::CooldownOver
            }
            RoundStage::Voting if self.round.time_left == 0 => {
                let resolution = self.round.resolve(&mut self.rng);
                self.round.stage = RoundStage::Cooldown;
                self.round.time_left = cfg.cooldown_secs;
                TickEvent::VotingClosed(resolution)
            }
            RoundStage::Cooldown | RoundStage::Voting => {
                self.round.time_left = self.round.time_left.saturating_sub(self.tick_secs);
                TickEvent::Countdown {
                    stage,
                    time_left: self.round.time_left,
                }
            }
            RoundStage::Idle => TickEvent::RoundDue {
                refresh_menu: cfg.cost_weighted() || cfg.pool_weighted(),
            },
        }
    }

    /// Sample four candidates, add the random option and open voting.
    ///
    /// On error the scheduler stays Idle and the next tick retries.
    pub fn build_round(
        &mut self,
        eligible: &[EffectCandidate],
        cfg: &WeightConfig,
    ) -> Result<&RoundState, RoundError> {
        if self.round.stage != RoundStage::Idle {
            return Err(RoundError::NotIdle(self.round.stage));
        }
        let picks = sampler::select(eligible, cfg, &mut self.rng)?;
        let mut options: Vec<RoundOption> = picks
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| RoundOption::effect(i + 1, candidate, &mut self.rng))
            .collect();
        options.push(RoundOption::random(OPTION_COUNT));

        self.round.open(options, cfg.round_secs);
        self.rounds_built += 1;
        Ok(&self.round)
    }

    pub fn vote(&mut self, voter: &str, text: &str) -> VoteOutcome {
        self.round.vote(voter, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::EffectCandidate;

    fn menu(n: usize) -> Vec<EffectCandidate> {
        (0..n)
            .map(|i| EffectCandidate::new(format!("e{i}"), format!("Effect {i}"), 10 * (i as i64 + 1)))
            .collect()
    }

    fn cfg() -> WeightConfig {
        let mut cfg = WeightConfig::uniform();
        cfg.set_intervals(4, 10);
        cfg
    }

    #[test]
    fn idle_asks_for_a_round_and_refresh_only_when_weighted() {
        let mut s = RoundScheduler::new(2, Prng::new(1));
        assert_eq!(s.tick(&cfg()), TickEvent::RoundDue { refresh_menu: false });
        assert_eq!(
            s.tick(&WeightConfig::default()),
            TickEvent::RoundDue { refresh_menu: true }
        );
        assert_eq!(s.stage(), RoundStage::Idle);
    }

    #[test]
    fn built_round_has_four_distinct_candidates_and_random_last() {
        let mut s = RoundScheduler::new(2, Prng::new(5));
        let round = s.build_round(&menu(9), &cfg()).unwrap();
        assert_eq!(round.stage, RoundStage::Voting);
        assert_eq!(round.time_left, 4);
        let opts = round.options();
        assert_eq!(opts.len(), OPTION_COUNT);
        assert!(opts[4].is_random());
        let mut ids: Vec<_> = opts[..4].iter().map(|o| o.candidate().unwrap().id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        for (i, o) in opts.iter().enumerate() {
            assert_eq!(o.index, i + 1);
        }
    }

    #[test]
    fn insufficient_candidates_keeps_scheduler_idle() {
        let mut s = RoundScheduler::new(2, Prng::new(5));
        let err = s.build_round(&menu(3), &cfg()).unwrap_err();
        assert!(matches!(err, RoundError::Sample(_)));
        assert_eq!(s.stage(), RoundStage::Idle);
        assert_eq!(s.rounds_built(), 0);
        assert!(s.build_round(&menu(4), &cfg()).is_ok());
        assert!(matches!(
            s.build_round(&menu(4), &cfg()),
            Err(RoundError::NotIdle(RoundStage::Voting))
        ));
    }

    #[test]
    fn full_cycle_through_all_stages() {
        let cfg = cfg();
        let mut s = RoundScheduler::new(2, Prng::new(11));
        s.build_round(&menu(6), &cfg).unwrap();
        assert_eq!(s.vote("viewer", "1"), VoteOutcome::Counted { index: 1 });

        assert_eq!(
            s.tick(&cfg),
            TickEvent::Countdown { stage: RoundStage::Voting, time_left: 2 }
        );
        assert_eq!(
            s.tick(&cfg),
            TickEvent::Countdown { stage: RoundStage::Voting, time_left: 0 }
        );
        match s.tick(&cfg) {
            TickEvent::VotingClosed(Some(res)) => assert_eq!(res.winner.index, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.stage(), RoundStage::Cooldown);
        assert_eq!(s.time_left(), 10);
        assert_eq!(s.vote("late", "2"), VoteOutcome::NotVoting);

        for _ in 0..5 {
            assert!(matches!(s.tick(&cfg), TickEvent::Countdown { .. }));
        }
        assert_eq!(s.tick(&cfg), TickEvent::CooldownOver);
        assert_eq!(s.stage(), RoundStage::Idle);
        assert!(matches!(s.tick(&cfg), TickEvent::RoundDue { .. }));

        // The tally starts fresh in the next round.
        s.build_round(&menu(6), &cfg).unwrap();
        assert_eq!(s.round().total_votes(), 0);
        assert_eq!(s.vote("viewer", "2"), VoteOutcome::Counted { index: 2 });
    }

    #[test]
    fn pause_freezes_the_countdown() {
        let cfg = cfg();
        let mut s = RoundScheduler::new(2, Prng::new(2));
        s.build_round(&menu(5), &cfg).unwrap();
        s.set_paused(true);
        assert_eq!(s.tick(&cfg), TickEvent::Paused);
        assert_eq!(s.time_left(), 4);
        s.set_paused(false);
        s.set_time_left(0);
        assert!(matches!(s.tick(&cfg), TickEvent::VotingClosed(_)));
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut s = RoundScheduler::new(2, Prng::new(2));
        s.build_round(&menu(5), &cfg()).unwrap();
        s.reset();
        assert_eq!(s.stage(), RoundStage::Idle);
        assert!(s.round().options().is_empty());
    }
}
