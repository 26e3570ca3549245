//! Per-round state: the five offered options, the vote tally and winner
//! resolution.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::candidate::EffectCandidate;
use crate::prng::Prng;

/// Options per round: the sampled candidates plus the random option.
pub const OPTION_COUNT: usize = 5;
pub const RANDOM_LABEL: &str = "[5] Random";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStage {
    #[default]
    Idle,
    Voting,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptionChoice {
    Effect {
        candidate: EffectCandidate,
        /// Quantity rolled at build time; 1 when the candidate has no range.
        amount: i64,
    },
    /// Re-roll among the round's real options.
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundOption {
    /// Display index, 1-based; also the number viewers type to vote.
    pub index: usize,
    pub label: String,
    pub choice: OptionChoice,
    pub votes: u32,
    pub chosen: bool,
}

impl RoundOption {
    pub fn effect(index: usize, candidate: EffectCandidate, rng: &mut Prng) -> Self {
        let mut label = format!("{index}. {}", candidate.name);
        if let Some(note) = candidate.note.as_deref().filter(|n| !n.is_empty()) {
            label.push_str(&format!(" ({note})"));
        }
        let amount = match candidate.quantity {
            Some(range) => {
                let (min, max) = range.bounds();
                let spread = (max - min) / 10;
                let amount = min + rng.gen_inclusive_i64(0, spread);
                label.push_str(&format!(" (x{amount})"));
                amount
            }
            None => 1,
        };
        Self {
            index,
            label,
            choice: OptionChoice::Effect { candidate, amount },
            votes: 0,
            chosen: false,
        }
    }

    pub fn random(index: usize) -> Self {
        Self {
            index,
            label: RANDOM_LABEL.to_string(),
            choice: OptionChoice::Random,
            votes: 0,
            chosen: false,
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self.choice, OptionChoice::Random)
    }

    pub fn candidate(&self) -> Option<&EffectCandidate> {
        match &self.choice {
            OptionChoice::Effect { candidate, .. } => Some(candidate),
            OptionChoice::Random => None,
        }
    }

    pub fn amount(&self) -> i64 {
        match &self.choice {
            OptionChoice::Effect { amount, .. } => *amount,
            OptionChoice::Random => 1,
        }
    }
}

/// Persisted/displayed view of one option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSummary {
    pub index: usize,
    pub label: String,
    pub votes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Counted { index: usize },
    NotVoting,
    NotANumber,
    OutOfRange,
    AlreadyVoted,
}

/// Result of closing a round.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winner: RoundOption,
    pub top_votes: u32,
    pub tied: usize,
    /// The random option won and a real option was re-rolled.
    pub rerolled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RoundState {
    pub stage: RoundStage,
    pub time_left: u32,
    options: Vec<RoundOption>,
    voters: HashSet<String>,
}

impl RoundState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self) -> &[RoundOption] {
        &self.options
    }

    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    pub fn total_votes(&self) -> u32 {
        self.options.iter().map(|o| o.votes).sum()
    }

    /// Start voting on a fresh set of options. The only place the tally and
    /// voter set are cleared.
    pub fn open(&mut self, options: Vec<RoundOption>, round_secs: u32) {
        self.options = options;
        self.voters.clear();
        self.stage = RoundStage::Voting;
        self.time_left = round_secs;
    }

    /// Back to Idle with no options on display.
    pub fn clear(&mut self) {
        self.stage = RoundStage::Idle;
        self.time_left = 0;
        self.options.clear();
        self.voters.clear();
    }

    /// Count a chat message as a vote if it is a bare option number.
    pub fn vote(&mut self, voter: &str, text: &str) -> VoteOutcome {
        let text = text.trim();
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return VoteOutcome::NotANumber;
        }
        if self.stage != RoundStage::Voting {
            return VoteOutcome::NotVoting;
        }
        let voter = voter.to_lowercase();
        if self.voters.contains(&voter) {
            return VoteOutcome::AlreadyVoted;
        }
        let choice = match text.parse::<usize>() {
            Ok(n) if (1..=self.options.len()).contains(&n) => n,
            _ => return VoteOutcome::OutOfRange,
        };
        self.options[choice - 1].votes += 1;
        self.voters.insert(voter);
        VoteOutcome::Counted { index: choice }
    }

    /// Pick the winner among the options with the most votes.
    ///
    /// Ties break uniformly at random. When the random option wins, one of
    /// the real options is drawn instead and it replaces the whole option
    /// list.
    pub fn resolve(&mut self, rng: &mut Prng) -> Option<Resolution> {
        let top_votes = self.options.iter().map(|o| o.votes).max()?;
        let tied: Vec<usize> = self
            .options
            .iter()
            .enumerate()
            .filter(|(_, o)| o.votes == top_votes)
            .map(|(i, _)| i)
            .collect();
        let pick = tied[rng.pick_index(tied.len())?];

        if !self.options[pick].is_random() {
            let option = &mut self.options[pick];
            option.chosen = true;
            return Some(Resolution {
                winner: option.clone(),
                top_votes,
                tied: tied.len(),
                rerolled: false,
            });
        }

        let real: Vec<&RoundOption> = self.options.iter().filter(|o| !o.is_random()).collect();
        let mut winner = real[rng.pick_index(real.len())?].clone();
        if let Some(label) = winner
            .candidate()
            .map(|c| format!("[{}] {}", winner.index, c.name))
        {
            winner.label = label;
        }
        winner.chosen = true;
        winner.votes = 0;
        self.options = vec![winner.clone()];
        Some(Resolution {
            winner,
            top_votes,
            tied: tied.len(),
            rerolled: true,
        })
    }

    pub fn summary(&self) -> Vec<OptionSummary> {
        self.options
            .iter()
            .map(|o| OptionSummary {
                index: o.index,
                label: o.label.clone(),
                votes: o.votes,
            })
            .collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.options.iter().map(|o| o.label.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_round(rng: &mut Prng) -> RoundState {
        let mut options: Vec<RoundOption> = ["Squash", "Slow", "Coins", "Jump"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                RoundOption::effect(i + 1, EffectCandidate::new(name.to_lowercase(), *name, 10), rng)
            })
            .collect();
        options.push(RoundOption::random(OPTION_COUNT));
        let mut round = RoundState::new();
        round.open(options, 20);
        round
    }

    #[test]
    fn labels_carry_note_and_rolled_quantity() {
        let mut rng = Prng::new(8);
        let mut c = EffectCandidate::new("coins", "Give Coins", 10).with_quantity(10, 110);
        c.note = Some("fast".into());
        let opt = RoundOption::effect(3, c, &mut rng);
        let amount = opt.amount();
        assert!((10..=20).contains(&amount), "amount {amount}");
        assert_eq!(opt.label, format!("3. Give Coins (fast) (x{amount})"));

        let plain = RoundOption::effect(1, EffectCandidate::new("a", "Plain", 1), &mut rng);
        assert_eq!(plain.label, "1. Plain");
        assert_eq!(plain.amount(), 1);
        assert_eq!(RoundOption::random(5).label, "[5] Random");
    }

    #[test]
    fn one_vote_per_voter_case_insensitive() {
        let mut rng = Prng::new(1);
        let mut round = open_round(&mut rng);
        assert_eq!(round.vote("Alice", "2"), VoteOutcome::Counted { index: 2 });
        assert_eq!(round.vote("ALICE", "3"), VoteOutcome::AlreadyVoted);
        assert_eq!(round.vote("alice", "2"), VoteOutcome::AlreadyVoted);
        assert_eq!(round.vote("bob", " 2 "), VoteOutcome::Counted { index: 2 });
        assert_eq!(round.options()[1].votes, 2);
        assert_eq!(round.total_votes() as usize, round.voter_count());
    }

    #[test]
    fn non_numeric_and_out_of_range_votes_are_ignored() {
        let mut rng = Prng::new(1);
        let mut round = open_round(&mut rng);
        assert_eq!(round.vote("a", "two"), VoteOutcome::NotANumber);
        assert_eq!(round.vote("a", "-1"), VoteOutcome::NotANumber);
        assert_eq!(round.vote("a", "1 please"), VoteOutcome::NotANumber);
        assert_eq!(round.vote("a", "0"), VoteOutcome::OutOfRange);
        assert_eq!(round.vote("a", "6"), VoteOutcome::OutOfRange);
        assert_eq!(round.vote("a", "99999999999999999999999"), VoteOutcome::OutOfRange);
        // A rejected vote does not use up the voter's turn.
        assert_eq!(round.vote("a", "5"), VoteOutcome::Counted { index: 5 });
        assert_eq!(round.total_votes(), 1);
    }

    #[test]
    fn votes_outside_voting_stage_are_rejected() {
        let mut round = RoundState::new();
        assert_eq!(round.vote("a", "1"), VoteOutcome::NotVoting);
        let mut rng = Prng::new(2);
        let mut round = open_round(&mut rng);
        round.stage = RoundStage::Cooldown;
        assert_eq!(round.vote("a", "1"), VoteOutcome::NotVoting);
    }

    #[test]
    fn clear_winner_is_marked_and_others_kept() {
        let mut rng = Prng::new(4);
        let mut round = open_round(&mut rng);
        round.vote("a", "3");
        round.vote("b", "3");
        round.vote("c", "1");
        let res = round.resolve(&mut rng).unwrap();
        assert_eq!(res.winner.index, 3);
        assert!(res.winner.chosen);
        assert!(!res.rerolled);
        assert_eq!((res.top_votes, res.tied), (2, 1));
        assert_eq!(round.options().len(), OPTION_COUNT);
        assert!(round.options()[2].chosen);
    }

    #[test]
    fn ties_break_among_leaders_only() {
        let mut rng = Prng::new(10);
        for _ in 0..50 {
            let mut round = open_round(&mut rng);
            round.vote("a", "2");
            round.vote("b", "4");
            let res = round.resolve(&mut rng).unwrap();
            assert!(res.winner.index == 2 || res.winner.index == 4);
            assert_eq!(res.tied, 2);
        }
    }

    #[test]
    fn random_win_collapses_round_to_rerolled_option() {
        let mut rng = Prng::new(6);
        let mut round = open_round(&mut rng);
        round.vote("a", "5");
        let res = round.resolve(&mut rng).unwrap();
        assert!(res.rerolled);
        assert!(!res.winner.is_random());
        assert!(res.winner.chosen);
        assert_eq!(res.winner.votes, 0);
        let name = &res.winner.candidate().unwrap().name;
        assert_eq!(res.winner.label, format!("[{}] {}", res.winner.index, name));
        assert_eq!(round.options(), std::slice::from_ref(&res.winner));
    }

    #[test]
    fn summary_reports_index_label_votes() {
        let mut rng = Prng::new(9);
        let mut round = open_round(&mut rng);
        round.vote("x", "1");
        let s = round.summary();
        assert_eq!(s.len(), 5);
        assert_eq!(
            s[0],
            OptionSummary {
                index: 1,
                label: "1. Squash".into(),
                votes: 1
            }
        );
        assert_eq!(s[4].label, RANDOM_LABEL);
    }
}
