//! The round loop: one task owns the [`RoundScheduler`] and is the only
//! writer of round state. Votes and operator controls reach it through a
//! command queue; ticks come from an interval.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ccshuffle::applier::{self, PlanSkip};
use ccshuffle::candidate::SharedMenu;
use ccshuffle::round::{OptionSummary, Resolution, RoundStage, VoteOutcome};
use ccshuffle::scheduler::{RoundScheduler, TickEvent};
use ccshuffle::weights::WeightConfig;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::EffectBackend;
use crate::chat::ChatTransport;
use crate::effects::{self, with_timeout};

#[derive(Debug)]
pub enum SchedulerCommand {
    Vote { voter: String, text: String },
    Pause(bool),
    /// Set the remaining seconds of the current stage; `None` ends it.
    Cycle(Option<u32>),
    Status(oneshot::Sender<RoundStatus>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundStatus {
    pub paused: bool,
    pub stage: RoundStage,
    pub time_left: u32,
    pub rounds_built: u64,
    pub options: Vec<OptionSummary>,
}

pub struct RoundTask {
    pub scheduler: RoundScheduler,
    pub session_id: String,
    pub menu: SharedMenu,
    pub weights: Arc<RwLock<WeightConfig>>,
    pub backend: Arc<dyn EffectBackend>,
    pub chat: Arc<dyn ChatTransport>,
    pub call_timeout: Duration,
    /// Where the current round is snapshotted, if anywhere.
    pub round_file: Option<PathBuf>,
}

impl RoundTask {
    pub async fn run(
        mut self,
        period: Duration,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        cancel: CancellationToken,
    ) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.on_tick(&cancel).await,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
            }
        }
        info!(
            "Round loop stopped after {} round(s)",
            self.scheduler.rounds_built()
        );
    }

    fn status(&self) -> RoundStatus {
        RoundStatus {
            paused: self.scheduler.paused(),
            stage: self.scheduler.stage(),
            time_left: self.scheduler.time_left(),
            rounds_built: self.scheduler.rounds_built(),
            options: self.scheduler.round().summary(),
        }
    }

    fn on_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Vote { voter, text } => match self.scheduler.vote(&voter, &text) {
                VoteOutcome::Counted { index } => debug!("{} voted for {}", voter, index),
                other => debug!("Vote from {} ignored: {:?}", voter, other),
            },
            SchedulerCommand::Pause(paused) => {
                self.scheduler.set_paused(paused);
                info!("Pause status set to {}", paused);
            }
            SchedulerCommand::Cycle(seconds) => {
                let secs = seconds.unwrap_or(0);
                self.scheduler.set_time_left(secs);
                info!("{:?} time left set to {}s", self.scheduler.stage(), secs);
            }
            SchedulerCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn on_tick(&mut self, cancel: &CancellationToken) {
        let cfg = *self.weights.read().await;
        match self.scheduler.tick(&cfg) {
            TickEvent::Paused => {}
            TickEvent::Countdown { stage, time_left } => {
                debug!("{:?}: {}s left", stage, time_left)
            }
            TickEvent::CooldownOver => info!("Cooldown over"),
            TickEvent::VotingClosed(resolution) => {
                self.persist_round();
                match resolution {
                    Some(res) => self.apply(&res, &cfg).await,
                    None => warn!("Voting closed with no options"),
                }
            }
            TickEvent::RoundDue { refresh_menu } => {
                if refresh_menu {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = self.refresh_menu() => {}
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }
                self.build_round(&cfg).await;
            }
        }
    }

    async fn refresh_menu(&self) {
        let call = self.backend.session_menu(&self.session_id);
        match with_timeout("getGameSessionMenu", self.call_timeout, call).await {
            Ok(effects) => {
                info!("Menu refreshed: {} candidate(s)", effects.len());
                self.menu.replace(effects);
            }
            Err(e) => warn!("Menu refresh failed, keeping previous menu: {}", e),
        }
    }

    async fn build_round(&mut self, cfg: &WeightConfig) {
        let eligible = self.menu.snapshot(cfg);
        let labels = match self.scheduler.build_round(&eligible, cfg) {
            Ok(round) => round.labels(),
            Err(e) => {
                warn!("Round not built, retrying next tick: {}", e);
                return;
            }
        };
        info!(
            "Round {} open for {}s",
            self.scheduler.rounds_built(),
            cfg.round_secs
        );
        self.persist_round();
        self.chat.publish_options(&labels).await;
    }

    async fn apply(&self, res: &Resolution, cfg: &WeightConfig) {
        info!(
            "Winner: {} ({} vote(s), {} tied{})",
            res.winner.label,
            res.top_votes,
            res.tied,
            if res.rerolled { ", re-rolled from random" } else { "" }
        );
        match applier::plan(&res.winner, cfg) {
            Ok(plan) => {
                let outcome = effects::execute(
                    self.backend.as_ref(),
                    &self.session_id,
                    &plan,
                    self.call_timeout,
                )
                .await;
                debug!("Apply outcome: {:?}", outcome);
            }
            Err(PlanSkip::NoCandidate) => info!("Winner carries no effect"),
            Err(PlanSkip::NotRemote(id)) => info!("{} is not a provider effect; nothing to apply", id),
        }
    }

    fn persist_round(&self) {
        let Some(path) = &self.round_file else {
            return;
        };
        let summary = self.scheduler.round().summary();
        let written = serde_json::to_vec_pretty(&summary)
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(path, bytes).map_err(|e| e.to_string()));
        if let Err(e) = written {
            warn!("Failed to write round file {:?}: {}", path, e);
        }
    }
}
