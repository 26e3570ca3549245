//! Shuffle-mode session lifecycle.
//!
//! A session is one round-loop task plus one push listener sharing a
//! cancellation token. `stop` cancels both and waits for each, bounded
//! separately. A round loop that overruns is aborted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ccshuffle::candidate::SharedMenu;
use ccshuffle::prng::Prng;
use ccshuffle::protocol::StatusSnapshot;
use ccshuffle::scheduler::RoundScheduler;
use ccshuffle::weights::WeightConfig;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{BackendError, EffectBackend, SessionInfo};
use crate::chat::ChatHub;
use crate::config::{Credentials, DaemonConfig};
use crate::effects::with_timeout;
use crate::push::{self, PushSettings};
use crate::rounds::{RoundStatus, RoundTask, SchedulerCommand};

const COMMAND_QUEUE: usize = 256;
const FLAG_POLL: Duration = Duration::from_millis(50);
const STATUS_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("shuffle mode already started")]
    AlreadyStarted,
    #[error("shuffle mode not started")]
    NotStarted,
    #[error("session start failed: {0}")]
    Backend(#[from] BackendError),
    #[error("round loop still running after {0:?}; aborted")]
    RoundLoopTimeout(Duration),
    #[error("push listener still running after {0:?}")]
    ListenerTimeout(Duration),
    #[error("round loop has exited")]
    LoopGone,
}

/// Lifecycle flags, readable from any task without locking.
#[derive(Debug, Default)]
pub struct SessionFlags {
    started: AtomicBool,
    stopping: AtomicBool,
    listener_running: AtomicBool,
}

impl SessionFlags {
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn listener_running(&self) -> bool {
        self.listener_running.load(Ordering::SeqCst)
    }

    pub fn set_listener_running(&self, running: bool) {
        self.listener_running.store(running, Ordering::SeqCst);
    }

    fn mark_started(&self) {
        self.stopping.store(false, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
    }

    fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
    }

    fn mark_stopped(&self) {
        self.stopping.store(false, Ordering::SeqCst);
    }
}

struct ActiveSession {
    info: SessionInfo,
    commands: mpsc::Sender<SchedulerCommand>,
    cancel: CancellationToken,
    rounds: JoinHandle<()>,
}

pub struct Daemon {
    config: DaemonConfig,
    credentials: Credentials,
    backend: Arc<dyn EffectBackend>,
    round_file: Option<PathBuf>,
    chat: ChatHub,
    menu: SharedMenu,
    weights: Arc<RwLock<WeightConfig>>,
    flags: Arc<SessionFlags>,
    active: Mutex<Option<ActiveSession>>,
}

impl Daemon {
    pub fn new(
        config: DaemonConfig,
        credentials: Credentials,
        backend: Arc<dyn EffectBackend>,
        round_file: Option<PathBuf>,
    ) -> Self {
        let weights = Arc::new(RwLock::new(config.weights.clamped()));
        Self {
            config,
            credentials,
            backend,
            round_file,
            chat: ChatHub::default(),
            menu: SharedMenu::new(),
            weights,
            flags: Arc::new(SessionFlags::default()),
            active: Mutex::new(None),
        }
    }

    pub fn chat(&self) -> &ChatHub {
        &self.chat
    }

    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }

    pub async fn weights(&self) -> WeightConfig {
        *self.weights.read().await
    }

    /// Apply `edit` under the write lock and return the stored result.
    /// Setters on `WeightConfig` clamp, so the result may differ from the input.
    pub async fn update_weights(&self, edit: impl FnOnce(&mut WeightConfig)) -> WeightConfig {
        let mut w = self.weights.write().await;
        edit(&mut w);
        *w
    }

    pub async fn start(&self) -> Result<SessionInfo, SessionError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        if self.flags.stopping() || self.flags.listener_running() {
            info!("Waiting for the previous session to close");
            self.wait_until_closed().await?;
        }

        let call_timeout = self.config.backend.request_timeout();
        let info = match &self.config.session.game_session_id {
            Some(id) => SessionInfo {
                id: id.clone(),
                game_pack_id: None,
                game_name: None,
            },
            None => {
                let call = self.backend.active_session();
                with_timeout("getUsersActiveGameSession", call_timeout, call).await?
            }
        };
        let effects = with_timeout(
            "getGameSessionMenu",
            call_timeout,
            self.backend.session_menu(&info.id),
        )
        .await?;
        info!("Loaded {} candidate(s) for session {}", effects.len(), info.id);
        self.menu.replace(effects);

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        self.flags.mark_started();

        let task = RoundTask {
            scheduler: RoundScheduler::new(self.config.tick_secs(), Prng::from_time()),
            session_id: info.id.clone(),
            menu: self.menu.clone(),
            weights: Arc::clone(&self.weights),
            backend: Arc::clone(&self.backend),
            chat: Arc::new(self.chat.clone()),
            call_timeout,
            round_file: self.round_file.clone(),
        };
        let rounds = tokio::spawn(task.run(self.config.tick_period(), rx, cancel.clone()));

        // Raised before the spawn so a stop right after start still waits for it.
        self.flags.set_listener_running(true);
        tokio::spawn(push::run_listener(
            PushSettings::new(&self.config.backend.pubsub_url, &self.config.push),
            self.credentials.clone(),
            self.menu.clone(),
            Arc::clone(&self.flags),
            cancel.clone(),
        ));

        info!(
            "Shuffle mode started: {}",
            info.game_name.as_deref().unwrap_or(&info.id)
        );
        *active = Some(ActiveSession {
            info: info.clone(),
            commands: tx,
            cancel,
            rounds,
        });
        Ok(info)
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        let session = self
            .active
            .lock()
            .await
            .take()
            .ok_or(SessionError::NotStarted)?;
        info!("Stopping shuffle mode");
        self.flags.mark_stopping();
        session.cancel.cancel();

        let deadline = self.config.stop_timeout();
        let mut rounds = session.rounds;
        let (rounds_closed, listener_closed) = tokio::join!(
            time::timeout(deadline, &mut rounds),
            time::timeout(deadline, async {
                while self.flags.listener_running() {
                    time::sleep(FLAG_POLL).await;
                }
            }),
        );
        self.flags.mark_stopped();

        match rounds_closed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Round loop ended abnormally: {}", e),
            Err(_) => {
                rounds.abort();
                warn!("Round loop did not stop within {:?}; aborted", deadline);
                return Err(SessionError::RoundLoopTimeout(deadline));
            }
        }
        if listener_closed.is_err() {
            warn!("Push listener did not stop within {:?}", deadline);
            return Err(SessionError::ListenerTimeout(deadline));
        }
        info!("Shuffle mode stopped");
        Ok(())
    }

    async fn wait_until_closed(&self) -> Result<(), SessionError> {
        let deadline = self.config.stop_timeout();
        time::timeout(deadline, async {
            while self.flags.stopping() || self.flags.listener_running() {
                time::sleep(FLAG_POLL).await;
            }
        })
        .await
        .map_err(|_| SessionError::ListenerTimeout(deadline))
    }

    /// Queue `cmd` for the round loop.
    pub async fn send(&self, cmd: SchedulerCommand) -> Result<(), SessionError> {
        let tx = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|s| s.commands.clone())
            .ok_or(SessionError::NotStarted)?;
        tx.send(cmd).await.map_err(|_| SessionError::LoopGone)
    }

    async fn round_status(&self) -> Option<RoundStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Status(reply)).await.ok()?;
        time::timeout(STATUS_WAIT, rx).await.ok()?.ok()
    }

    pub async fn status(&self) -> StatusSnapshot {
        let session = self.active.lock().await.as_ref().map(|s| s.info.clone());
        let round = match session {
            Some(_) => self.round_status().await.unwrap_or_default(),
            None => RoundStatus::default(),
        };
        let weights = self.weights().await;
        let menu = self.menu.load();

        StatusSnapshot {
            started: self.flags.started(),
            stopping: self.flags.stopping(),
            listener_running: self.flags.listener_running(),
            paused: round.paused,
            stage: round.stage,
            time_left: round.time_left,
            rounds_built: round.rounds_built,
            session_id: session.as_ref().map(|s| s.id.clone()),
            game_name: session.and_then(|s| s.game_name),
            interact_link: self.config.session.interact_link.clone(),
            weights,
            candidates: menu.len(),
            eligible: menu.eligible(&weights).len(),
            options: round.options,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ccshuffle::candidate::EffectCandidate;
    use ccshuffle::round::RoundStage;

    use crate::effects::tests::{Call, FakeBackend};

    pub fn test_config() -> DaemonConfig {
        let mut cfg = DaemonConfig {
            tick_period_ms: 200,
            stop_timeout_secs: 2,
            ..DaemonConfig::default()
        };
        cfg.backend.pubsub_url = "ws://127.0.0.1:9/".into();
        cfg.push.connect_delay_secs = 0;
        cfg.weights = WeightConfig::uniform();
        cfg
    }

    pub fn test_daemon() -> Daemon {
        let menu = (0..6)
            .map(|i| EffectCandidate::new(format!("e{i}"), format!("Effect {i}"), 10))
            .collect();
        Daemon::new(
            test_config(),
            Credentials::new("cc-auth-token t", "u1"),
            Arc::new(FakeBackend::with_menu(menu)),
            None,
        )
    }

    #[tokio::test]
    async fn start_runs_rounds_and_stop_shuts_everything_down() {
        let daemon = test_daemon();
        let mut rounds = daemon.chat().subscribe();

        let info = daemon.start().await.unwrap();
        assert_eq!(info.id, "gs-test");
        assert!(matches!(daemon.start().await, Err(SessionError::AlreadyStarted)));

        let options = time::timeout(Duration::from_secs(2), rounds.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(options.len(), 5);

        daemon
            .send(SchedulerCommand::Vote {
                voter: "ann".into(),
                text: "1".into(),
            })
            .await
            .unwrap();
        let status = daemon.status().await;
        assert!(status.started);
        assert!(status.listener_running);
        assert_eq!(status.stage, RoundStage::Voting);
        assert_eq!(status.options[0].votes, 1);
        assert_eq!(status.game_name.as_deref(), Some("Test Game"));
        assert_eq!(status.candidates, 6);

        // Stopped mid-voting: both tasks exit and no further round opens.
        daemon.stop().await.unwrap();
        let flags = daemon.flags();
        assert!(!flags.started());
        assert!(!flags.stopping());
        assert!(!flags.listener_running());
        assert!(matches!(
            daemon.send(SchedulerCommand::Pause(true)).await,
            Err(SessionError::NotStarted)
        ));
        time::sleep(Duration::from_millis(150)).await;
        assert!(rounds.try_recv().is_err());

        let status = daemon.status().await;
        assert_eq!(status.stage, RoundStage::Idle);
        assert!(status.session_id.is_none());
    }

    #[tokio::test]
    async fn stop_waits_out_an_in_flight_effect_request() {
        let mut cfg = test_config();
        cfg.backend.request_timeout_secs = 1;
        cfg.stop_timeout_secs = 3;
        let menu = (0..6)
            .map(|i| EffectCandidate::new(format!("e{i}"), format!("Effect {i}"), 10))
            .collect();
        let backend = Arc::new(FakeBackend {
            delay: Some(Duration::from_secs(30)),
            ..FakeBackend::with_menu(menu)
        });
        let daemon = Daemon::new(
            cfg,
            Credentials::new("t", "u"),
            Arc::clone(&backend) as Arc<dyn EffectBackend>,
            None,
        );
        let mut rounds = daemon.chat().subscribe();
        daemon.start().await.unwrap();
        time::timeout(Duration::from_secs(2), rounds.recv())
            .await
            .unwrap()
            .unwrap();

        // Close voting; the winner's request then hangs until the call timeout.
        daemon.send(SchedulerCommand::Cycle(None)).await.unwrap();
        time::timeout(Duration::from_secs(2), async {
            while backend.calls().is_empty() {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        daemon.stop().await.unwrap();
        assert!(!daemon.flags().listener_running());
        let calls = backend.calls();
        assert!(matches!(calls.as_slice(), [Call::Request { .. }]));
    }

    #[test]
    fn timeout_errors_name_the_task() {
        let d = Duration::from_secs(10);
        assert!(SessionError::RoundLoopTimeout(d).to_string().starts_with("round loop"));
        assert!(SessionError::ListenerTimeout(d).to_string().starts_with("push listener"));
    }

    #[tokio::test]
    async fn stop_without_session_is_an_error() {
        let daemon = test_daemon();
        assert!(matches!(daemon.stop().await, Err(SessionError::NotStarted)));
    }

    #[tokio::test]
    async fn session_can_restart_after_stop() {
        let daemon = test_daemon();
        daemon.start().await.unwrap();
        daemon.stop().await.unwrap();
        daemon.start().await.unwrap();
        assert!(daemon.flags().started());
        daemon.stop().await.unwrap();
    }

    #[tokio::test]
    async fn configured_session_id_skips_discovery() {
        let mut cfg = test_config();
        cfg.session.game_session_id = Some("gs-fixed".into());
        let daemon = Daemon::new(
            cfg,
            Credentials::new("t", "u"),
            Arc::new(FakeBackend::with_menu(Vec::new())),
            None,
        );
        let info = daemon.start().await.unwrap();
        assert_eq!(info.id, "gs-fixed");
        assert!(info.game_name.is_none());
        daemon.stop().await.unwrap();
    }

    #[tokio::test]
    async fn weight_updates_are_clamped() {
        let daemon = test_daemon();
        let w = daemon
            .update_weights(|w| w.set_cost_weight(5, 99_999, Some(-4)))
            .await;
        assert_eq!((w.cost_weight, w.cost_factor, w.max_price), (5, 1000, 0));
        assert_eq!(daemon.weights().await, w);
    }
}
