//! Operator IPC: newline-delimited JSON over TCP.

use std::sync::Arc;
use std::time::Duration;

use ccshuffle::protocol::{Request, Response};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{info, warn};

use crate::rounds::SchedulerCommand;
use crate::session::Daemon;

const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error(transparent)]
    Codec(#[from] LinesCodecError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

async fn next_round(rounds: &mut Option<broadcast::Receiver<Vec<String>>>) -> Option<Vec<String>> {
    let Some(rx) = rounds else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(options) => return Some(options),
            Err(RecvError::Lagged(n)) => warn!("Subscriber skipped {} round(s)", n),
            Err(RecvError::Closed) => return None,
        }
    }
}

pub async fn handle_client<S>(stream: S, daemon: Arc<Daemon>) -> Result<(), IpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE));
    let mut rounds = None;

    loop {
        let line = tokio::select! {
            line = lines.next() => match line {
                Some(line) => line?,
                None => break,
            },
            options = next_round(&mut rounds) => {
                match options {
                    Some(options) => {
                        let push = Response::Round { options };
                        lines.send(serde_json::to_string(&push)?).await?;
                    }
                    None => rounds = None,
                }
                continue;
            }
        };

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(Request::Subscribe) => {
                rounds = Some(daemon.chat().subscribe());
                Response::success("Subscribed to round announcements")
            }
            Ok(request) => respond(&daemon, request).await,
            Err(e) => Response::error(format!("Invalid request: {}", e)),
        };
        lines.send(serde_json::to_string(&response)?).await?;
    }

    Ok(())
}

async fn queue(daemon: &Daemon, cmd: SchedulerCommand, done: String) -> Response {
    match daemon.send(cmd).await {
        Ok(()) => Response::success(done),
        Err(e) => Response::error(e.to_string()),
    }
}

pub async fn respond(daemon: &Daemon, request: Request) -> Response {
    match request {
        Request::GetState => Response::State(daemon.status().await),
        Request::Start => match daemon.start().await {
            Ok(info) => Response::success(format!(
                "Shuffle mode started: {}",
                info.game_name.as_deref().unwrap_or(&info.id)
            )),
            Err(e) => Response::error(e.to_string()),
        },
        Request::Stop => match daemon.stop().await {
            Ok(()) => Response::success("Shuffle mode stopped"),
            Err(e) => Response::error(e.to_string()),
        },
        Request::Pause { paused } => {
            queue(
                daemon,
                SchedulerCommand::Pause(paused),
                format!("Pause status set to {}", paused),
            )
            .await
        }
        Request::Cycle { seconds } => {
            let done = match seconds {
                Some(s) => format!("Time left set to {}s", s),
                None => "Skipped to end of stage".to_string(),
            };
            queue(daemon, SchedulerCommand::Cycle(seconds), done).await
        }
        Request::Vote { voter, text } => {
            queue(
                daemon,
                SchedulerCommand::Vote {
                    voter,
                    text: text.trim().to_string(),
                },
                "Vote queued".to_string(),
            )
            .await
        }
        Request::SetIntervals {
            round_secs,
            cooldown_secs,
        } => {
            let w = daemon
                .update_weights(|w| w.set_intervals(round_secs, cooldown_secs))
                .await;
            info!("Intervals set to {}s / {}s", w.round_secs, w.cooldown_secs);
            Response::success(format!(
                "Intervals set to {}s voting, {}s cooldown",
                w.round_secs, w.cooldown_secs
            ))
        }
        Request::SetCostWeight {
            weight,
            factor,
            max_price,
        } => {
            let w = daemon
                .update_weights(|w| w.set_cost_weight(weight, factor, max_price))
                .await;
            info!(
                "Cost weight set to {} x {} x {}",
                w.cost_weight, w.cost_factor, w.max_price
            );
            Response::success(format!(
                "Cost weight set to {} x {} x {}",
                w.cost_weight, w.cost_factor, w.max_price
            ))
        }
        Request::SetPoolWeight { weight, factor } => {
            let w = daemon
                .update_weights(|w| w.set_pool_weight(weight, factor))
                .await;
            info!("Pool weight set to {} x {}", w.pool_weight, w.pool_factor);
            Response::success(format!(
                "Pool weight set to {} x {}",
                w.pool_weight, w.pool_factor
            ))
        }
        Request::Subscribe => Response::error("Subscribe is only valid on a client connection"),
        Request::Shutdown => {
            if daemon.flags().started() {
                if let Err(e) = daemon.stop().await {
                    warn!("Shutdown: {}", e);
                }
            }
            info!("Shutdown requested");
            tokio::spawn(async {
                // Give the response a moment to flush before exiting.
                time::sleep(Duration::from_millis(50)).await;
                std::process::exit(0);
            });
            Response::success("Shutting down")
        }
    }
}
