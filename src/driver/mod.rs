//! Single-task event loop that owns a [`RoundSession`] and is the only caller of the
//! outcome source.
//!
//! Every input is handled to completion before the next one is looked at, and source calls
//! are awaited inline, so at most one read or write is ever outstanding.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ClientConfig;
use crate::reveal::RunGeneration;
use crate::round::{BetKind, Chips, EpochMillis};
use crate::session::{CommandError, RoundSession, SessionEvent, SessionView};
use crate::source::{OutcomeSource, SourceError};
use crate::sync::Backoff;
use crate::time::Clock;

const LOG_TARGET: &str = "driver";
const CLOCK_TICK: Duration = Duration::from_secs(1);

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Command {
    StartRound {
        reply: Reply<Result<(), CommandError>>,
    },
    Spin {
        reply: Reply<Result<(), CommandError>>,
    },
    PlaceBet {
        bet_kind: BetKind,
        numbers: Vec<u8>,
        amount: Chips,
        reply: Reply<Result<(), CommandError>>,
    },
    Register {
        name: String,
        initial_balance: Chips,
        reply: Reply<Result<(), CommandError>>,
    },
    SetVisibility {
        visible: bool,
        reply: Reply<()>,
    },
    Leave {
        reply: Reply<()>,
    },
}

/// Cloneable front door to a running [`RoundDriver`].
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    view: watch::Receiver<SessionView>,
    cancel: CancellationToken,
}

impl DriverHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub async fn start_round(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::StartRound { reply }).await?
    }

    pub async fn spin(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Spin { reply }).await?
    }

    pub async fn place_bet(
        &self,
        bet_kind: BetKind,
        numbers: Vec<u8>,
        amount: Chips,
    ) -> Result<(), CommandError> {
        self.request(|reply| Command::PlaceBet {
            bet_kind,
            numbers,
            amount,
            reply,
        })
        .await?
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        initial_balance: Chips,
    ) -> Result<(), CommandError> {
        let name = name.into();
        self.request(|reply| Command::Register {
            name,
            initial_balance,
            reply,
        })
        .await?
    }

    /// Reports whether the client is in the foreground. Hidden clients stop their countdown
    /// and reveal timers the way a throttled runtime would; the watchdog keeps running.
    pub async fn set_visibility(&self, visible: bool) -> Result<(), CommandError> {
        self.request(|reply| Command::SetVisibility { visible, reply })
            .await
    }

    pub async fn leave(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Leave { reply }).await
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CommandError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CommandError::DriverClosed)?;
        response.await.map_err(|_| CommandError::DriverClosed)
    }
}

pub struct RoundDriver {
    core: DriverCore,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

struct DriverCore {
    session: RoundSession,
    source: Arc<dyn OutcomeSource>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
    view: watch::Sender<SessionView>,
    poll_interval: Duration,
    watchdog_interval: Duration,
    backoff: Backoff,
    visible: bool,
    reveal_timer: Option<(RunGeneration, Instant)>,
}

impl RoundDriver {
    pub fn new(
        session: RoundSession,
        source: Arc<dyn OutcomeSource>,
        clock: Arc<dyn Clock>,
        config: &ClientConfig,
    ) -> (Self, DriverHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity.max(1));
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (view_tx, view_rx) = watch::channel(session.view(clock.now_ms()));
        let cancel = CancellationToken::new();

        let handle = DriverHandle {
            commands: commands_tx,
            events: events_tx.clone(),
            view: view_rx,
            cancel: cancel.clone(),
        };
        let driver = Self {
            core: DriverCore {
                session,
                source,
                clock,
                events: events_tx,
                view: view_tx,
                poll_interval: config.poll_interval,
                watchdog_interval: config.watchdog_interval,
                backoff: Backoff::new(config.poll_interval, config.max_backoff),
                visible: true,
                reveal_timer: None,
            },
            commands: commands_rx,
            cancel,
        };
        (driver, handle)
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(
        session: RoundSession,
        source: Arc<dyn OutcomeSource>,
        clock: Arc<dyn Clock>,
        config: &ClientConfig,
    ) -> (DriverHandle, JoinHandle<()>) {
        let span = info_span!(
            "round_driver",
            mode = ?session.mode(),
            participant = session.local_participant().unwrap_or("-")
        );
        let (driver, handle) = Self::new(session, source, clock, config);
        let join = tokio::spawn(driver.run().instrument(span));
        (handle, join)
    }

    pub async fn run(self) {
        let RoundDriver {
            mut core,
            mut commands,
            cancel,
        } = self;

        let mut clock_tick = interval(CLOCK_TICK);
        clock_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut watchdog = interval(core.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_poll = Instant::now();

        info!(
            target: LOG_TARGET,
            poll_ms = core.poll_interval.as_millis() as u64,
            "round driver started"
        );
        core.publish();

        loop {
            let poll_enabled = core.session.should_poll();
            let reveal_timer = core.reveal_timer.filter(|_| core.visible);

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(target: LOG_TARGET, "shutdown requested");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => core.handle_command(command).await,
                    None => {
                        debug!(target: LOG_TARGET, "all handles dropped");
                        break;
                    }
                },
                generation = reveal_elapsed(reveal_timer) => {
                    core.reveal_timer = None;
                    core.session.natural_complete(generation);
                    core.settle().await;
                }
                _ = clock_tick.tick() => {
                    if core.visible {
                        let now = core.now();
                        core.session.tick(now);
                        core.settle().await;
                    }
                }
                _ = watchdog.tick() => {
                    let now = core.now();
                    core.session.watchdog(now);
                    core.settle().await;
                }
                _ = sleep_until(next_poll), if poll_enabled => {
                    let delay = core.poll().await;
                    next_poll = Instant::now() + delay;
                }
            }
        }

        info!(target: LOG_TARGET, "round driver stopped");
    }
}

async fn reveal_elapsed(timer: Option<(RunGeneration, Instant)>) -> RunGeneration {
    match timer {
        Some((generation, deadline)) => {
            sleep_until(deadline).await;
            generation
        }
        None => std::future::pending().await,
    }
}

impl DriverCore {
    fn now(&self) -> EpochMillis {
        self.clock.now_ms()
    }

    /// Forwards queued session events and refreshes the view. Returns whether the session
    /// asked for a draw.
    fn publish(&mut self) -> bool {
        let mut draw_requested = false;
        for event in self.session.drain_events() {
            match &event {
                SessionEvent::RevealStarted {
                    generation,
                    duration_ms,
                    ..
                } => {
                    self.reveal_timer = Some((
                        *generation,
                        Instant::now() + Duration::from_millis(*duration_ms),
                    ));
                }
                SessionEvent::RevealCompleted { .. } | SessionEvent::RoundAbandoned => {
                    self.reveal_timer = None;
                }
                SessionEvent::BettingClosed {
                    draw_requested: true,
                } => draw_requested = true,
                _ => {}
            }
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
        self.view.send_replace(self.session.view(self.now()));
        draw_requested
    }

    async fn settle(&mut self) {
        if self.publish() {
            if let Err(err) = self.draw().await {
                warn!(target: LOG_TARGET, error = %err, "draw after betting closed failed");
            }
        }
    }

    async fn poll(&mut self) -> Duration {
        match self.source.read_round().await {
            Ok(read) => {
                self.backoff.reset();
                let now = self.now();
                self.session.handle_poll(read, now);
                self.settle().await;
                self.poll_interval
            }
            Err(err) if err.is_malformed() => {
                self.backoff.reset();
                self.session.handle_poll_error(&err);
                self.publish();
                self.poll_interval
            }
            Err(err) => {
                self.session.handle_poll_error(&err);
                self.publish();
                let delay = self.backoff.next_delay();
                debug!(
                    target: LOG_TARGET,
                    failures = self.backoff.failures(),
                    delay_ms = delay.as_millis() as u64,
                    "poll failed, backing off"
                );
                delay
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartRound { reply } => {
                let result = self.start_round().await;
                let _ = reply.send(result);
            }
            Command::Spin { reply } => {
                let result = self.draw().await;
                let _ = reply.send(result);
            }
            Command::PlaceBet {
                bet_kind,
                numbers,
                amount,
                reply,
            } => {
                let result = self.place_bet(bet_kind, numbers, amount).await;
                let _ = reply.send(result);
            }
            Command::Register {
                name,
                initial_balance,
                reply,
            } => {
                let result = self.register(name, initial_balance).await;
                let _ = reply.send(result);
            }
            Command::SetVisibility { visible, reply } => {
                self.visible = visible;
                debug!(target: LOG_TARGET, visible, "visibility changed");
                if visible {
                    let now = self.now();
                    self.session.on_visible(now);
                    self.settle().await;
                }
                let _ = reply.send(());
            }
            Command::Leave { reply } => {
                self.session.leave();
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    async fn start_round(&mut self) -> Result<(), CommandError> {
        self.session.check_start_round()?;
        if let Err(err) = self.source.start_round().await {
            return Err(self.command_failed(err));
        }
        let now = self.now();
        self.session.round_started(now);
        self.publish();
        Ok(())
    }

    async fn draw(&mut self) -> Result<(), CommandError> {
        self.session.begin_draw()?;
        self.publish();

        let read = match self.source.draw_outcome().await {
            Ok(()) => self.source.read_round().await,
            Err(err) => Err(err),
        };
        let result = match read {
            Ok(read) => {
                let now = self.now();
                self.session.complete_draw(read, now)
            }
            Err(err) => {
                let err = CommandError::Source(err);
                self.session.abort_draw(&err);
                Err(err)
            }
        };
        self.publish();
        result
    }

    async fn place_bet(
        &mut self,
        bet_kind: BetKind,
        numbers: Vec<u8>,
        amount: Chips,
    ) -> Result<(), CommandError> {
        let participant_id = self.session.check_bet()?;
        if let Err(err) = self
            .source
            .place_bet(&participant_id, bet_kind, &numbers, amount)
            .await
        {
            return Err(self.command_failed(err));
        }
        self.confirm().await;
        Ok(())
    }

    async fn register(&mut self, name: String, initial_balance: Chips) -> Result<(), CommandError> {
        let participant_id = self.session.check_register()?;
        if let Err(err) = self
            .source
            .register_participant(&participant_id, &name, initial_balance)
            .await
        {
            return Err(self.command_failed(err));
        }
        self.confirm().await;
        Ok(())
    }

    /// Re-reads the round after an accepted mutation.
    async fn confirm(&mut self) {
        match self.source.read_round().await {
            Ok(read) => self.session.apply_confirmation(read),
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, "failed to refresh after mutation");
            }
        }
        self.publish();
    }

    fn command_failed(&mut self, err: SourceError) -> CommandError {
        let err = CommandError::Source(err);
        warn!(target: LOG_TARGET, error = %err, "mutation rejected");
        self.session.record_command_error(&err);
        self.publish();
        err
    }
}
