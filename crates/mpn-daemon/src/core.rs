/// NotifierCore: single-owner event loop for the session with the server.
///
/// The core owns the transport, the retained state, the asset cache and the
/// presentation sink exclusively.  Everything else (OS signals, D-Bus
/// signals) reaches it as a `UiEvent` over an mpsc channel, so no state is
/// ever shared.
///
/// Flow in persistent mode:
///
/// ```text
///   establish ──▶ reconcile ──▶ arm idle ──▶ select! ─┬─ idle returned ──▶ reconcile, re-arm
///                                                    ├─ UiEvent        ──▶ command / activate / …
///                                                    └─ shutdown       ──▶ teardown
/// ```
///
/// Any transport error goes through `recover()`: drop the connection, then
/// either give up (exit 1) or reconnect every five seconds and resync.
use std::path::PathBuf;
use std::rc::Rc;

use mpn_proto::config::Config;
use mpn_proto::protocol::{PlaybackState, PlayerCommand, Subsystem};
use mpn_proto::state::{DiffResult, EngineState, ShowPolicy, Transition};
use mpn_proto::template::TemplateRenderer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assets::{resolve_cover, AssetCache, Bitmap, Slot};
use crate::error::{MpdError, TransportError};
use crate::mpd::Transport;
use crate::notify::{PresentationSink, UiEvent};
use crate::reconnect::{Action, ReconnectPolicy};

pub const NO_SONG_TITLE: &str = "no song";
pub const NO_SONG_BODY: &str = "no song is currently playing";

/// Process exit code requested by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit(pub i32);

/// Engine knobs, resolved once from the config.
#[derive(Debug, Clone)]
pub struct Settings {
    pub once: bool,
    pub keys: bool,
    /// Tray icon and tooltip are maintained.
    pub status_icon: bool,
    pub title_format: String,
    pub body_format: String,
    pub icon_size: u32,
    pub tray_size: u32,
    pub play_state_icon_size: f64,
    pub music_root: Option<PathBuf>,
    pub show_policy: ShowPolicy,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            once: config.daemon.once,
            keys: config.notification.keys,
            status_icon: config.status_icon.enabled && !config.daemon.once,
            title_format: config.notification.title_format.clone(),
            body_format: config.notification.body_format.clone(),
            icon_size: config.notification.icon_size,
            tray_size: config.status_icon.size,
            play_state_icon_size: config.status_icon.play_state_icon_size,
            music_root: config.library.music_root(),
            show_policy: ShowPolicy {
                reshow_on_resume: config.notification.reshow_on_resume,
            },
        }
    }
}

/// Popup text of the last refresh.
#[derive(Debug, Clone)]
struct Rendered {
    title: String,
    body: String,
}

pub struct NotifierCore<T, S> {
    settings: Settings,
    transport: T,
    sink: S,
    policy: ReconnectPolicy,
    renderer: TemplateRenderer,
    assets: AssetCache,
    state: EngineState,
    rendered: Option<Rendered>,
    popup: Option<Bitmap>,
    events: mpsc::Receiver<UiEvent>,
    events_open: bool,
    shutdown: CancellationToken,
}

impl<T: Transport, S: PresentationSink> NotifierCore<T, S> {
    pub fn new(
        settings: Settings,
        transport: T,
        sink: S,
        policy: ReconnectPolicy,
        events: mpsc::Receiver<UiEvent>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            settings,
            transport,
            sink,
            policy,
            renderer: TemplateRenderer::new()?,
            assets: AssetCache::new(),
            state: EngineState::new(),
            rendered: None,
            popup: None,
            events,
            events_open: true,
            shutdown,
        })
    }

    /// Run until there is nothing left to do; returns the process exit code.
    pub async fn run(&mut self) -> i32 {
        info!("core: starting");
        let code = match self.run_session().await {
            Ok(()) => 0,
            Err(Exit(code)) => code,
        };
        self.teardown().await;
        info!("core: exiting with {}", code);
        code
    }

    async fn run_session(&mut self) -> Result<(), Exit> {
        self.policy
            .establish(&mut self.transport, &self.shutdown)
            .await?;
        self.sync().await?;

        if self.settings.once {
            return self.finish_once().await;
        }

        self.arm_idle().await?;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("core: shutdown requested");
                    return Ok(());
                }
                result = wait_for_change(&mut self.transport) => match result {
                    Ok(()) => {
                        self.sync().await?;
                        self.arm_idle().await?;
                    }
                    Err(MpdError::Ack(ack)) => {
                        warn!("core: idle rejected: {}", ack);
                        self.arm_idle().await?;
                    }
                    Err(MpdError::Transport(e)) => {
                        self.recover(e).await?;
                        self.sync().await?;
                        self.arm_idle().await?;
                    }
                },
                event = self.events.recv(), if self.events_open => match event {
                    Some(event) => self.handle_event(event).await?,
                    None => {
                        debug!("core: event channel closed");
                        self.events_open = false;
                    }
                },
            }
        }
    }

    /// One-shot mode after the first reconciliation.
    async fn finish_once(&mut self) -> Result<(), Exit> {
        if self.state.playback_state() == Some(PlaybackState::Stopped) {
            info!("core: nothing is playing");
            return Ok(());
        }
        if !self.settings.keys {
            return Ok(());
        }
        // Wait for the popup to go away or for one of its buttons.
        while self.events_open {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await?,
                    None => self.events_open = false,
                },
            }
        }
        Ok(())
    }

    pub async fn handle_event(&mut self, event: UiEvent) -> Result<(), Exit> {
        match event {
            UiEvent::Command(command) => self.execute_command(command).await,
            UiEvent::Activate => {
                self.activate().await;
                Ok(())
            }
            UiEvent::Closed => {
                if self.settings.once {
                    info!("core: popup closed");
                    return Err(Exit(0));
                }
                debug!("core: popup closed");
                Ok(())
            }
            UiEvent::TraySizeChanged(size) => {
                if size == 0 || size == self.settings.tray_size {
                    return Ok(());
                }
                info!("core: tray size {} -> {}", self.settings.tray_size, size);
                self.settings.tray_size = size;
                self.refresh();
                Ok(())
            }
        }
    }

    // ── Reconciliation ────────────────────────────────────────────────────────

    /// Fetch the current status and song, diff them against what we hold and
    /// bring the presentation up to date.
    pub async fn reconcile(&mut self) -> Result<DiffResult, MpdError> {
        let snapshot = self.transport.status().await?;
        let track = self.transport.current_song().await?;
        let transition = self
            .state
            .apply(snapshot, track, self.settings.show_policy);
        if transition.diff.status_changed || transition.diff.track_changed {
            debug!("core: {:?}", transition);
        }
        self.present(transition).await;
        Ok(transition.diff)
    }

    /// Reconcile, recovering from lost connections until it goes through.
    async fn sync(&mut self) -> Result<(), Exit> {
        loop {
            match self.reconcile().await {
                Ok(_) => return Ok(()),
                Err(MpdError::Ack(ack)) => {
                    warn!("core: cannot read server state: {}", ack);
                    return Ok(());
                }
                Err(MpdError::Transport(e)) => self.recover(e).await?,
            }
        }
    }

    async fn arm_idle(&mut self) -> Result<(), Exit> {
        loop {
            match self.transport.send_idle().await {
                Ok(()) => return Ok(()),
                Err(MpdError::Ack(ack)) => {
                    warn!("core: idle rejected: {}", ack);
                    return Ok(());
                }
                Err(MpdError::Transport(e)) => {
                    self.recover(e).await?;
                    self.sync().await?;
                }
            }
        }
    }

    /// Drop the connection and apply the reconnect policy.
    async fn recover(&mut self, err: TransportError) -> Result<(), Exit> {
        warn!("core: connection lost: {}", err);
        self.transport.disconnect().await;
        match self.policy.on_disconnect() {
            Action::Terminate(code) => {
                error!("core: not reconnecting");
                Err(Exit(code))
            }
            Action::Reconnect => {
                self.policy
                    .establish(&mut self.transport, &self.shutdown)
                    .await?;
                info!("core: reconnected");
                Ok(())
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Issue a playback command.  The armed idle is cancelled first and
    /// re-armed afterwards; in one-shot mode the engine then exits.
    pub async fn execute_command(&mut self, command: PlayerCommand) -> Result<(), Exit> {
        info!("core: {}", command.request());
        let mut resync = false;
        match self.transport.cancel_idle().await {
            Ok(changed) => resync = changed.contains(&Subsystem::Player),
            Err(MpdError::Ack(ack)) => warn!("core: noidle rejected: {}", ack),
            Err(MpdError::Transport(e)) => {
                self.recover(e).await?;
                resync = true;
            }
        }

        loop {
            match self.transport.command(command).await {
                Ok(()) => break,
                Err(MpdError::Ack(ack)) => {
                    warn!("core: {} rejected: {}", command.request(), ack);
                    break;
                }
                Err(MpdError::Transport(e)) => {
                    self.recover(e).await?;
                    resync = true;
                }
            }
        }

        if self.settings.once {
            if let Err(e) = self.sink.close().await {
                debug!("core: cannot close popup: {}", e);
            }
            return Err(Exit(0));
        }
        if resync {
            self.sync().await?;
        }
        self.arm_idle().await
    }

    // ── Presentation ──────────────────────────────────────────────────────────

    async fn present(&mut self, transition: Transition) {
        if transition.clear {
            if let Err(e) = self.sink.close().await {
                warn!("core: cannot close popup: {}", e);
            }
        }
        if transition.refresh {
            self.refresh();
            self.push_text().await;
        }
        if transition.show {
            self.show().await;
        }
    }

    /// Re-render text, tooltip and bitmaps from the retained state.
    fn refresh(&mut self) {
        let (Some(snapshot), Some(track)) = (self.state.snapshot(), self.state.track()) else {
            return;
        };

        let rendered = if track.has_song() {
            Rendered {
                title: self
                    .renderer
                    .render(&self.settings.title_format, track, snapshot, false),
                body: self
                    .renderer
                    .render(&self.settings.body_format, track, snapshot, true),
            }
        } else {
            Rendered {
                title: NO_SONG_TITLE.to_string(),
                body: NO_SONG_BODY.to_string(),
            }
        };
        debug!("core: title {:?} body {:?}", rendered.title, rendered.body);

        let tooltip = if self.settings.status_icon {
            let (title, body) = if track.has_song() {
                (
                    self.renderer
                        .render(&self.settings.title_format, track, snapshot, false),
                    self.renderer
                        .render(&self.settings.body_format, track, snapshot, false),
                )
            } else {
                (NO_SONG_TITLE.to_string(), NO_SONG_BODY.to_string())
            };
            Some(self.renderer.strip_markup(&format!(
                "{}\n{}\n({})",
                title, body, snapshot.playback_state
            )))
        } else {
            None
        };

        let state = snapshot.playback_state;
        let key = resolve_cover(
            self.settings.music_root.as_deref(),
            track.file_path.as_deref(),
        );

        self.popup = Some(
            self.assets
                .get_bitmap(Slot::Popup, &key, self.settings.icon_size),
        );

        if let Some(tooltip) = tooltip {
            if let Err(e) = self.sink.set_tooltip(&tooltip) {
                warn!("core: cannot update tooltip: {}", e);
            }
            let icon = Rc::clone(
                self.assets
                    .tray_icons(
                        &key,
                        self.settings.tray_size,
                        self.settings.play_state_icon_size,
                    )
                    .for_state(Some(state)),
            );
            if let Err(e) = self.sink.set_icon(&icon) {
                warn!("core: cannot update tray icon: {}", e);
            }
        }

        self.rendered = Some(rendered);
    }

    async fn push_text(&mut self) {
        if let Some(rendered) = &self.rendered {
            if let Err(e) = self.sink.update(&rendered.title, &rendered.body).await {
                warn!("core: cannot update popup: {}", e);
            }
        }
    }

    async fn show(&mut self) {
        let (Some(rendered), Some(popup)) = (&self.rendered, &self.popup) else {
            return;
        };
        if let Err(e) = self.sink.show(&rendered.title, &rendered.body, popup).await {
            error!("core: impossible to display the notification: {}", e);
        }
    }

    /// Re-display the popup on request, as long as something is playing.
    pub async fn activate(&mut self) {
        match self.state.playback_state() {
            Some(state) if state.is_active() => self.show().await,
            _ => debug!("core: nothing to show"),
        }
    }

    /// Close the popup (unless a one-shot run ends normally) and the connection.
    async fn teardown(&mut self) {
        if !self.settings.once || self.shutdown.is_cancelled() {
            if let Err(e) = self.sink.close().await {
                debug!("core: cannot close popup: {}", e);
            }
        }
        self.transport.disconnect().await;
    }
}

/// Suspend until the server reports a player change.
///
/// Safe to drop while waiting: the armed idle survives and the next call
/// picks up where this one left off.
pub async fn wait_for_change<T: Transport>(transport: &mut T) -> Result<(), MpdError> {
    loop {
        transport.send_idle().await?;
        let changed = transport.wait_idle().await?;
        if changed.contains(&Subsystem::Player) {
            return Ok(());
        }
        let names: Vec<&str> = changed.iter().map(Subsystem::name).collect();
        debug!("core: ignoring changes to {}", names.join(", "));
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory transport and sink for exercising the engine.

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use mpn_proto::protocol::{PlayerCommand, ServerSnapshot, Subsystem, TrackInfo};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::assets::Bitmap;
    use crate::error::{MpdError, PresentationError, TransportError};
    use crate::mpd::Transport;
    use crate::notify::PresentationSink;

    /// What an armed idle does when it returns.
    pub enum IdleStep {
        /// The server moves to this state and reports a player change.
        Player(ServerSnapshot, TrackInfo),
        /// A change in a subsystem the engine does not care about.
        Mixer,
        /// The connection drops and the next `n` connection attempts fail.
        Drop(usize),
    }

    #[derive(Default)]
    pub struct TransportLog {
        pub connect_times: Vec<Instant>,
        pub disconnects: usize,
        pub status_calls: usize,
        pub idles_armed: usize,
        pub idles_cancelled: usize,
        pub commands: Vec<PlayerCommand>,
    }

    pub struct MockTransport {
        pub log: Rc<RefCell<TransportLog>>,
        pub snapshot: ServerSnapshot,
        pub track: TrackInfo,
        refuse: usize,
        /// `currentsong` fails as if the connection dropped mid-reply.
        pub broken_song: bool,
        connected: bool,
        idling: bool,
        script: VecDeque<IdleStep>,
        /// Cancelled when the idle script runs out.
        exhausted: Option<CancellationToken>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                log: Rc::new(RefCell::new(TransportLog::default())),
                snapshot: ServerSnapshot::stopped(),
                track: TrackInfo::default(),
                refuse: 0,
                broken_song: false,
                connected: false,
                idling: false,
                script: VecDeque::new(),
                exhausted: None,
            }
        }

        pub fn with_state(mut self, snapshot: ServerSnapshot, track: TrackInfo) -> Self {
            self.snapshot = snapshot;
            self.track = track;
            self
        }

        pub fn refuse_connections(&mut self, count: usize) {
            self.refuse = count;
        }

        pub fn script(&mut self, steps: Vec<IdleStep>, exhausted: CancellationToken) {
            self.script = steps.into();
            self.exhausted = Some(exhausted);
        }

        fn check(&self) -> Result<(), MpdError> {
            if self.connected {
                Ok(())
            } else {
                Err(TransportError::Closed.into())
            }
        }
    }

    impl Transport for MockTransport {
        async fn connect(&mut self) -> Result<(), MpdError> {
            self.log.borrow_mut().connect_times.push(Instant::now());
            if self.refuse > 0 {
                self.refuse -= 1;
                return Err(TransportError::Closed.into());
            }
            self.connected = true;
            self.idling = false;
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.log.borrow_mut().disconnects += 1;
            self.connected = false;
            self.idling = false;
        }

        async fn status(&mut self) -> Result<ServerSnapshot, MpdError> {
            self.check()?;
            self.log.borrow_mut().status_calls += 1;
            Ok(self.snapshot.clone())
        }

        async fn current_song(&mut self) -> Result<TrackInfo, MpdError> {
            self.check()?;
            if self.broken_song {
                self.connected = false;
                return Err(TransportError::Closed.into());
            }
            Ok(self.track.clone())
        }

        async fn send_idle(&mut self) -> Result<(), MpdError> {
            self.check()?;
            if !self.idling {
                self.idling = true;
                self.log.borrow_mut().idles_armed += 1;
            }
            Ok(())
        }

        async fn wait_idle(&mut self) -> Result<Vec<Subsystem>, MpdError> {
            if !self.idling {
                return std::future::pending().await;
            }
            let Some(step) = self.script.pop_front() else {
                if let Some(token) = &self.exhausted {
                    token.cancel();
                }
                return std::future::pending().await;
            };
            self.idling = false;
            match step {
                IdleStep::Player(snapshot, track) => {
                    self.snapshot = snapshot;
                    self.track = track;
                    Ok(vec![Subsystem::Player])
                }
                IdleStep::Mixer => Ok(vec![Subsystem::Other("mixer".to_string())]),
                IdleStep::Drop(refuse) => {
                    self.connected = false;
                    self.refuse = refuse;
                    Err(TransportError::Closed.into())
                }
            }
        }

        async fn cancel_idle(&mut self) -> Result<Vec<Subsystem>, MpdError> {
            self.check()?;
            if self.idling {
                self.idling = false;
                self.log.borrow_mut().idles_cancelled += 1;
            }
            Ok(Vec::new())
        }

        async fn command(&mut self, command: PlayerCommand) -> Result<(), MpdError> {
            self.check()?;
            assert!(!self.idling, "command sent while idle is armed");
            self.log.borrow_mut().commands.push(command);
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SinkCall {
        Show { title: String, body: String },
        Update { title: String, body: String },
        Close,
        Icon(u32),
        Tooltip(String),
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub calls: Rc<RefCell<Vec<SinkCall>>>,
        /// Record every call but report it as failed.
        pub failing: bool,
    }

    impl RecordingSink {
        fn record(&self, call: SinkCall) -> Result<(), PresentationError> {
            self.calls.borrow_mut().push(call);
            if self.failing {
                Err(PresentationError::Io(std::io::Error::other("display unavailable")))
            } else {
                Ok(())
            }
        }
    }

    impl PresentationSink for RecordingSink {
        async fn show(&mut self, title: &str, body: &str, _icon: &Bitmap) -> Result<(), PresentationError> {
            self.record(SinkCall::Show {
                title: title.to_string(),
                body: body.to_string(),
            })
        }

        async fn update(&mut self, title: &str, body: &str) -> Result<(), PresentationError> {
            self.record(SinkCall::Update {
                title: title.to_string(),
                body: body.to_string(),
            })
        }

        async fn close(&mut self) -> Result<(), PresentationError> {
            self.record(SinkCall::Close)
        }

        fn set_icon(&mut self, icon: &Bitmap) -> Result<(), PresentationError> {
            self.record(SinkCall::Icon(icon.width()))
        }

        fn set_tooltip(&mut self, text: &str) -> Result<(), PresentationError> {
            self.record(SinkCall::Tooltip(text.to_string()))
        }
    }
}
