//! Desktop presentation: the notification popup over
//! `org.freedesktop.Notifications` plus the tray icon and tooltip, exported
//! to the cache directory for status bars to pick up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mpn_proto::config::Config;
use mpn_proto::protocol::PlayerCommand;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::dbus_proxy;
use zbus::export::ordered_stream::{self, OrderedStreamExt};
use zbus::zvariant::Value;

use crate::assets::Bitmap;
use crate::error::PresentationError;

const APP_NAME: &str = "mpn";
pub const ACTION_BACK: &str = "back";
pub const ACTION_FORWARD: &str = "forward";

const COVER_FILE: &str = "cover.png";
const STATUS_ICON_FILE: &str = "status-icon.png";
const TOOLTIP_FILE: &str = "status-tooltip.txt";

/// Things the user did, delivered to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Command(PlayerCommand),
    /// Re-display the current popup.
    Activate,
    /// The popup was dismissed or expired.
    Closed,
    TraySizeChanged(u32),
}

/// Where rendered text and images end up.
///
/// Failures are reported but never fatal to the engine.
#[allow(async_fn_in_trait)]
pub trait PresentationSink {
    async fn show(&mut self, title: &str, body: &str, icon: &Bitmap) -> Result<(), PresentationError>;
    /// Replace the popup text without displaying it.
    async fn update(&mut self, title: &str, body: &str) -> Result<(), PresentationError>;
    async fn close(&mut self) -> Result<(), PresentationError>;
    fn set_icon(&mut self, icon: &Bitmap) -> Result<(), PresentationError>;
    fn set_tooltip(&mut self, text: &str) -> Result<(), PresentationError>;
}

#[dbus_proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications",
    gen_blocking = false
)]
trait Notifications {
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;

    fn close_notification(&self, id: u32) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn action_invoked(&self, id: u32, action_key: &str) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn notification_closed(&self, id: u32, reason: u32) -> zbus::Result<()>;
}

/// Connection to the notification server.
struct Bus {
    proxy: NotificationsProxy<'static>,
    /// Server-side id of our popup, shared with the signal listener.
    id: Arc<AtomicU32>,
}

/// Notification daemon client.
///
/// A single popup is reused for the lifetime of the process so only its
/// signals are forwarded.  Without a session bus the popup calls are dropped
/// and only the tray files are kept up to date.
pub struct DesktopNotifier {
    bus: Option<Bus>,
    expire_timeout: i32,
    keys: bool,
    cover_path: PathBuf,
    exported_cover: Option<Bitmap>,
    status_icon_path: PathBuf,
    exported_status_icon: Option<Bitmap>,
    tooltip_path: PathBuf,
    tooltip: String,
}

impl DesktopNotifier {
    /// Connect to the session bus, or carry on without popups when there is
    /// none.
    pub async fn connect(config: &Config, cache_dir: &Path, events: mpsc::Sender<UiEvent>) -> Self {
        let mut notifier = Self::offline(config, cache_dir);
        match open_bus(events).await {
            Ok(bus) => {
                info!("notify: connected to the notification daemon");
                notifier.bus = Some(bus);
            }
            Err(e) => warn!("notify: popups disabled, no notification daemon: {}", e),
        }
        notifier
    }

    fn offline(config: &Config, cache_dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            warn!("notify: cannot create {}: {}", cache_dir.display(), e);
        }
        Self {
            bus: None,
            expire_timeout: expire_timeout(config.notification.timeout),
            keys: config.notification.keys,
            cover_path: cache_dir.join(COVER_FILE),
            exported_cover: None,
            status_icon_path: cache_dir.join(STATUS_ICON_FILE),
            exported_status_icon: None,
            tooltip_path: cache_dir.join(TOOLTIP_FILE),
            tooltip: String::new(),
        }
    }

    fn actions(&self) -> Vec<&'static str> {
        if self.keys {
            vec![ACTION_BACK, "<<", ACTION_FORWARD, ">>"]
        } else {
            Vec::new()
        }
    }
}

async fn open_bus(events: mpsc::Sender<UiEvent>) -> Result<Bus, PresentationError> {
    let connection = zbus::Connection::session().await?;
    let proxy = NotificationsProxy::new(&connection).await?;
    let id = Arc::new(AtomicU32::new(0));

    let listener = proxy.clone();
    let listener_id = Arc::clone(&id);
    tokio::spawn(async move {
        if let Err(e) = forward_signals(listener, listener_id, events).await {
            warn!("notify: signal listener stopped: {}", e);
        }
    });
    Ok(Bus { proxy, id })
}

/// Seconds to the milliseconds the server expects; zero never expires.
fn expire_timeout(seconds: u32) -> i32 {
    i32::try_from(u64::from(seconds) * 1000).unwrap_or(i32::MAX)
}

/// Write `bitmap` to `path` unless that exact bitmap is already there.
fn export_png(
    bitmap: &Bitmap,
    path: &Path,
    exported: &mut Option<Bitmap>,
) -> Result<(), PresentationError> {
    if exported.as_ref().is_some_and(|prev| Rc::ptr_eq(prev, bitmap)) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    bitmap.save(path)?;
    *exported = Some(Rc::clone(bitmap));
    debug!("notify: exported {}", path.display());
    Ok(())
}

impl PresentationSink for DesktopNotifier {
    async fn show(&mut self, title: &str, body: &str, icon: &Bitmap) -> Result<(), PresentationError> {
        let Some(bus) = &self.bus else {
            debug!("notify: no bus, dropping popup '{}'", title);
            return Ok(());
        };
        let mut hints: HashMap<&str, Value<'_>> = HashMap::new();
        let cover = self.cover_path.to_string_lossy().into_owned();
        match export_png(icon, &self.cover_path, &mut self.exported_cover) {
            Ok(()) => {
                hints.insert("image-path", Value::from(cover.as_str()));
            }
            Err(e) => warn!("notify: showing popup without cover: {}", e),
        }

        let actions = self.actions();
        let id = bus
            .proxy
            .notify(
                APP_NAME,
                bus.id.load(Ordering::SeqCst),
                "",
                title,
                body,
                &actions,
                hints,
                self.expire_timeout,
            )
            .await?;
        bus.id.store(id, Ordering::SeqCst);
        debug!("notify: popup {} shown", id);
        Ok(())
    }

    async fn update(&mut self, title: &str, body: &str) -> Result<(), PresentationError> {
        // The server only gets the text with the next show().
        debug!("notify: popup text now '{}' / '{}'", title, body);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PresentationError> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        let id = bus.id.load(Ordering::SeqCst);
        if id != 0 {
            bus.proxy.close_notification(id).await?;
            debug!("notify: popup {} closed", id);
        }
        Ok(())
    }

    fn set_icon(&mut self, icon: &Bitmap) -> Result<(), PresentationError> {
        export_png(icon, &self.status_icon_path, &mut self.exported_status_icon)
    }

    fn set_tooltip(&mut self, text: &str) -> Result<(), PresentationError> {
        if self.tooltip == text {
            return Ok(());
        }
        std::fs::write(&self.tooltip_path, text)?;
        debug!("notify: tooltip {:?}", text);
        self.tooltip = text.to_string();
        Ok(())
    }
}

/// Forward button presses and closures of our popup to the engine.
async fn forward_signals(
    proxy: NotificationsProxy<'static>,
    id: Arc<AtomicU32>,
    events: mpsc::Sender<UiEvent>,
) -> zbus::Result<()> {
    enum Signal {
        Action(ActionInvoked),
        Closed(NotificationClosed),
    }

    let actions = proxy.receive_action_invoked().await?;
    let closed = proxy.receive_notification_closed().await?;
    let mut signals = ordered_stream::join(
        OrderedStreamExt::map(actions, Signal::Action),
        OrderedStreamExt::map(closed, Signal::Closed),
    );

    while let Some(signal) = signals.next().await {
        let ours = id.load(Ordering::SeqCst);
        let event = match signal {
            Signal::Action(sig) => {
                let args = sig.args()?;
                if args.id != ours {
                    continue;
                }
                match action_command(args.action_key) {
                    Some(command) => UiEvent::Command(command),
                    None => {
                        debug!("notify: ignoring action '{}'", args.action_key);
                        continue;
                    }
                }
            }
            Signal::Closed(sig) => {
                let args = sig.args()?;
                if args.id != ours {
                    continue;
                }
                debug!("notify: popup {} closed by server (reason {})", args.id, args.reason);
                UiEvent::Closed
            }
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
    Ok(())
}

fn action_command(action_key: &str) -> Option<PlayerCommand> {
    match action_key {
        ACTION_BACK => Some(PlayerCommand::Previous),
        ACTION_FORWARD => Some(PlayerCommand::Next),
        _ => None,
    }
}
