//! Types for the subset of the MPD text protocol that mpn consumes.
//!
//! The daemon's transport reads raw `key: value` lines; everything here turns
//! those pairs into owned snapshots that can be compared field by field.
use std::fmt;
use std::str::FromStr;

/// Greeting prefix sent by the server right after the TCP handshake.
pub const GREETING_PREFIX: &str = "OK MPD ";

/// Terminator of a successful response.
pub const RESPONSE_OK: &str = "OK";

/// Prefix of an error response.
pub const RESPONSE_ACK: &str = "ACK ";

/// Playback state as reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub const ALL: [PlaybackState; 3] = [
        PlaybackState::Playing,
        PlaybackState::Paused,
        PlaybackState::Stopped,
    ];

    /// The protocol spelling, also used in tooltips.
    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Playing => "play",
            PlaybackState::Paused => "pause",
            PlaybackState::Stopped => "stop",
        }
    }

    pub fn is_active(self) -> bool {
        match self {
            PlaybackState::Playing | PlaybackState::Paused => true,
            PlaybackState::Stopped => false,
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown playback state '{}'", self.0)
    }
}

impl std::error::Error for UnknownState {}

impl FromStr for PlaybackState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(PlaybackState::Playing),
            "pause" => Ok(PlaybackState::Paused),
            "stop" => Ok(PlaybackState::Stopped),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// Point-in-time copy of the `status` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub playback_state: PlaybackState,
    pub elapsed_seconds: Option<u64>,
    pub total_seconds: Option<u64>,
}

impl ServerSnapshot {
    pub fn stopped() -> Self {
        Self {
            playback_state: PlaybackState::Stopped,
            elapsed_seconds: None,
            total_seconds: None,
        }
    }

    /// Build a snapshot from the pairs of a `status` response.
    ///
    /// `time: <elapsed>:<total>` wins; servers that dropped it still send
    /// `elapsed` and `duration` as fractional seconds.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut snapshot = Self::stopped();
        let mut time_field = false;

        for (key, value) in pairs {
            match key.as_str() {
                "state" => match value.parse() {
                    Ok(state) => snapshot.playback_state = state,
                    Err(e) => tracing::warn!("protocol: {}, assuming stopped", e),
                },
                "time" => {
                    if let Some((elapsed, total)) = value.split_once(':') {
                        snapshot.elapsed_seconds = elapsed.trim().parse().ok();
                        snapshot.total_seconds = total.trim().parse().ok();
                        time_field = true;
                    }
                }
                "elapsed" if !time_field => {
                    snapshot.elapsed_seconds = parse_seconds(value);
                }
                "duration" if !time_field => {
                    snapshot.total_seconds = parse_seconds(value);
                }
                _ => {}
            }
        }

        if let (Some(elapsed), Some(total)) = (snapshot.elapsed_seconds, snapshot.total_seconds) {
            if elapsed > total {
                snapshot.elapsed_seconds = Some(total);
            }
        }
        snapshot
    }
}

fn parse_seconds(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(secs.floor() as u64)
    } else {
        None
    }
}

/// Tags of the current song.  Multi-valued tags keep every value in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: Vec<String>,
    pub artist: Vec<String>,
    pub album: Vec<String>,
    pub track_number: Option<String>,
    pub playlist_position: Option<String>,
    pub file_path: Option<String>,
}

impl TrackInfo {
    /// Build track info from the pairs of a `currentsong` response.
    /// Tag names are matched case-insensitively; unknown tags are ignored.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut track = Self::default();
        for (key, value) in pairs {
            match key.to_ascii_lowercase().as_str() {
                "title" => track.title.push(value.clone()),
                "artist" => track.artist.push(value.clone()),
                "album" => track.album.push(value.clone()),
                "track" => append_single(&mut track.track_number, value),
                "pos" => append_single(&mut track.playlist_position, value),
                "file" => {
                    if track.file_path.is_none() {
                        track.file_path = Some(value.clone());
                    }
                }
                _ => {}
            }
        }
        track
    }

    /// An empty `currentsong` (stopped with an empty queue) has no file.
    pub fn has_song(&self) -> bool {
        self.file_path.is_some()
    }

    /// Title tags joined with " - ", if any.
    pub fn joined_title(&self) -> Option<String> {
        if self.title.is_empty() {
            None
        } else {
            Some(self.title.join(" - "))
        }
    }

    /// File name without directories and without its final extension.
    pub fn base_filename(&self) -> String {
        let Some(path) = self.file_path.as_deref() else {
            return String::new();
        };
        let name = path.rsplit('/').next().unwrap_or(path);
        match name.rfind('.') {
            Some(idx) => name[..idx].to_string(),
            None => name.to_string(),
        }
    }
}

/// Single-valued tags that still arrive twice are joined like generic tags.
fn append_single(slot: &mut Option<String>, value: &str) {
    match slot {
        Some(existing) => {
            existing.push_str(" / ");
            existing.push_str(value);
        }
        None => *slot = Some(value.to_string()),
    }
}

/// Idle subsystems; mpn only subscribes to `player`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subsystem {
    Player,
    Other(String),
}

impl Subsystem {
    pub fn name(&self) -> &str {
        match self {
            Subsystem::Player => "player",
            Subsystem::Other(name) => name,
        }
    }

    /// Collect the `changed: <subsystem>` entries of an idle response.
    pub fn from_pairs(pairs: &[(String, String)]) -> Vec<Subsystem> {
        pairs
            .iter()
            .filter(|(key, _)| key == "changed")
            .map(|(_, value)| match value.as_str() {
                "player" => Subsystem::Player,
                other => Subsystem::Other(other.to_string()),
            })
            .collect()
    }
}

/// Playback commands that can be issued from the notification or the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Stop,
    Previous,
    Next,
}

impl PlayerCommand {
    /// Request line, without the trailing newline.
    pub fn request(self) -> &'static str {
        match self {
            PlayerCommand::Play => "play",
            PlayerCommand::Pause => "pause 1",
            PlayerCommand::Stop => "stop",
            PlayerCommand::Previous => "previous",
            PlayerCommand::Next => "next",
        }
    }
}

/// Parsed `ACK [code@index] {command} message` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub code: u32,
    pub index: u32,
    pub command: String,
    pub message: String,
}

impl Ack {
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(RESPONSE_ACK)?;
        let rest = rest.strip_prefix('[')?;
        let (position, rest) = rest.split_once(']')?;
        let (code, index) = position.split_once('@')?;
        let rest = rest.trim_start().strip_prefix('{')?;
        let (command, message) = rest.split_once('}')?;
        Some(Self {
            code: code.parse().ok()?,
            index: index.parse().ok()?,
            command: command.to_string(),
            message: message.trim().to_string(),
        })
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}@{}] {{{}}} {}",
            self.code, self.index, self.command, self.message
        )
    }
}

/// Split a response line into its key and value.
pub fn split_pair(line: &str) -> Option<(&str, &str)> {
    line.split_once(": ")
}

/// Quote an argument the way the server expects (`"` and `\` escaped).
pub fn quote_argument(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
