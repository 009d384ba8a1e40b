use crate::protocol::{PlaybackState, ServerSnapshot, TrackInfo};

/// What changed between two reconciliation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffResult {
    pub status_changed: bool,
    pub track_changed: bool,
}

/// Presentation work implied by one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    pub diff: DiffResult,
    /// Playback stopped: close the popup.
    pub clear: bool,
    /// Text, icons and tooltip need re-rendering.
    pub refresh: bool,
    /// The popup should be (re)displayed.
    pub show: bool,
}

/// Decides whether a pause/resume of the same song re-displays the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShowPolicy {
    pub reshow_on_resume: bool,
}

/// Last snapshot and song retained by the engine.
///
/// Only [`EngineState::apply`] mutates it; each call replaces both copies
/// wholesale.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    snapshot: Option<ServerSnapshot>,
    track: Option<TrackInfo>,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&ServerSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn track(&self) -> Option<&TrackInfo> {
        self.track.as_ref()
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.snapshot.as_ref().map(|s| s.playback_state)
    }

    /// Compare against the retained copies, keep the new ones and work out
    /// what the presentation has to do.
    ///
    /// The status counts as changed only when the playback state differs;
    /// elapsed time moves on its own and is not an observable change.
    pub fn apply(
        &mut self,
        snapshot: ServerSnapshot,
        track: TrackInfo,
        policy: ShowPolicy,
    ) -> Transition {
        let old_state = self.playback_state();
        let new_state = snapshot.playback_state;

        let diff = DiffResult {
            status_changed: old_state != Some(new_state),
            track_changed: self.track.as_ref() != Some(&track),
        };

        self.snapshot = Some(snapshot);
        self.track = Some(track);

        let stopped = new_state == PlaybackState::Stopped;
        let was_stopped = old_state == Some(PlaybackState::Stopped);
        let entered_active = !stopped && (old_state.is_none() || was_stopped);
        let resumed = policy.reshow_on_resume && diff.status_changed;

        Transition {
            diff,
            clear: stopped && !was_stopped,
            refresh: diff.status_changed || diff.track_changed,
            show: !stopped && (entered_active || diff.track_changed || resumed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: PlaybackState) -> ServerSnapshot {
        ServerSnapshot {
            playback_state: state,
            elapsed_seconds: Some(10),
            total_seconds: Some(200),
        }
    }

    fn song(title: &str) -> TrackInfo {
        TrackInfo {
            title: vec![title.to_string()],
            file_path: Some(format!("{}.flac", title)),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_pass_while_playing_shows() {
        let mut state = EngineState::new();
        let t = state.apply(snapshot(PlaybackState::Playing), song("a"), ShowPolicy::default());
        assert!(t.diff.status_changed && t.diff.track_changed);
        assert!(t.refresh && t.show && !t.clear);
    }

    #[test]
    fn test_second_identical_pass_is_idle() {
        let mut state = EngineState::new();
        state.apply(snapshot(PlaybackState::Playing), song("a"), ShowPolicy::default());

        let mut later = snapshot(PlaybackState::Playing);
        later.elapsed_seconds = Some(42);
        let t = state.apply(later, song("a"), ShowPolicy::default());
        assert_eq!(t, Transition::default());
    }

    #[test]
    fn test_pause_resume_refreshes_without_showing() {
        let mut state = EngineState::new();
        state.apply(snapshot(PlaybackState::Playing), song("a"), ShowPolicy::default());

        for next in [PlaybackState::Paused, PlaybackState::Playing] {
            let t = state.apply(snapshot(next), song("a"), ShowPolicy::default());
            assert!(t.refresh, "refresh on {:?}", next);
            assert!(!t.show, "no popup on {:?}", next);
            assert!(!t.clear);
        }
    }

    #[test]
    fn test_reshow_on_resume_policy() {
        let policy = ShowPolicy { reshow_on_resume: true };
        let mut state = EngineState::new();
        state.apply(snapshot(PlaybackState::Playing), song("a"), policy);
        let t = state.apply(snapshot(PlaybackState::Paused), song("a"), policy);
        assert!(t.show);
    }

    #[test]
    fn test_track_change_while_active_shows() {
        let mut state = EngineState::new();
        state.apply(snapshot(PlaybackState::Paused), song("a"), ShowPolicy::default());
        let t = state.apply(snapshot(PlaybackState::Paused), song("b"), ShowPolicy::default());
        assert_eq!(
            t.diff,
            DiffResult {
                status_changed: false,
                track_changed: true
            }
        );
        assert!(t.refresh && t.show);
    }

    #[test]
    fn test_stop_clears_once() {
        let mut state = EngineState::new();
        state.apply(snapshot(PlaybackState::Playing), song("a"), ShowPolicy::default());

        let t = state.apply(ServerSnapshot::stopped(), TrackInfo::default(), ShowPolicy::default());
        assert!(t.clear && t.refresh && !t.show);

        let t = state.apply(ServerSnapshot::stopped(), TrackInfo::default(), ShowPolicy::default());
        assert!(!t.clear && !t.refresh && !t.show);
    }

    #[test]
    fn test_start_after_stop_shows() {
        let mut state = EngineState::new();
        state.apply(ServerSnapshot::stopped(), song("a"), ShowPolicy::default());
        let t = state.apply(snapshot(PlaybackState::Playing), song("a"), ShowPolicy::default());
        assert!(t.show && t.refresh);
        assert!(!t.diff.track_changed);
    }

    #[test]
    fn test_song_change_while_stopped_does_not_show() {
        let mut state = EngineState::new();
        state.apply(ServerSnapshot::stopped(), song("a"), ShowPolicy::default());
        let t = state.apply(ServerSnapshot::stopped(), song("b"), ShowPolicy::default());
        assert!(t.refresh && !t.show && !t.clear);
    }
}
