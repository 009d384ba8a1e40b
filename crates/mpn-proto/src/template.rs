//! Placeholder substitution for notification titles and bodies.
//!
//! Supported placeholders:
//!
//! | token | value                                   |
//! |-------|-----------------------------------------|
//! | `%t`  | title (falls back to filename, `???`)   |
//! | `%a`  | artist                                  |
//! | `%b`  | album                                   |
//! | `%d`  | song duration                           |
//! | `%f`  | base filename                           |
//! | `%n`  | track number                            |
//! | `%p`  | playlist position                       |
//!
//! `<br>` becomes a newline before substitution; other markup such as `<b>`
//! and `<i>` passes through untouched.
use regex::{Captures, Regex};

use crate::protocol::{ServerSnapshot, TrackInfo};

const PLACEHOLDER_PATTERN: &str = r"%[tabdfnp]";
const MARKUP_PATTERN: &str = r"<.*?>";
const LINE_BREAK_TAG: &str = "<br>";

/// Title used when neither a title tag nor a file name is available.
pub const UNKNOWN_TITLE: &str = "???";

/// Compiled matchers for templates and tooltips.  Build once and reuse.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    placeholder: Regex,
    markup: Regex,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
            markup: Regex::new(MARKUP_PATTERN)?,
        })
    }

    /// Render `template` against the current song and status.
    ///
    /// Every token is matched in a single left-to-right pass, so a substituted
    /// value that itself looks like a token is never expanded again.
    /// `html_escape` escapes the substituted values, never the template.
    pub fn render(
        &self,
        template: &str,
        track: &TrackInfo,
        status: &ServerSnapshot,
        html_escape: bool,
    ) -> String {
        let source = template.replace(LINE_BREAK_TAG, "\n");
        self.placeholder
            .replace_all(&source, |caps: &Captures<'_>| {
                let value = field_value(&caps[0], track, status);
                if html_escape {
                    htmlescape::encode_minimal(&value)
                } else {
                    value
                }
            })
            .into_owned()
    }

    /// Drop every `<…>` tag, for surfaces that cannot show markup.
    pub fn strip_markup(&self, text: &str) -> String {
        self.markup.replace_all(text, "").into_owned()
    }
}

fn field_value(token: &str, track: &TrackInfo, status: &ServerSnapshot) -> String {
    match token {
        "%t" => title(track),
        "%a" => track.artist.join(" / "),
        "%b" => track.album.join(" / "),
        "%d" => status.total_seconds.map(convert_time).unwrap_or_default(),
        "%f" => track.base_filename(),
        "%n" => track.track_number.clone().unwrap_or_default(),
        "%p" => track.playlist_position.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

fn title(track: &TrackInfo) -> String {
    if let Some(title) = track.joined_title() {
        return title;
    }
    let file = track.base_filename();
    if file.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        file
    }
}

/// Format seconds as `m:ss`, or `h:mm:ss` from one hour on.
pub fn convert_time(raw: u64) -> String {
    let hours = raw / 3600;
    let minutes = (raw % 3600) / 60;
    let seconds = raw % 60;
    if hours == 0 {
        format!("{}:{:02}", minutes, seconds)
    } else {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PlaybackState;

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new().unwrap()
    }

    fn playing(total: Option<u64>) -> ServerSnapshot {
        ServerSnapshot {
            playback_state: PlaybackState::Playing,
            elapsed_seconds: Some(0),
            total_seconds: total,
        }
    }

    #[test]
    fn test_title_and_artists() {
        let track = TrackInfo {
            title: vec!["Song".into()],
            artist: vec!["A".into(), "B".into()],
            ..Default::default()
        };
        let out = renderer().render("%t - %a", &track, &playing(None), false);
        assert_eq!(out, "Song - A / B");
    }

    #[test]
    fn test_escapes_values_not_markup() {
        let track = TrackInfo {
            title: vec!["<x>".into()],
            album: vec!["Rock & Roll".into()],
            ..Default::default()
        };
        let r = renderer();
        assert_eq!(r.render("%t", &track, &playing(None), true), "&lt;x&gt;");
        assert_eq!(
            r.render("<b>%b</b>", &track, &playing(None), true),
            "<b>Rock &amp; Roll</b>"
        );
        assert_eq!(r.render("%t", &track, &playing(None), false), "<x>");
    }

    #[test]
    fn test_title_fallbacks() {
        let r = renderer();
        let from_file = TrackInfo {
            file_path: Some("music/Band/track01.flac".into()),
            ..Default::default()
        };
        assert_eq!(r.render("%t", &from_file, &playing(None), false), "track01");

        let nothing = TrackInfo::default();
        assert_eq!(r.render("%t", &nothing, &playing(None), false), UNKNOWN_TITLE);
    }

    #[test]
    fn test_absent_fields_render_empty() {
        let out = renderer().render("[%a|%b|%d|%n|%p|%f]", &TrackInfo::default(), &playing(None), false);
        assert_eq!(out, "[|||||]");
    }

    #[test]
    fn test_duration_and_positions() {
        let track = TrackInfo {
            track_number: Some("7".into()),
            playlist_position: Some("12".into()),
            ..Default::default()
        };
        let out = renderer().render("%n/%p (%d)", &track, &playing(Some(3661)), false);
        assert_eq!(out, "7/12 (1:01:01)");
    }

    #[test]
    fn test_line_break_tag() {
        let track = TrackInfo {
            album: vec!["Album".into()],
            artist: vec!["Artist".into()],
            ..Default::default()
        };
        let out = renderer().render("<b>%b</b><br><i>%a</i>", &track, &playing(None), false);
        assert_eq!(out, "<b>Album</b>\n<i>Artist</i>");
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let track = TrackInfo {
            title: vec!["100%a".into()],
            artist: vec!["Nobody".into()],
            ..Default::default()
        };
        let out = renderer().render("%t", &track, &playing(None), false);
        assert_eq!(out, "100%a");
    }

    #[test]
    fn test_unknown_tokens_pass_through() {
        let out = renderer().render("%x %% %", &TrackInfo::default(), &playing(None), false);
        assert_eq!(out, "%x %% %");
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(renderer().strip_markup("<b>Album</b>\n<i>A</i>"), "Album\nA");
    }

    #[test]
    fn test_convert_time() {
        assert_eq!(convert_time(65), "1:05");
        assert_eq!(convert_time(3661), "1:01:01");
        assert_eq!(convert_time(5), "0:05");
        assert_eq!(convert_time(0), "0:00");
        assert_eq!(convert_time(36000), "10:00:00");
    }
}
