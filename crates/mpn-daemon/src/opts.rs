use std::path::PathBuf;

use clap::Parser;
use mpn_proto::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "mpn",
    about = "Desktop notifications for MPD",
    long_about = None,
    version,
    after_help = "Templates accept %t title, %a artist, %b album, %d duration, \
                  %f file name, %n track number and %p playlist position.\n\
                  MPD_HOST (host or password@host) and MPD_PORT select the server."
)]
pub struct Opts {
    /// Print the default configuration as TOML and exit
    #[arg(long)]
    pub show_defaults: bool,

    /// Config file to use instead of ~/.config/mpn/config.toml
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Stay in the foreground and log debug output
    #[arg(long, overrides_with = "no_debug")]
    debug: bool,
    #[arg(long, overrides_with = "debug")]
    no_debug: bool,

    /// Fork into the background
    #[arg(short = 'd', long = "daemon", overrides_with = "no_daemon")]
    daemon: bool,
    #[arg(long = "no-daemon", overrides_with = "daemon")]
    no_daemon: bool,

    /// Keep retrying when the connection to MPD is lost
    #[arg(short, long, overrides_with = "no_persist")]
    persist: bool,
    #[arg(long, overrides_with = "persist")]
    no_persist: bool,

    /// Seconds before the popup expires (0 never expires)
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u32>,

    /// Previous/next buttons on the popup
    #[arg(short, long, overrides_with = "no_keys")]
    keys: bool,
    #[arg(long, overrides_with = "keys")]
    no_keys: bool,

    /// Notify once and exit
    #[arg(short, long, overrides_with = "no_once")]
    once: bool,
    #[arg(long, overrides_with = "once")]
    no_once: bool,

    /// Cover art size in the popup
    #[arg(short = 's', long, value_name = "PIXELS")]
    icon_size: Option<u32>,

    /// Music library root, searched for cover art ("" disables)
    #[arg(short, long, value_name = "PATH")]
    music_path: Option<String>,

    /// Maintain the tray icon and tooltip
    #[arg(long, overrides_with = "no_status_icon")]
    status_icon: bool,
    #[arg(long, overrides_with = "status_icon")]
    no_status_icon: bool,

    /// Play-state glyph size as a proportion of the tray icon (0 disables)
    #[arg(long, value_name = "F")]
    play_state_icon_size: Option<f64>,

    /// Popup title template
    #[arg(short = 'F', long, value_name = "TEMPLATE")]
    title_format: Option<String>,

    /// Popup body template
    #[arg(short = 'f', long, value_name = "TEMPLATE")]
    body_format: Option<String>,
}

/// `--foo` / `--no-foo` pair; neither leaves the config alone.
fn flag(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Opts {
    /// Layer the command line over the loaded config.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(debug) = flag(self.debug, self.no_debug) {
            config.daemon.debug = debug;
        }
        if let Some(detach) = flag(self.daemon, self.no_daemon) {
            config.daemon.detach = detach;
        }
        if let Some(once) = flag(self.once, self.no_once) {
            config.daemon.once = once;
        }
        if let Some(persist) = flag(self.persist, self.no_persist) {
            config.connection.persist = persist;
        }
        if let Some(keys) = flag(self.keys, self.no_keys) {
            config.notification.keys = keys;
        }
        if let Some(enabled) = flag(self.status_icon, self.no_status_icon) {
            config.status_icon.enabled = enabled;
        }
        if let Some(timeout) = self.timeout {
            config.notification.timeout = timeout;
        }
        if let Some(size) = self.icon_size {
            config.notification.icon_size = size;
        }
        if let Some(path) = &self.music_path {
            config.library.music_path = path.clone();
        }
        if let Some(proportion) = self.play_state_icon_size {
            config.status_icon.play_state_icon_size = proportion;
        }
        if let Some(format) = &self.title_format {
            config.notification.title_format = format.clone();
        }
        if let Some(format) = &self.body_format {
            config.notification.body_format = format.clone();
        }
        config.validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        Opts::try_parse_from(std::iter::once("mpn").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_flags_keep_config() {
        let config = parse(&[]).apply(Config::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--no-persist",
            "-t",
            "0",
            "-o",
            "--no-keys",
            "-m",
            "",
            "-F",
            "%a: %t",
        ])
        .apply(Config::default());
        assert!(!config.connection.persist);
        assert_eq!(config.notification.timeout, 0);
        assert!(config.daemon.once);
        assert!(!config.notification.keys);
        assert_eq!(config.library.music_root(), None);
        assert_eq!(config.notification.title_format, "%a: %t");
    }

    #[test]
    fn test_last_of_a_pair_wins() {
        let mut base = Config::default();
        base.notification.keys = false;
        let config = parse(&["--no-keys", "-k"]).apply(base);
        assert!(config.notification.keys);

        let config = parse(&["-k", "--no-keys"]).apply(Config::default());
        assert!(!config.notification.keys);
    }

    #[test]
    fn test_values_are_validated() {
        let config = parse(&["--play-state-icon-size", "2.5", "-s", "0"]).apply(Config::default());
        assert_eq!(config.status_icon.play_state_icon_size, 1.0);
        assert_eq!(config.notification.icon_size, 128);
    }

    #[test]
    fn test_daemon_short_flag() {
        let opts = parse(&["-d", "--debug"]);
        let config = opts.apply(Config::default());
        assert!(config.daemon.detach);
        assert!(config.daemon.debug);
    }
}
