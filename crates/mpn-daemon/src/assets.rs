//! Cover art lookup and the rendered bitmaps derived from it.
//!
//! Decoding and scaling are expensive, so every derived bitmap is memoised
//! under the `(cover key, size)` it was produced from.  Memoised bitmaps are
//! shared via `Rc` and never mutated; callers can hold onto them freely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use mpn_proto::protocol::PlaybackState;
use tracing::{debug, warn};

use crate::glyphs;

/// An immutable rendered image.
pub type Bitmap = Rc<RgbaImage>;

const COVER_PREFIXES: [&str; 2] = ["", "."];
const COVER_BASENAMES: [&str; 8] = [
    "cover",
    "coverart",
    "frontcover",
    "front",
    "albumart",
    "albumcover",
    "album",
    "folder",
];
const COVER_EXTENSIONS: [&str; 2] = [".png", ".jpg"];

/// File names recognised as cover art, most preferred first.
pub fn cover_candidates() -> Vec<String> {
    let mut names = Vec::with_capacity(COVER_PREFIXES.len() * COVER_BASENAMES.len() * 2);
    for prefix in COVER_PREFIXES {
        for base in COVER_BASENAMES {
            for ext in COVER_EXTENSIONS {
                names.push(format!("{prefix}{base}{ext}"));
            }
        }
    }
    names
}

/// Identifies the source image of a rendered bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum CoverArtKey {
    /// Use the placeholder.
    #[default]
    None,
    File(PathBuf),
}

/// Find cover art next to `track_file` inside `music_root`.
///
/// The directory is listed once and names are compared case-insensitively.
/// Any I/O problem just means "no cover".
pub fn resolve_cover(music_root: Option<&Path>, track_file: Option<&str>) -> CoverArtKey {
    let (Some(root), Some(file)) = (music_root, track_file) else {
        return CoverArtKey::None;
    };
    let Some(dir) = root.join(file).parent().map(Path::to_path_buf) else {
        return CoverArtKey::None;
    };
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("assets: cannot list {}: {}", dir.display(), e);
            return CoverArtKey::None;
        }
    };

    let mut by_lowercase: HashMap<String, PathBuf> = HashMap::new();
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            by_lowercase
                .entry(name.to_lowercase())
                .or_insert_with(|| entry.path());
        }
    }

    cover_candidates()
        .iter()
        .find_map(|name| by_lowercase.get(name))
        .map(|path| CoverArtKey::File(path.clone()))
        .unwrap_or_default()
}

/// Which memo slot a bitmap lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Popup,
    Tray,
}

struct Memo {
    key: CoverArtKey,
    size: u32,
    bitmap: Bitmap,
}

/// Tray icon variants derived from one base bitmap.
pub struct TrayIcons {
    base: Bitmap,
    proportion: f64,
    by_state: HashMap<PlaybackState, Bitmap>,
}

impl TrayIcons {
    fn compose(base: Bitmap, proportion: f64) -> Self {
        let size = base.width();
        let glyph_size = ((size as f64) * proportion).round() as u32;
        let by_state = PlaybackState::ALL
            .into_iter()
            .map(|state| {
                let icon = if glyph_size == 0 || glyph_size > size {
                    Rc::clone(&base)
                } else {
                    let mut icon = (*base).clone();
                    let glyph = glyphs::state_glyph(state, glyph_size);
                    let offset = i64::from(size - glyph_size);
                    imageops::replace(&mut icon, &glyph, offset, offset);
                    Rc::new(icon)
                };
                (state, icon)
            })
            .collect();
        Self {
            base,
            proportion,
            by_state,
        }
    }

    /// The plain icon, without a play-state glyph.
    pub fn generic(&self) -> &Bitmap {
        &self.base
    }

    pub fn for_state(&self, state: Option<PlaybackState>) -> &Bitmap {
        state
            .and_then(|s| self.by_state.get(&s))
            .unwrap_or_else(|| self.generic())
    }
}

/// Memoised popup and tray bitmaps.
#[derive(Default)]
pub struct AssetCache {
    popup: Option<Memo>,
    tray: Option<Memo>,
    tray_icons: Option<TrayIcons>,
    decodes: usize,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of image files decoded so far.
    #[cfg(test)]
    pub fn decode_count(&self) -> usize {
        self.decodes
    }

    fn memo(&self, slot: Slot) -> Option<&Memo> {
        match slot {
            Slot::Popup => self.popup.as_ref(),
            Slot::Tray => self.tray.as_ref(),
        }
    }

    fn memo_mut(&mut self, slot: Slot) -> &mut Option<Memo> {
        match slot {
            Slot::Popup => &mut self.popup,
            Slot::Tray => &mut self.tray,
        }
    }

    /// Square bitmap of `size` pixels for `key`, rendered at most once per
    /// `(key, size)` and slot.  Falls back to the placeholder.
    pub fn get_bitmap(&mut self, slot: Slot, key: &CoverArtKey, size: u32) -> Bitmap {
        if let Some(memo) = self
            .memo(slot)
            .filter(|m| m.size == size && &m.key == key)
        {
            return Rc::clone(&memo.bitmap);
        }
        let bitmap = Rc::new(self.render(key, size));
        *self.memo_mut(slot) = Some(Memo {
            key: key.clone(),
            size,
            bitmap: Rc::clone(&bitmap),
        });
        bitmap
    }

    fn render(&mut self, key: &CoverArtKey, size: u32) -> RgbaImage {
        match key {
            CoverArtKey::None => glyphs::placeholder_disc(size),
            CoverArtKey::File(path) => {
                self.decodes += 1;
                match image::open(path) {
                    Ok(img) => {
                        debug!(
                            "assets: decoded {} at {}px ({} decodes)",
                            path.display(),
                            size,
                            self.decodes
                        );
                        img.resize_exact(size, size, FilterType::Lanczos3)
                            .to_rgba8()
                    }
                    Err(e) => {
                        warn!("assets: cannot decode {}: {}", path.display(), e);
                        glyphs::placeholder_disc(size)
                    }
                }
            }
        }
    }

    /// Tray icon set for `key`, regenerated only when the base bitmap or the
    /// glyph proportion changed.
    pub fn tray_icons(&mut self, key: &CoverArtKey, size: u32, proportion: f64) -> &TrayIcons {
        let base = self.get_bitmap(Slot::Tray, key, size);
        let stale = match &self.tray_icons {
            Some(icons) => !Rc::ptr_eq(&icons.base, &base) || icons.proportion != proportion,
            None => true,
        };
        if stale {
            self.tray_icons = None;
        }
        self.tray_icons
            .get_or_insert_with(|| TrayIcons::compose(base, proportion))
    }
}
