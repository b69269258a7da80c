use std::path::{Path, PathBuf};

use crate::logger::Level;
use crate::ops::flood_fill::{DEFAULT_LINE_THRESHOLD, DEFAULT_TOLERANCE};

/// Coloring settings that persist across sessions.
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Per-channel fill tolerance (0-255)
    pub tolerance: u8,
    /// Seeds darker than this on every channel are treated as line art
    pub line_threshold: u8,
    /// Size of the page buffer line art is letterboxed into
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Longest edge of page thumbnails
    pub thumbnail_edge: u32,
    /// Directory of the saved-coloring store. Empty = platform data dir.
    pub store_dir: String,
    pub log_level: Level,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            line_threshold: DEFAULT_LINE_THRESHOLD,
            canvas_width: 1024,
            canvas_height: 768,
            thumbnail_edge: 256,
            store_dir: String::new(),
            log_level: Level::Info,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/colorbook/colorbook_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Colorbook\colorbook_settings.cfg
    /// On macOS:   ~/Library/Application Support/Colorbook/colorbook_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("colorbook");
            return Some(config_dir.join("colorbook_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(
                PathBuf::from(appdata)
                    .join("Colorbook")
                    .join("colorbook_settings.cfg"),
            );
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("Colorbook")
                    .join("colorbook_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("colorbook_settings.cfg")))
        }
    }

    /// Resolved store directory.
    pub fn store_path(&self) -> PathBuf {
        if self.store_dir.trim().is_empty() {
            crate::io::default_store_dir()
        } else {
            PathBuf::from(self.store_dir.trim())
        }
    }

    pub fn to_config_string(&self) -> String {
        let level = match self.log_level {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        format!(
            "tolerance={}\n\
             line_threshold={}\n\
             canvas_width={}\n\
             canvas_height={}\n\
             thumbnail_edge={}\n\
             store_dir={}\n\
             log_level={level}\n",
            self.tolerance,
            self.line_threshold,
            self.canvas_width,
            self.canvas_height,
            self.thumbnail_edge,
            self.store_dir,
        )
    }

    /// Parse `key=value` lines. Unknown keys are skipped and unparsable
    /// values keep their default.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "tolerance" => {
                    s.tolerance = val.parse().unwrap_or(s.tolerance);
                }
                "line_threshold" => {
                    s.line_threshold = val.parse().unwrap_or(s.line_threshold);
                }
                "canvas_width" => {
                    s.canvas_width = val
                        .parse()
                        .ok()
                        .filter(|&w| w > 0)
                        .unwrap_or(s.canvas_width);
                }
                "canvas_height" => {
                    s.canvas_height = val
                        .parse()
                        .ok()
                        .filter(|&h| h > 0)
                        .unwrap_or(s.canvas_height);
                }
                "thumbnail_edge" => {
                    s.thumbnail_edge = val.parse().unwrap_or(s.thumbnail_edge);
                }
                "store_dir" => {
                    s.store_dir = val.to_string();
                }
                "log_level" => {
                    s.log_level = Level::parse(val).unwrap_or(s.log_level);
                }
                _ => {}
            }
        }
        s
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or corrupt).
    /// On first launch the defaults are written out so the file can be edited.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_or_create_at(&path),
            None => Self::default(),
        }
    }

    /// Like [`AppSettings::load_from`], but a missing file is created with
    /// the defaults. Write failures are logged and otherwise ignored.
    pub fn load_or_create_at(path: &Path) -> Self {
        if path.exists() {
            return Self::load_from(path);
        }
        let defaults = Self::default();
        if let Err(e) = defaults.save_to(path) {
            log_warn!("Could not write settings {}: {}", path.display(), e);
        }
        defaults
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_config_str(&content),
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fill_engine() {
        let s = AppSettings::default();
        assert_eq!(s.tolerance, 40);
        assert_eq!(s.line_threshold, 80);
        assert_eq!((s.canvas_width, s.canvas_height), (1024, 768));
    }

    #[test]
    fn config_string_round_trips() {
        let s = AppSettings {
            tolerance: 12,
            line_threshold: 64,
            canvas_width: 800,
            canvas_height: 600,
            thumbnail_edge: 128,
            store_dir: "/tmp/colorbook".into(),
            log_level: Level::Warn,
        };
        assert_eq!(AppSettings::from_config_str(&s.to_config_string()), s);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let s = AppSettings::from_config_str(
            "# comment\n\
             tolerance=300\n\
             canvas_width=0\n\
             canvas_height=abc\n\
             log_level=loud\n\
             unknown_key=1\n\
             no equals sign\n\
             line_threshold = 50 \n",
        );
        assert_eq!(s.tolerance, 40);
        assert_eq!(s.canvas_width, 1024);
        assert_eq!(s.canvas_height, 768);
        assert_eq!(s.log_level, Level::Info);
        assert_eq!(s.line_threshold, 50);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            AppSettings::load_from(&dir.path().join("absent.cfg")),
            AppSettings::default()
        );
    }

    #[test]
    fn save_to_then_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("colorbook_settings.cfg");
        let s = AppSettings {
            tolerance: 5,
            ..AppSettings::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path), s);
    }

    #[test]
    fn first_load_writes_defaults_and_keeps_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colorbook").join("colorbook_settings.cfg");

        assert_eq!(AppSettings::load_or_create_at(&path), AppSettings::default());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            AppSettings::default().to_config_string()
        );

        std::fs::write(&path, "tolerance=12\n").unwrap();
        assert_eq!(AppSettings::load_or_create_at(&path).tolerance, 12);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "tolerance=12\n");
    }

    #[test]
    fn unwritable_settings_path_still_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();
        let path = file.join("colorbook_settings.cfg");
        assert_eq!(AppSettings::load_or_create_at(&path), AppSettings::default());
    }

    #[test]
    fn store_path_prefers_explicit_dir() {
        let s = AppSettings {
            store_dir: " /data/cb ".into(),
            ..AppSettings::default()
        };
        assert_eq!(s.store_path(), PathBuf::from("/data/cb"));
    }
}
