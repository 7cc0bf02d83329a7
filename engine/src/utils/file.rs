//! Path helpers for config and database files

use std::path::PathBuf;

use crate::core::constants::APP_DOT_FOLDER;

/// Turn a user-supplied path into an absolute one
///
/// `~` and `~/...` expand to the home directory; relative paths are joined
/// onto the current directory without being canonicalized. Surrounding
/// whitespace is ignored and an empty string means the current directory.
///
/// ```text
/// expand_path("~/.geofilter/geofilter.json") // -> /home/user/.geofilter/geofilter.json
/// expand_path("parcels.sqlite")              // -> /current/dir/parcels.sqlite
/// expand_path("/srv/gis/parcels.sqlite")     // -> /srv/gis/parcels.sqlite
/// ```
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();
    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if path.is_empty() {
        return cwd();
    }

    let expanded = match (path, dirs::home_dir()) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    };

    if expanded.is_relative() {
        cwd().join(expanded)
    } else {
        expanded
    }
}

/// Per-user profile directory (`~/.geofilter`)
pub fn profile_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_DOT_FOLDER))
}

/// File inside the profile directory
pub fn profile_path(file_name: &str) -> Option<PathBuf> {
    profile_dir().map(|dir| dir.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path_unchanged() {
        assert_eq!(
            expand_path("  /srv/gis/parcels.sqlite "),
            PathBuf::from("/srv/gis/parcels.sqlite")
        );
    }

    #[test]
    fn test_relative_path_joins_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(expand_path("parcels.sqlite"), cwd.join("parcels.sqlite"));
        assert_eq!(expand_path("../data/roads.gpkg"), cwd.join("../data/roads.gpkg"));
        assert_eq!(expand_path(""), cwd);
    }

    #[test]
    fn test_tilde_expands_to_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_path("~"), home);
        assert_eq!(
            expand_path("~/.geofilter/geofilter.json"),
            home.join(".geofilter/geofilter.json")
        );
    }

    #[test]
    fn test_profile_path() {
        if let Some(path) = profile_path("geofilter.json") {
            assert!(path.ends_with(".geofilter/geofilter.json"));
        }
    }
}
