//! Path helpers.
//!
//! Metadata graphs key files by their path relative to the working directory,
//! always with `/` separators so reports are identical across platforms.

use std::path::{Path, PathBuf};

use path_clean::PathClean;

/// Resolve `path` against `base` and clean `.` / `..` segments.
pub fn absolutize(base: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf().clean()
    } else {
        base.join(path).clean()
    }
}

/// `path` relative to `base`, `/`-separated.
///
/// Falls back to the cleaned absolute path when no relative form exists
/// (different roots or prefixes on Windows).
pub fn relative_path(base: &Path, path: &Path) -> String {
    let path = absolutize(base, path);
    let relative = pathdiff::diff_paths(&path, base.clean()).unwrap_or(path);
    to_slash(&relative)
}

/// Render a path with `/` separators.
pub fn to_slash(path: &Path) -> String {
    let rendered = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        rendered.into_owned()
    } else {
        rendered.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_inside_base() {
        let base = Path::new("/project");
        assert_eq!(
            relative_path(base, Path::new("/project/src/main.js")),
            "src/main.js"
        );
    }

    #[test]
    fn test_relative_path_outside_base() {
        let base = Path::new("/project/dist/pages");
        assert_eq!(
            relative_path(base, Path::new("/project/dist/assets/a.js")),
            "../assets/a.js"
        );
    }

    #[test]
    fn test_relative_path_accepts_relative_input() {
        let base = Path::new("/project");
        assert_eq!(relative_path(base, Path::new("./src/../lib/a.js")), "lib/a.js");
    }

    #[test]
    fn test_absolutize_cleans() {
        assert_eq!(
            absolutize(Path::new("/project/pages"), "../scripts/a.js"),
            PathBuf::from("/project/scripts/a.js")
        );
    }
}
