//! Module specifier resolution.
//!
//! Relative and absolute specifiers follow the extension-less lookup of
//! TypeScript projects: `<base>`, `<base>.ts`, `<base>.js`, then the
//! directory index files. Bare specifiers walk `node_modules` directories
//! upwards from the importing file.

use crate::error::{BuildError, Result};
use log::debug;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Extension of typed source files.
pub const TYPED_SOURCE_EXT: &str = "ts";
/// Extension of plain script files.
pub const PLAIN_SCRIPT_EXT: &str = "js";

const PACKAGE_FILE_EXTS: &[&str] = &[TYPED_SOURCE_EXT, PLAIN_SCRIPT_EXT, "json"];

const NODE_BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "crypto",
    "events",
    "fs",
    "http",
    "https",
    "module",
    "net",
    "os",
    "path",
    "process",
    "stream",
    "url",
    "util",
    "vm",
    "zlib",
];

/// Resolves module specifiers to files on disk.
#[derive(Debug, Clone, Default)]
pub struct ModuleResolver;

impl ModuleResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `specifier` as imported by the file at `from`.
    ///
    /// Relative specifiers always produce a path; whether it exists is
    /// discovered when the file is opened. Bare specifiers must resolve or
    /// the call fails.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf> {
        if specifier.starts_with('.') || specifier.starts_with('/') {
            let dir = from.parent().unwrap_or_else(|| Path::new("/"));
            return Ok(self.resolve_relative(specifier, dir));
        }

        if is_builtin(specifier) {
            return Err(BuildError::UnsupportedBuiltin {
                specifier: specifier.to_string(),
                from: from.to_path_buf(),
            });
        }

        self.resolve_package(specifier, from)
    }

    fn resolve_relative(&self, specifier: &str, dir: &Path) -> PathBuf {
        let base = normalize_path(&dir.join(specifier));
        if base.extension().is_some() {
            return base;
        }

        for ext in [TYPED_SOURCE_EXT, PLAIN_SCRIPT_EXT] {
            let candidate = append_extension(&base, ext);
            if candidate.exists() {
                return candidate;
            }
        }

        if base.is_dir() {
            for ext in [TYPED_SOURCE_EXT, PLAIN_SCRIPT_EXT] {
                let index = base.join(format!("index.{}", ext));
                if index.exists() {
                    return index;
                }
            }
        }

        base
    }

    fn resolve_package(&self, specifier: &str, from: &Path) -> Result<PathBuf> {
        let mut dir = from.parent();
        while let Some(current) = dir {
            let candidate = current.join("node_modules").join(specifier);
            if let Some(found) = load_as_file(&candidate).or_else(|| load_as_directory(&candidate))
            {
                debug!(
                    "[ModuleResolver] '{}' -> {}",
                    specifier,
                    found.display()
                );
                return Ok(normalize_path(&found));
            }
            dir = current.parent();
        }

        Err(BuildError::PackageNotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        })
    }
}

fn is_builtin(specifier: &str) -> bool {
    if specifier.starts_with("node:") {
        return true;
    }
    let root = specifier.split('/').next().unwrap_or(specifier);
    NODE_BUILTINS.contains(&root)
}

fn load_as_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    PACKAGE_FILE_EXTS
        .iter()
        .map(|ext| append_extension(path, ext))
        .find(|candidate| candidate.is_file())
}

fn load_as_directory(path: &Path) -> Option<PathBuf> {
    if !path.is_dir() {
        return None;
    }

    let manifest = path.join("package.json");
    if let Ok(raw) = std::fs::read_to_string(&manifest) {
        if let Ok(package) = serde_json::from_str::<serde_json::Value>(&raw) {
            for field in ["main", "types"] {
                let Some(entry) = package.get(field).and_then(|v| v.as_str()) else {
                    continue;
                };
                let target = normalize_path(&path.join(entry));
                if let Some(found) = load_as_file(&target).or_else(|| load_index(&target)) {
                    return Some(found);
                }
            }
        }
    }

    load_index(path)
}

fn load_index(dir: &Path) -> Option<PathBuf> {
    PACKAGE_FILE_EXTS
        .iter()
        .map(|ext| dir.join(format!("index.{}", ext)))
        .find(|candidate| candidate.is_file())
}

/// `base` with `.ext` appended, keeping any dots already in the file name.
fn append_extension(base: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Lexically remove `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Absolute, normalized form of `path` relative to the process working directory.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| BuildError::io(path, e))?;
    Ok(normalize_path(&absolute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "export {};").unwrap();
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/data/src/../src/./routes.ts")),
            PathBuf::from("/data/src/routes.ts")
        );
    }

    #[test]
    fn test_relative_prefers_typed_source() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("types.ts"));
        touch(&src.join("types.js"));
        let from = src.join("routes.ts");

        let resolved = ModuleResolver::new().resolve("./types", &from).unwrap();
        assert_eq!(resolved, src.join("types.ts"));
    }

    #[test]
    fn test_relative_falls_back_to_plain_script() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("legacy.js"));

        let resolved = ModuleResolver::new()
            .resolve("./legacy", &src.join("routes.ts"))
            .unwrap();
        assert_eq!(resolved, src.join("legacy.js"));
    }

    #[test]
    fn test_relative_directory_index() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("worlds").join("index.ts"));

        let resolved = ModuleResolver::new()
            .resolve("./worlds", &src.join("index.ts"))
            .unwrap();
        assert_eq!(resolved, src.join("worlds").join("index.ts"));
    }

    #[test]
    fn test_explicit_extension_used_as_is() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("src").join("routes.ts");

        let resolved = ModuleResolver::new()
            .resolve("../data/missing.json", &from)
            .unwrap();
        assert_eq!(resolved, tmp.path().join("data").join("missing.json"));
    }

    #[test]
    fn test_missing_relative_returns_bare_path() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("routes.ts");

        let resolved = ModuleResolver::new().resolve("./nowhere", &from).unwrap();
        assert_eq!(resolved, tmp.path().join("nowhere"));
    }

    #[test]
    fn test_package_main_field() {
        let tmp = TempDir::new().unwrap();
        let pkg = tmp.path().join("node_modules").join("world-meta");
        fs::create_dir_all(pkg.join("lib")).unwrap();
        fs::write(pkg.join("package.json"), r#"{"main": "lib/data"}"#).unwrap();
        touch(&pkg.join("lib").join("data.js"));
        let from = tmp.path().join("src").join("worlds.ts");

        let resolved = ModuleResolver::new().resolve("world-meta", &from).unwrap();
        assert_eq!(resolved, pkg.join("lib").join("data.js"));
    }

    #[test]
    fn test_missing_package_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = ModuleResolver::new()
            .resolve("left-pad", &tmp.path().join("routes.ts"))
            .unwrap_err();
        assert!(matches!(err, BuildError::PackageNotFound { .. }));
    }

    #[test]
    fn test_builtin_is_error() {
        let err = ModuleResolver::new()
            .resolve("node:fs", Path::new("/data/src/routes.ts"))
            .unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedBuiltin { .. }));
    }
}
