//! # Module Loader
//!
//! Loads the zwift-data TypeScript modules without a TypeScript toolchain.
//!
//! - [`resolve`]: specifier to file resolution (`./types` -> `types.ts`,
//!   directory index files, `node_modules` packages)
//! - [`lexer`] and [`eval`]: a literal evaluator that runs the data-building
//!   subset of a module and returns its export bindings
//! - [`ModuleCache`]: per-run cache keyed by resolved path, so every file is
//!   evaluated at most once and repeated imports see the same bindings
//!
//! JSON modules are parsed directly. Plain `.js` files go through the same
//! evaluator as `.ts` files.

pub mod eval;
pub mod lexer;
pub mod resolve;
pub mod value;

pub use eval::{evaluate_module, ImportHost};
pub use resolve::{absolute_path, normalize_path, ModuleResolver};

use crate::error::{BuildError, Result};
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Export bindings of a loaded module.
pub type Exports = Map<String, Value>;

#[derive(Debug, Clone)]
enum ModuleState {
    /// Registered before the body runs, so cyclic imports terminate
    Loading,
    Loaded(Arc<Exports>),
}

/// Modules loaded during one run, keyed by absolute resolved path.
#[derive(Debug, Default)]
pub struct ModuleCache {
    modules: HashMap<PathBuf, ModuleState>,
}

impl ModuleCache {
    /// Exports of a fully loaded module.
    pub fn get(&self, path: &Path) -> Option<Arc<Exports>> {
        match self.modules.get(path) {
            Some(ModuleState::Loaded(exports)) => Some(Arc::clone(exports)),
            _ => None,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.modules.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Json,
    Script,
}

impl SourceKind {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => SourceKind::Json,
            _ => SourceKind::Script,
        }
    }
}

/// Loads modules through a [`ModuleResolver`] and a [`ModuleCache`].
#[derive(Debug, Default)]
pub struct ModuleLoader {
    resolver: ModuleResolver,
    cache: ModuleCache,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Load the module at `path` (relative paths are taken from the working
    /// directory) and return its exports.
    pub fn load(&mut self, path: &Path) -> Result<Arc<Exports>> {
        let resolved = absolute_path(path)?;
        self.load_resolved(resolved)
    }

    fn load_resolved(&mut self, path: PathBuf) -> Result<Arc<Exports>> {
        match self.cache.modules.get(&path) {
            Some(ModuleState::Loaded(exports)) => return Ok(Arc::clone(exports)),
            Some(ModuleState::Loading) => {
                debug!(
                    "[ModuleLoader] Circular import of {}, bindings not yet available",
                    path.display()
                );
                return Ok(Arc::new(Exports::new()));
            }
            None => {}
        }

        self.cache
            .modules
            .insert(path.clone(), ModuleState::Loading);

        match self.evaluate_file(&path) {
            Ok(exports) => {
                let exports = Arc::new(exports);
                self.cache
                    .modules
                    .insert(path, ModuleState::Loaded(Arc::clone(&exports)));
                Ok(exports)
            }
            Err(e) => {
                self.cache.modules.remove(&path);
                Err(e)
            }
        }
    }

    fn evaluate_file(&mut self, path: &Path) -> Result<Exports> {
        debug!("[ModuleLoader] Loading {}", path.display());
        let source = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;

        match SourceKind::of(path) {
            SourceKind::Json => {
                let value: Value =
                    serde_json::from_str(&source).map_err(|e| BuildError::json(path, e))?;
                let mut exports = match &value {
                    Value::Object(map) => map.clone(),
                    _ => Exports::new(),
                };
                exports.insert("default".to_string(), value);
                Ok(exports)
            }
            SourceKind::Script => {
                let tokens = lexer::tokenize(&source).map_err(|e| BuildError::Syntax {
                    path: path.to_path_buf(),
                    line: e.line,
                    message: e.message,
                })?;
                evaluate_module(path, tokens, self)
            }
        }
    }
}

impl ImportHost for ModuleLoader {
    fn import(&mut self, specifier: &str, from: &Path) -> Result<Arc<Exports>> {
        let resolved = self.resolver.resolve(specifier, from)?;
        self.load_resolved(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, source).unwrap();
        path
    }

    #[test]
    fn test_load_with_relative_imports() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        write(&src, "types.ts", "export interface Route { slug: string }\n");
        write(
            &src,
            "worlds/index.ts",
            "export const worlds = [{ slug: \"watopia\" }];\n",
        );
        let routes = write(
            &src,
            "routes.ts",
            r#"import { Route } from "./types";
import { worlds } from "./worlds";
export const routes: Route[] = [{ slug: "volcano-flat", world: worlds[0].slug }];
"#,
        );

        let mut loader = ModuleLoader::new();
        let exports = loader.load(&routes).unwrap();
        assert_eq!(exports["routes"][0]["world"], json!("watopia"));
        assert_eq!(loader.cache().len(), 3);
    }

    #[test]
    fn test_module_evaluated_once() {
        let tmp = TempDir::new().unwrap();
        let shared = write(tmp.path(), "shared.ts", "export const value = 1;\n");
        write(tmp.path(), "a.ts", "export { value } from \"./shared\";\n");
        let b = write(
            tmp.path(),
            "b.ts",
            "import { value } from \"./shared\";\nexport * from \"./a\";\nexport const copy = value;\n",
        );

        let mut loader = ModuleLoader::new();
        let exports = loader.load(&b).unwrap();
        assert_eq!(exports["value"], json!(1));
        assert_eq!(exports["copy"], json!(1));

        let first = loader.cache().get(&shared).unwrap();
        let again = loader.load(&shared).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_circular_import_terminates() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "a.ts",
            "import { b } from \"./b\";\nexport const a = 1;\nexport const seen = b;\n",
        );
        let b = write(
            tmp.path(),
            "b.ts",
            "import { a } from \"./a\";\nexport const b = 2;\n",
        );

        let mut loader = ModuleLoader::new();
        let exports = loader.load(&tmp.path().join("a.ts")).unwrap();
        assert_eq!(exports["a"], json!(1));
        assert_eq!(exports["seen"], json!(2));
        assert!(loader.cache().get(&b).is_some());
    }

    #[test]
    fn test_json_module() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "meta.json", r#"{"version": 4}"#);
        let index = write(
            tmp.path(),
            "index.ts",
            "import meta from \"./meta.json\";\nexport const version = meta.version;\n",
        );

        let mut loader = ModuleLoader::new();
        let exports = loader.load(&index).unwrap();
        assert_eq!(exports["version"], json!(4));
    }

    #[test]
    fn test_missing_relative_module_fails_on_open() {
        let tmp = TempDir::new().unwrap();
        let index = write(tmp.path(), "index.ts", "import { x } from \"./missing\";\n");

        let mut loader = ModuleLoader::new();
        let err = loader.load(&index).unwrap_err();
        assert!(matches!(err, BuildError::Io { .. }));
        assert!(loader.cache().is_empty());
    }

    #[test]
    fn test_syntax_error_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let index = write(tmp.path(), "index.ts", "export const routes = [\n  { slug: 'a' \n");

        let err = ModuleLoader::new().load(&index).unwrap_err();
        assert!(matches!(err, BuildError::Syntax { .. }));
    }
}
