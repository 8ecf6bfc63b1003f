//! Process-wide registry of compiled provider programs.
//!
//! Readers take an `Arc` snapshot of the whole map; reload builds a new map
//! and swaps the pointer in one store. A request either sees the pre-swap or
//! post-swap snapshot, never a partial one.

use super::types::ProviderFile;
use super::validate::{validate_provider_file, validate_providers_dir, ValidationWarning};
use onr_types::ProviderError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

pub type Snapshot = Arc<HashMap<String, Arc<ProviderFile>>>;

/// Outcome of a directory (re)load.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Successfully loaded provider names, sorted.
    pub loaded: Vec<String>,
    /// File names skipped as invalid (lenient reload only), sorted.
    pub skipped: Vec<String>,
    /// Non-fatal diagnostics (deprecated directives).
    pub warnings: Vec<ValidationWarning>,
}

pub struct Registry {
    inner: RwLock<Snapshot>,
}

impl Registry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Arc::new(HashMap::new())) }
    }

    /// Current snapshot. Cheap; holds the read lock only for the clone.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderFile>> {
        let key = name.trim().to_lowercase();
        self.snapshot().get(&key).cloned()
    }

    pub fn list_provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    fn publish(&self, map: HashMap<String, Arc<ProviderFile>>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(map);
    }

    /// Strict boot-time load: any malformed file aborts, nothing is
    /// published on error.
    pub fn load_from_dir_strict(&self, dir: &str) -> Result<LoadResult, ProviderError> {
        let (files, warnings) = validate_providers_dir(dir)?;
        let mut map = HashMap::with_capacity(files.len());
        let mut loaded = Vec::with_capacity(files.len());
        for pf in files {
            loaded.push(pf.name.clone());
            map.insert(pf.name.clone(), Arc::new(pf));
        }
        loaded.sort();
        self.publish(map);
        Ok(LoadResult { loaded, skipped: Vec::new(), warnings })
    }

    /// Lenient runtime reload: invalid files are skipped and reported; the
    /// new snapshot contains exactly the files that validated. Directory
    /// read errors leave the previous snapshot in force.
    pub fn reload_from_dir(&self, dir: &str) -> Result<LoadResult, ProviderError> {
        let d = dir.trim();
        let entries = std::fs::read_dir(d).map_err(|e| ProviderError::Invalid {
            file: d.to_string(),
            message: format!("read providers dir: {e}"),
        })?;

        let mut paths: Vec<String> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() || path.extension().and_then(|e| e.to_str()) != Some("conf") {
                continue;
            }
            paths.push(path.to_string_lossy().into_owned());
        }
        paths.sort();

        let mut map = HashMap::new();
        let mut result = LoadResult::default();
        for path in paths {
            match validate_provider_file(&path) {
                Ok(pf) => {
                    if map.contains_key(&pf.name) {
                        tracing::warn!(
                            file = %path,
                            provider = %pf.name,
                            "duplicate provider name, skipping file"
                        );
                        result.skipped.push(file_name_of(&path));
                        continue;
                    }
                    result.loaded.push(pf.name.clone());
                    result
                        .warnings
                        .extend(super::validate::collect_deprecated_directive_warnings(
                            &path,
                            &pf.content,
                        ));
                    map.insert(pf.name.clone(), Arc::new(pf));
                }
                Err(err) => {
                    tracing::warn!(file = %path, error = %err, "invalid provider file, skipping");
                    result.skipped.push(file_name_of(&path));
                }
            }
        }
        result.loaded.sort();
        result.skipped.sort();
        self.publish(map);
        Ok(result)
    }

    /// Fingerprints (path + content) by provider name, for reload diffing.
    pub fn fingerprints(&self) -> HashMap<String, String> {
        self.snapshot()
            .iter()
            .map(|(name, pf)| (name.clone(), format!("{}\u{0}{}", pf.path.trim(), pf.content)))
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider names whose fingerprint changed between two snapshots, sorted.
pub fn diff_changed_providers(
    before: &HashMap<String, String>,
    after: &HashMap<String, String>,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (name, prev) in before {
        if after.get(name) != Some(prev) {
            changed.push(name.clone());
        }
    }
    for name in after.keys() {
        if !before.contains_key(name) {
            changed.push(name.clone());
        }
    }
    changed.sort();
    changed.dedup();
    changed
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn conf(name: &str) -> String {
        format!(
            "syntax \"next-router/0.1\";\nprovider \"{name}\" {{\n  defaults {{\n    upstream_config {{ base_url = \"https://api.example.com\"; }}\n  }}\n}}\n"
        )
    }

    fn write_file(dir: &std::path::Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_strict_load_aborts_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.conf", &conf("a"));
        write_file(dir.path(), "b.conf", "syntax \"next-router/0.1\"; provider \"b\" {");

        let reg = Registry::new();
        assert!(reg.load_from_dir_strict(&dir.path().to_string_lossy()).is_err());
        assert!(reg.list_provider_names().is_empty());
    }

    #[test]
    fn test_lenient_reload_skips_invalid_and_keeps_valid() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.conf", &conf("a"));
        write_file(dir.path(), "b.conf", "not a dsl file at all");

        let reg = Registry::new();
        let res = reg.reload_from_dir(&dir.path().to_string_lossy()).unwrap();
        assert_eq!(res.loaded, vec!["a".to_string()]);
        assert_eq!(res.skipped, vec!["b.conf".to_string()]);
        assert_eq!(reg.list_provider_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_snapshot_survives_failed_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.conf", &conf("a"));

        let reg = Registry::new();
        reg.load_from_dir_strict(&dir.path().to_string_lossy()).unwrap();
        let snap = reg.snapshot();

        assert!(reg.reload_from_dir("/nonexistent/providers-dir").is_err());
        assert_eq!(reg.list_provider_names(), vec!["a".to_string()]);
        // in-flight readers keep using their snapshot regardless
        assert!(snap.contains_key("a"));
    }

    #[test]
    fn test_diff_changed_providers() {
        let mut before = HashMap::new();
        before.insert("a".to_string(), "p\u{0}1".to_string());
        before.insert("b".to_string(), "p\u{0}2".to_string());
        let mut after = HashMap::new();
        after.insert("a".to_string(), "p\u{0}1-new".to_string());
        after.insert("c".to_string(), "p\u{0}3".to_string());

        assert_eq!(
            diff_changed_providers(&before, &after),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
