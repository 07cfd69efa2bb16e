//! Loaded code modules.
//!
//! Each module occupies a rank (1-based; rank 0 means "no module") and owns one constant root.
//! Writes to a constant lower the changed-rank watermark so that the next minor collection only
//! scans ranks at or above it.
use crate::error::ModuleError;
use crate::value::Value;
use libloading::Library;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

pub type ModuleRank = usize;

pub struct ModuleEntry {
    name: String,
    path: PathBuf,
    library: Library,
    constant: Value,
    extra: usize,
}

impl ModuleEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the library was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn constant(&self) -> Value {
        self.constant
    }

    /// Opaque host data attached to the module.
    pub fn extra(&self) -> usize {
        self.extra
    }
}

pub struct ModuleRegistry {
    entries: Vec<Option<ModuleEntry>>,
    max: usize,
    changed_rank: ModuleRank,
}

impl ModuleRegistry {
    pub fn new(max: usize) -> Self {
        Self {
            entries: vec![None],
            max,
            changed_rank: 0,
        }
    }

    /// Lowest rank whose constant changed since the last collection, 0 if none did.
    pub fn changed_rank(&self) -> ModuleRank {
        self.changed_rank
    }

    fn mark_changed(&mut self, rank: ModuleRank) {
        if self.changed_rank == 0 || rank < self.changed_rank {
            self.changed_rank = rank;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, rank: ModuleRank) -> Option<&ModuleEntry> {
        self.entries.get(rank)?.as_ref()
    }

    fn get_mut(&mut self, rank: ModuleRank) -> Result<&mut ModuleEntry, ModuleError> {
        self.entries
            .get_mut(rank)
            .and_then(Option::as_mut)
            .ok_or(ModuleError::NoSuchRank(rank))
    }

    /// Open `name` and register it at `rank`, or at the lowest free rank when `None`.
    ///
    /// A `name` containing a path separator is opened as is. Otherwise every directory of
    /// `search_path` is tried in order, first with the bare name then with the platform's
    /// library file name, and finally the system loader's own search.
    pub fn load(
        &mut self,
        name: &str,
        search_path: &str,
        rank: Option<ModuleRank>,
    ) -> Result<ModuleRank, ModuleError> {
        let rank = self.claim_rank(rank)?;
        let mut last_error = None;
        for candidate in candidates(name, search_path) {
            match unsafe { Library::new(&candidate) } {
                Ok(library) => {
                    tracing::debug!(module = name, rank, path = %candidate.display(), "module loaded");
                    if self.entries.len() <= rank {
                        self.entries.resize_with(rank + 1, || None);
                    }
                    self.entries[rank] = Some(ModuleEntry {
                        name: name.to_owned(),
                        path: candidate,
                        library,
                        constant: Value::NULL,
                        extra: 0,
                    });
                    self.mark_changed(rank);
                    return Ok(rank);
                }
                Err(error) => last_error = Some(error),
            }
        }
        tracing::warn!(module = name, search_path, "module load failed");
        Err(match last_error {
            Some(source) => ModuleError::Load {
                name: name.to_owned(),
                source,
            },
            None => ModuleError::NotFound {
                name: name.to_owned(),
                search_path: search_path.to_owned(),
            },
        })
    }

    fn claim_rank(&self, rank: Option<ModuleRank>) -> Result<ModuleRank, ModuleError> {
        match rank {
            Some(rank) if rank == 0 || rank >= self.max => Err(ModuleError::InvalidRank {
                rank,
                max: self.max,
            }),
            Some(rank) if self.get(rank).is_some() => Err(ModuleError::RankInUse(rank)),
            Some(rank) => Ok(rank),
            None => (1..self.max)
                .find(|&rank| self.get(rank).is_none())
                .ok_or(ModuleError::TableFull(self.max)),
        }
    }

    /// Close the module at `rank`. Its constant stops being a root.
    pub fn unload(&mut self, rank: ModuleRank) -> Result<(), ModuleError> {
        let entry = self
            .entries
            .get_mut(rank)
            .and_then(Option::take)
            .ok_or(ModuleError::NoSuchRank(rank))?;
        tracing::debug!(module = entry.name.as_str(), rank, "module unloaded");
        drop(entry.library);
        Ok(())
    }

    /// Address of `name` in the module at `rank`, or in any loaded module (lowest rank first).
    pub fn symbol(&self, name: &str, rank: Option<ModuleRank>) -> Result<*const c_void, ModuleError> {
        let lookup = |entry: &ModuleEntry| unsafe {
            entry
                .library
                .get::<*const c_void>(name.as_bytes())
                .map(|symbol| *symbol)
        };
        let missing = |source| ModuleError::MissingSymbol {
            name: name.to_owned(),
            source,
        };
        match rank {
            Some(rank) => {
                let entry = self.get(rank).ok_or(ModuleError::NoSuchRank(rank))?;
                lookup(entry).map_err(|error| missing(Some(error)))
            }
            None => self
                .entries
                .iter()
                .flatten()
                .find_map(|entry| lookup(entry).ok())
                .ok_or_else(|| missing(None)),
        }
    }

    pub fn set_constant(&mut self, rank: ModuleRank, value: Value) -> Result<(), ModuleError> {
        self.get_mut(rank)?.constant = value;
        self.mark_changed(rank);
        Ok(())
    }

    pub fn constant(&self, rank: ModuleRank) -> Result<Value, ModuleError> {
        self.get(rank)
            .map(ModuleEntry::constant)
            .ok_or(ModuleError::NoSuchRank(rank))
    }

    pub fn set_extra(&mut self, rank: ModuleRank, extra: usize) -> Result<(), ModuleError> {
        self.get_mut(rank)?.extra = extra;
        Ok(())
    }

    /// Constants of modules at or above the watermark.
    pub(crate) fn walk_changed(&mut self, mut visitor: impl FnMut(&mut Value)) {
        if self.changed_rank == 0 {
            return;
        }
        for entry in self.entries[self.changed_rank..].iter_mut().flatten() {
            visitor(&mut entry.constant);
        }
    }

    pub(crate) fn walk_all(&mut self, mut visitor: impl FnMut(&mut Value)) {
        for entry in self.entries.iter_mut().flatten() {
            visitor(&mut entry.constant);
        }
    }

    pub(crate) fn clear_changed(&mut self) {
        self.changed_rank = 0;
    }
}

fn candidates(name: &str, search_path: &str) -> Vec<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        return vec![PathBuf::from(name)];
    }
    let file_name = libloading::library_filename(name);
    let mut result = Vec::new();
    for dir in std::env::split_paths(search_path) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        result.push(dir.join(name));
        result.push(dir.join(&file_name));
    }
    result.push(PathBuf::from(name));
    result.push(PathBuf::from(file_name));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_follow_search_path() {
        let found = candidates("m", "/a::/b");
        let file_name = libloading::library_filename("m");
        assert_eq!(
            found,
            vec![
                PathBuf::from("/a/m"),
                Path::new("/a").join(&file_name),
                PathBuf::from("/b/m"),
                Path::new("/b").join(&file_name),
                PathBuf::from("m"),
                PathBuf::from(&file_name),
            ]
        );
        assert_eq!(candidates("./x.so", "/a"), vec![PathBuf::from("./x.so")]);
    }

    #[test]
    fn missing_modules_are_reported() {
        let mut registry = ModuleRegistry::new(8);
        let error = registry
            .load("qish-no-such-module", "/nonexistent", None)
            .unwrap_err();
        assert!(matches!(error, ModuleError::Load { .. }));
        assert!(registry.is_empty());
        assert!(matches!(registry.unload(1), Err(ModuleError::NoSuchRank(1))));
        assert!(matches!(
            registry.set_constant(3, Value::tagged(1)),
            Err(ModuleError::NoSuchRank(3))
        ));
        assert!(matches!(
            registry.load("x", "", Some(0)),
            Err(ModuleError::InvalidRank { rank: 0, .. })
        ));
        assert!(matches!(
            registry.load("x", "", Some(8)),
            Err(ModuleError::InvalidRank { rank: 8, .. })
        ));
        assert_eq!(registry.changed_rank(), 0);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn loads_system_libraries() {
        let mut registry = ModuleRegistry::new(8);
        let libc = registry.load("libc.so.6", "", None).unwrap();
        assert_eq!(libc, 1);
        let libm = registry.load("libm.so.6", "", Some(4)).unwrap();
        assert_eq!(libm, 4);
        assert!(matches!(
            registry.load("libm.so.6", "", Some(4)),
            Err(ModuleError::RankInUse(4))
        ));
        assert_eq!(registry.changed_rank(), 1);
        registry.clear_changed();
        registry.set_constant(4, Value::tagged(2)).unwrap();
        assert_eq!(registry.changed_rank(), 4);
        let mut seen = Vec::new();
        registry.walk_changed(|value| seen.push(*value));
        assert_eq!(seen, vec![Value::tagged(2)]);

        assert!(!registry.symbol("malloc", Some(libc)).unwrap().is_null());
        assert!(!registry.symbol("cos", None).unwrap().is_null());
        assert!(matches!(
            registry.symbol("qish_no_such_symbol", None),
            Err(ModuleError::MissingSymbol { .. })
        ));
        registry.unload(libc).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.load("libc.so.6", "", None).unwrap(), 1);
    }
}
