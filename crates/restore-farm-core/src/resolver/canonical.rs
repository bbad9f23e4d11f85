use std::collections::HashSet;

/// The set of destination-relative paths the metadata says should exist.
///
/// Paths are `/`-joined segment strings. Every ancestor of a file is recorded
/// as a directory, so a directory on disk is canonical exactly when the
/// metadata knows it or something below it.
#[derive(Debug, Clone, Default)]
pub struct CanonicalSet {
    files: HashSet<String>,
    dirs: HashSet<String>,
}

impl CanonicalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_files<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for path in paths {
            set.insert_file(path.into());
        }
        set
    }

    pub fn insert_file(&mut self, path: String) {
        self.insert_ancestors(&path);
        self.files.insert(path);
    }

    pub fn insert_dir(&mut self, path: String) {
        if path.is_empty() {
            return;
        }
        self.insert_ancestors(&path);
        self.dirs.insert(path);
    }

    fn insert_ancestors(&mut self, path: &str) {
        let mut end = path.len();
        while let Some(idx) = path[..end].rfind('/') {
            if !self.dirs.insert(path[..idx].to_string()) {
                break;
            }
            end = idx;
        }
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    pub fn contains_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }
}
