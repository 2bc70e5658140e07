use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use common::storage::FilesystemTestCaseStore;
use tracing::debug;

/// The closed set of problem ids intake accepts.
#[derive(Debug, Clone, Default)]
pub struct ProblemCatalogue {
    ids: BTreeSet<String>,
}

impl ProblemCatalogue {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Every subdirectory of `dir` that holds a test case file.
    pub fn discover(dir: impl AsRef<Path>) -> io::Result<Self> {
        let store = FilesystemTestCaseStore::new(dir.as_ref());
        let mut ids = BTreeSet::new();

        for entry in std::fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if store.cases_path(&name).is_some_and(|p| p.is_file()) {
                ids.insert(name);
            }
        }

        debug!(count = ids.len(), dir = %dir.as_ref().display(), "Discovered problems");
        Ok(Self { ids })
    }

    pub fn contains(&self, problem_id: &str) -> bool {
        self.ids.contains(problem_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
