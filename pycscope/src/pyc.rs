//! The main entry point for loading and rewriting pyc modules.

use std::path::Path;

use crate::{
    file::File,
    marshal::{Walked, Walker},
    rules::Rules,
    Result,
};

/// A loaded pyc module, ready to be walked.
///
/// `Pyc` pairs the immutable input bytes with the rewrite operation. Loading
/// reads (or maps) the whole stream up front; the walk itself performs no I/O.
///
/// # Examples
///
/// ```rust,no_run
/// use pycscope::{Pyc, rules::CpythonRules};
///
/// let pyc = Pyc::from_path(std::path::Path::new("module.pyc"))?;
/// let walked = pyc.rewrite(&CpythonRules::new())?;
/// std::fs::write("restored.pyc", &walked.data)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Pyc {
    file: File,
}

impl Pyc {
    /// Load a pyc module by mapping a file on disk.
    ///
    /// ## Arguments
    /// * 'path' - The file to load
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped,
    /// or [`crate::Error::Empty`] if it holds no data
    pub fn from_path(path: &Path) -> Result<Pyc> {
        Ok(Pyc {
            file: File::from_path(path)?,
        })
    }

    /// Wrap an in-memory pyc buffer.
    ///
    /// ## Arguments
    /// * 'data' - The buffer to consume
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if the buffer holds no data
    pub fn from_mem(data: Vec<u8>) -> Result<Pyc> {
        Ok(Pyc {
            file: File::from_mem(data)?,
        })
    }

    /// The raw input bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.file.data()
    }

    /// The input length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.file.len()
    }

    /// Returns true if the module holds no data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    /// Walk the module once under the given rules and return the rewrite result.
    ///
    /// The input is untouched; [`Walked::data`] holds the substituted (and
    /// possibly trailer-truncated) output to persist.
    ///
    /// # Errors
    /// See [`crate::marshal::Walker::walk`]
    pub fn rewrite<R: Rules + ?Sized>(&self, rules: &R) -> Result<Walked> {
        Walker::new(self.file.data(), rules).walk()
    }
}
