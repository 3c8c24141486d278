//! Collaborators the engine calls out to: fetching source text, rendering
//! Markdown and writing finished output somewhere.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Fetches raw text for a path.
pub trait Loader {
    fn fetch(&self, path: &str) -> Result<String>;
}

impl<F> Loader for F
where
    F: Fn(&str) -> Result<String>,
{
    fn fetch(&self, path: &str) -> Result<String> {
        self(path)
    }
}

/// Reads files from the local filesystem, optionally below a base directory.
#[derive(Debug, Default, Clone)]
pub struct FsLoader {
    root: Option<PathBuf>,
}

impl FsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl Loader for FsLoader {
    fn fetch(&self, path: &str) -> Result<String> {
        let full = match &self.root {
            Some(root) => root.join(path),
            None => PathBuf::from(path),
        };
        std::fs::read_to_string(&full).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(full.display().to_string()),
            _ => Error::Io {
                path: full.display().to_string(),
                source,
            },
        })
    }
}

/// Serves files from memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader(HashMap<String, String>);

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.0.insert(path.into(), contents.into());
    }

    pub fn with(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl Loader for MemoryLoader {
    fn fetch(&self, path: &str) -> Result<String> {
        self.0
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_owned()))
    }
}

/// Turns Markdown source into markup.
pub trait MarkdownRenderer {
    fn render(&self, source: &str) -> String;
}

impl<F> MarkdownRenderer for F
where
    F: Fn(&str) -> String,
{
    fn render(&self, source: &str) -> String {
        self(source)
    }
}

/// CommonMark rendering through the `markdown` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonMark;

impl MarkdownRenderer for CommonMark {
    fn render(&self, source: &str) -> String {
        markdown::to_html(source)
    }
}

/// Destination for rendered output.
pub trait Sink {
    fn insert(&mut self, destination: &str, text: &str) -> Result<()>;
}

/// Keeps inserted text in memory, keyed by destination.
#[derive(Debug, Default, Clone)]
pub struct MemorySink(HashMap<String, String>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, destination: &str) -> Option<&str> {
        self.0.get(destination).map(String::as_str)
    }
}

impl Sink for MemorySink {
    fn insert(&mut self, destination: &str, text: &str) -> Result<()> {
        self.0.insert(destination.to_owned(), text.to_owned());
        Ok(())
    }
}
