//! Extension-keyed registry of file source factories.

use super::{FileSource, WavFileSource};
use std::collections::HashMap;

/// Constructs a fresh, unopened source for one container format.
pub type SourceFactory = fn() -> Box<dyn FileSource>;

/// Maps lower-cased file extensions to source factories.
///
/// Extensions are registered as a `;`-separated list so one format can
/// claim several spellings at once.
pub struct SourceRegistry {
    extensions: HashMap<String, usize>,
    factories: Vec<SourceFactory>,
}

impl SourceRegistry {
    /// An empty registry with no formats.
    pub fn empty() -> Self {
        Self {
            extensions: HashMap::new(),
            factories: Vec::new(),
        }
    }

    /// A registry pre-populated with the built-in sources.
    pub fn with_builtin_sources() -> Self {
        let mut registry = Self::empty();
        registry.register("wav", || Box::new(WavFileSource::new()));
        registry
    }

    /// Register a factory under one or more `;`-separated extensions.
    /// Later registrations win on extension collisions.
    pub fn register(&mut self, extensions: &str, factory: SourceFactory) {
        let index = self.factories.len();
        self.factories.push(factory);
        for ext in extensions.split(';') {
            let ext = ext.trim().trim_start_matches('.').to_lowercase();
            if !ext.is_empty() {
                self.extensions.insert(ext, index);
            }
        }
    }

    /// Whether any factory claims this extension (case-insensitive).
    pub fn is_supported(&self, extension: &str) -> bool {
        self.extensions.contains_key(&extension.to_lowercase())
    }

    /// Create an unopened source for this extension, if registered.
    pub fn create(&self, extension: &str) -> Option<Box<dyn FileSource>> {
        self.extensions
            .get(&extension.to_lowercase())
            .map(|&index| (self.factories[index])())
    }

    /// All registered extensions, unordered.
    pub fn supported_extensions(&self) -> Vec<&str> {
        self.extensions.keys().map(String::as_str).collect()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_builtin_sources()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_wav_registered() {
        let registry = SourceRegistry::with_builtin_sources();
        assert!(registry.is_supported("wav"));
        assert!(registry.is_supported("WAV"));
        assert!(registry.create("wav").is_some());
    }

    #[test]
    fn test_unknown_extension() {
        let registry = SourceRegistry::with_builtin_sources();
        assert!(!registry.is_supported("xyz"));
        assert!(registry.create("xyz").is_none());
    }

    #[test]
    fn test_multi_extension_registration() {
        let mut registry = SourceRegistry::empty();
        registry.register("foo;.BAR; baz", || Box::new(WavFileSource::new()));
        assert!(registry.is_supported("foo"));
        assert!(registry.is_supported("bar"));
        assert!(registry.is_supported("baz"));
        assert_eq!(registry.supported_extensions().len(), 3);
    }

    #[test]
    fn test_later_registration_wins() {
        let mut registry = SourceRegistry::empty();
        registry.register("wav", || Box::new(WavFileSource::new()));
        registry.register("wav", || Box::new(WavFileSource::new()));
        assert!(registry.create("wav").is_some());
        assert_eq!(registry.supported_extensions(), vec!["wav"]);
    }
}
