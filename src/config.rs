use std::path::PathBuf;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
/// Configuration consumed by the core.
pub struct TesseraConfig {
    /// Directory containing the source images.
    pub base_dir: PathBuf,
    /// Directory receiving derived cache files.
    pub cache_dir: PathBuf,
    /// Default allow pattern for filename visibility; empty = unrestricted.
    pub allowed_paths: String,
    /// View distance in chunks, determining the neighborhood level.
    pub view_distance: u32,
    /// Whether animated sources render all steps or just the first.
    pub animate: bool,
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("images"),
            cache_dir: PathBuf::from("cache"),
            allowed_paths: String::new(),
            view_distance: 10,
            animate: true,
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
