//! Backend loader configuration.
//!
//! Controls where backend libraries are searched for, which file names are tried,
//! and whether the reference host backends may stand in for missing device
//! libraries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Directories searched before the platform loader path.
pub const LIBRARY_PATH_ENV: &str = "GPUSOLVER_LIBRARY_PATH";
/// `1`/`true` enables the host backends after the device libraries.
pub const HOST_FALLBACK_ENV: &str = "GPUSOLVER_HOST_FALLBACK";
/// Comma-separated backend names that are treated as absent.
pub const DISABLE_ENV: &str = "GPUSOLVER_DISABLE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Override directories, searched in order before the bare library names.
    pub search_paths: Vec<PathBuf>,
    /// Library file names tried for the dense backend.
    pub dense_candidates: Vec<String>,
    /// Library file names tried for the sparse backend.
    pub sparse_candidates: Vec<String>,
    /// Try device libraries at all (false for host-only configurations).
    pub device_libraries: bool,
    /// Fall back to the host backends when no device library binds.
    pub host_fallback: bool,
    /// Backends forced to the unavailable state.
    pub disabled: Vec<BackendKind>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            dense_candidates: vec![
                "librocsolver.so.0".to_string(),
                "librocsolver.so".to_string(),
                "rocsolver.dll".to_string(),
            ],
            sparse_candidates: vec![
                "librocsparse.so.1".to_string(),
                "librocsparse.so".to_string(),
                "rocsparse.dll".to_string(),
            ],
            device_libraries: true,
            host_fallback: false,
            disabled: Vec::new(),
        }
    }
}

impl LoaderConfig {
    /// Default configuration adjusted by the `GPUSOLVER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(LIBRARY_PATH_ENV) {
            config.search_paths = parse_search_path(&raw);
        }
        if let Ok(raw) = std::env::var(HOST_FALLBACK_ENV) {
            config.host_fallback = parse_flag(&raw);
        }
        if let Ok(raw) = std::env::var(DISABLE_ENV) {
            config.disabled = parse_backend_list(&raw);
        }
        config
    }

    /// Only the host backends; no device library is opened.
    pub fn host_only() -> Self {
        Self {
            device_libraries: false,
            host_fallback: true,
            ..Self::default()
        }
    }

    pub fn with_disabled(mut self, kind: BackendKind) -> Self {
        if !self.disabled.contains(&kind) {
            self.disabled.push(kind);
        }
        self
    }

    pub fn is_disabled(&self, kind: BackendKind) -> bool {
        self.disabled.contains(&kind)
    }

    pub fn candidates(&self, kind: BackendKind) -> &[String] {
        match kind {
            BackendKind::Dense => &self.dense_candidates,
            BackendKind::Sparse => &self.sparse_candidates,
        }
    }

    /// Expands the candidate names into the paths handed to the loader: every
    /// override directory joined with every name, then the bare names.
    pub fn candidate_paths(&self, kind: BackendKind) -> Vec<PathBuf> {
        let names = self.candidates(kind);
        let mut paths = Vec::with_capacity(names.len() * (self.search_paths.len() + 1));
        for dir in &self.search_paths {
            for name in names {
                paths.push(dir.join(name));
            }
        }
        paths.extend(names.iter().map(PathBuf::from));
        paths
    }
}

fn parse_search_path(raw: &str) -> Vec<PathBuf> {
    raw.split([':', ';'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_backend_list(raw: &str) -> Vec<BackendKind> {
    let mut kinds = Vec::new();
    for part in raw.split(',') {
        if let Some(kind) = BackendKind::from_name(part.trim())
            && !kinds.contains(&kind)
        {
            kinds.push(kind);
        }
    }
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_device_libraries_only() {
        let config = LoaderConfig::default();
        assert!(config.device_libraries);
        assert!(!config.host_fallback);
        assert!(config.disabled.is_empty());
        assert_eq!(config.dense_candidates[0], "librocsolver.so.0");
    }

    #[test]
    fn host_only_preset() {
        let config = LoaderConfig::host_only();
        assert!(!config.device_libraries);
        assert!(config.host_fallback);
    }

    #[test]
    fn override_directories_come_first() {
        let config = LoaderConfig {
            search_paths: vec![PathBuf::from("/opt/rocm/lib")],
            sparse_candidates: vec!["librocsparse.so".to_string()],
            ..LoaderConfig::default()
        };
        let paths = config.candidate_paths(BackendKind::Sparse);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/opt/rocm/lib/librocsparse.so"),
                PathBuf::from("librocsparse.so"),
            ]
        );
    }

    #[test]
    fn parses_environment_values() {
        assert_eq!(
            parse_search_path("/a:/b;;/c "),
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
        assert_eq!(
            parse_backend_list("sparse, bogus,sparse,dense"),
            vec![BackendKind::Sparse, BackendKind::Dense]
        );
    }

    #[test]
    fn config_serializes_to_json() {
        let config = LoaderConfig::host_only().with_disabled(BackendKind::Sparse);
        let json = serde_json::to_string(&config).expect("serialize");
        let back: LoaderConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
        assert!(json.contains("\"sparse\""));
    }
}
