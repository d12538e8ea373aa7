//! Filepath: src/cli.rs
//! Server startup flags.

use std::path::PathBuf;

use clap::Parser;

use crate::config::StartupOverrides;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(
    about = "Deterministic repository interrogator over a JSON-line channel: \
             index, search, outline, references, and context bundles"
)]
#[command(version, long_about = None)]
pub struct Cli {
    /// Repository root to interrogate
    #[arg(long, default_value = ".")]
    pub repo_root: PathBuf,

    /// Data directory for the index and audit log (default: <repo>/.quarry)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Maximum readable file size in bytes
    #[arg(long)]
    pub max_file_bytes: Option<u64>,

    /// Maximum line span one open_file request may return
    #[arg(long)]
    pub max_open_lines: Option<usize>,

    /// Maximum serialized response size in bytes
    #[arg(long)]
    pub max_total_bytes_per_response: Option<usize>,

    /// Maximum search hits per request
    #[arg(long)]
    pub max_search_hits: Option<usize>,

    /// Maximum symbol references per request
    #[arg(long)]
    pub max_references: Option<usize>,

    /// Enable or disable the Python AST adapter
    #[arg(long, value_parser = clap::value_parser!(bool))]
    pub python_adapter_enabled: Option<bool>,
}

impl Cli {
    /// Convert the flag surface into config startup overrides.
    pub fn overrides(&self) -> StartupOverrides {
        StartupOverrides {
            data_dir: self.data_dir.clone(),
            max_file_bytes: self.max_file_bytes,
            max_open_lines: self.max_open_lines,
            max_total_bytes_per_response: self.max_total_bytes_per_response,
            max_search_hits: self.max_search_hits,
            max_references: self.max_references,
            python_enabled: self.python_adapter_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_overrides() {
        let cli = Cli::parse_from([
            "quarry",
            "--repo-root",
            "/tmp/repo",
            "--max-search-hits",
            "25",
            "--python-adapter-enabled",
            "false",
        ]);
        assert_eq!(cli.repo_root, PathBuf::from("/tmp/repo"));
        let overrides = cli.overrides();
        assert_eq!(overrides.max_search_hits, Some(25));
        assert_eq!(overrides.python_enabled, Some(false));
        assert_eq!(overrides.max_open_lines, None);
    }
}
