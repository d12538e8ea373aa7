//! **quarry** - deterministic repository interrogator.
//!
//! Indexes a source tree and answers read-only questions about it over a
//! newline-delimited JSON channel: file listing, bounded file reads, BM25
//! search over stable line chunks, language-aware symbol outlines,
//! deterministic reference resolution, and budget-bounded context bundles
//! with citations and ranking explainability.

/// Command-line flag surface for the server binary
pub mod cli;

/// Effective configuration: defaults -> quarry.toml -> startup overrides
pub mod config;

/// Sandbox and policy - every caller path goes through here
pub mod security {
    /// Path normalisation, traversal rejection, symlink containment
    pub mod paths;

    /// Fixed denylist plus size/line limits
    pub mod policy;
}

/// Structured logging sinks
pub mod logging {
    /// Append-only JSONL audit log with argument sanitisation
    pub mod audit;
}

/// Incremental index - discovery, chunking, persistence, search
pub mod index {
    /// Typed records shared across the index
    pub mod models;

    /// Deterministic walk, binary sniff, hash reuse, delta classification
    pub mod discovery;

    /// Overlapping line windows with stable SHA-256 chunk ids
    pub mod chunking;

    /// BM25 scoring with deterministic tie-breaks
    pub mod search;

    /// Atomic on-disk artifacts and refresh orchestration
    pub mod store;
}

/// Language adapters - one AST-backed, six lexical, one fallback
pub mod adapters {
    /// Shared contract: symbol/reference types, validation, sorting
    pub mod base;

    /// Comment/string masker, brace scanner, shared lexical resolver
    pub mod lexical;

    /// Python outlines and references via tree-sitter
    pub mod python;

    /// TypeScript / JavaScript (lexical)
    pub mod ts_js;

    /// Java (lexical)
    pub mod java;

    /// Go (lexical)
    pub mod go;

    /// Rust (lexical)
    pub mod rust;

    /// C / C++ (lexical)
    pub mod cpp;

    /// C# (lexical)
    pub mod csharp;

    /// Accept-everything fallback for content-only files
    pub mod fallback;

    /// First-match-by-path registry with explicit fallback
    pub mod registry;

    /// Default registry construction from config
    pub mod runtime;
}

/// Context bundle engine - retrieval, ranking, budgets, explainability
pub mod bundler {
    /// Bundle result types
    pub mod models;

    /// Deterministic bundle assembly
    pub mod engine;
}

/// Tool handlers and dispatch
pub mod tools {
    /// Named handler registry with typed dispatch errors
    pub mod registry;

    /// The nine built-in repo.* operations
    pub mod builtin;
}

/// JSON-line request dispatcher
pub mod server;

/// Infrastructure helpers
pub mod infra {
    /// Size-aware file reads (mmap over 1 MiB) and line spans
    pub mod io;

    /// Precomputed per-line byte spans (CRLF-aware) for excerpt slicing
    pub mod lines;
}

// Re-exports for embedding and tests
pub use config::{EffectiveConfig, StartupOverrides, load_effective_config};
pub use server::StdioServer;
