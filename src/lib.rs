// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Unsafe code should not be used.
// Hard to reason about correctness, and maintainability.
#![forbid(unsafe_code)]
// Ensure that all lint names are valid.
#![deny(unknown_lints)]
// Fail-fast lints: correctness, safety, and API surface
#![deny(
    // Panic sources - catch all ways code can panic
    clippy::panic, // forbid explicit panic! macro
    clippy::unreachable, // catches unreachable! macro usage
    clippy::todo, // blocks remaining todo! placeholders
    clippy::unimplemented, // blocks unimplemented! placeholders
    clippy::unwrap_used, // reject Result/Option unwraps
    clippy::expect_used, // reject expect with panic messages

    // Rust warnings/upstream
    dead_code, // ban unused items
    deprecated, // prevent use of deprecated APIs
    future_incompatible, // catch patterns slated to break
    keyword_idents, // disallow identifiers that are keywords
    missing_debug_implementations, // require Debug on public types
    non_ascii_idents, // disallow non-ASCII identifiers
    nonstandard_style, // enforce idiomatic naming/style
    noop_method_call, // catch no-op method calls
    trivial_casts, // block needless casts
    unreachable_code, // catch dead/unreachable code
    unreachable_patterns, // catch unreachable match arms
    unused_extern_crates, // remove unused extern crate declarations
    unused_import_braces, // avoid unused braces in imports

    // API correctness / style
    clippy::semicolon_if_nothing_returned, // enforce trailing semicolon for unit
    clippy::unused_self, // remove unused self parameters
    clippy::dbg_macro, // forbid dbg! in production code
)]
// Advisory lints: useful, but not fatal
#![warn(
    clippy::match_like_matches_macro, // prefer matches! macro over verbose match
    clippy::needless_continue, // remove redundant continue statements
)]
// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod arena;
pub mod ast;
pub mod catalog;
pub mod checker;
pub mod errors;
pub mod options;
pub mod output;
pub mod registry;
pub mod rewrite;
pub mod rewriters;
pub mod types;
pub mod utils;
pub mod validator;
pub mod value;

pub use checker::find_relevant_rewrites;
pub use errors::{ErrorLocation, ErrorMessageMode};
pub use options::AnalyzerOptions;
pub use output::{AnalyzerOutput, AnalyzerOutputProperties, AnalyzerRuntimeInfo};
pub use registry::{ResolvedAstRewrite, RewriteRegistry, Rewriter};
pub use rewrite::{rewrite_resolved_ast, set_disable_rewriter_checker, MAX_REWRITE_ITERATIONS};
pub use validator::Validator;
pub use value::Value;
