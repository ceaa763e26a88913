// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::arena::{IdStringPool, ValueArena};
use crate::errors::ErrorMessageMode;
use crate::output::AnalyzerOutput;
use crate::registry::{ResolvedAstRewrite, Rewriter};
use crate::types::TypeRef;
use crate::utils::sequence::ColumnIdSequence;

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageFeature {
    WithExpression,
    Anonymization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameResolutionMode {
    Default,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterMode {
    Named,
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementContext {
    Default,
    Module,
}

/// Controls the post-install mark-fields-accessed sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldsAccessedMode {
    Clear,
    Legacy,
}

/// Language profile visible to rewriter sub-analyses and the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageOptions {
    pub name_resolution_mode: NameResolutionMode,
    enabled_features: BTreeSet<LanguageFeature>,
}

impl Default for LanguageOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageOptions {
    pub fn new() -> Self {
        Self {
            name_resolution_mode: NameResolutionMode::Default,
            enabled_features: BTreeSet::new(),
        }
    }

    pub fn enable_feature(&mut self, feature: LanguageFeature) {
        self.enabled_features.insert(feature);
    }

    pub fn feature_enabled(&self, feature: LanguageFeature) -> bool {
        self.enabled_features.contains(&feature)
    }
}

/// Hints the validator accepts on statements and function calls. Names are
/// matched case-insensitively; a hint with a qualifier is always allowed
/// (it belongs to some other engine).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedHintsAndOptions {
    allowed_hints: BTreeSet<String>,
}

impl AllowedHintsAndOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hint(&mut self, name: &str) {
        self.allowed_hints.insert(name.to_ascii_lowercase());
    }

    pub fn allows_hint(&self, qualifier: Option<&str>, name: &str) -> bool {
        if qualifier.is_some() {
            return true;
        }
        self.allowed_hints.contains(&name.to_ascii_lowercase())
    }
}

/// Callback invoked once with the analyzer output before any rewriting.
pub type PreRewriteCallback = Arc<dyn Fn(&mut AnalyzerOutput) -> anyhow::Result<()> + Send + Sync>;

/// Configuration for one analysis, immutable to the rewrite driver.
///
/// The driver derives a per-rewrite copy with several settings forced (see
/// `rewrite::analyzer_options_for_rewrite`); the caller's options object is
/// never modified.
#[derive(Clone)]
pub struct AnalyzerOptions {
    pub language: LanguageOptions,
    pub enabled_rewrites: BTreeSet<ResolvedAstRewrite>,
    pub leading_rewriters: Vec<Arc<dyn Rewriter>>,
    pub trailing_rewriters: Vec<Arc<dyn Rewriter>>,
    pub allow_undeclared_parameters: bool,
    pub parameter_mode: ParameterMode,
    pub statement_context: StatementContext,
    pub error_message_mode: ErrorMessageMode,
    pub attach_error_location_payload: bool,
    pub fields_accessed_mode: FieldsAccessedMode,
    pub validate_resolved_ast: bool,
    pub allowed_hints_and_options: AllowedHintsAndOptions,
    /// Bindings for free columns in standalone expressions. Cleared for
    /// rewriter sub-analyses, where they could collide with synthesized
    /// columns.
    pub expression_columns: BTreeMap<String, TypeRef>,
    pub column_id_sequence_number: Option<Arc<ColumnIdSequence>>,
    pub id_string_pool: Option<Arc<IdStringPool>>,
    pub arena: Option<Arc<ValueArena>>,
    pub pre_rewrite_callback: Option<PreRewriteCallback>,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerOptions {
    pub fn new() -> Self {
        Self {
            language: LanguageOptions::new(),
            enabled_rewrites: BTreeSet::new(),
            leading_rewriters: Vec::new(),
            trailing_rewriters: Vec::new(),
            allow_undeclared_parameters: true,
            parameter_mode: ParameterMode::Positional,
            statement_context: StatementContext::Default,
            error_message_mode: ErrorMessageMode::WithPayload,
            attach_error_location_payload: false,
            fields_accessed_mode: FieldsAccessedMode::Clear,
            validate_resolved_ast: true,
            allowed_hints_and_options: AllowedHintsAndOptions::new(),
            expression_columns: BTreeMap::new(),
            column_id_sequence_number: None,
            id_string_pool: None,
            arena: None,
            pre_rewrite_callback: None,
        }
    }

    pub fn enable_rewrite(&mut self, rewrite: ResolvedAstRewrite) {
        self.enabled_rewrites.insert(rewrite);
    }

    /// Enables every built-in rewrite rule.
    pub fn enable_all_rewrites(&mut self) {
        for rewrite in [
            ResolvedAstRewrite::Anonymization,
            ResolvedAstRewrite::WithExpr,
            ResolvedAstRewrite::NullIfErrorFunction,
            ResolvedAstRewrite::TypeofFunction,
        ] {
            self.enabled_rewrites.insert(rewrite);
        }
    }
}

impl fmt::Debug for AnalyzerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerOptions")
            .field("language", &self.language)
            .field("enabled_rewrites", &self.enabled_rewrites)
            .field("leading_rewriters", &self.leading_rewriters.len())
            .field("trailing_rewriters", &self.trailing_rewriters.len())
            .field("parameter_mode", &self.parameter_mode)
            .field("error_message_mode", &self.error_message_mode)
            .field("validate_resolved_ast", &self.validate_resolved_ast)
            .finish_non_exhaustive()
    }
}
