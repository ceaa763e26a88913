// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The fixed-point rewrite driver. Applies enabled rewriters to a resolved
//! tree until no rewritable construct remains: user-supplied leading
//! rewriters run once, built-in rewriters run in registration order inside
//! a convergence loop bounded by [`MAX_REWRITE_ITERATIONS`], and trailing
//! rewriters run once over the converged tree.

use crate::ast::ResolvedNode;
use crate::catalog::Catalog;
use crate::checker::{
    find_relevant_rewrites, find_relevant_rewrites_for_expr, find_relevant_rewrites_for_statement,
};
use crate::errors::convert_internal_error_location;
use crate::options::{AnalyzerOptions, FieldsAccessedMode, LanguageFeature, NameResolutionMode,
    ParameterMode, StatementContext};
use crate::output::{AnalyzerOutput, AnalyzerOutputMutator};
use crate::registry::{ResolvedAstRewrite, RewriteRegistry, Rewriter};
use crate::types::TypeFactory;
use crate::utils::sequence::ColumnIdSequence;
use crate::utils::timing::monotonic_now;
use crate::validator::{Validator, ValidatorOptions};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use log::debug;

/// Hard cap on convergence-loop sweeps. The value is not meant to be
/// restrictive; it should be raised once enough features are rewrite
/// driven that valid queries approach this many iterations.
// TODO: make the iteration cap an analyzer option.
pub const MAX_REWRITE_ITERATIONS: i64 = 25;

// Escape hatch to disable post-resolution detection of applicable
// rewrites and trust the resolver's set instead. Debug builds still run
// the checker for cross-checking.
static DISABLE_REWRITER_CHECKER: AtomicBool = AtomicBool::new(false);

pub fn set_disable_rewriter_checker(disable: bool) {
    DISABLE_REWRITER_CHECKER.store(disable, Ordering::Relaxed);
}

fn rewriter_checker_disabled() -> bool {
    DISABLE_REWRITER_CHECKER.load(Ordering::Relaxed)
}

/// Rewrites the resolved tree owned by `output` until it reaches a fixed
/// point, then re-validates it and installs it back. This is the only
/// entry point collaborators call; errors are routed through
/// error-location conversion using `sql` for context.
pub fn rewrite_resolved_ast(
    options: &AnalyzerOptions,
    sql: &str,
    catalog: &Catalog,
    type_factory: &TypeFactory,
    output: &mut AnalyzerOutput,
) -> Result<()> {
    if let Some(callback) = &options.pre_rewrite_callback {
        callback(output)?;
    }

    if options.enabled_rewrites.is_empty()
        || (output.resolved_statement().is_none() && output.resolved_expr().is_none())
    {
        return Ok(());
    }

    convert_internal_error_location(
        options.error_message_mode,
        options.attach_error_location_payload,
        sql,
        internal_rewrite_resolved_ast(
            RewriteRegistry::global_instance(),
            options,
            catalog,
            type_factory,
            output,
        ),
    )
}

/// Options bundle handed to rewriters. Most settings are copied from the
/// caller's options; some are overridden as the rewriter implementations
/// require.
fn analyzer_options_for_rewrite(
    analyzer_options: &AnalyzerOptions,
    analyzer_output: &AnalyzerOutput,
    fallback_sequence: &Arc<ColumnIdSequence>,
) -> AnalyzerOptions {
    let mut options = analyzer_options.clone();

    // Rewrite substitution fragments are written in strict name resolution
    // mode so that column names are qualified; an engine's own resolution
    // mode must not leak into rewrite-internal re-analysis.
    options.language.name_resolution_mode = NameResolutionMode::Strict;

    // WITH expressions are available to every rewriter regardless of the
    // user's language profile; this never affects the user-facing query.
    options.language.enable_feature(LanguageFeature::WithExpression);

    // Fragment substitution uses named query parameters internally.
    options.allow_undeclared_parameters = false;
    options.parameter_mode = ParameterMode::Named;
    options.statement_context = StatementContext::Default;

    // Storage pools must match the output being rewritten, overriding any
    // pools previously set on the options.
    options.id_string_pool = Some(analyzer_output.id_string_pool());
    options.arena = Some(analyzer_output.arena());

    // Caller-provided expression columns can collide with columns
    // synthesized in sub-analyses.
    options.expression_columns.clear();

    if analyzer_options.column_id_sequence_number.is_none() {
        // Advance the fallback so the column ids it hands out are unique
        // with respect to the output so far.
        fallback_sequence.advance_past(analyzer_output.max_column_id());
        options.column_id_sequence_number = Some(fallback_sequence.clone());
    }
    options
}

/// Lazily created pipeline state: the per-rewrite options bundle and the
/// tree released from the output. Created on the first rewriter invocation
/// and reused for every later one.
struct RewriteState {
    options_for_rewrite: AnalyzerOptions,
    tree: Option<ResolvedNode>,
}

struct RewriteDriver<'a> {
    registry: &'a RewriteRegistry,
    analyzer_options: &'a AnalyzerOptions,
    catalog: &'a Catalog,
    type_factory: &'a TypeFactory,
    mutator: AnalyzerOutputMutator<'a>,
    fallback_sequence: Arc<ColumnIdSequence>,
    state: Option<RewriteState>,
}

pub(crate) fn internal_rewrite_resolved_ast(
    registry: &RewriteRegistry,
    analyzer_options: &AnalyzerOptions,
    catalog: &Catalog,
    type_factory: &TypeFactory,
    output: &mut AnalyzerOutput,
) -> Result<()> {
    let mut driver = RewriteDriver {
        registry,
        analyzer_options,
        catalog,
        type_factory,
        mutator: AnalyzerOutputMutator::new(output),
        fallback_sequence: Arc::new(ColumnIdSequence::new()),
        state: None,
    };
    let result = driver.run();
    if result.is_err() {
        // A released tree is put back so the output never ends up
        // rootless; nothing is installed (no watermark advance, no
        // validation) on the error path.
        if let Some(tree) = driver.state.take().and_then(|state| state.tree) {
            driver.mutator.restore(tree);
        }
    }
    result
}

impl RewriteDriver<'_> {
    fn run(&mut self) -> Result<()> {
        let rewriter_timer = monotonic_now();

        debug!(
            "enabled rewrites: {}",
            format_rewrites(&self.analyzer_options.enabled_rewrites)
        );

        let resolver_detected = self
            .mutator
            .output()
            .output_properties()
            .relevant_rewrites
            .clone();

        // The resolver's detection seeds the first pass; the checker is
        // authoritative afterwards. If the resolver learns a new trigger
        // the checker does not, rewrites would silently be missed on later
        // passes, so debug builds assert the two agree.
        let mut checker_detected = BTreeSet::new();
        if cfg!(debug_assertions) || !rewriter_checker_disabled() {
            checker_detected = self.detect_on_output()?;
            if cfg!(debug_assertions)
                && !resolver_detected.is_empty()
                && resolver_detected != checker_detected
            {
                bail!(
                    "internal error: resolver and checker disagree on relevant rewrites; resolver: [{}], checker: [{}]",
                    format_rewrites(&resolver_detected),
                    format_rewrites(&checker_detected)
                );
            }
        }
        let detected = if rewriter_checker_disabled() {
            resolver_detected
        } else {
            checker_detected
        };

        let no_user_rewriters = self.analyzer_options.leading_rewriters.is_empty()
            && self.analyzer_options.trailing_rewriters.is_empty();

        if detected.is_empty() && no_user_rewriters {
            // No rewriters required.
            self.mutator
                .mutable_runtime_info()
                .rewriters_timed_value
                .accumulate_since(rewriter_timer);
            return Ok(());
        }

        let mut rewrites_to_apply: BTreeSet<ResolvedAstRewrite> = self
            .analyzer_options
            .enabled_rewrites
            .intersection(&detected)
            .copied()
            .collect();

        if rewrites_to_apply.is_empty() && no_user_rewriters {
            // No _enabled_ rewriters.
            self.mutator
                .mutable_runtime_info()
                .rewriters_timed_value
                .accumulate_since(rewriter_timer);
            return Ok(());
        }

        // Leading user rewriters run exactly once, before convergence.
        let leading = self.analyzer_options.leading_rewriters.clone();
        for rewriter in &leading {
            self.ensure_state()?;
            self.invoke(rewriter.as_ref())?;
        }

        if !rewrites_to_apply.is_empty() {
            let mut iterations: i64 = 0;
            loop {
                iterations += 1;
                if iterations > MAX_REWRITE_ITERATIONS {
                    bail!(
                        "query exceeded configured maximum number of rewriter iterations ({MAX_REWRITE_ITERATIONS}) without converging"
                    );
                }
                let registration_order = self.registry.registration_order().to_vec();
                for rewrite in registration_order {
                    if !rewrites_to_apply.contains(&rewrite) {
                        continue;
                    }
                    self.ensure_state()?;
                    let rewriter = self.registry.get(rewrite).ok_or_else(|| {
                        anyhow!(
                            "internal error: requested rewriter was not present in the registry: {rewrite}"
                        )
                    })?;

                    let rule_timer = monotonic_now();
                    self.mutator
                        .mutable_runtime_info()
                        .rewriters_details(rewrite)
                        .count += 1;
                    debug!("running rewriter {}", rewriter.name());
                    let result = self.invoke(rewriter.as_ref());
                    self.mutator
                        .mutable_runtime_info()
                        .rewriters_details(rewrite)
                        .timed_value
                        .accumulate_since(rule_timer);
                    result?;
                    // Every invocation counts as a meaningful change for
                    // now.
                    // TODO: let rewriters signal a no-op so the apply set
                    //     can be pruned between sweeps.
                }

                rewrites_to_apply = self
                    .analyzer_options
                    .enabled_rewrites
                    .intersection(&self.rescan()?)
                    .copied()
                    .collect();
                // The checker cannot distinguish the anonymization
                // rewriter's output from its input.
                rewrites_to_apply.remove(&ResolvedAstRewrite::Anonymization);
                if rewrites_to_apply.is_empty() {
                    break;
                }
            }
        }

        self.mutator
            .mutable_runtime_info()
            .rewriters_timed_value
            .accumulate_since(rewriter_timer);

        // Trailing user rewriters observe the converged tree, once.
        let trailing = self.analyzer_options.trailing_rewriters.clone();
        for rewriter in &trailing {
            self.ensure_state()?;
            self.invoke(rewriter.as_ref())?;
        }

        if let Some(state) = self.state.take() {
            let tree = state
                .tree
                .ok_or_else(|| anyhow!("internal error: rewrite finished without a tree"))?;
            let sequence = state
                .options_for_rewrite
                .column_id_sequence_number
                .clone()
                .ok_or_else(|| {
                    anyhow!("internal error: rewrite options lost their column id sequence")
                })?;
            self.mutator.update(tree, sequence.last_value())?;

            if state.options_for_rewrite.validate_resolved_ast {
                let validator_timer = monotonic_now();
                let validator = Validator::new(
                    &self.analyzer_options.language,
                    ValidatorOptions {
                        allowed_hints_and_options: self
                            .analyzer_options
                            .allowed_hints_and_options
                            .clone(),
                    },
                );
                let validation = if let Some(statement) = self.mutator.output().resolved_statement()
                {
                    validator.validate_resolved_statement(statement)
                } else if let Some(expr) = self.mutator.output().resolved_expr() {
                    validator.validate_standalone_resolved_expr(expr)
                } else {
                    Err(anyhow!(
                        "internal error: analyzer output lost its resolved node"
                    ))
                };
                self.mutator
                    .mutable_runtime_info()
                    .validator_timed_value
                    .accumulate_since(validator_timer);
                validation?;
            }

            if self.analyzer_options.fields_accessed_mode == FieldsAccessedMode::Legacy {
                // Must be last: it mutates access bookkeeping on the
                // output.
                self.mutator.mark_fields_accessed();
            }
        }

        let output = self.mutator.output();
        if output.resolved_statement().is_none() && output.resolved_expr().is_none() {
            bail!("internal error: analyzer output lost its resolved node");
        }
        Ok(())
    }

    /// Relevance detection over the tree currently owned by the output.
    fn detect_on_output(&self) -> Result<BTreeSet<ResolvedAstRewrite>> {
        let output = self.mutator.output();
        if let Some(statement) = output.resolved_statement() {
            return find_relevant_rewrites_for_statement(statement);
        }
        if let Some(expr) = output.resolved_expr() {
            return find_relevant_rewrites_for_expr(expr);
        }
        bail!("internal error: analyzer output has no resolved node");
    }

    /// Relevance detection after a sweep, over the in-flight tree.
    fn rescan(&self) -> Result<BTreeSet<ResolvedAstRewrite>> {
        if let Some(state) = &self.state {
            if let Some(tree) = &state.tree {
                return find_relevant_rewrites(tree);
            }
        }
        self.detect_on_output()
    }

    fn ensure_state(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let options_for_rewrite = analyzer_options_for_rewrite(
            self.analyzer_options,
            self.mutator.output(),
            &self.fallback_sequence,
        );
        let tree = self.mutator.release_output_node()?;
        self.state = Some(RewriteState {
            options_for_rewrite,
            tree: Some(tree),
        });
        Ok(())
    }

    fn invoke(&mut self, rewriter: &dyn Rewriter) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            bail!("internal error: rewrite state is not initialized");
        };
        let tree = state
            .tree
            .take()
            .ok_or_else(|| anyhow!("internal error: rewrite input tree is missing"))?;
        let new_tree = rewriter.rewrite(
            &state.options_for_rewrite,
            tree,
            self.catalog,
            self.type_factory,
            self.mutator.mutable_output_properties(),
        )?;
        state.tree = Some(new_tree);
        Ok(())
    }
}

fn format_rewrites(rewrites: &BTreeSet<ResolvedAstRewrite>) -> String {
    rewrites
        .iter()
        .map(|r| r.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ResolvedExpr, ResolvedFunctionCall, ResolvedLiteral,
    };
    use crate::output::AnalyzerOutputProperties;
    use crate::value::Value;
    use std::sync::Arc;

    fn int_literal(type_factory: &TypeFactory, n: i64) -> ResolvedExpr {
        ResolvedExpr::Literal(ResolvedLiteral {
            ty: type_factory.int64(),
            value: Value::Int64(n),
            has_explicit_type: false,
        })
    }

    fn nulliferror_expr(catalog: &Catalog, type_factory: &TypeFactory) -> Result<ResolvedExpr> {
        let nulliferror = catalog
            .find_function("nulliferror")
            .ok_or_else(|| anyhow!("missing nulliferror"))?;
        Ok(ResolvedExpr::FunctionCall(ResolvedFunctionCall {
            ty: type_factory.int64(),
            function: nulliferror,
            argument_list: vec![int_literal(type_factory, 1)],
            hint_list: vec![],
        }))
    }

    /// A rewriter whose output still contains its own trigger, so the
    /// convergence loop can never terminate on its own.
    struct NeverConverges;

    impl Rewriter for NeverConverges {
        fn name(&self) -> &str {
            "NeverConverges"
        }

        fn rewrite(
            &self,
            _options: &AnalyzerOptions,
            input: ResolvedNode,
            _catalog: &Catalog,
            _type_factory: &TypeFactory,
            _output_properties: &mut AnalyzerOutputProperties,
        ) -> Result<ResolvedNode> {
            Ok(input)
        }
    }

    #[test]
    fn iteration_cap_produces_resource_exhausted_error() -> Result<()> {
        let catalog = Catalog::builtin();
        let type_factory = TypeFactory::new();
        let mut registry = RewriteRegistry::new();
        registry.register(
            ResolvedAstRewrite::NullIfErrorFunction,
            Arc::new(NeverConverges),
        )?;

        let mut options = AnalyzerOptions::new();
        options.enable_rewrite(ResolvedAstRewrite::NullIfErrorFunction);
        let mut output =
            AnalyzerOutput::from_expr(nulliferror_expr(&catalog, &type_factory)?, 0);

        let result = internal_rewrite_resolved_ast(
            &registry,
            &options,
            &catalog,
            &type_factory,
            &mut output,
        );
        let err = match result {
            Err(err) => err,
            Ok(()) => bail!("a non-converging rewriter must exhaust the iteration limit"),
        };
        assert!(
            err.to_string().contains("25"),
            "error must name the iteration limit: {err}"
        );
        assert_eq!(
            output
                .runtime_info()
                .rewriter_details(ResolvedAstRewrite::NullIfErrorFunction)
                .map(|d| d.count),
            Some(MAX_REWRITE_ITERATIONS as u64),
            "the looping rule runs once per sweep until the cap"
        );
        assert!(
            output.resolved_expr().is_some(),
            "the output keeps its root on the error path"
        );
        Ok(())
    }

    #[test]
    fn options_for_rewrite_overrides_unsafe_settings() {
        let type_factory = TypeFactory::new();
        let mut base = AnalyzerOptions::new();
        base.expression_columns
            .insert("x".to_string(), type_factory.int64());
        let output = AnalyzerOutput::from_expr(int_literal(&type_factory, 1), 100);
        let fallback = Arc::new(ColumnIdSequence::new());

        let options = analyzer_options_for_rewrite(&base, &output, &fallback);
        assert_eq!(
            options.language.name_resolution_mode,
            NameResolutionMode::Strict
        );
        assert!(options
            .language
            .feature_enabled(LanguageFeature::WithExpression));
        assert!(!options.allow_undeclared_parameters);
        assert_eq!(options.parameter_mode, ParameterMode::Named);
        assert!(options.expression_columns.is_empty());
        assert!(options.id_string_pool.is_some());
        assert!(options.arena.is_some());
        assert!(fallback.current() > 100, "fallback must clear the watermark");
    }

    #[test]
    fn options_for_rewrite_keeps_a_caller_sequence() {
        let type_factory = TypeFactory::new();
        let caller_sequence = Arc::new(ColumnIdSequence::new());
        let mut base = AnalyzerOptions::new();
        base.column_id_sequence_number = Some(caller_sequence.clone());
        let output = AnalyzerOutput::from_expr(int_literal(&type_factory, 1), 100);
        let fallback = Arc::new(ColumnIdSequence::new());

        let options = analyzer_options_for_rewrite(&base, &output, &fallback);
        let kept = options
            .column_id_sequence_number
            .as_ref()
            .map(|sequence| Arc::ptr_eq(sequence, &caller_sequence));
        assert_eq!(kept, Some(true), "a caller-owned sequence is reused as-is");
        assert_eq!(
            fallback.current(),
            1,
            "the fallback stays untouched when the caller owns a sequence"
        );
    }

    struct CountingRewriter {
        invocations: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Rewriter for CountingRewriter {
        fn name(&self) -> &str {
            "CountingRewriter"
        }

        fn rewrite(
            &self,
            _options: &AnalyzerOptions,
            input: ResolvedNode,
            _catalog: &Catalog,
            _type_factory: &TypeFactory,
            _output_properties: &mut AnalyzerOutputProperties,
        ) -> Result<ResolvedNode> {
            self.invocations
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(input)
        }
    }

    #[test]
    fn leading_and_trailing_rewriters_run_once_each() -> Result<()> {
        let catalog = Catalog::builtin();
        let type_factory = TypeFactory::new();
        let registry = RewriteRegistry::new();

        let invocations = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut options = AnalyzerOptions::new();
        options.enable_rewrite(ResolvedAstRewrite::NullIfErrorFunction);
        options.leading_rewriters.push(Arc::new(CountingRewriter {
            invocations: invocations.clone(),
        }));
        options.trailing_rewriters.push(Arc::new(CountingRewriter {
            invocations: invocations.clone(),
        }));

        // No built-in rule fires: the tree is a bare literal.
        let mut output = AnalyzerOutput::from_expr(int_literal(&type_factory, 1), 0);
        internal_rewrite_resolved_ast(&registry, &options, &catalog, &type_factory, &mut output)?;
        assert_eq!(
            invocations.load(std::sync::atomic::Ordering::Relaxed),
            2,
            "user rewriters run once each even when no built-in fires"
        );
        Ok(())
    }

    #[cfg(debug_assertions)]
    #[test]
    fn resolver_checker_disagreement_is_fatal_in_debug_builds() -> Result<()> {
        let catalog = Catalog::builtin();
        let type_factory = TypeFactory::new();
        let registry = RewriteRegistry::new();

        let mut options = AnalyzerOptions::new();
        options.enable_rewrite(ResolvedAstRewrite::NullIfErrorFunction);
        // The tree triggers nothing, but the resolver claims it does.
        let mut output = AnalyzerOutput::from_expr(int_literal(&type_factory, 1), 0);
        output
            .mutable_output_properties()
            .relevant_rewrites
            .insert(ResolvedAstRewrite::TypeofFunction);

        let result = internal_rewrite_resolved_ast(
            &registry,
            &options,
            &catalog,
            &type_factory,
            &mut output,
        );
        let err = match result {
            Err(err) => err,
            Ok(()) => bail!("a resolver/checker mismatch must fail in debug builds"),
        };
        assert!(err.to_string().contains("disagree"), "unexpected error: {err}");
        Ok(())
    }
}
