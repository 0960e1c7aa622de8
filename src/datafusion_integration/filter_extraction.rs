// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Translate DataFusion filter expressions into pushdown filters
//!
//! Recognized shapes (column names are the dotted column names, quoted in SQL):
//! - `"metadata.namespace" = 'x'`, `IN (...)` and OR chains of equalities
//! - `json_get_str("metadata.labels", 'key') = 'value'`
//! - `"status.phase" = 'Running'` for supported field selectors

use datafusion::common::ScalarValue;
use datafusion::logical_expr::expr::InList;
use datafusion::logical_expr::{BinaryExpr, Expr, Operator, TableProviderFilterPushDown};
use std::collections::HashSet;

use crate::connector::PushdownFilter;
use crate::kubernetes::ResourceKind;
use crate::kubernetes::field_selectors::{FIELD_SELECTOR_REGISTRY, is_label_key, is_label_value};

pub const NAMESPACE_COLUMN: &str = "metadata.namespace";
pub const LABELS_COLUMN: &str = "metadata.labels";

/// Generic trait for filter types that can be extracted from DataFusion expressions
pub trait FilterValue: Sized {
    /// The value when no filter is found
    fn default() -> Self;

    fn from_single(value: String) -> Self;

    fn from_multiple(values: Vec<String>) -> Self;
}

/// Generic filter extractor for `column = 'x'`, `column IN (...)` and OR chains
pub struct FilterExtractor<'a, F: FilterValue> {
    column_name: &'a str,
    _phantom: std::marker::PhantomData<F>,
}

impl<'a, F: FilterValue> FilterExtractor<'a, F> {
    pub fn new(column_name: &'a str) -> Self {
        Self {
            column_name,
            _phantom: std::marker::PhantomData,
        }
    }

    /// First matching filter among the given expressions
    pub fn extract(&self, filters: &[Expr]) -> F {
        for filter in filters {
            if let Some(result) = self.extract_from_expr(filter) {
                return result;
            }
        }
        F::default()
    }

    fn extract_from_expr(&self, expr: &Expr) -> Option<F> {
        match expr {
            Expr::BinaryExpr(binary) if binary.op == Operator::And => self
                .extract_from_expr(&binary.left)
                .or_else(|| self.extract_from_expr(&binary.right)),
            // DataFusion may rewrite IN lists to OR chains
            Expr::BinaryExpr(binary) if binary.op == Operator::Or => {
                let mut values = Vec::new();
                if self.collect_values_from_or(expr, &mut values) && !values.is_empty() {
                    return Some(Self::from_values(deduplicate(values)));
                }
                None
            }
            Expr::BinaryExpr(binary) if binary.op == Operator::Eq => {
                column_equals_string(binary, self.column_name).map(F::from_single)
            }
            Expr::InList(in_list) if !in_list.negated => {
                let values = self.in_list_values(in_list)?;
                Some(Self::from_values(deduplicate(values)))
            }
            _ => None,
        }
    }

    fn from_values(mut values: Vec<String>) -> F {
        if values.len() == 1 {
            F::from_single(values.remove(0))
        } else {
            F::from_multiple(values)
        }
    }

    /// Values of `column IN ('a', 'b')`, only if every list item is a string literal
    fn in_list_values(&self, in_list: &InList) -> Option<Vec<String>> {
        if !matches!(in_list.expr.as_ref(), Expr::Column(col) if col.name == self.column_name) {
            return None;
        }
        let values: Option<Vec<String>> = in_list.list.iter().map(string_literal).collect();
        values.filter(|v| !v.is_empty())
    }

    /// Returns true if all leaves are `column = 'value'` patterns
    fn collect_values_from_or(&self, expr: &Expr, values: &mut Vec<String>) -> bool {
        match expr {
            Expr::BinaryExpr(binary) if binary.op == Operator::Or => {
                self.collect_values_from_or(&binary.left, values)
                    && self.collect_values_from_or(&binary.right, values)
            }
            Expr::BinaryExpr(binary) if binary.op == Operator::Eq => {
                match column_equals_string(binary, self.column_name) {
                    Some(value) => {
                        values.push(value);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }
}

/// Namespace constraint of one expression
#[derive(Debug, PartialEq, Eq)]
enum NamespaceFilter {
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl FilterValue for NamespaceFilter {
    fn default() -> Self {
        NamespaceFilter::None
    }

    fn from_single(value: String) -> Self {
        NamespaceFilter::Single(value)
    }

    fn from_multiple(values: Vec<String>) -> Self {
        NamespaceFilter::Multiple(values)
    }
}

/// Collect every pushdown filter the expressions contain
///
/// Each expression is one conjunct, as handed to `TableProvider::scan`.
pub fn extract_pushdown_filters(kind: &ResourceKind, filters: &[Expr]) -> Vec<PushdownFilter> {
    let mut pushdown = Vec::new();
    for filter in filters {
        collect(kind, filter, &mut pushdown);
    }
    pushdown
}

fn collect(kind: &ResourceKind, expr: &Expr, out: &mut Vec<PushdownFilter>) {
    if let Expr::BinaryExpr(binary) = expr
        && binary.op == Operator::And
    {
        collect(kind, &binary.left, out);
        collect(kind, &binary.right, out);
        return;
    }

    if kind.namespaced {
        match FilterExtractor::<NamespaceFilter>::new(NAMESPACE_COLUMN)
            .extract(std::slice::from_ref(expr))
        {
            NamespaceFilter::Single(ns) => {
                out.push(PushdownFilter::NamespaceEquals(ns));
                return;
            }
            NamespaceFilter::Multiple(list) => {
                out.push(PushdownFilter::NamespaceIn(list));
                return;
            }
            NamespaceFilter::None => {}
        }
    }

    let Expr::BinaryExpr(binary) = expr else {
        return;
    };
    if binary.op != Operator::Eq {
        return;
    }

    if let Some((key, value)) = label_equals(binary) {
        out.push(PushdownFilter::LabelEquals { key, value });
    } else if let Some((path, value)) = field_equals(kind, binary) {
        out.push(PushdownFilter::FieldEquals { path, value });
    }
}

/// How faithfully a single filter expression is applied by the pushdown
///
/// Exact means the splits already return only matching rows, so the engine
/// may skip re-evaluating it. Label inequality and field selectors stay
/// Inexact: label `!=` also matches objects without the label, and field
/// selector comparisons happen on the server's string rendering.
pub fn classify(
    kind: &ResourceKind,
    expr: &Expr,
    split_by_namespace: bool,
) -> TableProviderFilterPushDown {
    let pushdown = extract_pushdown_filters(kind, std::slice::from_ref(expr));
    let exact = !pushdown.is_empty()
        && conjunct_count(expr) == pushdown.len()
        && pushdown.iter().all(|filter| match filter {
            PushdownFilter::NamespaceEquals(_) => true,
            // A multi-namespace constraint only scopes splits when splitting per namespace
            PushdownFilter::NamespaceIn(_) => split_by_namespace,
            PushdownFilter::LabelEquals { .. } => true,
            PushdownFilter::FieldEquals { .. } => false,
        });

    if exact {
        TableProviderFilterPushDown::Exact
    } else {
        TableProviderFilterPushDown::Inexact
    }
}

fn conjunct_count(expr: &Expr) -> usize {
    match expr {
        Expr::BinaryExpr(binary) if binary.op == Operator::And => {
            conjunct_count(&binary.left) + conjunct_count(&binary.right)
        }
        _ => 1,
    }
}

/// `json_get_str("metadata.labels", 'key') = 'value'`
fn label_equals(binary: &BinaryExpr) -> Option<(String, String)> {
    let (func, value) = match (binary.left.as_ref(), binary.right.as_ref()) {
        (Expr::ScalarFunction(func), other) | (other, Expr::ScalarFunction(func)) => {
            (func, string_literal(other)?)
        }
        _ => return None,
    };

    if func.name() != "json_get_str" || func.args.len() != 2 {
        return None;
    }
    if !matches!(&func.args[0], Expr::Column(col) if col.name == LABELS_COLUMN) {
        return None;
    }
    let key = string_literal(&func.args[1])?;
    // Anything else could change the meaning of the selector string
    if !is_label_key(&key) || !is_label_value(&value) {
        return None;
    }
    Some((key, value))
}

/// `"status.phase" = 'Running'` where the kind supports that field selector
fn field_equals(kind: &ResourceKind, binary: &BinaryExpr) -> Option<(String, String)> {
    let (column, literal) = match (binary.left.as_ref(), binary.right.as_ref()) {
        (Expr::Column(col), Expr::Literal(lit, _)) | (Expr::Literal(lit, _), Expr::Column(col)) => {
            (col, lit)
        }
        _ => return None,
    };

    if !FIELD_SELECTOR_REGISTRY.is_supported(kind, &column.name) {
        return None;
    }

    let value = match literal {
        ScalarValue::Utf8(Some(s)) | ScalarValue::LargeUtf8(Some(s)) | ScalarValue::Utf8View(Some(s)) => s.clone(),
        ScalarValue::Int64(Some(i)) => i.to_string(),
        ScalarValue::Boolean(Some(b)) => b.to_string(),
        _ => return None,
    };
    Some((column.name.clone(), value))
}

/// `column = 'value'` (either side)
fn column_equals_string(binary: &BinaryExpr, column_name: &str) -> Option<String> {
    match (binary.left.as_ref(), binary.right.as_ref()) {
        (Expr::Column(col), other) | (other, Expr::Column(col)) if col.name == column_name => {
            string_literal(other)
        }
        _ => None,
    }
}

fn string_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Literal(ScalarValue::Utf8(Some(s)), _)
        | Expr::Literal(ScalarValue::LargeUtf8(Some(s)), _)
        | Expr::Literal(ScalarValue::Utf8View(Some(s)), _) => Some(s.clone()),
        _ => None,
    }
}

/// Deduplicate a list of strings while preserving order
fn deduplicate(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
