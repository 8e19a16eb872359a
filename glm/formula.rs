//! # R-style Formula Encoding
//!
//! Turns `response ~ terms` into a numeric design matrix and label vector.
//!
//! - Numeric and boolean columns become one feature each, named after the column.
//! - String columns become one-hot indicators over their ordered levels with the last
//!   level dropped as the reference, named `column_level`.
//! - `a:b` multiplies the encodings of `a` and `b`; names are joined with `:`.
//! - `.` expands to every column except the response and any excluded columns.
//! - `- 1`, `+ 0` and a leading `0 +` remove the intercept; `- term` removes a term.
//!
//! The fitted [`RFormulaModel`] remembers the categorical levels and, when the label
//! is indexed, the ordered label set so a later stage can map indices back to labels.

use crate::frame::{self, FrameError};
use crate::stages::StageError;
use ndarray::{Array1, Array2, Axis, s};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormulaError {
    #[error("Could not parse formula '{formula}': {reason}")]
    Parse { formula: String, reason: String },
    #[error("The formula references column '{0}', which is not in the dataset.")]
    ColumnNotFound(String),
    #[error("Column '{column}' has type {found}, which cannot be encoded as a model term.")]
    UnsupportedType { column: String, found: String },
    #[error("The label must have exactly {expected} distinct values for this family, found {found}.")]
    LabelLevels { expected: usize, found: usize },
    #[error("Failed to read a formula column: {0}")]
    Frame(#[from] FrameError),
    #[error("Failed to encode the training data: {0}")]
    Encoding(#[from] StageError),
}

/// How string levels are ordered before indexing. Frequency ties break alphabetically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StringOrderType {
    #[default]
    FrequencyDesc,
    FrequencyAsc,
    AlphabetDesc,
    AlphabetAsc,
}

impl FromStr for StringOrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "frequencydesc" => Ok(StringOrderType::FrequencyDesc),
            "frequencyasc" => Ok(StringOrderType::FrequencyAsc),
            "alphabetdesc" => Ok(StringOrderType::AlphabetDesc),
            "alphabetasc" => Ok(StringOrderType::AlphabetAsc),
            _ => Err(format!(
                "Unknown string order type: {s}. Expected frequencyDesc, frequencyAsc, alphabetDesc or alphabetAsc"
            )),
        }
    }
}

/// Orders the distinct values of `values` according to `order`.
pub fn order_levels<'a, I>(values: I, order: StringOrderType) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mut levels: Vec<(&str, usize)> = counts.into_iter().collect();
    match order {
        StringOrderType::FrequencyDesc => {
            levels.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
        }
        StringOrderType::FrequencyAsc => {
            levels.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        }
        StringOrderType::AlphabetDesc => levels.sort_by(|a, b| b.0.cmp(a.0)),
        StringOrderType::AlphabetAsc => levels.sort_by(|a, b| a.0.cmp(b.0)),
    }
    levels.into_iter().map(|(level, _)| level.to_string()).collect()
}

/// A single right-hand-side term: one column, or an interaction of several.
pub type Term = Vec<String>;

/// Result of parsing a formula, before it is resolved against a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormula {
    pub response: String,
    /// Terms in written order; `None` marks the position of a `.`.
    pub terms: Vec<Option<Term>>,
    pub removed: Vec<Term>,
    pub has_intercept: bool,
}

/// Split the right-hand side on top-level `+` and `-`, keeping the sign of each piece.
fn split_signed_terms(rhs: &str) -> Vec<(bool, String)> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut positive = true;
    for c in rhs.chars() {
        match c {
            '+' | '-' => {
                let term = current.trim().to_string();
                if !term.is_empty() {
                    terms.push((positive, term));
                }
                current.clear();
                positive = c == '+';
            }
            _ => current.push(c),
        }
    }
    let term = current.trim().to_string();
    if !term.is_empty() {
        terms.push((positive, term));
    }
    terms
}

pub fn parse_formula(formula: &str) -> Result<ParsedFormula, FormulaError> {
    let parse_error = |reason: &str| FormulaError::Parse {
        formula: formula.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = formula.split('~').collect();
    if parts.len() != 2 {
        return Err(parse_error("formula must contain exactly one '~'"));
    }
    let response = parts[0].trim().to_string();
    if response.is_empty() {
        return Err(parse_error("missing response on the left of '~'"));
    }

    let mut parsed = ParsedFormula {
        response,
        terms: Vec::new(),
        removed: Vec::new(),
        has_intercept: true,
    };

    for (positive, token) in split_signed_terms(parts[1]) {
        match (positive, token.as_str()) {
            (true, "1") => parsed.has_intercept = true,
            (true, "0") | (false, "1") => parsed.has_intercept = false,
            (false, "0") => parsed.has_intercept = true,
            (true, ".") => parsed.terms.push(None),
            (false, ".") => return Err(parse_error("'- .' is not supported")),
            (_, token) => {
                let factors: Term = token.split(':').map(|f| f.trim().to_string()).collect();
                if factors.iter().any(|f| f.is_empty()) {
                    return Err(parse_error("empty factor in interaction term"));
                }
                if positive {
                    parsed.terms.push(Some(factors));
                } else {
                    parsed.removed.push(factors);
                }
            }
        }
    }

    if parsed.terms.is_empty() && !parsed.has_intercept {
        return Err(parse_error("formula has no terms and no intercept"));
    }
    Ok(parsed)
}

/// How one referenced column is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ColumnEncoding {
    Numeric,
    /// All observed levels in index order; the last one is the dropped reference.
    Categorical { levels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedColumn {
    pub name: String,
    pub encoding: ColumnEncoding,
}

/// The unfitted formula encoder.
#[derive(Debug, Clone)]
pub struct RFormula {
    formula: String,
    force_index_label: bool,
    string_order: StringOrderType,
    features_col: String,
    label_col: String,
}

impl RFormula {
    pub fn new(formula: &str) -> Self {
        Self {
            formula: formula.to_string(),
            force_index_label: false,
            string_order: StringOrderType::default(),
            features_col: "features".to_string(),
            label_col: "label".to_string(),
        }
    }

    /// Index the label into an ordered label set even when it is numeric.
    pub fn with_force_index_label(mut self, force: bool) -> Self {
        self.force_index_label = force;
        self
    }

    pub fn with_string_order(mut self, order: StringOrderType) -> Self {
        self.string_order = order;
        self
    }

    pub fn with_features_col(mut self, name: &str) -> Self {
        self.features_col = name.to_string();
        self
    }

    pub fn with_label_col(mut self, name: &str) -> Self {
        self.label_col = name.to_string();
        self
    }

    pub fn features_col(&self) -> &str {
        &self.features_col
    }

    pub fn label_col(&self) -> &str {
        &self.label_col
    }

    /// Resolves the formula against `df` and learns the encodings.
    ///
    /// `excluded` columns never take part in `.` expansion (weights, offsets).
    pub fn fit(&self, df: &DataFrame, excluded: &[&str]) -> Result<RFormulaModel, FormulaError> {
        let parsed = parse_formula(&self.formula)?;
        if !frame::has_column(df, &parsed.response) {
            return Err(FormulaError::ColumnNotFound(parsed.response.clone()));
        }

        let mut terms: Vec<Term> = Vec::new();
        for term in &parsed.terms {
            match term {
                Some(factors) => terms.push(factors.clone()),
                None => terms.extend(
                    df.get_column_names()
                        .iter()
                        .map(|name| name.to_string())
                        .filter(|name| *name != parsed.response)
                        .filter(|name| !excluded.contains(&name.as_str()))
                        .map(|name| vec![name]),
                ),
            }
        }
        terms.retain(|term| !parsed.removed.contains(term));
        let mut unique: Vec<Term> = Vec::with_capacity(terms.len());
        for term in terms {
            if !unique.contains(&term) {
                unique.push(term);
            }
        }
        let terms = unique;

        let mut columns: Vec<EncodedColumn> = Vec::new();
        for name in terms.iter().flatten() {
            if columns.iter().any(|c| &c.name == name) {
                continue;
            }
            let encoding = self.learn_encoding(df, name)?;
            columns.push(EncodedColumn {
                name: name.clone(),
                encoding,
            });
        }

        let labels = self.learn_labels(df, &parsed.response)?;

        let mut model = RFormulaModel {
            formula: self.formula.clone(),
            response: parsed.response,
            has_intercept: parsed.has_intercept,
            features_col: self.features_col.clone(),
            label_col: self.label_col.clone(),
            feature_names: Vec::new(),
            labels,
            terms,
            columns,
        };
        model.feature_names = model.build_feature_names();
        log::debug!(
            "Formula '{}' resolved to {} features (intercept: {})",
            model.formula,
            model.feature_names.len(),
            model.has_intercept
        );
        Ok(model)
    }

    fn learn_encoding(&self, df: &DataFrame, name: &str) -> Result<ColumnEncoding, FormulaError> {
        if !frame::has_column(df, name) {
            return Err(FormulaError::ColumnNotFound(name.to_string()));
        }
        let column = df.column(name).map_err(FrameError::from)?;
        match column.dtype() {
            DataType::String => {
                let values = non_null_strings(column, name)?;
                Ok(ColumnEncoding::Categorical {
                    levels: order_levels(values.iter().map(String::as_str), self.string_order),
                })
            }
            DataType::Boolean
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::Float32
            | DataType::Float64 => {
                frame::dense_column(df, name)?;
                Ok(ColumnEncoding::Numeric)
            }
            other => Err(FormulaError::UnsupportedType {
                column: name.to_string(),
                found: format!("{other:?}"),
            }),
        }
    }

    fn learn_labels(
        &self,
        df: &DataFrame,
        response: &str,
    ) -> Result<Option<Vec<String>>, FormulaError> {
        let column = df.column(response).map_err(FrameError::from)?;
        let is_string = matches!(column.dtype(), DataType::String);
        if !is_string && !self.force_index_label {
            frame::dense_column(df, response)?;
            return Ok(None);
        }
        let values = non_null_strings(column, response)?;
        Ok(Some(order_levels(
            values.iter().map(String::as_str),
            self.string_order,
        )))
    }
}

/// Reads a column as strings, casting non-string columns first. Nulls are rejected.
fn non_null_strings(column: &Column, name: &str) -> Result<Vec<String>, FrameError> {
    let casted = column.cast(&DataType::String)?;
    let values = casted.str()?;
    values
        .into_iter()
        .map(|value| {
            value
                .map(str::to_string)
                .ok_or_else(|| FrameError::NullValues(name.to_string()))
        })
        .collect()
}

/// A fitted formula: knows the exact design-matrix layout it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RFormulaModel {
    formula: String,
    response: String,
    has_intercept: bool,
    features_col: String,
    label_col: String,
    feature_names: Vec<String>,
    labels: Option<Vec<String>>,
    terms: Vec<Term>,
    columns: Vec<EncodedColumn>,
}

impl RFormulaModel {
    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn has_intercept(&self) -> bool {
        self.has_intercept
    }

    /// Names of the encoded features, in design-matrix column order.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// The ordered label set, present only when the label was indexed.
    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn features_col(&self) -> &str {
        &self.features_col
    }

    pub fn label_col(&self) -> &str {
        &self.label_col
    }

    fn encoding(&self, name: &str) -> Option<&ColumnEncoding> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.encoding)
    }

    fn column_feature_names(&self, name: &str) -> Vec<String> {
        match self.encoding(name) {
            Some(ColumnEncoding::Categorical { levels }) => levels
                .iter()
                .take(levels.len().saturating_sub(1))
                .map(|level| format!("{name}_{level}"))
                .collect(),
            _ => vec![name.to_string()],
        }
    }

    fn build_feature_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for term in &self.terms {
            let mut block: Vec<String> = vec![String::new()];
            for (i, factor) in term.iter().enumerate() {
                let factor_names = self.column_feature_names(factor);
                block = block
                    .iter()
                    .flat_map(|prefix| {
                        factor_names.iter().map(move |name| {
                            if i == 0 {
                                name.clone()
                            } else {
                                format!("{prefix}:{name}")
                            }
                        })
                    })
                    .collect();
            }
            names.extend(block);
        }
        names
    }

    fn encode_column(&self, df: &DataFrame, name: &str) -> Result<Array2<f64>, StageError> {
        match self.encoding(name) {
            Some(ColumnEncoding::Categorical { levels }) => {
                let column = frame::require_column(df, name)?;
                let values = non_null_strings(column, name)?;
                let index: HashMap<&str, usize> = levels
                    .iter()
                    .enumerate()
                    .map(|(i, level)| (level.as_str(), i))
                    .collect();
                let width = levels.len().saturating_sub(1);
                let mut block = Array2::<f64>::zeros((values.len(), width));
                for (row, value) in values.iter().enumerate() {
                    let level = index.get(value.as_str()).copied().ok_or_else(|| {
                        StageError::UnseenLevel {
                            column: name.to_string(),
                            level: value.clone(),
                        }
                    })?;
                    if level < width {
                        block[[row, level]] = 1.0;
                    }
                }
                Ok(block)
            }
            _ => Ok(frame::dense_column(df, name)?.insert_axis(Axis(1))),
        }
    }

    /// The design matrix for `df`, without an intercept column.
    pub fn design_matrix(&self, df: &DataFrame) -> Result<Array2<f64>, StageError> {
        let n = df.height();
        let mut blocks: Vec<Array2<f64>> = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            let mut block = Array2::<f64>::ones((n, 1));
            for factor in term {
                let encoded = self.encode_column(df, factor)?;
                let mut product = Array2::<f64>::zeros((n, block.ncols() * encoded.ncols()));
                for i in 0..block.ncols() {
                    for j in 0..encoded.ncols() {
                        let mut target = product.column_mut(i * encoded.ncols() + j);
                        target.assign(&(&block.column(i) * &encoded.column(j)));
                    }
                }
                block = product;
            }
            blocks.push(block);
        }
        let mut design = Array2::<f64>::zeros((n, self.feature_names.len()));
        let mut offset = 0;
        for block in blocks {
            let width = block.ncols();
            design
                .slice_mut(s![.., offset..offset + width])
                .assign(&block);
            offset += width;
        }
        Ok(design)
    }

    /// The encoded label, or `None` when `df` has no response column.
    pub fn encode_label(&self, df: &DataFrame) -> Result<Option<Array1<f64>>, StageError> {
        if !frame::has_column(df, &self.response) {
            return Ok(None);
        }
        match &self.labels {
            None => Ok(Some(frame::dense_column(df, &self.response)?)),
            Some(labels) => {
                let column = frame::require_column(df, &self.response)?;
                let values = non_null_strings(column, &self.response)?;
                let encoded = values
                    .iter()
                    .map(|value| {
                        labels
                            .iter()
                            .position(|label| label == value)
                            .map(|i| i as f64)
                            .ok_or_else(|| StageError::UnseenLevel {
                                column: self.response.clone(),
                                level: value.clone(),
                            })
                    })
                    .collect::<Result<Array1<f64>, StageError>>()?;
                Ok(Some(encoded))
            }
        }
    }

    /// Appends the features list column and, when the response is present, the label.
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame, StageError> {
        let design = self.design_matrix(df)?;
        let mut out = frame::with_series(
            df,
            frame::matrix_to_list_series(&self.features_col, &design),
        )?;
        if let Some(label) = self.encode_label(df)? {
            out = frame::with_series(
                &out,
                Series::new(self.label_col.as_str().into(), label.to_vec()),
            )?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cars() -> DataFrame {
        DataFrame::new(vec![
            Series::new("y".into(), vec![1.0, 2.0, 3.0, 4.0, 5.0]).into(),
            Series::new("x1".into(), vec![0.5, 1.5, 2.5, 3.5, 4.5]).into(),
            Series::new("x2".into(), vec![1i64, 0, 1, 0, 1]).into(),
            Series::new("cyl".into(), vec!["four", "six", "four", "eight", "four"]).into(),
            Series::new("w".into(), vec![1.0, 1.0, 2.0, 2.0, 1.0]).into(),
        ])
        .expect("construct cars dataframe")
    }

    #[test]
    fn parse_simple_formula() {
        let parsed = parse_formula("y ~ x1 + x2").unwrap();
        assert_eq!(parsed.response, "y");
        assert_eq!(
            parsed.terms,
            vec![Some(vec!["x1".to_string()]), Some(vec!["x2".to_string()])]
        );
        assert!(parsed.has_intercept);
    }

    #[test]
    fn parse_intercept_removal_variants() {
        assert!(!parse_formula("y ~ x1 - 1").unwrap().has_intercept);
        assert!(!parse_formula("y ~ x1 + 0").unwrap().has_intercept);
        assert!(!parse_formula("y ~ 0 + x1").unwrap().has_intercept);
        assert!(parse_formula("y ~ x1 + 1").unwrap().has_intercept);
    }

    #[test]
    fn parse_interactions_and_removals() {
        let parsed = parse_formula("y ~ . + x1:x2 - w").unwrap();
        assert_eq!(parsed.terms[0], None);
        assert_eq!(
            parsed.terms[1],
            Some(vec!["x1".to_string(), "x2".to_string()])
        );
        assert_eq!(parsed.removed, vec![vec!["w".to_string()]]);
    }

    #[test]
    fn parse_rejects_malformed_formulas() {
        assert!(matches!(parse_formula("y x1"), Err(FormulaError::Parse { .. })));
        assert!(matches!(parse_formula(" ~ x1"), Err(FormulaError::Parse { .. })));
        assert!(matches!(parse_formula("y ~ 0"), Err(FormulaError::Parse { .. })));
        assert!(matches!(parse_formula("y ~ x1:"), Err(FormulaError::Parse { .. })));
    }

    #[test]
    fn level_ordering_follows_order_type() {
        let values = ["b", "a", "c", "a", "b", "a"];
        assert_eq!(
            order_levels(values, StringOrderType::FrequencyDesc),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            order_levels(values, StringOrderType::FrequencyAsc),
            vec!["c", "b", "a"]
        );
        assert_eq!(
            order_levels(values, StringOrderType::AlphabetDesc),
            vec!["c", "b", "a"]
        );
        let tied = ["z", "y"];
        assert_eq!(
            order_levels(tied, StringOrderType::FrequencyDesc),
            vec!["y", "z"]
        );
    }

    #[test]
    fn numeric_terms_encode_as_named_columns() {
        let df = cars();
        let model = RFormula::new("y ~ x1 + x2").fit(&df, &[]).unwrap();
        assert_eq!(model.feature_names(), ["x1", "x2"]);
        assert!(model.has_intercept());
        assert!(model.labels().is_none());
        let design = model.design_matrix(&df).unwrap();
        assert_eq!(design.dim(), (5, 2));
        assert_eq!(design[[2, 0]], 2.5);
        assert_eq!(design[[1, 1]], 0.0);
    }

    #[test]
    fn string_terms_drop_the_reference_level() {
        let df = cars();
        let model = RFormula::new("y ~ cyl").fit(&df, &[]).unwrap();
        // frequency order: four (3), eight (1), six (1); six is the reference
        assert_eq!(model.feature_names(), ["cyl_four", "cyl_eight"]);
        let design = model.design_matrix(&df).unwrap();
        assert_eq!(design.row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(design.row(1).to_vec(), vec![0.0, 0.0]);
        assert_eq!(design.row(3).to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn dot_expands_to_remaining_columns_except_excluded() {
        let df = cars();
        let model = RFormula::new("y ~ . - cyl").fit(&df, &["w"]).unwrap();
        assert_eq!(model.feature_names(), ["x1", "x2"]);
    }

    #[test]
    fn interaction_multiplies_encodings() {
        let df = cars();
        let model = RFormula::new("y ~ x1:x2 - 1").fit(&df, &[]).unwrap();
        assert_eq!(model.feature_names(), ["x1:x2"]);
        assert!(!model.has_intercept());
        let design = model.design_matrix(&df).unwrap();
        assert_eq!(design.column(0).to_vec(), vec![0.5, 0.0, 2.5, 0.0, 4.5]);
    }

    #[test]
    fn forced_label_indexing_captures_ordered_labels() {
        let df = DataFrame::new(vec![
            Series::new("y".into(), vec!["yes", "no", "yes"]).into(),
            Series::new("x".into(), vec![1.0, 2.0, 3.0]).into(),
        ])
        .unwrap();
        let model = RFormula::new("y ~ x")
            .with_force_index_label(true)
            .fit(&df, &[])
            .unwrap();
        assert_eq!(model.labels().unwrap(), ["yes", "no"]);
        let label = model.encode_label(&df).unwrap().unwrap();
        assert_eq!(label.to_vec(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn unknown_column_is_an_invalid_formula() {
        let df = cars();
        match RFormula::new("y ~ missing").fit(&df, &[]) {
            Err(FormulaError::ColumnNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            RFormula::new("nope ~ x1").fit(&df, &[]),
            Err(FormulaError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn transform_appends_features_and_label_columns() {
        let df = cars();
        let model = RFormula::new("y ~ x1").fit(&df, &[]).unwrap();
        let out = model.transform(&df).unwrap();
        assert!(frame::has_column(&out, "features"));
        assert!(frame::has_column(&out, "label"));

        let unlabeled = df.drop("y").unwrap();
        let out = model.transform(&unlabeled).unwrap();
        assert!(frame::has_column(&out, "features"));
        assert!(!frame::has_column(&out, "label"));
    }

    #[test]
    fn unseen_level_fails_transform() {
        let df = cars();
        let model = RFormula::new("y ~ cyl").fit(&df, &[]).unwrap();
        let other = DataFrame::new(vec![
            Series::new("y".into(), vec![1.0]).into(),
            Series::new("cyl".into(), vec!["twelve"]).into(),
        ])
        .unwrap();
        assert!(matches!(
            model.transform(&other),
            Err(StageError::UnseenLevel { .. })
        ));
    }
}
