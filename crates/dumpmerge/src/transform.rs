//! Row transformation: normalize, skip, and reorder legacy dump rows.
//!
//! A legacy row is one record of a bulk-copy block: tab-separated text
//! fields with `\N` marking NULL. The transformer reshapes it into the
//! column layout of the live table in three ordered steps:
//!
//! 1. **Normalize** — rewrite individual fields at their *original* legacy
//!    positions (before any column is dropped or moved).
//! 2. **Skip** — remove legacy columns that no longer exist downstream,
//!    preserving relative order.
//! 3. **Map** — place each surviving field at its target position; target
//!    positions nothing maps to stay NULL.
//!
//! The transform is a pure function of the row and the configured spec:
//! the same input always produces the same output, and the output always
//! has exactly the target column count.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::TableSpec;

/// NULL marker used by the bulk-copy text format.
pub const NULL_MARKER: &str = "\\N";

/// Field delimiter used by the bulk-copy text format.
pub const FIELD_DELIMITER: char = '\t';

/// Known spellings of the United States, folded to lowercase for lookup.
/// Values not in this table pass through unchanged.
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("usa", "US"),
    ("united states", "US"),
    ("u.s.a.", "US"),
    ("u.s.", "US"),
];

/// A field-level normalization rule, applied before skip/reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalizer {
    /// Canonicalize country names to their ISO 3166-1 two-letter code.
    Country,
}

impl Normalizer {
    /// Applies the rule to a single field value.
    #[must_use]
    pub fn apply(&self, value: &str) -> String {
        match self {
            Normalizer::Country => {
                let folded = value.to_lowercase();
                COUNTRY_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == folded)
                    .map_or_else(|| value.to_string(), |(_, code)| (*code).to_string())
            }
        }
    }
}

/// How out-of-bounds positions are treated during transformation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    /// Out-of-bounds positions are silently ignored; short rows degrade
    /// to NULLs in the unreachable target positions.
    #[default]
    Lenient,
    /// Out-of-bounds positions are per-row errors; affected rows are
    /// dropped from the batch and itemized in the table report.
    Strict,
}

/// A per-row problem surfaced by the strict mode.
#[derive(Debug, Clone)]
pub struct RowDiagnostic {
    /// Zero-based record index within the table's dump block.
    pub row: usize,
    /// Human-readable description of what went out of bounds.
    pub detail: String,
}

/// Result of transforming a whole dump block.
#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    /// Transformed record lines, ready for staging.
    pub rows: Vec<String>,
    /// Rows rejected in strict mode, with the reason each was rejected.
    pub diagnostics: Vec<RowDiagnostic>,
}

/// Reshapes legacy rows into the live table's column layout.
///
/// Built either from an explicit positional [`TableSpec`] or derived from
/// column names when the dump block carries a column-list header.
#[derive(Debug, Clone)]
pub struct Transformer {
    skip_indices: BTreeSet<usize>,
    column_map: Option<BTreeMap<usize, usize>>,
    normalizers: BTreeMap<usize, Normalizer>,
    target_column_count: usize,
    mode: TransformMode,
}

impl Transformer {
    /// Builds a transformer from an explicit positional spec.
    ///
    /// `target_column_count` is the resolved width of the output row; the
    /// spec's own count, when present, has already been validated against
    /// the live schema by the caller.
    #[must_use]
    pub fn from_spec(spec: &TableSpec, target_column_count: usize, mode: TransformMode) -> Self {
        Self {
            skip_indices: spec.skip_indices.clone(),
            column_map: spec.column_map.clone(),
            normalizers: spec.normalizers.clone(),
            target_column_count,
            mode,
        }
    }

    /// Derives skip and reorder tables by matching dump column names
    /// against the live target columns.
    ///
    /// Dump columns absent from the target become skips; the rest map to
    /// the target position of the same-named live column. This replaces
    /// hand-maintained positional tables whenever the dump block carries
    /// a column-list header.
    #[must_use]
    pub fn from_names(
        dump_columns: &[String],
        target_columns: &[String],
        normalizers: BTreeMap<usize, Normalizer>,
        mode: TransformMode,
    ) -> Self {
        let (skip_indices, column_map) = mapping_from_names(dump_columns, target_columns);
        Self {
            skip_indices,
            column_map: Some(column_map),
            normalizers,
            target_column_count: target_columns.len(),
            mode,
        }
    }

    /// Width of the rows this transformer produces.
    #[must_use]
    pub fn target_column_count(&self) -> usize {
        self.target_column_count
    }

    /// Transforms one row of text fields into the target layout.
    ///
    /// The output always has exactly `target_column_count` fields; target
    /// positions no legacy field reaches hold the NULL marker.
    #[must_use]
    pub fn transform(&self, row: &[&str]) -> Vec<String> {
        // 1. Normalize at original legacy positions.
        let mut fields: Vec<String> = row.iter().map(|f| (*f).to_string()).collect();
        for (&pos, rule) in &self.normalizers {
            if let Some(field) = fields.get_mut(pos) {
                *field = rule.apply(field);
            }
        }

        // 2. Skip columns with no downstream counterpart.
        let mut kept: Vec<String> = fields
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !self.skip_indices.contains(i))
            .map(|(_, f)| f)
            .collect();

        // 3. Map surviving fields onto the target layout.
        let mut target = vec![NULL_MARKER.to_string(); self.target_column_count];
        match &self.column_map {
            Some(map) => {
                for (&src, &dst) in map {
                    if src < kept.len() && dst < target.len() {
                        target[dst] = std::mem::take(&mut kept[src]);
                    }
                }
            }
            None => {
                for (dst, field) in kept.into_iter().take(self.target_column_count).enumerate() {
                    target[dst] = field;
                }
            }
        }
        target
    }

    /// Transforms one raw record line.
    #[must_use]
    pub fn transform_line(&self, line: &str) -> String {
        let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        self.transform(&fields).join("\t")
    }

    /// Lists the positions the lenient path would silently ignore for
    /// this row. Empty means the row reaches every configured position.
    #[must_use]
    pub fn check(&self, row: &[&str]) -> Vec<String> {
        let mut issues = Vec::new();
        for &pos in self.normalizers.keys() {
            if pos >= row.len() {
                issues.push(format!(
                    "normalizer position {pos} outside row of {} fields",
                    row.len()
                ));
            }
        }
        let kept_len = (0..row.len())
            .filter(|i| !self.skip_indices.contains(i))
            .count();
        match &self.column_map {
            Some(map) => {
                for &src in map.keys() {
                    if src >= kept_len {
                        issues.push(format!(
                            "mapped source {src} outside post-skip row of {kept_len} fields"
                        ));
                    }
                }
            }
            None => {
                if kept_len < self.target_column_count {
                    issues.push(format!(
                        "row provides {kept_len} of {} target fields",
                        self.target_column_count
                    ));
                }
            }
        }
        issues
    }

    /// Transforms a whole dump block.
    ///
    /// In lenient mode every row produces an output line. In strict mode
    /// rows with out-of-bounds positions are dropped and reported in
    /// [`TransformOutcome::diagnostics`] instead.
    #[must_use]
    pub fn transform_block(&self, lines: &[String]) -> TransformOutcome {
        let mut outcome = TransformOutcome::default();
        for (idx, line) in lines.iter().enumerate() {
            let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
            if self.mode == TransformMode::Strict {
                let issues = self.check(&fields);
                if !issues.is_empty() {
                    outcome.diagnostics.push(RowDiagnostic {
                        row: idx,
                        detail: issues.join("; "),
                    });
                    continue;
                }
            }
            outcome.rows.push(self.transform(&fields).join("\t"));
        }
        outcome
    }
}

/// Matches dump column names against live target columns, producing the
/// skip set (by original dump position) and the post-skip reorder map.
#[must_use]
pub fn mapping_from_names(
    dump_columns: &[String],
    target_columns: &[String],
) -> (BTreeSet<usize>, BTreeMap<usize, usize>) {
    let mut skip_indices = BTreeSet::new();
    let mut column_map = BTreeMap::new();
    let mut post_skip = 0usize;
    for (i, name) in dump_columns.iter().enumerate() {
        match target_columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
        {
            Some(dst) => {
                column_map.insert(post_skip, dst);
                post_skip += 1;
            }
            None => {
                skip_indices.insert(i);
            }
        }
    }
    (skip_indices, column_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(
        skip: &[usize],
        map: Option<&[(usize, usize)]>,
        normalizers: &[(usize, Normalizer)],
        count: usize,
    ) -> Transformer {
        Transformer {
            skip_indices: skip.iter().copied().collect(),
            column_map: map.map(|pairs| pairs.iter().copied().collect()),
            normalizers: normalizers.iter().copied().collect(),
            target_column_count: count,
            mode: TransformMode::Lenient,
        }
    }

    #[test]
    fn test_identity_preserves_order() {
        let t = spec(&[], None, &[], 3);
        assert_eq!(t.transform(&["1", "a", "b"]), vec!["1", "a", "b"]);
    }

    #[test]
    fn test_skip_removes_retired_columns() {
        // Column 2 no longer exists downstream; the rest shift left.
        let t = spec(&[2], Some(&[(0, 0), (1, 1), (2, 2), (3, 3)]), &[], 4);
        assert_eq!(
            t.transform(&["1", "a", "b", "c", "d"]),
            vec!["1", "a", "c", "d"]
        );
    }

    #[test]
    fn test_reorder_swaps_positions() {
        let t = spec(&[], Some(&[(0, 0), (1, 2), (2, 1)]), &[], 3);
        assert_eq!(t.transform(&["id", "x", "y"]), vec!["id", "y", "x"]);
    }

    #[test]
    fn test_short_row_fills_nulls() {
        let t = spec(&[], Some(&[(0, 0), (1, 1), (2, 2)]), &[], 3);
        assert_eq!(t.transform(&["1", "a"]), vec!["1", "a", "\\N"]);
    }

    #[test]
    fn test_identity_pads_and_truncates_to_target_width() {
        let t = spec(&[], None, &[], 3);
        assert_eq!(t.transform(&["1"]), vec!["1", "\\N", "\\N"]);
        assert_eq!(t.transform(&["1", "a", "b", "extra"]), vec!["1", "a", "b"]);
    }

    #[test]
    fn test_output_width_is_always_target_count() {
        let t = spec(&[1], Some(&[(0, 0), (1, 3)]), &[], 5);
        for row in [vec![], vec!["a"], vec!["a", "b", "c", "d", "e", "f"]] {
            assert_eq!(t.transform(&row).len(), 5);
        }
    }

    #[test]
    fn test_unmapped_source_fields_are_dropped() {
        // Only position 0 has a target home; position 1 has none.
        let t = spec(&[], Some(&[(0, 0)]), &[], 2);
        assert_eq!(t.transform(&["keep", "drop"]), vec!["keep", "\\N"]);
    }

    #[test]
    fn test_country_normalized_before_skip_and_map() {
        // The country field moves after the skip, but normalization sees
        // its original position.
        let t = spec(
            &[2],
            Some(&[(0, 0), (1, 1)]),
            &[(1, Normalizer::Country)],
            2,
        );
        assert_eq!(t.transform(&["US1", "USA", "x"]), vec!["US1", "US"]);
    }

    #[test]
    fn test_same_input_same_output() {
        let t = spec(&[1], Some(&[(0, 1), (1, 0)]), &[(0, Normalizer::Country)], 2);
        let row = ["United States", "noise", "1234"];
        assert_eq!(t.transform(&row), t.transform(&row));
    }

    #[test]
    fn test_country_aliases() {
        let rule = Normalizer::Country;
        assert_eq!(rule.apply("USA"), "US");
        assert_eq!(rule.apply("usa"), "US");
        assert_eq!(rule.apply("United States"), "US");
        assert_eq!(rule.apply("UNITED STATES"), "US");
        assert_eq!(rule.apply("U.S.A."), "US");
        assert_eq!(rule.apply("U.S."), "US");
        // Already canonical or unknown values pass through.
        assert_eq!(rule.apply("US"), "US");
        assert_eq!(rule.apply("Canada"), "Canada");
        assert_eq!(rule.apply("\\N"), "\\N");
        assert_eq!(rule.apply(""), "");
    }

    #[test]
    fn test_null_marker_distinct_from_empty_string() {
        let t = spec(&[], None, &[], 2);
        assert_eq!(t.transform(&["", "\\N"]), vec!["", "\\N"]);
    }

    #[test]
    fn test_transform_line_splits_on_tabs() {
        let t = spec(&[1], None, &[], 2);
        assert_eq!(t.transform_line("1\tdrop\tkeep"), "1\tkeep");
    }

    #[test]
    fn test_strict_flags_short_rows() {
        let mut t = spec(&[], Some(&[(0, 0), (5, 1)]), &[(4, Normalizer::Country)], 2);
        t.mode = TransformMode::Strict;
        let lines = vec!["a\tb".to_string(), "a\tb\tc\td\te\tf".to_string()];
        let outcome = t.transform_block(&lines);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].row, 0);
        assert!(outcome.diagnostics[0].detail.contains("normalizer position 4"));
        assert!(outcome.diagnostics[0].detail.contains("mapped source 5"));
    }

    #[test]
    fn test_lenient_block_keeps_every_row() {
        let t = spec(&[], Some(&[(0, 0), (5, 1)]), &[], 2);
        let lines = vec!["a".to_string(), "a\tb\tc\td\te\tf".to_string()];
        let outcome = t.transform_block(&lines);
        assert_eq!(outcome.rows.len(), 2);
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(outcome.rows[0], "a\t\\N");
        assert_eq!(outcome.rows[1], "a\tf");
    }

    #[test]
    fn test_mapping_from_names() {
        let dump = vec![
            "id".to_string(),
            "format".to_string(),
            "venue_city".to_string(),
            "season_id".to_string(),
        ];
        let target = vec![
            "id".to_string(),
            "season_id".to_string(),
            "venue_city".to_string(),
        ];
        let (skips, map) = mapping_from_names(&dump, &target);
        // "format" has no live counterpart.
        assert_eq!(skips.into_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(
            map.into_iter().collect::<Vec<_>>(),
            vec![(0, 0), (1, 2), (2, 1)]
        );
    }

    #[test]
    fn test_from_names_end_to_end() {
        let dump = vec!["id".to_string(), "legacy_only".to_string(), "city".to_string()];
        let target = vec!["id".to_string(), "city".to_string(), "added_later".to_string()];
        let t = Transformer::from_names(&dump, &target, BTreeMap::new(), TransformMode::Lenient);
        assert_eq!(
            t.transform(&["7", "junk", "Austin"]),
            vec!["7", "Austin", "\\N"]
        );
    }
}
