use std::fmt::Write;

use crate::analysis;
use crate::dataset::Dataset;
use crate::models::{BatchPrediction, FeatureImportance};
use crate::risk;

pub fn build_report(
    dataset: &Dataset,
    predictions: &[BatchPrediction],
    importances: &[FeatureImportance],
    crosstab_column: &str,
    histogram_feature: Option<&str>,
) -> String {
    let overview = analysis::cohort_overview(dataset);
    let distribution = analysis::status_distribution(dataset);
    let table = analysis::crosstab(dataset, crosstab_column);

    let mut output = String::new();

    let _ = writeln!(output, "# Student Dropout Risk Report");
    let _ = writeln!(
        output,
        "Cohort of {} students, {} graduates, {} dropouts, {} enrolled (dropout rate {:.1}%)",
        overview.total_students,
        overview.graduates,
        overview.dropouts,
        overview.enrolled,
        overview.dropout_rate
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Distribution");

    for entry in distribution.iter() {
        let share = entry.count as f64 / overview.total_students.max(1) as f64 * 100.0;
        let _ = writeln!(output, "- {}: {} students ({:.1}%)", entry.status, entry.count, share);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Status by {}", table.column);

    if table.rows.is_empty() {
        let _ = writeln!(output, "No values recorded for {}.", table.column);
    } else {
        let _ = writeln!(output, "| {} | {} |", table.column, table.statuses.join(" | "));
        let _ = writeln!(output, "|---|{}", "---|".repeat(table.statuses.len()));
        for (value, counts) in table.rows.iter() {
            let cells: Vec<String> = counts.iter().map(|c| c.to_string()).collect();
            let _ = writeln!(output, "| {} | {} |", value, cells.join(" | "));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Predicted Risk Mix");

    let tiers = risk::risk_distribution(predictions);
    if tiers.is_empty() {
        let _ = writeln!(output, "No students were scored.");
    } else {
        for tier in tiers.iter() {
            let _ = writeln!(output, "- {}: {} students", tier.risk_level, tier.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    let ranked = risk::rank_by_dropout(predictions);
    if ranked.is_empty() {
        let _ = writeln!(output, "No students were scored.");
    } else {
        for prediction in ranked.iter().take(10) {
            let _ = writeln!(
                output,
                "- row {}: {} (dropout probability {:.1}%, {})",
                prediction.student_id,
                prediction.result.predicted_status,
                prediction.result.dropout_probability * 100.0,
                prediction.result.risk_level
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Features");

    if importances.is_empty() {
        let _ = writeln!(output, "No feature importances available.");
    } else {
        for importance in importances.iter().take(15) {
            let _ = writeln!(output, "- {}: {:.4}", importance.feature, importance.importance);
        }
    }

    if let Some(feature) = histogram_feature {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Distribution of {feature}");

        match analysis::feature_histogram(dataset, feature, analysis::HISTOGRAM_BINS) {
            None => {
                let _ = writeln!(output, "No numeric values recorded for {feature}.");
            }
            Some(histogram) => {
                let statuses: Vec<&str> = histogram.series.iter().map(|(s, _)| s.as_str()).collect();
                let _ = writeln!(output, "| bin | {} |", statuses.join(" | "));
                let _ = writeln!(output, "|---|{}", "---|".repeat(statuses.len()));
                for bin in 0..histogram.edges.len() - 1 {
                    let cells: Vec<String> = histogram
                        .series
                        .iter()
                        .map(|(_, counts)| counts[bin].to_string())
                        .collect();
                    let _ = writeln!(
                        output,
                        "| {:.2} to {:.2} | {} |",
                        histogram.edges[bin],
                        histogram.edges[bin + 1],
                        cells.join(" | ")
                    );
                }
            }
        }
    }

    output
}
