use std::collections::BTreeMap;

use crate::dataset::Dataset;
use crate::models::{CohortOverview, Crosstab, FeatureHistogram, StatusCount, DROPOUT_CLASS};

pub const GRADUATE_CLASS: &str = "Graduate";
pub const ENROLLED_CLASS: &str = "Enrolled";
pub const HISTOGRAM_BINS: usize = 20;

pub fn cohort_overview(dataset: &Dataset) -> CohortOverview {
    let count = |label: &str| dataset.statuses().iter().filter(|s| s.as_str() == label).count();
    let total_students = dataset.len();
    let dropouts = count(DROPOUT_CLASS);

    CohortOverview {
        total_students,
        graduates: count(GRADUATE_CLASS),
        dropouts,
        enrolled: count(ENROLLED_CLASS),
        dropout_rate: if total_students == 0 {
            0.0
        } else {
            dropouts as f64 / total_students as f64 * 100.0
        },
    }
}

/// Students per status, most common first.
pub fn status_distribution(dataset: &Dataset) -> Vec<StatusCount> {
    let mut map: BTreeMap<&str, usize> = BTreeMap::new();
    for status in dataset.statuses() {
        *map.entry(status.as_str()).or_insert(0) += 1;
    }

    let mut counts: Vec<StatusCount> = map
        .into_iter()
        .map(|(status, count)| StatusCount {
            status: status.to_string(),
            count,
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.status.cmp(&b.status)));
    counts
}

/// Status counts for each distinct value of `column`. Rows without the column are skipped.
pub fn crosstab(dataset: &Dataset, column: &str) -> Crosstab {
    let mut statuses: Vec<String> = dataset.statuses().to_vec();
    statuses.sort();
    statuses.dedup();

    let mut rows: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (record, status) in dataset.records().iter().zip(dataset.statuses()) {
        let Some(value) = record.get(column) else {
            continue;
        };
        let counts = rows
            .entry(value.category_key())
            .or_insert_with(|| vec![0; statuses.len()]);
        if let Ok(index) = statuses.binary_search(status) {
            counts[index] += 1;
        }
    }

    Crosstab {
        column: column.to_string(),
        statuses,
        rows: rows.into_iter().collect(),
    }
}

/// Equal-width histogram of `feature`, one series per status.
/// Returns `None` when the column has no finite numeric values.
pub fn feature_histogram(dataset: &Dataset, feature: &str, bins: usize) -> Option<FeatureHistogram> {
    let bins = bins.max(1);
    let values: Vec<(f64, &str)> = dataset
        .records()
        .iter()
        .zip(dataset.statuses())
        .filter_map(|(record, status)| {
            let value = record.get(feature)?.as_number();
            value.is_finite().then_some((value, status.as_str()))
        })
        .collect();
    if values.is_empty() {
        return None;
    }

    let min = values.iter().map(|(v, _)| *v).fold(f64::INFINITY, f64::min);
    let max = values.iter().map(|(v, _)| *v).fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };
    let edges = (0..=bins).map(|i| min + width * i as f64).collect();

    let mut series: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (value, status) in values {
        let bin = (((value - min) / width) as usize).min(bins - 1);
        series.entry(status.to_string()).or_insert_with(|| vec![0; bins])[bin] += 1;
    }

    Some(FeatureHistogram {
        feature: feature.to_string(),
        edges,
        series: series.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        let csv = "\
Gender;Age_at_enrollment;Status
0;18;Graduate
1;20;Dropout
1;22;Dropout
0;28;Enrolled
0;38;Graduate
";
        Dataset::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn overview_counts_statuses_and_rate() {
        let overview = cohort_overview(&dataset());
        assert_eq!(overview.total_students, 5);
        assert_eq!(overview.graduates, 2);
        assert_eq!(overview.dropouts, 2);
        assert_eq!(overview.enrolled, 1);
        assert!((overview.dropout_rate - 40.0).abs() < 1e-9);
    }

    #[test]
    fn distribution_is_sorted_by_count() {
        let counts = status_distribution(&dataset());
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[0].status, "Dropout");
        assert_eq!(counts[1].status, "Graduate");
        assert_eq!(counts[2].status, "Enrolled");
    }

    #[test]
    fn crosstab_groups_by_column_value() {
        let table = crosstab(&dataset(), "Gender");
        assert_eq!(table.statuses, vec!["Dropout", "Enrolled", "Graduate"]);
        assert_eq!(
            table.rows,
            vec![
                ("0".to_string(), vec![0, 1, 2]),
                ("1".to_string(), vec![2, 0, 0]),
            ]
        );
    }

    #[test]
    fn histogram_places_extremes_in_end_bins() {
        let histogram = feature_histogram(&dataset(), "Age_at_enrollment", 4).unwrap();
        assert_eq!(histogram.edges, vec![18.0, 23.0, 28.0, 33.0, 38.0]);
        let graduate = &histogram.series.iter().find(|(s, _)| s == "Graduate").unwrap().1;
        assert_eq!(graduate, &vec![1, 0, 0, 1]);
        let enrolled = &histogram.series.iter().find(|(s, _)| s == "Enrolled").unwrap().1;
        assert_eq!(enrolled, &vec![0, 0, 1, 0]);
        let total: usize = histogram.series.iter().flat_map(|(_, c)| c).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn histogram_of_missing_feature_is_none() {
        assert!(feature_histogram(&dataset(), "Admission_grade", HISTOGRAM_BINS).is_none());
    }
}
