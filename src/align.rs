use crate::encoding::CategoricalEncoders;
use crate::models::StudentRecord;

/// Value inserted for an expected column that the record does not supply.
pub const MISSING_FEATURE_DEFAULT: f64 = 0.0;

/// Turns a record into the feature vector the classifier was trained on.
///
/// Categorical columns are encoded (unseen values fall back to code 0),
/// absent columns take [`MISSING_FEATURE_DEFAULT`], unknown columns are
/// dropped and the output follows `feature_names` exactly. Never fails: a
/// non-numeric value in a numeric column comes out as NaN and is left for the
/// classifier to reject.
pub fn align_record(
    record: &StudentRecord,
    feature_names: &[String],
    encoders: &CategoricalEncoders,
) -> Vec<f64> {
    feature_names
        .iter()
        .map(|name| match record.get(name) {
            None => MISSING_FEATURE_DEFAULT,
            Some(value) => match encoders.transform(name, value) {
                Some(code) => code as f64,
                None => value.as_number(),
            },
        })
        .collect()
}

/// Names in `record` that the model does not use.
pub fn unexpected_fields<'a>(record: &'a StudentRecord, feature_names: &[String]) -> Vec<&'a str> {
    record
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| !feature_names.iter().any(|f| f == name))
        .collect()
}
