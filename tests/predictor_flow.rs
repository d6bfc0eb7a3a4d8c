use dropout_risk::config::ForestConfig;
use dropout_risk::{Dataset, DropoutPredictor, FieldValue, PredictError, RiskLevel, StudentRecord};

const HEADER: &str = "Marital_status;Application_mode;Course;Daytime_evening_attendance;\
Previous_qualification_grade;Admission_grade;Debtor;Tuition_fees_up_to_date;Gender;\
Scholarship_holder;Age_at_enrollment;Curricular_units_1st_sem_approved;\
Curricular_units_1st_sem_grade;Curricular_units_2nd_sem_approved;\
Curricular_units_2nd_sem_grade;Unemployment_rate;Status";

/// Deterministic cohort with two text columns and three outcome profiles.
fn cohort_csv() -> String {
    let mut csv = format!("{HEADER}\n");
    let courses = ["Nursing", "Management", "Informatics", "Tourism"];
    let modes = ["1st phase", "Over 23", "Transfer"];
    for i in 0..150 {
        let course = courses[i % 4];
        let mode = modes[i % 3];
        let row = match i % 3 {
            0 => format!(
                "1;{mode};{course};1;{:.1};{:.1};1;0;1;0;{};{};{:.1};{};{:.1};{:.1};Dropout",
                110.0 + (i % 9) as f64,
                105.0 + (i % 11) as f64,
                24 + i % 8,
                i % 2,
                4.0 + (i % 5) as f64,
                i % 2,
                3.0 + (i % 4) as f64,
                10.8 + (i % 3) as f64
            ),
            1 => format!(
                "1;{mode};{course};1;{:.1};{:.1};0;1;0;1;{};{};{:.1};{};{:.1};{:.1};Graduate",
                140.0 + (i % 9) as f64,
                145.0 + (i % 11) as f64,
                18 + i % 3,
                6 + i % 2,
                13.0 + (i % 5) as f64,
                6 + i % 2,
                13.5 + (i % 4) as f64,
                7.6 + (i % 3) as f64
            ),
            _ => format!(
                "2;{mode};{course};0;{:.1};{:.1};0;1;1;0;{};{};{:.1};{};{:.1};{:.1};Enrolled",
                125.0 + (i % 9) as f64,
                125.0 + (i % 11) as f64,
                21 + i % 4,
                3 + i % 2,
                11.0 + (i % 3) as f64,
                3 + i % 2,
                10.5 + (i % 3) as f64,
                9.4 + (i % 3) as f64
            ),
        };
        csv.push_str(&row);
        csv.push('\n');
    }
    csv
}

fn trained() -> (Dataset, DropoutPredictor) {
    let dataset = Dataset::from_reader(cohort_csv().as_bytes()).unwrap();
    let config = ForestConfig {
        n_trees: 25,
        ..ForestConfig::default()
    };
    let mut predictor = DropoutPredictor::new();
    predictor.train(&dataset, &config).unwrap();
    (dataset, predictor)
}

fn struggling_student() -> StudentRecord {
    StudentRecord::new()
        .with("Marital_status", 1i64)
        .with("Daytime_evening_attendance", 1i64)
        .with("Gender", 1i64)
        .with("Scholarship_holder", 0i64)
        .with("Unemployment_rate", 11.8)
        .with("Application_mode", "Over 23")
        .with("Course", "Nursing")
        .with("Debtor", 1i64)
        .with("Tuition_fees_up_to_date", 0i64)
        .with("Age_at_enrollment", 27i64)
        .with("Curricular_units_1st_sem_approved", 0i64)
        .with("Curricular_units_1st_sem_grade", 5.0)
        .with("Curricular_units_2nd_sem_approved", 0i64)
        .with("Curricular_units_2nd_sem_grade", 4.0)
        .with("Admission_grade", 108.0)
        .with("Previous_qualification_grade", 112.0)
}

#[test]
fn text_columns_are_label_encoded() {
    let (_, predictor) = trained();
    let bundle = predictor.bundle().unwrap();
    assert_eq!(bundle.feature_names.len(), 16);
    let courses = bundle.label_encoders.get("Course").unwrap();
    assert_eq!(courses.classes(), ["Informatics", "Management", "Nursing", "Tourism"]);
    assert!(bundle.label_encoders.is_categorical("Application_mode"));
    assert_eq!(bundle.label_encoders.len(), 2);
}

#[test]
fn struggling_student_is_high_risk() {
    let (_, predictor) = trained();
    let result = predictor.predict_single(&struggling_student()).unwrap();
    assert_eq!(result.predicted_status, "Dropout");
    assert_eq!(result.risk_level, RiskLevel::High);
    assert_eq!(result.probabilities.len(), 3);
}

#[test]
fn sparse_record_still_gets_a_distribution() {
    let (dataset, predictor) = trained();
    // No categorical fields and only half of the numeric ones.
    let numeric: Vec<&String> = dataset
        .columns()
        .iter()
        .filter(|c| !predictor.bundle().unwrap().label_encoders.is_categorical(c))
        .collect();
    let record: StudentRecord = numeric
        .iter()
        .step_by(2)
        .map(|name| ((*name).clone(), FieldValue::Number(1.0)))
        .collect();

    let features = predictor.features_for(&record).unwrap();
    assert_eq!(features.len(), dataset.columns().len());
    assert!(features.iter().all(|v| v.is_finite()));

    let result = predictor.predict_single(&record).unwrap();
    let total: f64 = result.probabilities.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(result.probabilities.values().all(|p| *p >= 0.0));
}

#[test]
fn unseen_category_behaves_like_code_zero() {
    let (_, predictor) = trained();
    let unseen = struggling_student().with("Course", "Astrophysics");
    let first_class = struggling_student().with("Course", "Informatics");
    assert_eq!(
        predictor.predict_single(&unseen).unwrap(),
        predictor.predict_single(&first_class).unwrap()
    );
}

#[test]
fn batch_marks_only_the_malformed_row() {
    let (dataset, predictor) = trained();
    let mut records: Vec<StudentRecord> = dataset.records()[..5].to_vec();
    records[2] = struggling_student().with("Admission_grade", "not recorded");

    let results = predictor.predict_batch(&records);
    assert_eq!(results.len(), 5);
    for (index, result) in results.iter().enumerate() {
        assert_eq!(result.student_id, index);
        assert_eq!(result.is_error(), index == 2);
    }
    assert_eq!(results[2].result.predicted_status, "Error");
    assert_eq!(results[2].result.dropout_probability, 0.0);
}

#[test]
fn untrained_batch_yields_only_placeholders() {
    let predictor = DropoutPredictor::new();
    let results = predictor.predict_batch(&[struggling_student(), StudentRecord::new()]);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_error()));
    assert!(matches!(
        predictor.predict_single(&StudentRecord::new()),
        Err(PredictError::NotTrained)
    ));
}

#[test]
fn reloaded_bundle_predicts_identically() {
    let (dataset, predictor) = trained();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropout_model.json");
    predictor.save(&path).unwrap();

    let mut fresh = DropoutPredictor::new();
    fresh.reload(&path).unwrap();

    assert_eq!(
        fresh.predict_batch(dataset.records()),
        predictor.predict_batch(dataset.records())
    );
    assert_eq!(
        fresh.predict_single(&StudentRecord::form_defaults()).unwrap(),
        predictor.predict_single(&StudentRecord::form_defaults()).unwrap()
    );
}

#[test]
fn training_is_reproducible_with_fixed_seed() {
    let (_, a) = trained();
    let (_, b) = trained();
    assert_eq!(a.bundle().unwrap().model, b.bundle().unwrap().model);
    assert_eq!(a.feature_importances().unwrap(), b.feature_importances().unwrap());
}
