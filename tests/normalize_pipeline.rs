use std::path::Path;

use chrono::NaiveDate;

use shelfwatch::config::{NormalizerSettings, NumbersSettings};
use shelfwatch::normalizer;

const INPUT: &str = "\
Product Code,Product,FISCAL_QTR_YEAR_NAME,FISCAL_WEEK_YEAR_NAME,Sessions,PDP Add to Cart Units,Units Sold
100,iPhone 15,FY23Q1,FY23W01,\"1,200\",40,12
100,iPhone 15,FY23Q1,FY23W03,\"1,350\",44,15
100,iPhone 15,FY23Q1,FY23W04,\"1,410\",47,16
100,iPhone 15,FY23Q1,FY23W05,\"1,380\",45,14
200,AirPods,FY23Q1,FY23W01,10,0,0
200,AirPods,FY23Q1,FY23W02,0,0,0
200,AirPods,FY23Q1,FY23W03,0,0,0
200,AirPods,FY23Q1,FY23W04,0,0,0
200,AirPods,FY23Q1,FY23W05,0,0,0
200,AirPods,FY23Q1,FY23W06,0,0,0
200,AirPods,FY23Q1,FY23W07,0,0,0
200,AirPods,FY23Q1,FY23W08,0,0,0
200,AirPods,FY23Q1,FY23W09,0,0,0
200,AirPods,FY23Q1,FY23W10,0,0,0
,Missing code,FY23Q1,FY23W01,1,1,1
";

fn settings(dir: &Path, run: &str) -> NormalizerSettings {
    let mut settings = NormalizerSettings::default();
    settings.token_env = None;
    settings.output = dir.join(format!("{run}.csv"));
    settings.diagnostics = Some(dir.join(format!("{run}.json")));
    settings.forecast.steps = 3;
    settings
}

fn non_forecast_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|line| !line.ends_with(",Forecast"))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_normalize_csv_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("export.csv");
    std::fs::write(&input, INPUT).unwrap();
    let input = input.to_string_lossy().into_owned();

    let first = settings(dir.path(), "first");
    let as_of = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let diagnostics = normalizer::run(&input, &first, &NumbersSettings::default(), as_of)
        .await
        .unwrap();

    assert_eq!(diagnostics.rows_read, 15);
    assert_eq!(diagnostics.rows_dropped_missing_product, 1);
    assert_eq!(diagnostics.products, 2);
    assert_eq!(diagnostics.filled_weeks, 1);
    assert_eq!(diagnostics.forecast_rows, 6);

    let mut reader = csv::Reader::from_path(&first.output).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 5 + 10 + 6);

    // Gap week for product 100
    assert_eq!(&rows[1][3], "FY23W02");
    assert_eq!(&rows[1][4], "0");
    assert_eq!(&rows[1][8], "2022-10-08");
    assert_eq!(&rows[1][9], "Filled");
    assert_eq!(&rows[0][4], "1200");
    assert_eq!(&rows[0][7], "2022-10-01");

    // Forecasts come last, product 100 first
    let forecasts: Vec<&csv::StringRecord> = rows.iter().filter(|r| &r[9] == "Forecast").collect();
    assert_eq!(forecasts.len(), 6);
    assert!(rows[15..].iter().all(|r| &r[9] == "Forecast"));
    assert_eq!(&forecasts[0][0], "100");
    assert_eq!(&forecasts[0][3], "FY23W06");
    assert_eq!(&forecasts[3][0], "200");
    assert_eq!(&forecasts[3][3], "FY23W11");
    assert_eq!(&forecasts[3][8], "2022-12-10");

    // Below the non-zero threshold: every AirPods forecast is zero
    for row in &forecasts[3..] {
        assert_eq!(&row[4], "0");
        assert_eq!(&row[5], "0");
        assert_eq!(&row[6], "0");
    }

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(first.diagnostics.as_ref().unwrap()).unwrap())
            .unwrap();
    assert_eq!(json["as_of"], "2024-01-15");
    assert_eq!(json["rows_dropped_missing_product"], 1);

    // Same input, different reference date: identical weekly rows
    let second = settings(dir.path(), "second");
    let later = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    normalizer::run(&input, &second, &NumbersSettings::default(), later)
        .await
        .unwrap();
    assert_eq!(non_forecast_lines(&first.output), non_forecast_lines(&second.output));
}

#[tokio::test]
async fn test_missing_columns_abort() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("export.csv");
    std::fs::write(&input, "Product Code,Product\n1,iPad\n").unwrap();

    let settings = settings(dir.path(), "out");
    let err = normalizer::run(
        &input.to_string_lossy(),
        &settings,
        &NumbersSettings::default(),
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("FISCAL_WEEK_YEAR_NAME"), "{err}");
    assert!(!settings.output.exists());
}

#[tokio::test]
async fn test_missing_token_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path(), "out");
    settings.token_env = Some("SHELFWATCH_TOKEN_NOT_SET_IN_TESTS".to_string());

    let err = normalizer::run(
        "https://raw.githubusercontent.com/acme/data/main/export.xlsx",
        &settings,
        &NumbersSettings::default(),
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    )
    .await
    .unwrap_err();
    assert!(normalizer::is_missing_token(&err));
}
