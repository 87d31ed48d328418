use crate::dataset::{DataSplits, DatasetKind, Sample};
use crate::error::DatasetError;

/// Parse CSV bytes into samples.
///
/// The first row is a header. Every other row holds `input_dim` numeric
/// feature columns followed by one numeric label column.
pub fn parse_csv_samples(bytes: &[u8], input_dim: usize) -> Result<Vec<Sample>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(bytes);
    let mut samples = Vec::new();

    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let row = idx + 1;
        if record.is_empty() {
            continue;
        }
        let found = record.len().saturating_sub(1);
        if found != input_dim {
            return Err(DatasetError::ShapeMismatch { row, expected: input_dim, found });
        }

        let mut values = Vec::with_capacity(record.len());
        for field in &record {
            let value: f64 = field
                .parse()
                .map_err(|_| DatasetError::Malformed(format!("row {row}: `{field}` is not a number")))?;
            values.push(value);
        }
        let label = values.pop().unwrap_or_default();
        samples.push(Sample { features: values, label });
    }

    Ok(samples)
}

/// Arrange parsed samples into the split layout the trainer expects for `kind`.
pub fn build_splits(
    kind: &DatasetKind,
    train: Vec<Sample>,
    validation: Option<Vec<Sample>>,
) -> Result<DataSplits, DatasetError> {
    if train.is_empty() {
        return Err(DatasetError::Empty("training split has no rows".to_string()));
    }

    match kind {
        DatasetKind::Images => {
            let validation = validation.ok_or_else(|| DatasetError::MissingValidation { kind: kind.to_string() })?;
            Ok(DataSplits::Paired { train, validation })
        }
        DatasetKind::Tabular(_) => {
            let (train_x, train_y) = unzip(train);
            let (val_x, val_y) = unzip(validation.unwrap_or_default());
            Ok(DataSplits::Columns { data: (train_x, val_x), labels: (train_y, val_y) })
        }
    }
}

fn unzip(samples: Vec<Sample>) -> (Vec<Vec<f64>>, Vec<f64>) {
    samples.into_iter().map(|s| (s.features, s.label)).unzip()
}
