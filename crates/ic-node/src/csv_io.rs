//! CSV dataset loading for the LR algorithm.
//!
//! File I/O formats are out of scope for the handshake core itself, but the
//! runtime still needs a concrete loader to drive the training loop end to
//! end.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error reading {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("csv error reading {path}: {source}")]
    Csv { path: String, source: csv::Error },
    #[error("dataset must be 2-dimensional and non-empty")]
    EmptyOrRagged,
    #[error("row {0} has {1} columns, expected {2}")]
    RaggedRow(usize, usize, usize),
}

pub struct LrDataset {
    /// Feature matrix, `sample_size` rows by `feature_num` columns.
    pub x: Vec<Vec<f64>>,
    /// Label column. Zeros when this party does not hold the label: the
    /// last column is split off as `y` only for the label owner.
    pub y: Vec<f64>,
    pub sample_size: i64,
    pub feature_num: i32,
}

/// Loads a CSV dataset, optionally skipping a header/metadata prefix of
/// `skip_rows` lines. When `has_label` is true, the last column is split off
/// as `y` and the remaining columns are the features.
pub fn load_lr_dataset(path: &Path, skip_rows: usize, has_label: bool) -> Result<LrDataset, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|source| DatasetError::Csv { path: path.display().to_string(), source })?;

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (i, record) in reader.records().enumerate() {
        if i < skip_rows {
            continue;
        }
        let record = record.map_err(|source| DatasetError::Csv { path: path.display().to_string(), source })?;
        let row: Result<Vec<f64>, _> = record.iter().map(|field| field.trim().parse::<f64>()).collect();
        let row = row.map_err(|_| DatasetError::EmptyOrRagged)?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(DatasetError::EmptyOrRagged);
    }
    let width = rows[0].len();
    for (i, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(DatasetError::RaggedRow(i, row.len(), width));
        }
    }

    let sample_size = rows.len() as i64;
    let (x, y) = if has_label {
        let feature_num = width.saturating_sub(1);
        let mut x = Vec::with_capacity(rows.len());
        let mut y = Vec::with_capacity(rows.len());
        for row in rows {
            let (features, label) = row.split_at(feature_num);
            x.push(features.to_vec());
            y.push(label[0]);
        }
        (x, y)
    } else {
        let y = vec![0.0; rows.len()];
        (rows, y)
    };

    let feature_num = x[0].len() as i32;
    if feature_num <= 0 {
        return Err(DatasetError::EmptyOrRagged);
    }

    Ok(LrDataset { x, y, sample_size, feature_num })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_labeled_dataset_skipping_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "f1,f2,label").unwrap();
        writeln!(file, "1.0,2.0,1.0").unwrap();
        writeln!(file, "3.0,4.0,0.0").unwrap();

        let dataset = load_lr_dataset(file.path(), 1, true).unwrap();
        assert_eq!(dataset.sample_size, 2);
        assert_eq!(dataset.feature_num, 2);
        assert_eq!(dataset.x[0], vec![1.0, 2.0]);
        assert_eq!(dataset.y, vec![1.0, 0.0]);
    }

    #[test]
    fn loads_unlabeled_dataset_with_zero_labels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.0,2.0,3.0").unwrap();
        writeln!(file, "4.0,5.0,6.0").unwrap();

        let dataset = load_lr_dataset(file.path(), 0, false).unwrap();
        assert_eq!(dataset.feature_num, 3);
        assert_eq!(dataset.y, vec![0.0, 0.0]);
    }

    #[test]
    fn rejects_ragged_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.0,2.0").unwrap();
        writeln!(file, "1.0,2.0,3.0").unwrap();

        assert!(load_lr_dataset(file.path(), 0, false).is_err());
    }
}
