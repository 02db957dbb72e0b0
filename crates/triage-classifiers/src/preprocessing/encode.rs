//! One-hot expansion of categorical columns into the final design matrix.
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{ColumnData, Frame};
use crate::error::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Layout {
    Numeric,
    Categorical { levels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EncodedColumn {
    name: String,
    parents: Vec<usize>,
    layout: Layout,
}

/// Column layout of the design matrix. Every categorical level gets a 0/1
/// indicator, in schema level order, so all partitions share one layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    columns: Vec<EncodedColumn>,
}

impl OneHotEncoder {
    pub(crate) fn from_frame(frame: &Frame) -> Self {
        let columns = frame
            .columns
            .iter()
            .map(|c| EncodedColumn {
                name: c.name.clone(),
                parents: c.parents.clone(),
                layout: match &c.data {
                    ColumnData::Categorical { levels, .. } => Layout::Categorical {
                        levels: levels.clone(),
                    },
                    _ => Layout::Numeric,
                },
            })
            .collect();
        OneHotEncoder { columns }
    }

    /// Build the design matrix, its column names and their raw parents.
    pub(crate) fn encode(
        &self,
        frame: &Frame,
    ) -> Result<(Array2<f64>, Vec<String>, Vec<Vec<usize>>), ModelError> {
        let n_rows = frame.columns.first().map_or(0, |c| match &c.data {
            ColumnData::Continuous(v) | ColumnData::Binary(v) => v.len(),
            ColumnData::Categorical { codes, .. } => codes.len(),
        });
        let mut names = Vec::new();
        let mut parents = Vec::new();
        let mut blocks: Vec<Vec<f64>> = Vec::new();

        for encoded in &self.columns {
            let column = frame
                .columns
                .iter()
                .find(|c| c.name == encoded.name)
                .ok_or_else(|| {
                    ModelError::schema(format!("column '{}' missing before encoding", encoded.name))
                })?;
            match (&encoded.layout, &column.data) {
                (Layout::Numeric, ColumnData::Continuous(v) | ColumnData::Binary(v)) => {
                    names.push(encoded.name.clone());
                    parents.push(encoded.parents.clone());
                    blocks.push(v.clone());
                }
                (Layout::Categorical { levels }, ColumnData::Categorical { codes, .. }) => {
                    for (l, level) in levels.iter().enumerate() {
                        names.push(format!("{}_{}", encoded.name, level));
                        parents.push(encoded.parents.clone());
                        blocks.push(
                            codes
                                .iter()
                                .map(|&c| if c == l { 1.0 } else { 0.0 })
                                .collect(),
                        );
                    }
                }
                _ => {
                    return Err(ModelError::schema(format!(
                        "column '{}' changed type between fit and apply",
                        encoded.name
                    )))
                }
            }
        }

        let x = Array2::from_shape_fn((n_rows, blocks.len()), |(r, c)| blocks[c][r]);
        Ok((x, names, parents))
    }
}
