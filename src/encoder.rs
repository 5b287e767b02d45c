use std::collections::HashMap;
use std::hash::Hash;

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::matrix::Matrix;

/// Convert class labels into one-hot column targets and back.
#[derive(Debug, Clone)]
pub struct OneHotEncoder<Label>
where
    Label: Hash + Eq + Clone,
{
    label_to_id: HashMap<Label, usize>,
    id_to_label: Vec<Label>,
}

impl<Label> OneHotEncoder<Label>
where
    Label: Hash + Eq + Clone,
{
    /// Record labels to convert. The position of a label is its row in the
    /// encoded vector.
    pub fn new(label_kinds: Vec<Label>) -> Self {
        let label_to_id = label_kinds
            .iter()
            .cloned()
            .enumerate()
            .map(|(id, label)| (label, id))
            .collect();
        Self {
            label_to_id,
            id_to_label: label_kinds,
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_label.is_empty()
    }

    /// Encode a label as an `(n_labels, 1)` column. Returns `None` for a label
    /// that was not recorded.
    pub fn encode(&self, label: &Label) -> Option<Matrix> {
        let id = *self.label_to_id.get(label)?;
        let mut one_hot = Array2::zeros((self.len(), 1));
        one_hot[[id, 0]] = 1.0;
        Some(one_hot)
    }

    /// Decode a column by its argmax. Ties go to the first label.
    pub fn decode(&self, one_hot: &Matrix) -> Result<&Label> {
        if one_hot.dim() != (self.len(), 1) || self.is_empty() {
            return Err(Error::ShapeMismatch {
                expected: (self.len(), 1),
                actual: one_hot.dim(),
            });
        }
        let id = one_hot
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(max_index, max_elem), (index, &elem)| {
                if elem > max_elem {
                    (index, elem)
                } else {
                    (max_index, max_elem)
                }
            })
            .0;
        Ok(&self.id_to_label[id])
    }
}
