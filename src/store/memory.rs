use std::collections::{BTreeMap, BTreeSet};

use ndarray::{ArrayD, ArrayView1, Ix2};

use super::DataTree;
use crate::error::{EddError, Result};

/// A leaf of the tree.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Array(ArrayD<f64>),
    Text(String),
}

/// In-memory [`DataTree`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTree {
    nodes: BTreeMap<String, Node>,
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(normalize(path))
    }

    fn is_group(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    fn check_free(&self, path: &str) -> Result<()> {
        if self.is_group(path) {
            return Err(EddError::Store(format!("{} is a group", path)));
        }
        Ok(())
    }
}

impl DataTree for MemoryTree {
    fn contains(&self, path: &str) -> bool {
        let path = normalize(path);
        self.nodes.contains_key(path) || self.is_group(path)
    }

    fn create_dataset(&mut self, path: &str, data: ArrayD<f64>) -> Result<()> {
        let path = normalize(path);
        if self.contains(path) {
            return Err(EddError::Store(format!("{} already exists", path)));
        }
        self.nodes.insert(path.to_string(), Node::Array(data));
        Ok(())
    }

    fn write_dataset(&mut self, path: &str, data: ArrayD<f64>) -> Result<()> {
        let path = normalize(path);
        self.check_free(path)?;
        self.nodes.insert(path.to_string(), Node::Array(data));
        Ok(())
    }

    fn write_row(&mut self, path: &str, row: usize, values: &[f64]) -> Result<()> {
        let path = normalize(path);
        let array = match self.nodes.get_mut(path) {
            Some(Node::Array(array)) => array,
            Some(Node::Text(_)) => {
                return Err(EddError::Store(format!("{} is not an array", path)))
            }
            None => return Err(EddError::Store(format!("{} does not exist", path))),
        };

        let mut table = array
            .view_mut()
            .into_dimensionality::<Ix2>()
            .map_err(|_| EddError::Store(format!("{} is not a table", path)))?;
        if row >= table.nrows() || values.len() != table.ncols() {
            return Err(EddError::Store(format!(
                "cannot write {} values to row {} of {} with shape {:?}",
                values.len(),
                row,
                path,
                table.dim()
            )));
        }
        table.row_mut(row).assign(&ArrayView1::from(values));
        Ok(())
    }

    fn write_string(&mut self, path: &str, value: &str) -> Result<()> {
        let path = normalize(path);
        self.check_free(path)?;
        self.nodes
            .insert(path.to_string(), Node::Text(value.to_string()));
        Ok(())
    }

    fn read_array(&self, path: &str) -> Result<ArrayD<f64>> {
        match self.node(path) {
            Some(Node::Array(array)) => Ok(array.clone()),
            Some(Node::Text(_)) => Err(EddError::Store(format!("{} is not an array", path))),
            None => Err(EddError::MissingData(normalize(path).to_string())),
        }
    }

    fn read_string(&self, path: &str) -> Result<String> {
        match self.node(path) {
            Some(Node::Text(text)) => Ok(text.clone()),
            Some(Node::Array(_)) => Err(EddError::Store(format!("{} is not a string", path))),
            None => Err(EddError::MissingData(normalize(path).to_string())),
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let path = normalize(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn remove(&mut self, path: &str) -> bool {
        let path = normalize(path);
        let prefix = format!("{}/", path);
        let before = self.nodes.len();
        self.nodes
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        self.nodes.len() != before
    }
}
