use anyhow::{ensure, Result};
use indexmap::IndexMap;

/// Immutable mapping between dataset category ids and contiguous class indexes.
///
/// Class indexes follow ascending category id, so the same category list always
/// produces the same mapping regardless of the order it was read in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMap {
    categories: IndexMap<u64, String>,
}

impl ClassMap {
    pub fn from_categories<I, S>(categories: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, S)>,
        S: Into<String>,
    {
        let mut pairs: Vec<(u64, String)> = categories
            .into_iter()
            .map(|(id, name)| (id, name.into()))
            .collect();
        pairs.sort_by_key(|(id, _)| *id);

        let num_pairs = pairs.len();
        let categories: IndexMap<_, _> = pairs.into_iter().collect();
        ensure!(
            categories.len() == num_pairs,
            "duplicated category ids in class list"
        );
        ensure!(!categories.is_empty(), "class list must not be empty");

        Ok(Self { categories })
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn class_index(&self, category_id: u64) -> Option<usize> {
        self.categories.get_index_of(&category_id)
    }

    pub fn category_id(&self, class_index: usize) -> Option<u64> {
        self.categories.get_index(class_index).map(|(&id, _)| id)
    }

    pub fn name(&self, class_index: usize) -> Option<&str> {
        self.categories
            .get_index(class_index)
            .map(|(_, name)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u64, &str)> + '_ {
        self.categories
            .iter()
            .enumerate()
            .map(|(index, (&id, name))| (index, id, name.as_str()))
    }
}
