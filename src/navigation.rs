use crate::series::slice_label;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundChange {
    Unchanged,
    Grew,
    Shrunk,
}

#[derive(Debug, Default)]
pub struct GlobalNavigator {
    max_index: usize,
    index: usize,
}

impl GlobalNavigator {
    pub fn new(bounds: &[usize]) -> Self {
        Self {
            max_index: min_bound(bounds),
            index: 0,
        }
    }

    pub fn max_index(&self) -> usize {
        self.max_index
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> String {
        slice_label(self.index, self.max_index)
    }

    pub fn recompute(&mut self, bounds: &[usize]) -> BoundChange {
        let next = min_bound(bounds);
        let change = match next.cmp(&self.max_index) {
            std::cmp::Ordering::Less => BoundChange::Shrunk,
            std::cmp::Ordering::Greater => BoundChange::Grew,
            std::cmp::Ordering::Equal => BoundChange::Unchanged,
        };
        self.max_index = next;
        if change == BoundChange::Shrunk {
            self.index = 0;
        }
        change
    }

    pub fn set_index(&mut self, index: usize) -> usize {
        self.index = index.min(self.max_index);
        self.index
    }
}

fn min_bound(bounds: &[usize]) -> usize {
    bounds.iter().copied().min().unwrap_or(0)
}
