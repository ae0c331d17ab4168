use quarry_common::{Error, Result};
use tinyvec::ArrayVec;

/// A growable sequence whose elements keep their addresses while it grows.
///
/// Elements live in separately boxed sections of `S` elements each, so the
/// sequence is not contiguous. Appending never moves existing elements.
/// [`clear`](StableVector::clear) keeps the sections allocated for reuse.
///
/// Sections are always filled in order: every section before the last
/// occupied one is full, and every section after it is empty.
pub struct StableVector<T: Default, const S: usize> {
    sections: Vec<Box<ArrayVec<[T; S]>>>,
    len: usize,
}

impl<T: Default, const S: usize> StableVector<T, S> {
    pub const SECTION_SIZE: usize = S;

    pub fn new() -> StableVector<T, S> {
        const {
            assert!(S > 0, "sections must hold at least one element");
        }
        StableVector {
            sections: Vec::new(),
            len: 0,
        }
    }

    /// Creates a vector holding `len` copies of `fill`.
    pub fn with_len(len: usize, fill: T) -> StableVector<T, S>
    where
        T: Clone,
    {
        let mut vector = Self::new();
        vector.grow_to(len, fill);
        vector
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of elements the allocated sections can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.sections.len() * S
    }

    /// Bounds-checked element access.
    pub fn at(&self, index: usize) -> Result<&T> {
        if index >= self.len {
            return Err(Error::buffer_overrun(index, self.len));
        }
        Ok(&self.sections[index / S][index % S])
    }

    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        if index >= self.len {
            return Err(Error::buffer_overrun(index, self.len));
        }
        Ok(&mut self.sections[index / S][index % S])
    }

    /// Appends `value`, returning a reference to it at its final address.
    pub fn push(&mut self, value: T) -> &mut T {
        let section = self.section_for(self.len);
        self.len += 1;
        let section = &mut self.sections[section];
        section.push(value);
        let last = section.len() - 1;
        &mut section[last]
    }

    /// Appends copies of `fill` until the vector holds `len` elements.
    pub fn grow_to(&mut self, len: usize, fill: T)
    where
        T: Clone,
    {
        while self.len < len {
            self.push(fill.clone());
        }
    }

    /// Allocates sections until at least `capacity` elements fit.
    pub fn reserve(&mut self, capacity: usize) {
        let sections = capacity.div_ceil(S);
        self.sections
            .reserve(sections.saturating_sub(self.sections.len()));
        while self.sections.len() < sections {
            self.sections.push(Box::default());
        }
    }

    /// Drops every element, keeping the sections for reuse.
    pub fn clear(&mut self) {
        for section in &mut self.sections {
            section.clear();
        }
        self.len = 0;
    }

    /// Removes the elements for which `predicate` returns `true`. The elements
    /// that stay keep their order; those after a removed one shift down.
    pub fn erase_if(&mut self, mut predicate: impl FnMut(&T) -> bool) {
        let mut kept = 0;
        for index in 0..self.len {
            let (section, slot) = (index / S, index % S);
            if predicate(&self.sections[section][slot]) {
                continue;
            }
            if kept != index {
                let value = std::mem::take(&mut self.sections[section][slot]);
                self.sections[kept / S][kept % S] = value;
            }
            kept += 1;
        }
        for (i, section) in self.sections.iter_mut().enumerate() {
            section.truncate(kept.saturating_sub(i * S).min(S));
        }
        self.len = kept;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.sections.iter().flat_map(|section| section.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.sections.iter_mut().flat_map(|section| section.iter_mut())
    }

    fn section_for(&mut self, index: usize) -> usize {
        let section = index / S;
        if self.sections.len() <= section {
            self.sections.push(Box::default());
        }
        section
    }
}

impl<T: Default, const S: usize> Default for StableVector<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default, const S: usize> std::ops::Index<usize> for StableVector<T, S> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        assert!(index < self.len, "index {index} out of bounds: {}", self.len);
        &self.sections[index / S][index % S]
    }
}

impl<T: Default, const S: usize> std::ops::IndexMut<usize> for StableVector<T, S> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        assert!(index < self.len, "index {index} out of bounds: {}", self.len);
        &mut self.sections[index / S][index % S]
    }
}

impl<T: Default, const S: usize> Extend<T> for StableVector<T, S> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<T: Default, const S: usize> FromIterator<T> for StableVector<T, S> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut vector = Self::new();
        vector.extend(iter);
        vector
    }
}

impl<T: Default + std::fmt::Debug, const S: usize> std::fmt::Debug for StableVector<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
