//! Page results.

use crate::query::PageRequest;

/// One page of entities plus the total they were cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<E> {
    content: Vec<E>,
    total_elements: u64,
    page_number: u64,
    page_size: u64,
}

impl<E> Page<E> {
    pub(crate) fn new(content: Vec<E>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            total_elements,
            page_number: request.page_number(),
            page_size: request.page_size(),
        }
    }

    pub fn content(&self) -> &[E] {
        &self.content
    }

    pub fn into_content(self) -> Vec<E> {
        self.content
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn page_number(&self) -> u64 {
        self.page_number
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    /// `ceil(total_elements / page_size)`; zero for an empty store.
    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(self.page_size)
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.page_number.saturating_add(1) < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page_number > 0
    }

    pub fn is_first(&self) -> bool {
        !self.has_previous()
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    /// Applies `f` to every element, keeping the page coordinates.
    pub fn map<T>(self, f: impl FnMut(E) -> T) -> Page<T> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            total_elements: self.total_elements,
            page_number: self.page_number,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Page;
    use crate::query::PageRequest;

    #[test]
    fn derives_navigation_from_total() {
        let request = PageRequest::of(2, 10).unwrap();
        let page = Page::new(vec![21, 22, 23, 24, 25], &request, 25);
        assert_eq!(page.total_pages(), 3);
        assert!(page.is_last());
        assert!(!page.has_next());
        assert!(page.has_previous());

        let past_end = Page::<i32>::new(Vec::new(), &PageRequest::of(3, 10).unwrap(), 25);
        assert!(!past_end.has_content());
        assert_eq!(past_end.total_elements(), 25);
        assert!(past_end.is_last());
    }

    #[test]
    fn empty_store_has_zero_pages() {
        let page = Page::<i32>::new(Vec::new(), &PageRequest::of(0, 5).unwrap(), 0);
        assert_eq!(page.total_pages(), 0);
        assert!(page.is_first());
        assert!(page.is_last());
    }
}
