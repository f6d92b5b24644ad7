#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn is_ascending(&self) -> bool {
        *self == Self::Asc
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc<S: Into<String>>(property: S) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc<S: Into<String>>(property: S) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Desc,
        }
    }
}

/// An ordered list of sort orders. The default is unsorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(order: Order) -> Self {
        Self { orders: vec![order] }
    }

    pub fn and(mut self, other: Sort) -> Self {
        self.orders.extend(other.orders);
        self
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }
}

impl From<Order> for Sort {
    fn from(order: Order) -> Self {
        Self::by(order)
    }
}

impl From<Vec<Order>> for Sort {
    fn from(orders: Vec<Order>) -> Self {
        Self { orders }
    }
}

/// A zero-based page request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pageable {
    pub page: usize,
    pub size: usize,
    pub sort: Sort,
}

impl Pageable {
    pub fn of(page: usize, size: usize) -> Self {
        Self {
            page,
            size,
            sort: Sort::unsorted(),
        }
    }

    pub fn with_sort<S: Into<Sort>>(mut self, sort: S) -> Self {
        self.sort = sort.into();
        self
    }

    pub fn offset(&self) -> usize {
        self.page * self.size
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub pageable: Pageable,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        if self.pageable.size == 0 {
            return if self.total == 0 { 0 } else { 1 };
        }
        (self.total + self.pageable.size - 1) / self.pageable.size
    }

    pub fn has_next(&self) -> bool {
        self.pageable.page + 1 < self.total_pages()
    }
}

/// A page that knows only whether more content follows, not how much.
#[derive(Clone, Debug)]
pub struct Slice<T> {
    pub content: Vec<T>,
    pub pageable: Pageable,
    pub has_next: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_page_arithmetic() {
        let page = Page {
            content: vec![1, 2],
            pageable: Pageable::of(1, 2),
            total: 5,
        };
        assert_eq!(page.pageable.offset(), 2);
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());
        assert!(!Page {
            content: vec![5],
            pageable: Pageable::of(2, 2),
            total: 5
        }
        .has_next());
    }

    #[test]
    fn test_sort_and() {
        let sort = Sort::by(Order::asc("a")).and(Order::desc("b").into());
        assert_eq!(sort.orders().len(), 2);
        assert!(!sort.orders()[1].direction.is_ascending());
        assert!(Sort::unsorted().is_unsorted());
    }
}
