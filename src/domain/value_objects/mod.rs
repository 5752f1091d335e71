//! Value objects shared by the aggregates.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Money value object: a decimal amount kept at two fractional digits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const SCALE: u32 = 2;

    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp(Self::SCALE))
    }

    /// Build from an integer count of minor units (cents).
    pub fn from_minor(minor: i64) -> Self {
        Self(Decimal::new(minor, Self::SCALE))
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn multiply(&self, qty: i32) -> Money {
        Money::new(self.0 * Decimal::from(qty))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money::new(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), Add::add)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money::new(amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

pub const MAX_PAGE_SIZE: u32 = 100;

/// A validated page request: `page >= 1`, `1 <= size <= 100`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    page: u32,
    size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error("page must be >= 1")]
    Page,
    #[error("pageSize must be between 1 and {MAX_PAGE_SIZE}")]
    Size,
}

impl Page {
    pub fn new(page: u32, size: u32) -> Result<Self, PageError> {
        if page == 0 {
            return Err(PageError::Page);
        }
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(PageError::Size);
        }
        Ok(Self { page, size })
    }

    pub fn number(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.size)
    }

    /// Slice an already sorted collection.
    pub fn slice<T: Clone>(&self, all: &[T]) -> Vec<T> {
        all.iter()
            .skip(self.offset() as usize)
            .take(self.size as usize)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, page: Page) -> Self {
        Self { data, total, page: page.number(), page_size: page.size() }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_rounds_to_cents() {
        let m = Money::new(Decimal::new(10_005, 3));
        assert_eq!(m.to_string(), "10.00");
        assert_eq!(Money::from_minor(250).to_string(), "2.50");
    }

    #[test]
    fn money_arithmetic() {
        let unit = Money::from_minor(1000) + Money::from_minor(250);
        assert_eq!(unit.multiply(2), Money::from_minor(2500));
        let total: Money = [Money::from_minor(100), Money::from_minor(-30)].into_iter().sum();
        assert_eq!(total, Money::from_minor(70));
        assert!(Money::from_minor(-1).is_negative());
        assert!(!Money::zero().is_negative());
    }

    #[test]
    fn page_bounds() {
        assert_eq!(Page::new(0, 10), Err(PageError::Page));
        assert_eq!(Page::new(1, 0), Err(PageError::Size));
        assert_eq!(Page::new(1, 101), Err(PageError::Size));
        let page = Page::new(3, 100).unwrap();
        assert_eq!(page.offset(), 200);
        assert_eq!(page.limit(), 100);
    }

    #[test]
    fn page_slices_sorted_input() {
        let all: Vec<i32> = (1..=25).collect();
        let page = Page::new(3, 10).unwrap();
        assert_eq!(page.slice(&all), vec![21, 22, 23, 24, 25]);
        assert!(Page::new(4, 10).unwrap().slice(&all).is_empty());
    }
}
