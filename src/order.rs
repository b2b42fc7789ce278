//! Traits and types for partially ordered sets.
//!
//! The causal order on timestamps is partial: two timestamps may be
//! incomparable. The derived `Ord` on those same types is the lexical order,
//! a total extension used only for canonical sorting and tie-breaking. This
//! trait keeps the two from being confused.

/// A type partially ordered by the causal order.
pub trait PartialOrder: Eq {
    /// Returns true iff one element is less than or equal to the other.
    fn less_equal(&self, other: &Self) -> bool;

    /// Returns true iff one element is strictly less than the other.
    #[inline]
    fn less_than(&self, other: &Self) -> bool {
        self.less_equal(other) && self != other
    }
}
