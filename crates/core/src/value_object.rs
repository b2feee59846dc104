//! Value object trait: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes.
///
/// `Money` and a sale line's frozen unit price are value objects; two equal
/// amounts are interchangeable. To "change" one, construct a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
