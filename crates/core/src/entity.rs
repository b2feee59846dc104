//! Entity trait: identity that survives state changes.

/// Entity marker + minimal interface.
///
/// A `Product` stays the same product when its price or stock changes; a `Sale`
/// never changes at all but is still addressed by its identifier.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> Self::Id;
}
