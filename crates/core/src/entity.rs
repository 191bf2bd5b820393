//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Used for records that are not driven through commands (accounts, payments).
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
