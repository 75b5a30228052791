//! Contacts produced by the narrow phase.

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handle of a geom registered with a collision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeomId(pub usize);

impl GeomId {
    /// Create a new geom ID.
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw index.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for GeomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Geom({})", self.0)
    }
}

/// Stable identity assigned to a contact by contact persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactId(pub u64);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Contact({})", self.0)
    }
}

/// A single contact point between two shapes.
///
/// `normal` points from the first shape toward the second; moving the
/// second shape by `normal * depth` separates the pair.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Contact {
    /// World-space contact position.
    pub position: Point3<f64>,
    /// Unit contact normal (zero for a touching contact with no direction).
    pub normal: Vector3<f64>,
    /// Penetration depth (non-negative).
    pub depth: f64,
    /// Persistent identity, set only by contact persistence.
    pub id: Option<ContactId>,
}

impl Contact {
    /// Create a contact without a persistent identity.
    #[must_use]
    pub const fn new(position: Point3<f64>, normal: Vector3<f64>, depth: f64) -> Self {
        Self {
            position,
            normal,
            depth,
            id: None,
        }
    }

    /// Same contact seen from the other shape.
    #[must_use]
    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            ..*self
        }
    }
}

/// Contacts produced for one shape or geom pair.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactSet {
    contacts: SmallVec<[Contact; 4]>,
}

impl ContactSet {
    /// Create an empty contact set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set holding a single contact.
    #[must_use]
    pub fn single(contact: Contact) -> Self {
        let mut set = Self::new();
        set.push(contact);
        set
    }

    /// Append a contact.
    pub fn push(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    /// Append every contact of `other`.
    pub fn extend(&mut self, other: Self) {
        self.contacts.extend(other.contacts);
    }

    /// Number of contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// True if there are no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Iterate over the contacts.
    pub fn iter(&self) -> std::slice::Iter<'_, Contact> {
        self.contacts.iter()
    }

    /// Contacts as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Contact] {
        &self.contacts
    }

    /// The contact with the largest penetration depth.
    #[must_use]
    pub fn deepest(&self) -> Option<&Contact> {
        self.contacts.iter().max_by(|a, b| a.depth.total_cmp(&b.depth))
    }

    /// Reverse every normal (pair seen in swapped order).
    #[must_use]
    pub fn flipped(mut self) -> Self {
        for c in &mut self.contacts {
            c.normal = -c.normal;
        }
        self
    }

    /// Keep at most `max` contacts, dropping the shallowest first.
    pub fn limit(&mut self, max: usize) {
        if self.contacts.len() <= max {
            return;
        }
        self.contacts.sort_by(|a, b| b.depth.total_cmp(&a.depth));
        self.contacts.truncate(max);
    }
}

impl FromIterator<Contact> for ContactSet {
    fn from_iter<I: IntoIterator<Item = Contact>>(iter: I) -> Self {
        Self {
            contacts: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ContactSet {
    type Item = Contact;
    type IntoIter = smallvec::IntoIter<[Contact; 4]>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.into_iter()
    }
}

impl<'a> IntoIterator for &'a ContactSet {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.iter()
    }
}
