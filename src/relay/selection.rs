//! The rocket selection shared by every race viewer

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rocket identifier as issued by the GraphQL API
pub type RocketId = String;

/// Max rockets in a selection (one per player)
pub const MAX_SELECTED: usize = 2;

/// Longest rocket id accepted from the wire
pub const MAX_ROCKET_ID_LEN: usize = 64;

/// Ordered selection of at most two distinct rockets. The first entry is
/// player 1.
///
/// Serialized as a plain JSON array; deserialization rejects anything that
/// breaks the length, id, or uniqueness rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RocketId>", into = "Vec<RocketId>")]
pub struct Selection(Vec<RocketId>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a rocket in or out of the selection.
    ///
    /// A selected rocket is removed and the rest keep their order. A new
    /// rocket is appended, evicting the oldest when the selection is full.
    pub fn toggle(&mut self, rocket_id: &str) -> Result<(), SelectionError> {
        if let Some(pos) = self.0.iter().position(|id| id == rocket_id) {
            self.0.remove(pos);
            return Ok(());
        }

        validate_id(rocket_id)?;
        if self.0.len() >= MAX_SELECTED {
            self.0.remove(0);
        }
        self.0.push(rocket_id.to_string());
        Ok(())
    }

    pub fn contains(&self, rocket_id: &str) -> bool {
        self.0.iter().any(|id| id == rocket_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Both player slots are filled
    pub fn is_complete(&self) -> bool {
        self.0.len() == MAX_SELECTED
    }

    /// The two rockets in player order, if the selection is complete
    pub fn pair(&self) -> Option<(&str, &str)> {
        match self.0.as_slice() {
            [first, second] => Some((first.as_str(), second.as_str())),
            _ => None,
        }
    }

    pub fn ids(&self) -> &[RocketId] {
        &self.0
    }
}

impl TryFrom<Vec<RocketId>> for Selection {
    type Error = SelectionError;

    fn try_from(ids: Vec<RocketId>) -> Result<Self, Self::Error> {
        if ids.len() > MAX_SELECTED {
            return Err(SelectionError::TooMany(ids.len()));
        }
        for (i, id) in ids.iter().enumerate() {
            validate_id(id)?;
            if ids[..i].contains(id) {
                return Err(SelectionError::Duplicate(id.clone()));
            }
        }
        Ok(Self(ids))
    }
}

impl From<Selection> for Vec<RocketId> {
    fn from(selection: Selection) -> Self {
        selection.0
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

fn validate_id(id: &str) -> Result<(), SelectionError> {
    if id.is_empty() {
        return Err(SelectionError::EmptyId);
    }
    if id.len() > MAX_ROCKET_ID_LEN {
        return Err(SelectionError::IdTooLong(id.len()));
    }
    Ok(())
}

/// Reasons a selection payload is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("selection holds {0} rockets, at most 2 allowed")]
    TooMany(usize),

    #[error("rocket id must not be empty")]
    EmptyId,

    #[error("rocket id is {0} bytes, at most 64 allowed")]
    IdTooLong(usize),

    #[error("rocket {0} selected twice")]
    Duplicate(String),
}
