use std::fmt;

use chrono::NaiveDateTime;

use crate::validation::{KioskValue, ValidatedRecord};

/// The two kinds of interaction a kiosk can report. Each kind has its own reference table
/// and its own interaction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Request,
    Rating,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Request => "request",
            InteractionKind::Rating => "rating",
        }
    }

    pub fn reference_table(&self) -> &'static str {
        match self {
            InteractionKind::Request => "request",
            InteractionKind::Rating => "rating",
        }
    }

    pub fn natural_key_column(&self) -> &'static str {
        match self {
            InteractionKind::Request => "request_value",
            InteractionKind::Rating => "rating_value",
        }
    }

    pub fn reference_id_column(&self) -> &'static str {
        match self {
            InteractionKind::Request => "request_id",
            InteractionKind::Rating => "rating_id",
        }
    }

    pub fn interaction_table(&self) -> &'static str {
        match self {
            InteractionKind::Request => "request_interaction",
            InteractionKind::Rating => "rating_interaction",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified kiosk event, still carrying the natural reference value from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Request {
        occurred_at: NaiveDateTime,
        exhibit_id: i16,
        request_type: i16,
    },
    Rating {
        occurred_at: NaiveDateTime,
        exhibit_id: i16,
        rating_value: i16,
    },
}

impl Interaction {
    pub fn kind(&self) -> InteractionKind {
        match self {
            Interaction::Request { .. } => InteractionKind::Request,
            Interaction::Rating { .. } => InteractionKind::Rating,
        }
    }

    pub fn occurred_at(&self) -> NaiveDateTime {
        match self {
            Interaction::Request { occurred_at, .. } | Interaction::Rating { occurred_at, .. } => {
                *occurred_at
            }
        }
    }

    pub fn exhibit_id(&self) -> i16 {
        match self {
            Interaction::Request { exhibit_id, .. } | Interaction::Rating { exhibit_id, .. } => {
                *exhibit_id
            }
        }
    }

    /// The natural value to look up in this kind's reference table.
    pub fn lookup_key(&self) -> i16 {
        match self {
            Interaction::Request { request_type, .. } => *request_type,
            Interaction::Rating { rating_value, .. } => *rating_value,
        }
    }
}

/// An interaction whose reference value has been swapped for the reference table's id,
/// ready to be written as a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedInteraction {
    Request {
        occurred_at: NaiveDateTime,
        exhibit_id: i16,
        request_id: i16,
    },
    Rating {
        occurred_at: NaiveDateTime,
        exhibit_id: i16,
        rating_id: i16,
    },
}

impl ResolvedInteraction {
    pub fn kind(&self) -> InteractionKind {
        match self {
            ResolvedInteraction::Request { .. } => InteractionKind::Request,
            ResolvedInteraction::Rating { .. } => InteractionKind::Rating,
        }
    }

    pub fn occurred_at(&self) -> NaiveDateTime {
        match self {
            ResolvedInteraction::Request { occurred_at, .. }
            | ResolvedInteraction::Rating { occurred_at, .. } => *occurred_at,
        }
    }

    pub fn exhibit_id(&self) -> i16 {
        match self {
            ResolvedInteraction::Request { exhibit_id, .. }
            | ResolvedInteraction::Rating { exhibit_id, .. } => *exhibit_id,
        }
    }

    pub fn reference_id(&self) -> i16 {
        match self {
            ResolvedInteraction::Request { request_id, .. } => *request_id,
            ResolvedInteraction::Rating { rating_id, .. } => *rating_id,
        }
    }
}

/// Exhibits are numbered from 1 in the store, sites from 0 on the kiosks.
pub fn exhibit_id_for_site(site: u8) -> i16 {
    i16::from(site) + 1
}

pub fn classify(record: &ValidatedRecord) -> Interaction {
    let occurred_at = record.occurred_at();
    let exhibit_id = exhibit_id_for_site(record.site());

    match record.value() {
        KioskValue::Assistance { request_type } => Interaction::Request {
            occurred_at,
            exhibit_id,
            request_type: i16::from(request_type),
        },
        KioskValue::Rating(rating_value) => Interaction::Rating {
            occurred_at,
            exhibit_id,
            rating_value: i16::from(rating_value),
        },
    }
}
