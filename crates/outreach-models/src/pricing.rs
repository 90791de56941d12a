//! Credit prices and free-tier constants.

use crate::credits::Credits;
use crate::transaction::OperationKind;

/// Profile extraction: 1 credit.
pub const PROFILE_SCRAPE_COST: Credits = Credits::whole(1);

/// Message generation: half a credit.
pub const MESSAGE_GENERATION_COST: Credits = Credits::from_minor(50);

/// Email lookup: 2 credits.
pub const EMAIL_LOOKUP_COST: Credits = Credits::whole(2);

/// Balance free accounts are topped back up to each period.
pub const FREE_TIER_FLOOR: Credits = Credits::whole(7);

/// Balance granted to a new account on first sign-in.
pub const SIGNUP_CREDITS: Credits = Credits::whole(7);

impl OperationKind {
    /// Default price of one operation.
    pub fn price(&self) -> Credits {
        match self {
            OperationKind::Scrape => PROFILE_SCRAPE_COST,
            OperationKind::Message => MESSAGE_GENERATION_COST,
            OperationKind::EmailLookup => EMAIL_LOOKUP_COST,
        }
    }
}
