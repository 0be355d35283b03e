//! Server-confirmed family membership.

use fireledger_api_types::Family;

/// What the server last said about the current user's family.
///
/// `confirmed` is only ever set from a successful membership response; a
/// missing or failed response leaves the membership unconfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FamilyMembership {
    pub family_id: Option<String>,
    pub family_name: Option<String>,
    pub confirmed: bool,
}

impl FamilyMembership {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_family(family: Option<&Family>) -> Self {
        match family {
            Some(family) => Self {
                family_id: Some(family.id.clone()),
                family_name: Some(family.name.clone()),
                confirmed: true,
            },
            None => Self::none(),
        }
    }

    pub fn is_member(&self) -> bool {
        self.confirmed && self.family_id.is_some()
    }
}
