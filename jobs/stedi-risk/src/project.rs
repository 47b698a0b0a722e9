//! Narrowing of each stream to the fields the join needs.

use crate::model::{CustomerProfile, CustomerRisk, EmailBirthYear, RiskEvent};

/// Text of `birth_day` before its first `-`; the whole string when there
/// is no `-`.
pub fn birth_year(birth_day: &str) -> &str {
    birth_day.split('-').next().unwrap_or(birth_day)
}

/// Keep profiles that have both an email and a birthday, reduced to
/// `(email, birthYear)`.
pub fn project(profile: CustomerProfile) -> Option<EmailBirthYear> {
    let email = profile.email?;
    let birth_day = profile.birth_day?;
    Some(EmailBirthYear {
        birth_year: birth_year(&birth_day).to_string(),
        email,
    })
}

/// Reduce a risk event to `(customer, score)`. An empty event, one that
/// failed to decode entirely, yields nothing.
pub fn project_risk(event: RiskEvent) -> Option<CustomerRisk> {
    if event.is_empty() {
        return None;
    }
    Some(CustomerRisk {
        customer: event.customer,
        score: event.score,
    })
}
