//! Resolve user-typed ids.
//!
//! Anything that parses as a UUID is taken as-is; otherwise the input is a
//! case-insensitive prefix that must match exactly one candidate.

use uuid::Uuid;

use crate::error::CliError;
use crate::error::Result;

/// Leading characters shown for ids in listings.
pub const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: Uuid) -> String {
    let mut text = id.to_string();
    text.truncate(SHORT_ID_LEN);
    text
}

pub fn resolve(
    kind: &'static str,
    input: &str,
    candidates: impl IntoIterator<Item = Uuid>,
) -> Result<Uuid> {
    let input = input.trim();
    if let Ok(id) = Uuid::parse_str(input) {
        return Ok(id);
    }
    let prefix = input.to_ascii_lowercase();
    if prefix.is_empty() {
        return Err(CliError::NoMatch {
            kind,
            input: input.to_string(),
        });
    }

    let matches: Vec<Uuid> = candidates
        .into_iter()
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(CliError::NoMatch {
            kind,
            input: input.to_string(),
        }),
        _ => Err(CliError::AmbiguousId {
            kind,
            input: input.to_string(),
            count: matches.len(),
        }),
    }
}
