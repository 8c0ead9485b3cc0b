//! Line normalization: `email[:;]password` → [`Credential`].
//!
//! Only the first `:` or `;` separates the email from the password, so
//! passwords keep any colons or semicolons they contain. Usernames and
//! domains are lower-cased; passwords are case-sensitive and kept verbatim.
//!
//! An empty username or domain is replaced with the literal placeholder
//! [`USERNAME_PLACEHOLDER`] or [`DOMAIN_PLACEHOLDER`] so the line still
//! produces a row instead of being dropped. An empty email has no `@` and is
//! therefore malformed.

use crate::error::LineError;
use crate::models::Credential;

pub const USERNAME_PLACEHOLDER: &str = "username";
pub const DOMAIN_PLACEHOLDER: &str = "domain";

/// Splits one raw line into a normalized credential.
pub fn normalize_line(line: &str) -> Result<Credential, LineError> {
    let (email, password) = match line.find([':', ';']) {
        Some(at) => (&line[..at], &line[at + 1..]),
        None => (line, ""),
    };

    let (username, domain) =
        split_email(email).ok_or(LineError::Malformed("no '@' in email"))?;

    Ok(Credential {
        username,
        domain,
        password: password.to_string(),
        email: email.to_lowercase(),
    })
}

/// Splits `user@domain` on its first `@` and canonicalizes both halves.
/// Any later `@` stays in the domain.
///
/// Returns `None` when there is no `@`. Shared with the email lookup so
/// queries resolve to the same rows ingestion produced.
pub fn split_email(email: &str) -> Option<(String, String)> {
    let (username, domain) = email.split_once('@')?;
    let username = placeholder_if_empty(username, USERNAME_PLACEHOLDER);
    let domain = placeholder_if_empty(domain, DOMAIN_PLACEHOLDER);
    Some((username, domain))
}

fn placeholder_if_empty(value: &str, placeholder: &str) -> String {
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value.to_lowercase()
    }
}

/// Iterates the non-empty lines of an entry. Lines end in `\r`, `\n`, or both.
pub fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n']).filter(|line| !line.is_empty())
}
