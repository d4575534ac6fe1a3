//! Input Normalization
//!
//! Normalization and hashing of directly identifying information before it is
//! sent to the generate endpoint.

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{InputError, UID2Error};

const MIN_PHONE_NUMBER_DIGITS: usize = 10;
const MAX_PHONE_NUMBER_DIGITS: usize = 15;
const DOMAIN_GMAIL: &str = "gmail.com";

#[derive(Clone, Copy, PartialEq, Eq)]
enum EmailParsingState {
    Starting,
    SubDomain,
}

/// Normalize an email address.
///
/// Lower-cases the address and drops spaces. For `gmail.com` addresses, dots and
/// any `+extension` are removed from the local part.
pub fn normalize_email(email: &str) -> Result<String, UID2Error> {
    let mut pre_sub_domain = String::new();
    let mut pre_sub_domain_specialized = String::new();
    let mut sub_domain = String::new();
    let mut sub_domain_whitespace = String::new();

    let mut state = EmailParsingState::Starting;
    let mut in_extension = false;

    for c in email.to_lowercase().chars() {
        match state {
            EmailParsingState::Starting => match c {
                ' ' => {}
                '@' => state = EmailParsingState::SubDomain,
                '.' => pre_sub_domain.push(c),
                '+' => {
                    pre_sub_domain.push(c);
                    in_extension = true;
                }
                _ => {
                    pre_sub_domain.push(c);
                    if !in_extension {
                        pre_sub_domain_specialized.push(c);
                    }
                }
            },
            EmailParsingState::SubDomain => match c {
                '@' => return Err(InputError::InvalidEmail.into()),
                ' ' => sub_domain_whitespace.push(c),
                _ => {
                    // Interior whitespace is kept, trailing whitespace is not.
                    sub_domain.push_str(&sub_domain_whitespace);
                    sub_domain_whitespace.clear();
                    sub_domain.push(c);
                }
            },
        }
    }

    if sub_domain.is_empty() {
        return Err(InputError::InvalidEmail.into());
    }

    let address = if sub_domain == DOMAIN_GMAIL {
        pre_sub_domain_specialized
    } else {
        pre_sub_domain
    };

    if address.is_empty() {
        return Err(InputError::InvalidEmail.into());
    }

    Ok(format!("{}@{}", address, sub_domain))
}

/// Check that a phone number is already in ITU E.164 format.
pub fn normalize_phone(phone: &str) -> Result<&str, UID2Error> {
    let digits = phone.strip_prefix('+').ok_or(InputError::InvalidPhone)?;

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(InputError::InvalidPhone.into());
    }

    if !(MIN_PHONE_NUMBER_DIGITS..=MAX_PHONE_NUMBER_DIGITS).contains(&digits.len()) {
        return Err(InputError::InvalidPhone.into());
    }

    Ok(phone)
}

/// SHA-256 hash of the identifier, standard base64 encoded.
pub fn hash_identifier(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest)
}
