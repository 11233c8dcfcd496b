use crate::profile::ProfileError;
use crate::record_store::{Address, BankAccount};

pub const LABEL_MIN_EXCLUSIVE: usize = 2;
pub const LABEL_MAX_EXCLUSIVE: usize = 51;
const PHONE_INTERNATIONAL_DIGITS: std::ops::RangeInclusive<usize> = 6..=15;
const PHONE_SHORT_CODE_DIGITS: std::ops::RangeInclusive<usize> = 3..=8;

/// Byte length strictly between 2 and 51.
pub fn is_valid_label(label: &str) -> bool {
    let length = label.len();
    let valid = length > LABEL_MIN_EXCLUSIVE && length < LABEL_MAX_EXCLUSIVE;
    if !valid {
        tracing::debug!(target: "identity.validation", label, "invalid label");
    }
    valid
}

pub fn validate_label(label: &str) -> Result<(), ProfileError> {
    if is_valid_label(label) {
        Ok(())
    } else {
        Err(ProfileError::invalid(
            "label",
            format!("Invalid label '{label}': length must be between 3 and 50."),
        ))
    }
}

/// Accepts `+` followed by 6 to 15 digits, or a bare 3 to 8 digit short code.
pub fn is_valid_phonenumber(value: &str) -> bool {
    let (digits, range) = match value.strip_prefix('+') {
        Some(rest) => (rest, PHONE_INTERNATIONAL_DIGITS),
        None => (value, PHONE_SHORT_CODE_DIGITS),
    };
    range.contains(&digits.len()) && digits.bytes().all(|byte| byte.is_ascii_digit())
}

pub fn validate_phonenumber(value: &str) -> Result<(), ProfileError> {
    if is_valid_phonenumber(value) {
        Ok(())
    } else {
        tracing::debug!(target: "identity.validation", phonenumber = value, "invalid phonenumber");
        Err(ProfileError::invalid(
            "phonenumber",
            format!("Invalid phone number '{value}'."),
        ))
    }
}

pub fn validate_email_address(value: &str) -> Result<(), ProfileError> {
    let trimmed = value.trim();
    let well_formed = trimmed.len() == value.len()
        && trimmed
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if well_formed {
        Ok(())
    } else {
        Err(ProfileError::invalid(
            "emailaddress",
            format!("Invalid email address '{value}'."),
        ))
    }
}

pub fn validate_address(address: &Address) -> Result<(), ProfileError> {
    require_non_empty("address.street", &address.street)?;
    require_non_empty("address.nr", &address.nr)?;
    require_non_empty("address.city", &address.city)?;
    require_non_empty("address.postalcode", &address.postalcode)?;
    require_non_empty("address.country", &address.country)
}

pub fn validate_bank_account(account: &BankAccount) -> Result<(), ProfileError> {
    require_non_empty("bank.iban", &account.iban)?;
    require_non_empty("bank.bic", &account.bic)?;
    require_non_empty("bank.country", &account.country)
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ProfileError> {
    if value.trim().is_empty() {
        return Err(ProfileError::invalid(field, format!("{field} is required.")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_length_boundaries() {
        assert!(!is_valid_label(""));
        assert!(!is_valid_label("ab"));
        assert!(is_valid_label("abc"));
        assert!(is_valid_label(&"x".repeat(50)));
        assert!(!is_valid_label(&"x".repeat(51)));
    }

    #[test]
    fn validate_label_reports_invalid_with_field() {
        let error = validate_label("ab").expect_err("two-byte label");
        assert!(matches!(error, ProfileError::Invalid { field: "label", .. }));
    }

    #[test]
    fn phonenumber_accepts_international_and_short_codes() {
        assert!(is_valid_phonenumber("+32478123456"));
        assert!(is_valid_phonenumber("+123456"));
        assert!(is_valid_phonenumber("112"));
        assert!(is_valid_phonenumber("12345678"));
    }

    #[test]
    fn phonenumber_rejects_malformed_values() {
        for value in [
            "",
            "+",
            "+12345",
            "+1234567890123456",
            "12",
            "123456789",
            "+32 478 12 34 56",
            "not-a-number",
            "++3247812345",
        ] {
            assert!(!is_valid_phonenumber(value), "{value} should be rejected");
        }
    }

    #[test]
    fn email_address_requires_local_and_domain_parts() {
        assert!(validate_email_address("a@x.com").is_ok());
        assert!(validate_email_address("a@").is_err());
        assert!(validate_email_address("@x.com").is_err());
        assert!(validate_email_address("ax.com").is_err());
        assert!(validate_email_address(" a@x.com").is_err());
    }

    #[test]
    fn address_requires_structural_fields() {
        let mut address = Address {
            street: "Main".to_string(),
            nr: "1".to_string(),
            city: "Ghent".to_string(),
            postalcode: "9000".to_string(),
            country: "BE".to_string(),
            other: None,
        };
        assert!(validate_address(&address).is_ok());
        address.city = "  ".to_string();
        let error = validate_address(&address).expect_err("blank city");
        assert!(matches!(
            error,
            ProfileError::Invalid {
                field: "address.city",
                ..
            }
        ));

        address.city = "Ghent".to_string();
        address.nr = String::new();
        let error = validate_address(&address).expect_err("blank house number");
        assert!(matches!(
            error,
            ProfileError::Invalid {
                field: "address.nr",
                ..
            }
        ));
    }
}
