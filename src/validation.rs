/// Validates a Portuguese NIF using the standard mod-11 checksum.
///
/// Non-digit characters are stripped first, so "502 011 378" and
/// "PT502011378" both validate. Anything that does not leave exactly nine
/// digits is rejected.
pub fn is_valid_nif(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|ch| ch.to_digit(10)).collect();
    if digits.len() != 9 {
        return false;
    }

    let total: u32 = digits[..8]
        .iter()
        .enumerate()
        .map(|(i, digit)| digit * (9 - i as u32))
        .sum();

    let modulo = total % 11;
    let check_digit = if modulo < 2 { 0 } else { 11 - modulo };

    check_digit == digits[8]
}

/// Pragmatic email shape check for checkout and registration payloads.
///
/// Deliverability is the identity provider's problem; this only rejects
/// values that cannot possibly be an address.
pub fn is_valid_email(raw: &str) -> bool {
    let value = raw.trim();
    let Some((local, domain)) = value.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if value.chars().any(char::is_whitespace) {
        return false;
    }

    // Domain needs at least one dot with non-empty labels around it.
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}
