use crate::error::{AppResult, PaymentError};

pub const COUNTRY_CODE: &str = "233";

/// Two-digit network prefixes allocated to Ghanaian mobile operators
const MOBILE_PREFIXES: [&str; 14] = [
    "20", "23", "24", "25", "26", "27", "28", "50", "53", "54", "55", "56", "57", "59",
];

/// Rewrite a caller-supplied number into `233XXXXXXXXX` form.
///
/// Separators and a leading `+` are dropped; a national `0` trunk prefix is
/// replaced by the country code and a bare subscriber number gets it
/// prepended. Anything else comes back with only the separators removed.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if digits.len() == 10 && digits.starts_with('0') {
        format!("{}{}", COUNTRY_CODE, &digits[1..])
    } else if digits.len() == 9 && !digits.starts_with('0') {
        format!("{}{}", COUNTRY_CODE, digits)
    } else {
        digits
    }
}

/// True for `233` + a known mobile prefix + 7 subscriber digits
pub fn is_valid_mobile(normalized: &str) -> bool {
    if normalized.len() != 12 || !normalized.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match normalized.strip_prefix(COUNTRY_CODE) {
        Some(national) => MOBILE_PREFIXES.iter().any(|p| national.starts_with(p)),
        None => false,
    }
}

/// Normalize and validate in one step
pub fn parse_mobile_number(raw: &str) -> AppResult<String> {
    let normalized = normalize_phone(raw);
    if !is_valid_mobile(&normalized) {
        return Err(PaymentError::InvalidPhoneNumber(raw.to_string()).into());
    }
    Ok(normalized)
}

/// Mobile-money network as the gateway knows it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub code: &'static str,
    pub display_name: &'static str,
    pub provider_code: &'static str,
}

const NETWORKS: [NetworkConfig; 3] = [
    NetworkConfig {
        code: "mtn",
        display_name: "MTN Mobile Money",
        provider_code: "mtn",
    },
    NetworkConfig {
        code: "vodafone",
        display_name: "Telecel Cash",
        provider_code: "vod",
    },
    NetworkConfig {
        code: "airteltigo",
        display_name: "AirtelTigo Money",
        provider_code: "atl",
    },
];

/// Resolve a network code or one of its aliases, ignoring case
pub fn resolve_network(code: &str) -> AppResult<NetworkConfig> {
    let key = code.trim().to_ascii_lowercase();
    let canonical = match key.as_str() {
        "telecel" | "vod" | "voda" => "vodafone",
        "atl" | "tgo" | "airtel" | "tigo" | "airtel-tigo" => "airteltigo",
        other => other,
    };

    NETWORKS
        .iter()
        .find(|n| n.code == canonical)
        .copied()
        .ok_or_else(|| PaymentError::UnsupportedNetwork(code.to_string()).into())
}
