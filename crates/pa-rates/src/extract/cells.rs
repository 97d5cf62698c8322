//! Locale-tolerant parsing of individual table cells.

use std::str::FromStr;

use rust_decimal::Decimal;

/// Cell text that means "nothing" in fee and term columns.
const NONE_TOKENS: [&str; 9] = ["", "none", "no", "n/a", "na", "-", "--", "$0", "free"];

/// Parse the first number in `text`, ignoring currency symbols, units,
/// percent signs and thousands separators.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let run = numeric_run(text)?;
    let normalized = normalize_separators(&run);
    Decimal::from_str(&normalized).ok()
}

/// Parse a fee cell. `Some(0)` for "none"-style text, `None` when the text
/// carries no number at all.
pub fn parse_fee(text: &str) -> Option<Decimal> {
    if is_none_token(text) {
        return Some(Decimal::ZERO);
    }
    parse_decimal(text)
}

/// Parse a contract term into months. Month-to-month and blank terms are 0.
pub fn parse_term_months(text: &str) -> Option<u32> {
    let lower = text.trim().to_ascii_lowercase();
    if is_none_token(&lower)
        || lower.contains("month-to-month")
        || lower.contains("month to month")
        || lower == "mtm"
        || lower == "variable"
    {
        return Some(0);
    }
    let value = parse_decimal(&lower)?;
    if value.is_sign_negative() {
        return None;
    }
    let months = if lower.contains("year") || lower.contains("yr") {
        value * Decimal::from(12)
    } else {
        value
    };
    u32::try_from(months.round()).ok()
}

/// Interpret a yes/no style cell. A positive amount counts as "yes".
pub fn parse_flag(text: &str) -> bool {
    let lower = text.trim().to_ascii_lowercase();
    match lower.as_str() {
        "yes" | "y" | "true" => true,
        _ if is_none_token(&lower) => false,
        _ => parse_decimal(&lower).is_some_and(|v| v > Decimal::ZERO),
    }
}

pub fn is_none_token(text: &str) -> bool {
    let lower = text.trim().to_ascii_lowercase();
    NONE_TOKENS.contains(&lower.as_str())
}

fn numeric_run(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().enumerate().position(|(i, c)| {
        c.is_ascii_digit()
            || (*c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
    })?;

    let mut run = String::new();
    if start > 0 && chars[start - 1] == '-' {
        run.push('-');
    }
    for c in &chars[start..] {
        if c.is_ascii_digit() || *c == '.' || *c == ',' {
            run.push(*c);
        } else {
            break;
        }
    }
    while run.ends_with('.') || run.ends_with(',') {
        run.pop();
    }
    Some(run)
}

fn normalize_separators(run: &str) -> String {
    let last_dot = run.rfind('.');
    let last_comma = run.rfind(',');
    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => run.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => run.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = run.len() - comma - 1;
            if run.matches(',').count() == 1 && (1..=2).contains(&decimals) {
                run.replace(',', ".")
            } else {
                run.replace(',', "")
            }
        }
        (Some(_), None) if run.matches('.').count() > 1 => run.replace('.', ""),
        _ => run.to_string(),
    }
}
