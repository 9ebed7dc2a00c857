//! Monetary amounts as minor units

/// Monetary amount in minor units (e.g. rappen/cents), fixed at two decimal
/// places for display.
pub type Cents = i64;

/// Format an amount in minor units as a decimal string with two places.
///
/// `500` becomes `"5.00"`, `-150` becomes `"-1.50"`.
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
