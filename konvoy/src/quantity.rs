/*
 * Kubernetes resource quantities (`500m`, `0.5`, `1Gi`, `1024Mi`, `1e3`).
 * The apiserver stores them in canonical form, so a limit read back from
 * the cluster rarely matches the manifest text it was written from.
 */

const NANOS: i32 = 9;

/*
 * The value of a quantity in billionths of its unit.  Precision below
 * that is truncated.  None when the text is not a quantity.
 */
pub fn parse(quantity: &str) -> Option<i128> {
    let quantity = quantity.trim();
    let split = quantity
	.find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
	.unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);

    let (negative, digits) = match number.strip_prefix('-') {
	Some(digits) => (true, digits),
	None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
	return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
	return None;
    }
    let mantissa: i128 = format!("{}{}", whole, fraction).parse().ok()?;

    let (factor, exponent): (i128, i32) = match suffix {
	"" => (1, 0),
	"n" => (1, -9),
	"u" => (1, -6),
	"m" => (1, -3),
	"k" => (1, 3),
	"M" => (1, 6),
	"G" => (1, 9),
	"T" => (1, 12),
	"P" => (1, 15),
	"E" => (1, 18),
	"Ki" => (1 << 10, 0),
	"Mi" => (1 << 20, 0),
	"Gi" => (1 << 30, 0),
	"Ti" => (1 << 40, 0),
	"Pi" => (1 << 50, 0),
	"Ei" => (1 << 60, 0),
	other => {
	    let exponent = other.strip_prefix('e').or_else(|| other.strip_prefix('E'))?;
	    (1, exponent.parse().ok()?)
	},
    };

    let shift = NANOS + exponent - i32::try_from(fraction.len()).ok()?;
    let scaled = if shift >= 0 {
	mantissa.checked_mul(10i128.checked_pow(shift.unsigned_abs())?)?
    } else {
	mantissa / 10i128.checked_pow(shift.unsigned_abs())?
    };
    let value = scaled.checked_mul(factor)?;

    Some(if negative { -value } else { value })
}

/*
 * Whether two quantities denote the same amount.  Text that does not
 * parse only matches itself.
 */
pub fn equivalent(left: &str, right: &str) -> bool {
    match (parse(left), parse(right)) {
	(Some(left), Some(right)) => left == right,
	_ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_forms_are_equivalent() {
	assert!(equivalent("0.5", "500m"));
	assert!(equivalent("1", "1000m"));
	assert!(equivalent("1024Mi", "1Gi"));
	assert!(equivalent("1e3", "1k"));
	assert!(equivalent(".5Gi", "512Mi"));
	assert!(equivalent("1.5", "1500m"));
    }

    #[test]
    fn test_different_amounts_differ() {
	assert!(!equivalent("128Mi", "128M"));
	assert!(!equivalent("250m", "0.3"));
	assert!(!equivalent("1", "-1"));
    }

    #[test]
    fn test_parse() {
	assert_eq!(parse("250m"), Some(250_000_000));
	assert_eq!(parse("2Ki"), Some(2048 * 1_000_000_000));
	assert_eq!(parse("1E"), Some(1_000_000_000_000_000_000_000_000_000));
	assert_eq!(parse("12n"), Some(12));
	assert_eq!(parse(""), None);
	assert_eq!(parse("lots"), None);
	assert_eq!(parse("1Xi"), None);
    }

    #[test]
    fn test_unparsable_text_compares_literally() {
	assert!(equivalent("lots", "lots"));
	assert!(!equivalent("lots", "1"));
    }
}
