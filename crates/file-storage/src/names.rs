//! File name and size text helpers

use crate::{FileStorageError, Result};

/// Split a file name at its last `.` into `(name, extension)`
///
/// The extension must be non-empty. The name part may itself contain dots.
pub fn split_name_extension(file_name: &str) -> Result<(&str, &str)> {
    match file_name.rsplit_once('.') {
        Some((name, extension)) if !extension.is_empty() && !name.contains('\n') => {
            Ok((name, extension))
        }
        _ => Err(FileStorageError::InvalidName(file_name.to_string())),
    }
}

/// Parse a human size such as `2M`, `512 k` or `1.5G` into bytes
///
/// Units scale by 1024 once per step down from the given unit (G three times,
/// M twice, K once). Text after the unit is ignored. Returns `None` when the
/// text does not start with a number followed by a unit.
pub fn parse_byte_size(text: &str) -> Option<f64> {
    let text = text.trim().to_lowercase();

    let digits_end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    if digits_end == 0 {
        return None;
    }
    let (number, rest) = text.split_at(digits_end);
    let rest = rest.strip_prefix(' ').unwrap_or(rest);

    let steps = match rest.chars().next()? {
        'g' => 3,
        'm' => 2,
        'k' => 1,
        _ => return None,
    };

    let mut value = leading_float(number);
    for _ in 0..steps {
        value *= 1024.0;
    }
    Some(value)
}

/// Numeric value of the longest float prefix (`1.2.3` reads as `1.2`, `.` as `0`)
fn leading_float(number: &str) -> f64 {
    let end = number
        .char_indices()
        .filter(|(_, c)| *c == '.')
        .nth(1)
        .map(|(index, _)| index)
        .unwrap_or(number.len());
    number[..end].parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_uses_last_dot() {
        assert_eq!(
            split_name_extension("photo.archive.jpg").unwrap(),
            ("photo.archive", "jpg")
        );
        assert_eq!(split_name_extension("a.png").unwrap(), ("a", "png"));
        assert_eq!(split_name_extension(".htaccess").unwrap(), ("", "htaccess"));
    }

    #[test]
    fn test_split_allows_newline_in_extension() {
        assert_eq!(split_name_extension("a.jp\ng").unwrap(), ("a", "jp\ng"));
        assert!(split_name_extension("a\nb.png").is_err());
    }

    #[test]
    fn test_split_requires_extension() {
        for invalid in ["noext", "trailing.", "", "bad\nname.png"] {
            assert!(
                matches!(
                    split_name_extension(invalid),
                    Err(FileStorageError::InvalidName(_))
                ),
                "{invalid:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_byte_size_units() {
        assert_eq!(parse_byte_size("2M"), Some(2_097_152.0));
        assert_eq!(parse_byte_size("1.5K"), Some(1536.0));
        assert_eq!(parse_byte_size("512k"), Some(524_288.0));
        assert_eq!(parse_byte_size("1G"), Some(1_073_741_824.0));
        assert_eq!(parse_byte_size(" 8 m "), Some(8_388_608.0));
        assert_eq!(parse_byte_size("16MB"), Some(16_777_216.0));
    }

    #[test]
    fn test_parse_byte_size_rejects_garbage() {
        assert_eq!(parse_byte_size("abc"), None);
        assert_eq!(parse_byte_size("2"), None);
        assert_eq!(parse_byte_size("2T"), None);
        assert_eq!(parse_byte_size("M2"), None);
        assert_eq!(parse_byte_size("2  M"), None);
    }

    #[test]
    fn test_parse_byte_size_lenient_number() {
        assert_eq!(parse_byte_size("1.5.9K"), Some(1536.0));
        assert_eq!(parse_byte_size(".5K"), Some(512.0));
        assert_eq!(parse_byte_size(".K"), Some(0.0));
    }
}
