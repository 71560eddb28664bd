//! Utility functions and types.

use std::fmt::Debug;

/// Redact hides secret material in `Debug` output.
///
/// Values shorter than 12 chars are fully masked as `***`. Longer values
/// keep their first and last three chars so that different access keys can
/// still be told apart in logs. Missing and empty values render as `EMPTY`.
pub struct Redact<'a>(Option<&'a str>);

impl<'a> From<&'a str> for Redact<'a> {
    fn from(value: &'a str) -> Self {
        Redact(Some(value))
    }
}

impl<'a> From<&'a String> for Redact<'a> {
    fn from(value: &'a String) -> Self {
        Redact(Some(value.as_str()))
    }
}

impl<'a> From<&'a Option<String>> for Redact<'a> {
    fn from(value: &'a Option<String>) -> Self {
        Redact(value.as_deref())
    }
}

impl Debug for Redact<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let v = self.0.unwrap_or_default();
        let length = v.len();
        if length == 0 {
            return f.write_str("EMPTY");
        }
        if length < 12 || !v.is_char_boundary(3) || !v.is_char_boundary(length - 3) {
            return f.write_str("***");
        }

        write!(f, "{}***{}", &v[..3], &v[length - 3..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_redact() {
        let cases = vec![
            ("mockId", "***"),
            ("LTAI5tFakeAccessKey", "LTA***Key"),
            ("", "EMPTY"),
            ("exactly11ch", "***"),
            ("exactly12chr", "exa***chr"),
        ];

        for (input, expected) in cases {
            assert_eq!(format!("{:?}", Redact::from(input)), expected, "{input}");
        }
    }

    #[test]
    fn test_redact_option() {
        assert_eq!(format!("{:?}", Redact::from(&None::<String>)), "EMPTY");
        let token = Some("CAIS-security-token-value".to_string());
        assert_eq!(format!("{:?}", Redact::from(&token)), "CAI***lue");
    }
}
