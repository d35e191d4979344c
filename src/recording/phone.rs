use anyhow::{Context, Result};
use regex::Regex;

/// Korean mobile numbers first, then any long digit run.
pub const DEFAULT_PHONE_PATTERNS: &[&str] = &[r"010[0-9]{7,8}", r"[0-9]{8,}"];

/// Pulls a phone number out of a recording file name.
#[derive(Debug, Clone)]
pub struct PhoneNumberExtractor {
    patterns: Vec<Regex>,
}

impl PhoneNumberExtractor {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref())
                    .with_context(|| format!("Invalid phone pattern: {}", p.as_ref()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// First match of the first pattern that matches anywhere in `file_name`.
    pub fn extract(&self, file_name: &str) -> Option<String> {
        self.patterns
            .iter()
            .find_map(|pattern| pattern.find(file_name))
            .map(|m| m.as_str().to_string())
    }
}

impl Default for PhoneNumberExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_PHONE_PATTERNS).expect("Invalid default phone pattern")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_mobile_number() {
        let extractor = PhoneNumberExtractor::default();
        assert_eq!(
            extractor.extract("01012345678_20250124.mp3"),
            Some("01012345678".to_string())
        );
        assert_eq!(
            extractor.extract("통화 녹음 0101234567.m4a"),
            Some("0101234567".to_string())
        );
    }

    #[test]
    fn mobile_pattern_wins_over_earlier_digit_run() {
        let extractor = PhoneNumberExtractor::default();
        assert_eq!(
            extractor.extract("20250124153000_01098765432.amr"),
            Some("01098765432".to_string())
        );
    }

    #[test]
    fn falls_back_to_long_digit_run() {
        let extractor = PhoneNumberExtractor::default();
        assert_eq!(
            extractor.extract("Call_0212345678.3gp"),
            Some("0212345678".to_string())
        );
        assert_eq!(extractor.extract("memo_1234567.mp3"), None);
        assert_eq!(extractor.extract("voice.wav"), None);
    }

    #[test]
    fn custom_patterns_are_tried_in_order() {
        let extractor = PhoneNumberExtractor::new(&[r"\+82[0-9]{9,10}"]).unwrap();
        assert_eq!(
            extractor.extract("rec_+821012345678.m4a"),
            Some("+821012345678".to_string())
        );
        assert_eq!(extractor.extract("01012345678.m4a"), None);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = PhoneNumberExtractor::new(&["(010"]).unwrap_err();
        assert!(err.to_string().contains("Invalid phone pattern"));
    }
}
