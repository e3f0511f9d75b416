use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Exchange scrip code, e.g. `NABIL` or `NICAD8283`.
///
/// Codes are case-insensitive on input and stored uppercase: a letter
/// followed by letters or digits, at most [`Ticker::MAX_LEN`] long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub const MAX_LEN: usize = 10;

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let code = input.trim().to_ascii_uppercase();

        let mut chars = code.char_indices();
        match chars.next() {
            None => return Err(ValidationError::EmptyTicker),
            Some((_, first)) if !first.is_ascii_uppercase() => {
                return Err(ValidationError::TickerInvalidStart { ch: first })
            }
            Some(_) => {}
        }
        if let Some((index, ch)) =
            chars.find(|(_, ch)| !(ch.is_ascii_uppercase() || ch.is_ascii_digit()))
        {
            return Err(ValidationError::TickerInvalidChar { ch, index });
        }
        if code.len() > Self::MAX_LEN {
            return Err(ValidationError::TickerTooLong {
                len: code.len(),
                max: Self::MAX_LEN,
            });
        }

        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Ticker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Ticker {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(value: Ticker) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_input_is_trimmed_and_uppercased() {
        assert_eq!(Ticker::parse(" nabil ").expect("ticker").as_str(), "NABIL");
        assert_eq!(Ticker::parse("Nica").expect("ticker").as_str(), "NICA");
    }

    #[test]
    fn debenture_and_mutual_fund_codes_are_accepted() {
        assert!(Ticker::parse("NICAD8283").is_ok());
        assert!(Ticker::parse("NIBLGF").is_ok());
    }

    #[test]
    fn code_must_start_with_a_letter() {
        assert_eq!(
            Ticker::parse("9NABIL"),
            Err(ValidationError::TickerInvalidStart { ch: '9' })
        );
        assert_eq!(Ticker::parse("   "), Err(ValidationError::EmptyTicker));
    }

    #[test]
    fn punctuation_and_spaces_are_rejected() {
        assert_eq!(
            Ticker::parse("NAB IL"),
            Err(ValidationError::TickerInvalidChar { ch: ' ', index: 3 })
        );
        assert!(matches!(
            Ticker::parse("HIDCL-P"),
            Err(ValidationError::TickerInvalidChar { ch: '-', .. })
        ));
    }

    #[test]
    fn codes_longer_than_the_exchange_limit_are_rejected() {
        assert!(Ticker::parse("ABCDEFGHIJ").is_ok());
        assert_eq!(
            Ticker::parse("ABCDEFGHIJK"),
            Err(ValidationError::TickerTooLong { len: 11, max: 10 })
        );
    }
}
