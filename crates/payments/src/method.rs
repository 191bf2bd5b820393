use core::str::FromStr;

use serde::{Deserialize, Serialize};

use propmarket_core::DomainError;

/// Supported mobile-money providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Mpesa,
    Emola,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "MPESA",
            PaymentMethod::Emola => "EMOLA",
        }
    }

    /// Two-letter code used inside generated references.
    pub fn code(&self) -> &'static str {
        &self.as_str()[..2]
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MPESA" => Ok(PaymentMethod::Mpesa),
            "EMOLA" => Ok(PaymentMethod::Emola),
            other => Err(DomainError::validation(format!(
                "unsupported payment method '{other}', use MPESA or EMOLA"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_is_case_insensitive_and_trims() {
        assert_eq!(" mpesa ".parse::<PaymentMethod>().unwrap(), PaymentMethod::Mpesa);
        assert_eq!("Emola".parse::<PaymentMethod>().unwrap(), PaymentMethod::Emola);
    }

    #[test]
    fn unknown_methods_are_validation_errors() {
        let err = "visa".parse::<PaymentMethod>().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn codes_are_the_first_two_letters() {
        assert_eq!(PaymentMethod::Mpesa.code(), "MP");
        assert_eq!(PaymentMethod::Emola.code(), "EM");
    }
}
