use crate::config::LoggerConfig;
use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

lazy_static! {
    static ref EMAIL_REGEX: Option<Regex> =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").ok();
    static ref PHONE_REGEX: Option<Regex> =
        Regex::new(r"(?:\+1[-.\s]?)?\(?\b[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b").ok();
}

/// PII redaction configuration
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub enabled: bool,
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<(Regex, String)>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_emails: true,
            redact_phones: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

impl From<&LoggerConfig> for RedactionConfig {
    fn from(config: &LoggerConfig) -> Self {
        Self {
            enabled: config.redaction_enabled,
            hash_for_correlation: config.hash_for_correlation,
            ..Default::default()
        }
    }
}

/// Masks contact details before they reach a log line
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn from_logger_config(config: &LoggerConfig) -> Self {
        Self::new(RedactionConfig::from(config))
    }

    pub fn redact(&self, text: &str) -> String {
        if !self.config.enabled {
            return text.to_string();
        }

        let mut result = text.to_string();

        if self.config.redact_emails {
            result = self.redact_emails(&result);
        }

        if self.config.redact_phones {
            result = self.redact_phones(&result);
        }

        for (pattern, replacement) in &self.config.custom_patterns {
            result = pattern.replace_all(&result, replacement.as_str()).into_owned();
        }

        result
    }

    fn redact_emails(&self, text: &str) -> String {
        let Some(regex) = EMAIL_REGEX.as_ref() else {
            return text.to_string();
        };
        regex
            .replace_all(text, |caps: &Captures| {
                let email = caps.get(0).map_or("", |m| m.as_str());
                if self.config.hash_for_correlation {
                    format!("EMAIL[{}]", hash_value(email))
                } else {
                    mask_email(email)
                }
            })
            .into_owned()
    }

    fn redact_phones(&self, text: &str) -> String {
        let Some(regex) = PHONE_REGEX.as_ref() else {
            return text.to_string();
        };
        regex
            .replace_all(text, |caps: &Captures| {
                if self.config.hash_for_correlation {
                    format!("PHONE[{}]", hash_value(caps.get(0).map_or("", |m| m.as_str())))
                } else {
                    "(***) ***-****".to_string()
                }
            })
            .into_owned()
    }
}

fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = |s: &str| s.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}***", first(local), first(domain))
        }
        None => "***@***".to_string(),
    }
}

// First 8 bytes of the SHA-256 digest keep the marker short.
fn hash_value(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    general_purpose::STANDARD.encode(digest.get(..8).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_masked() {
        let redactor = PiiRedactor::new(RedactionConfig {
            hash_for_correlation: false,
            ..Default::default()
        });

        let redacted = redactor.redact("Notify claims@healthfirst.example.com about batch 12");
        assert_eq!(redacted, "Notify c***@h*** about batch 12");
    }

    #[test]
    fn test_email_hash_is_stable() {
        let redactor = PiiRedactor::default();

        let first = redactor.redact("claims@nationalmedical.example.com");
        let second = redactor.redact("claims@nationalmedical.example.com");
        assert!(first.starts_with("EMAIL["));
        assert!(!first.contains("nationalmedical"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_phone_masked() {
        let redactor = PiiRedactor::new(RedactionConfig {
            hash_for_correlation: false,
            ..Default::default()
        });

        let redacted = redactor.redact("Call the clinic at (555) 123-4567");
        assert!(redacted.contains("(***) ***-****"));
        assert!(!redacted.contains("4567"));
    }

    #[test]
    fn test_disabled_redaction_passes_text_through() {
        let config = LoggerConfig {
            redaction_enabled: false,
            ..Default::default()
        };
        let redactor = PiiRedactor::from_logger_config(&config);

        assert_eq!(redactor.redact("a@b.example.com"), "a@b.example.com");
    }

    #[test]
    fn test_custom_pattern() {
        let redactor = PiiRedactor::new(RedactionConfig {
            custom_patterns: vec![(Regex::new(r"\bNPI\d{10}\b").unwrap(), "NPI[REDACTED]".to_string())],
            ..Default::default()
        });

        assert_eq!(redactor.redact("provider NPI1234567890"), "provider NPI[REDACTED]");
    }
}
