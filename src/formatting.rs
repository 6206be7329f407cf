// src/formatting.rs

use crate::core::StudentRecord;

/// Shown in place of any field the record does not carry.
pub const PLACEHOLDER: &str = "N/A";

/// A trait for formatting a student record into alert text.
pub trait TextFormatter: Send + Sync {
    fn format(&self, record: &StudentRecord) -> String;
}

/// Telegram legacy-Markdown alert: bold labels, monospace phone and partner id.
pub struct TelegramMarkdownFormatter;

impl TextFormatter for TelegramMarkdownFormatter {
    fn format(&self, record: &StudentRecord) -> String {
        format(record)
    }
}

/// Renders the alert for a new registration. Never fails.
pub fn format(record: &StudentRecord) -> String {
    let text = |value: &Option<String>| match value {
        Some(v) if !v.trim().is_empty() => escape_markdown(v),
        _ => PLACEHOLDER.to_string(),
    };
    let code = |value: &Option<String>| match value {
        Some(v) => escape_code(v),
        None => PLACEHOLDER.to_string(),
    };

    format!(
        "🎉 *New Student Registration!* 🎉\n\n\
         👤 *Name:* {}\n\
         📞 *Phone:* `{}`\n\
         📧 *Email:* {}\n\
         ✈️ *Telegram:* {}\n\
         🤝 *Partner ID:* `{}`\n\
         🔍 *Source:* {}\n\n\
         Please contact the student to follow up.",
        text(&record.name),
        code(&record.phone),
        text(&record.email),
        text(&record.telegram_username),
        code(&record.partner_id),
        text(&record.source),
    )
}

/// Escapes the characters that open an entity in legacy Markdown.
fn escape_markdown(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Legacy Markdown has no escape inside a code span, so backticks are dropped.
fn escape_code(value: &str) -> String {
    let stripped: String = value.chars().filter(|c| *c != '`').collect();
    if stripped.trim().is_empty() {
        PLACEHOLDER.to_string()
    } else {
        stripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> StudentRecord {
        StudentRecord {
            name: Some("Ada Lovelace".to_string()),
            phone: Some("+44 20 7946 0018".to_string()),
            email: Some("ada@example.com".to_string()),
            telegram_username: Some("@ada".to_string()),
            source: Some("instagram".to_string()),
            partner_id: Some("P-42".to_string()),
        }
    }

    #[test]
    fn test_format_full_record() {
        let expected = "🎉 *New Student Registration!* 🎉\n\n\
                        👤 *Name:* Ada Lovelace\n\
                        📞 *Phone:* `+44 20 7946 0018`\n\
                        📧 *Email:* ada@example.com\n\
                        ✈️ *Telegram:* @ada\n\
                        🤝 *Partner ID:* `P-42`\n\
                        🔍 *Source:* instagram\n\n\
                        Please contact the student to follow up.";
        assert_eq!(format(&full_record()), expected);
    }

    #[test]
    fn test_format_empty_record_uses_placeholder_everywhere() {
        let message = format(&StudentRecord::default());

        assert!(message.contains("*Name:* N/A\n"));
        assert!(message.contains("*Phone:* `N/A`\n"));
        assert!(message.contains("*Email:* N/A\n"));
        assert!(message.contains("*Telegram:* N/A\n"));
        assert!(message.contains("*Partner ID:* `N/A`\n"));
        assert!(message.contains("*Source:* N/A\n"));
        assert!(!message.contains("``"));
        assert!(!message.contains(":* \n"));
    }

    #[test]
    fn test_format_escapes_markup_in_values() {
        let record = StudentRecord {
            telegram_username: Some("@john_doe".to_string()),
            email: Some("first*last@example.com".to_string()),
            phone: Some("555`1212".to_string()),
            ..Default::default()
        };
        let message = format(&record);

        assert!(message.contains("*Telegram:* @john\\_doe\n"));
        assert!(message.contains("*Email:* first\\*last@example.com\n"));
        assert!(message.contains("*Phone:* `5551212`\n"));
    }

    #[test]
    fn test_format_blank_values_use_placeholder() {
        let record = StudentRecord {
            name: Some(String::new()),
            phone: Some("  ".to_string()),
            email: Some("  ".to_string()),
            telegram_username: Some("\t".to_string()),
            source: Some(" ".to_string()),
            partner_id: Some(String::new()),
        };
        let message = format(&record);

        assert_eq!(message, format(&StudentRecord::default()));
        assert!(!message.contains("*Name:* \n"));
        assert!(!message.contains("*Email:*   \n"));
    }

    #[test]
    fn test_code_span_of_only_backticks_falls_back_to_placeholder() {
        let record = StudentRecord {
            partner_id: Some("``".to_string()),
            ..Default::default()
        };
        assert!(format(&record).contains("*Partner ID:* `N/A`\n"));
    }

    #[test]
    fn test_formatter_trait_matches_free_function() {
        let record = full_record();
        assert_eq!(TelegramMarkdownFormatter.format(&record), format(&record));
    }
}
