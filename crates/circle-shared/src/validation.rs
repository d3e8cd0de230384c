use crate::constants::MAX_MESSAGE_CHARS;
use crate::error::ValidationError;

/// Trim `raw` and check it against the message size bound.
///
/// Returns the trimmed content that should be sent.
pub fn message_content(raw: &str) -> Result<String, ValidationError> {
    message_content_with_limit(raw, MAX_MESSAGE_CHARS)
}

/// Same as [`message_content`] with an explicit character limit.
pub fn message_content_with_limit(raw: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let len = trimmed.chars().count();
    if len > max {
        return Err(ValidationError::ContentTooLong { len, max });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(message_content("  hi there \n").unwrap(), "hi there");
    }

    #[test]
    fn rejects_blank() {
        assert_eq!(message_content("   "), Err(ValidationError::EmptyContent));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let accented = "é".repeat(10);
        assert!(message_content_with_limit(&accented, 10).is_ok());
        assert_eq!(
            message_content_with_limit(&accented, 9),
            Err(ValidationError::ContentTooLong { len: 10, max: 9 })
        );
    }
}
