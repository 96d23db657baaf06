//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest message accepted for the live message wall.
pub const MAX_DANMAKU_CHARS: usize = 100;

/// Validates that a message for the live wall has visible content and fits on screen.
///
/// Length is counted in characters, not bytes, since most messages are not ASCII.
///
/// # Examples
///
/// ```ignore
/// validate_danmaku_content("Happy new year!") // Ok
/// validate_danmaku_content("   ")              // Err - blank
/// ```
pub fn validate_danmaku_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        let mut err = ValidationError::new("danmaku_blank");
        err.message = Some("Message must contain visible characters".into());
        return Err(err);
    }

    let chars = content.chars().count();
    if chars > MAX_DANMAKU_CHARS {
        let mut err = ValidationError::new("danmaku_length");
        err.message = Some(
            format!("Message must be at most {MAX_DANMAKU_CHARS} characters (got {chars})").into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_danmaku_content_valid() {
        assert!(validate_danmaku_content("Happy new year!").is_ok());
        assert!(validate_danmaku_content("新年快乐").is_ok());
        assert!(validate_danmaku_content(&"a".repeat(MAX_DANMAKU_CHARS)).is_ok());
    }

    #[test]
    fn test_validate_danmaku_content_blank() {
        assert!(validate_danmaku_content("").is_err());
        assert!(validate_danmaku_content("   \t").is_err());
    }

    #[test]
    fn test_validate_danmaku_content_too_long() {
        assert!(validate_danmaku_content(&"a".repeat(MAX_DANMAKU_CHARS + 1)).is_err());
        // 101 multi-byte characters
        assert!(validate_danmaku_content(&"好".repeat(MAX_DANMAKU_CHARS + 1)).is_err());
    }
}
