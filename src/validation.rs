//! Input validation for administrative content writes and actor identifiers.
//!
//! Every administrative write goes through these checks before anything is
//! persisted, so a rejected request never leaves partial state behind.

/// Longest title (scenario, level, category name) accepted.
pub const MAX_TITLE_LEN: usize = 200;
/// Longest free-text body (descriptions, client messages, feedback).
pub const MAX_TEXT_LEN: usize = 4000;
/// Longest icon/avatar string (usually a single emoji).
pub const MAX_ICON_LEN: usize = 16;
/// Longest knowledge-base link.
pub const MAX_LINK_LEN: usize = 500;
/// Longest user identifier handed to us by the identity provider.
pub const MAX_USER_ID_LEN: usize = 128;

/// Validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} is too long (maximum {max} characters)")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains invalid characters: {chars}")]
    InvalidCharacters { field: &'static str, chars: String },

    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },

    #[error("{field} must be a #RRGGBB colour")]
    InvalidColor { field: &'static str },

    #[error("level code must contain only lowercase letters, digits, underscore and hyphen")]
    InvalidCode,

    #[error("nothing to update")]
    NoChanges,
}

/// Validate the opaque user identifier supplied by the identity provider.
///
/// The identifier is case-sensitive and otherwise uninterpreted; we only reject
/// values that would be unusable as a key (empty, control characters, oversize).
pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.trim().is_empty() {
        return Err(ValidationError::Empty { field: "user_id" });
    }
    if user_id.chars().count() > MAX_USER_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "user_id",
            max: MAX_USER_ID_LEN,
        });
    }
    reject_control_chars("user_id", user_id)
}

/// Validate a required single-line title and return its trimmed form.
pub fn validate_title(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_TITLE_LEN,
        });
    }
    reject_control_chars(field, trimmed)?;
    Ok(trimmed.to_string())
}

/// Sanitize free text (remove control characters, validate length).
/// Newlines and tabs are kept.
pub fn sanitize_text(field: &'static str, value: &str, max: usize) -> Result<String, ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(value
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect::<String>()
        .trim()
        .to_string())
}

/// Sanitize text that must not end up empty (client messages, answer text).
pub fn required_text(field: &'static str, value: &str, max: usize) -> Result<String, ValidationError> {
    let text = sanitize_text(field, value, max)?;
    if text.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(text)
}

/// Validate a level code: the stable, human-readable key other levels refer to.
pub fn validate_level_code(code: &str) -> Result<String, ValidationError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field: "code" });
    }
    if trimmed.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "code",
            max: 50,
        });
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(ValidationError::InvalidCode);
    }
    Ok(trimmed.to_string())
}

/// Validate a `#RRGGBB` colour and return it uppercased.
pub fn validate_color(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    let valid = trimmed.len() == 7
        && trimmed.starts_with('#')
        && trimmed[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(ValidationError::InvalidColor { field });
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Validate a short icon/avatar string.
pub fn validate_icon(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.chars().count() > MAX_ICON_LEN {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_ICON_LEN,
        });
    }
    reject_control_chars(field, trimmed)?;
    Ok(trimmed.to_string())
}

/// Validate an integer against an inclusive range.
pub fn validate_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

fn reject_control_chars(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let bad: Vec<String> = value
        .chars()
        .filter(|c| c.is_control())
        .map(|c| format!("\\u{{{:04x}}}", c as u32))
        .collect();
    if bad.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::InvalidCharacters {
            field,
            chars: bad.join(", "),
        })
    }
}

/// Escape a user-supplied string for single-line logging and cap its length.
pub fn log_preview(s: &str) -> String {
    const MAX_PREVIEW: usize = 120;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
