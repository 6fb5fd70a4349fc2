#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameError {
    Empty,
    TooLong,
    Untrimmed,
    ContainsControl,
}

impl NameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "name must not be empty",
            Self::TooLong => "name is too long",
            Self::Untrimmed => "name must not start or end with whitespace",
            Self::ContainsControl => "name contains control characters",
        }
    }
}

pub fn validate_question_name(value: &str) -> Result<(), NameError> {
    validate_name(value)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminNameError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
}

impl AdminNameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "admin name must not be empty",
            Self::TooLong => "admin name is too long",
            Self::InvalidFirstChar => "admin name must start with a lowercase letter or digit",
            Self::InvalidChar { .. } => {
                "admin name may contain only lowercase letters, digits, '-' and '_'"
            }
        }
    }
}

pub fn validate_admin_name(value: &str) -> Result<(), AdminNameError> {
    if value.is_empty() {
        return Err(AdminNameError::Empty);
    }
    if value.len() > 128 {
        return Err(AdminNameError::TooLong);
    }
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(AdminNameError::Empty);
    };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(AdminNameError::InvalidFirstChar);
    }
    for (index, ch) in value.chars().enumerate() {
        if index == 0 {
            continue;
        }
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '-' | '_') {
            continue;
        }
        return Err(AdminNameError::InvalidChar { ch, index });
    }
    Ok(())
}

fn validate_name(value: &str) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::Empty);
    }
    if value.len() > 128 {
        return Err(NameError::TooLong);
    }
    if value.trim() != value {
        return Err(NameError::Untrimmed);
    }
    if value.chars().any(char::is_control) {
        return Err(NameError::ContainsControl);
    }
    Ok(())
}

/// Normalizes a question name into the segment used for answer paths:
/// ASCII letters and digits survive, whitespace runs collapse to a single
/// underscore, everything else is dropped.
pub fn derive_path_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_gap = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_gap && !out.is_empty() {
                out.push('_');
            }
            pending_gap = false;
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || matches!(ch, '-' | '_') {
            pending_gap = true;
        }
    }
    out
}
