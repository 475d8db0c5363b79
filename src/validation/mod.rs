//! Input validation predicates shared by the HTTP layer and the pipeline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::AppError;
use crate::Result;

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_PAGE: u32 = 10_000;
pub const MAX_LIMIT: u32 = 100;
pub const DEFAULT_LIMIT: u32 = 20;

const ALLOWED_FILE_TYPES: &[(&str, &[&str])] = &[
    ("application/pdf", &["pdf"]),
    ("application/msword", &["doc"]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        &["docx"],
    ),
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/gif", &["gif"]),
    ("image/webp", &["webp"]),
    ("text/plain", &["txt"]),
];

const TITLE_PUNCTUATION: &str = "-_.,:;!?'\"()&/#+@";

static SQL_INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bunion\b\s+(all\s+)?\bselect\b",
        r"(?i)\b(drop|alter|truncate)\s+table\b",
        r"(?i)\binsert\s+into\b",
        r"(?i)\bdelete\s+from\b",
        r"(?i)\bupdate\s+\w+\s+set\b",
        r"(?i)\bexec(ute)?\s*\(",
        r"--",
        r"/\*.*?\*/|/\*",
        r"(?i);\s*(select|drop|delete|insert|update|alter|truncate|exec|shutdown)\b",
        r"(?i)'\s*or\s*'?[\w]*'?\s*=\s*'?[\w]*",
        r"(?i)\bor\s+\d+\s*=\s*\d+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid injection pattern"))
    .collect()
});

pub fn contains_sql_injection(input: &str) -> bool {
    SQL_INJECTION_PATTERNS.iter().any(|re| re.is_match(input))
}

pub fn validate_file(name: &str, content_type: &str, size: u64) -> Result<()> {
    if size == 0 {
        return Err(AppError::ValidationError("file is empty".to_string()));
    }
    if size > MAX_FILE_SIZE {
        return Err(AppError::ValidationError(format!(
            "file exceeds {} bytes",
            MAX_FILE_SIZE
        )));
    }

    let content_type = content_type.trim().to_ascii_lowercase();
    let extensions = ALLOWED_FILE_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, exts)| *exts)
        .ok_or_else(|| AppError::ValidationError(format!("file type {} is not allowed", content_type)))?;

    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !extensions.contains(&extension.as_str()) {
        return Err(AppError::ValidationError(format!(
            "extension .{} does not match {}",
            extension, content_type
        )));
    }

    Ok(())
}

pub fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(AppError::ValidationError("title is required".to_string()));
    }
    if len > MAX_TITLE_LEN {
        return Err(AppError::ValidationError(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_alphanumeric() || c.is_whitespace() || TITLE_PUNCTUATION.contains(*c)))
    {
        return Err(AppError::ValidationError(format!(
            "title contains invalid character '{}'",
            bad
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub offset: u64,
}

pub fn validate_pagination(page: Option<u32>, limit: Option<u32>) -> Result<Pagination> {
    let page = page.unwrap_or(1);
    let limit = limit.unwrap_or(DEFAULT_LIMIT);

    if page == 0 || page > MAX_PAGE {
        return Err(AppError::ValidationError(format!("page must be between 1 and {}", MAX_PAGE)));
    }
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::ValidationError(format!("limit must be between 1 and {}", MAX_LIMIT)));
    }

    Ok(Pagination {
        page,
        limit,
        offset: (page as u64 - 1) * limit as u64,
    })
}

pub fn validate_text_field(name: &str, value: &str, max_len: usize) -> Result<()> {
    if value.chars().count() > max_len {
        return Err(AppError::ValidationError(format!(
            "{} must be at most {} characters",
            name, max_len
        )));
    }
    if contains_sql_injection(value) {
        return Err(AppError::ValidationError(format!("{} contains disallowed content", name)));
    }
    Ok(())
}
