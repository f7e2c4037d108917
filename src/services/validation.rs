//! Field validators shared by the services
//!
//! Each check returns the user facing message on failure; services wrap it
//! in their own `Validation` error variant.

use once_cell::sync::Lazy;
use regex::Regex;

pub const EMAIL_MAX_LEN: usize = 255;
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;
pub const FULL_NAME_MAX_LEN: usize = 100;
pub const PASSWORD_MIN_LEN: usize = 8;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email regex")
});
static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("username regex"));
static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug regex"));
static COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("color regex"));

pub type ValidationResult = Result<(), String>;

/// Require `1..=max` characters after trimming
pub fn required_text(field: &str, value: &str, max: usize) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(format!("{} cannot be empty", field));
    }
    max_len(field, value, max)
}

pub fn max_len(field: &str, value: &str, max: usize) -> ValidationResult {
    if value.chars().count() > max {
        return Err(format!("{} must be at most {} characters", field, max));
    }
    Ok(())
}

pub fn optional_max_len(field: &str, value: Option<&str>, max: usize) -> ValidationResult {
    value.map_or(Ok(()), |v| max_len(field, v, max))
}

pub fn email(value: &str) -> ValidationResult {
    if value.len() > EMAIL_MAX_LEN || !EMAIL_RE.is_match(value) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn username(value: &str) -> ValidationResult {
    let len = value.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(format!(
            "Username must be between {} and {} characters",
            USERNAME_MIN_LEN, USERNAME_MAX_LEN
        ));
    }
    if !USERNAME_RE.is_match(value) {
        return Err("Username may only contain letters, digits, '_' and '-'".to_string());
    }
    Ok(())
}

/// At least 8 characters with an uppercase letter, a lowercase letter and a digit
pub fn password_strength(value: &str) -> ValidationResult {
    if value.chars().count() < PASSWORD_MIN_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_LEN
        ));
    }
    if !value.chars().any(|c| c.is_uppercase()) {
        return Err("Password must contain an uppercase letter".to_string());
    }
    if !value.chars().any(|c| c.is_lowercase()) {
        return Err("Password must contain a lowercase letter".to_string());
    }
    if !value.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain a digit".to_string());
    }
    Ok(())
}

pub fn slug(value: &str, max: usize) -> ValidationResult {
    if value.is_empty() || value.len() > max {
        return Err(format!("Slug must be between 1 and {} characters", max));
    }
    if !SLUG_RE.is_match(value) {
        return Err("Slug may only contain lowercase letters, digits and single hyphens".to_string());
    }
    Ok(())
}

pub fn color(value: &str) -> ValidationResult {
    if !COLOR_RE.is_match(value) {
        return Err("Color must be a hex value like #1a2B3c".to_string());
    }
    Ok(())
}

pub fn non_negative_price(value: f64) -> ValidationResult {
    if !value.is_finite() || value < 0.0 {
        return Err("Price must be a non-negative number".to_string());
    }
    Ok(())
}

pub fn non_negative_stock(value: i64) -> ValidationResult {
    if value < 0 {
        return Err("Stock must not be negative".to_string());
    }
    Ok(())
}

/// Build a URL slug: lowercase ASCII alphanumerics joined by single hyphens.
///
/// Other characters act as separators. Falls back to `fallback` when nothing
/// usable is left, and cuts to `max` bytes on a word boundary.
pub fn generate_slug(text: &str, max: usize, fallback: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if slug.len() > max {
        slug.truncate(max);
        slug = slug.trim_end_matches('-').to_string();
    }
    if slug.is_empty() {
        return fallback.to_string();
    }
    slug
}
