//! Input validation and clock helpers.
//!
//! Frames and configuration arrive from outside the process; these checks
//! run before any session state is touched.

use anyhow::{anyhow, Result};
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// CONSTANTS: Input Size Limits
// ============================================================================

/// Maximum length for source IDs (camera, file, stream)
pub const MAX_ID_LENGTH: usize = 256;

/// Maximum accepted frame edge in pixels
pub const MAX_FRAME_DIMENSION: u32 = 16_384;

// ============================================================================
// Safe Time Operations
// ============================================================================

/// Current Unix timestamp in milliseconds, logging and returning 0 on clock errors
pub fn safe_unix_timestamp_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as u64,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "System clock is before UNIX epoch (1970-01-01), using timestamp 0"
            );
            0
        }
    }
}

// ============================================================================
// String Validation
// ============================================================================

/// Validate string length against a maximum
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Validate a source ID
pub fn validate_id(id: &str, field_name: &str) -> Result<()> {
    validate_non_empty(id, field_name)?;
    validate_length(id, MAX_ID_LENGTH, field_name)?;

    if id.chars().any(char::is_control) {
        return Err(anyhow!("{} contains control characters", field_name));
    }

    Ok(())
}

// ============================================================================
// Numeric Validation
// ============================================================================

/// Validate value is within range
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

/// Validate a finite value in `[0, 1]`
pub fn validate_probability(value: f32, field_name: &str) -> Result<()> {
    if !value.is_finite() {
        return Err(anyhow!("{} must be finite, got {}", field_name, value));
    }
    validate_range(value, 0.0, 1.0, field_name)
}

/// Validate frame dimensions
pub fn validate_frame_dimensions(width: u32, height: u32) -> Result<()> {
    validate_range(width, 1, MAX_FRAME_DIMENSION, "frame width")?;
    validate_range(height, 1, MAX_FRAME_DIMENSION, "frame height")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_unix_timestamp_millis() {
        let ts = safe_unix_timestamp_millis();
        assert!(ts > 1_700_000_000_000); // After 2023
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("camera-1", "source_id").is_ok());
        assert!(validate_id("clip.mp4", "source_id").is_ok());

        assert!(validate_id("", "source_id").is_err());
        assert!(validate_id("  ", "source_id").is_err());
        assert!(validate_id("cam\n1", "source_id").is_err());
        assert!(validate_id(&"a".repeat(300), "source_id").is_err());
    }

    #[test]
    fn test_validate_probability() {
        assert!(validate_probability(0.0, "confidence").is_ok());
        assert!(validate_probability(1.0, "confidence").is_ok());
        assert!(validate_probability(0.42, "confidence").is_ok());

        assert!(validate_probability(f32::NAN, "confidence").is_err());
        assert!(validate_probability(f32::INFINITY, "confidence").is_err());
        assert!(validate_probability(1.01, "confidence").is_err());
        assert!(validate_probability(-0.1, "confidence").is_err());
    }

    #[test]
    fn test_validate_frame_dimensions() {
        assert!(validate_frame_dimensions(640, 480).is_ok());
        assert!(validate_frame_dimensions(0, 480).is_err());
        assert!(validate_frame_dimensions(640, 20_000).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(50, 0, 100, "value").is_ok());
        assert!(validate_range(0, 0, 100, "value").is_ok());
        assert!(validate_range(100, 0, 100, "value").is_ok());

        assert!(validate_range(-1, 0, 100, "value").is_err());
        assert!(validate_range(101, 0, 100, "value").is_err());
    }
}
