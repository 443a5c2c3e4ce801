/// Password strength policies
use zxcvbn::zxcvbn;

/// Decides whether a candidate password is acceptable.
///
/// `Err` carries a human readable reason that is surfaced to the caller as a
/// validation error. A service without a policy accepts every password.
pub trait PasswordPolicy: Send + Sync {
    fn validate(&self, candidate: &str) -> Result<(), String>;
}

/// Composition rules plus an optional zxcvbn entropy floor
///
/// ## Requirements
///
/// - Minimum length (default 8 characters)
/// - At least one uppercase letter, one lowercase letter, one digit and one
///   special character when `require_character_classes` is set
/// - zxcvbn score >= `min_entropy_score` when set
#[derive(Debug, Clone)]
pub struct StrengthPolicy {
    pub min_length: usize,
    pub require_character_classes: bool,
    pub min_entropy_score: Option<u8>,
}

impl Default for StrengthPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_character_classes: true,
            min_entropy_score: Some(3),
        }
    }
}

impl PasswordPolicy for StrengthPolicy {
    fn validate(&self, candidate: &str) -> Result<(), String> {
        if candidate.chars().count() < self.min_length {
            return Err(format!(
                "Password must be at least {} characters",
                self.min_length
            ));
        }

        if self.require_character_classes {
            let has_uppercase = candidate.chars().any(|c| c.is_uppercase());
            let has_lowercase = candidate.chars().any(|c| c.is_lowercase());
            let has_digit = candidate.chars().any(|c| c.is_ascii_digit());
            let has_special = candidate.chars().any(|c| !c.is_alphanumeric());

            if !has_uppercase {
                return Err("Password must contain at least one uppercase letter".to_string());
            }
            if !has_lowercase {
                return Err("Password must contain at least one lowercase letter".to_string());
            }
            if !has_digit {
                return Err("Password must contain at least one digit".to_string());
            }
            if !has_special {
                return Err("Password must contain at least one special character".to_string());
            }
        }

        if let Some(min_score) = self.min_entropy_score {
            let entropy = zxcvbn(candidate, &[])
                .map_err(|e| format!("Password entropy calculation failed: {}", e))?;

            if entropy.score() < min_score {
                return Err(
                    "Password is too weak. Please use a stronger password with higher entropy."
                        .to_string(),
                );
            }
        }

        Ok(())
    }
}
