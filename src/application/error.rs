use thiserror::Error;

use crate::application::repos::RepoError;
use crate::domain::error::DomainError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("field `{0}` must not be empty")]
    ConstraintViolation(&'static str),
}

impl AppError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::Domain(DomainError::not_found(entity))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::Domain(DomainError::NotFound { .. }) | AppError::Repo(RepoError::NotFound)
        )
    }
}

pub(crate) fn ensure_non_empty(value: &str, field: &'static str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::ConstraintViolation(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_recognised_from_both_layers() {
        assert!(AppError::not_found("series").is_not_found());
        assert!(AppError::from(RepoError::NotFound).is_not_found());
        assert!(!AppError::ConstraintViolation("title").is_not_found());
    }

    #[test]
    fn blank_values_are_rejected() {
        assert!(ensure_non_empty("  ", "title").is_err());
        assert!(ensure_non_empty("Pilot", "title").is_ok());
    }
}
