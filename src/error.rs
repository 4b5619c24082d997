use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Where in the order lifecycle a stock shortfall was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStage {
    /// Creating or updating an open order against free stock, or changing
    /// what open orders need.
    Admission,
    /// Deducting a closing order from the ledger.
    Closing,
    /// A direct ledger adjustment.
    Adjustment,
}

impl fmt::Display for FulfillmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FulfillmentStage::Admission => "admission",
            FulfillmentStage::Closing => "closing",
            FulfillmentStage::Adjustment => "adjustment",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    // ===== Request shape =====
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    // ===== Lookup =====
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("menu item not found: {0}")]
    ProductNotFound(String),

    #[error("ingredient not found in inventory: {0}")]
    IngredientNotFound(String),

    // ===== Consistency =====
    #[error(
        "insufficient quantity of {ingredient_id} during {stage}: required {required}, available {available} (short by {})",
        .required - .available
    )]
    InsufficientQuantity {
        ingredient_id: String,
        required: f64,
        available: f64,
        stage: FulfillmentStage,
    },

    #[error("order {0} is closed and can no longer be changed")]
    OrderAlreadyClosed(String),

    #[error("ingredient {ingredient_id} is reserved by open orders ({reserved})")]
    IngredientReserved { ingredient_id: String, reserved: f64 },

    // ===== Infrastructure =====
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Transport-agnostic failure class, one per response status family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BadRequest,
    NotFound,
    Conflict,
    UnprocessableEntity,
    Internal,
}

impl ErrorCategory {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCategory::BadRequest => 400,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::UnprocessableEntity => 422,
            ErrorCategory::Internal => 500,
        }
    }
}

/// Body handed to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub error: ErrorCategory,
    pub message: String,
}

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl Into<String>) -> Self {
        ServiceError::Conflict {
            entity,
            id: id.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::Validation { .. } => ErrorCategory::BadRequest,
            ServiceError::NotFound { .. } => ErrorCategory::NotFound,
            ServiceError::Conflict { .. } | ServiceError::IngredientReserved { .. } => {
                ErrorCategory::Conflict
            }
            ServiceError::ProductNotFound(_) | ServiceError::IngredientNotFound(_) => {
                ErrorCategory::UnprocessableEntity
            }
            ServiceError::InsufficientQuantity { stage, .. } => match stage {
                FulfillmentStage::Admission => ErrorCategory::UnprocessableEntity,
                FulfillmentStage::Closing | FulfillmentStage::Adjustment => {
                    ErrorCategory::BadRequest
                }
            },
            ServiceError::OrderAlreadyClosed(_) => ErrorCategory::BadRequest,
            ServiceError::Storage(_)
            | ServiceError::Io(_)
            | ServiceError::Serialization(_)
            | ServiceError::LockPoisoned => ErrorCategory::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.category().status_code()
    }

    /// Renders the error for a caller. Internal failures are logged here and
    /// replaced by a generic message.
    pub fn to_response(&self) -> ErrorResponse {
        let category = self.category();
        let message = match category {
            ErrorCategory::Internal => {
                tracing::error!(error = %self, "request failed with internal error");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        ErrorResponse {
            code: category.status_code(),
            error: category,
            message,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
