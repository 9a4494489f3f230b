use validator::Validate;

use crate::error::AppError;

/// Folds `validator` errors into the app taxonomy, naming the offending
/// fields so the caller can fix its request.
pub trait ValidateExt {
    fn check(&self) -> Result<(), AppError>;
}

impl<T: Validate> ValidateExt for T {
    fn check(&self) -> Result<(), AppError> {
        self.validate().map_err(|errors| {
            let detail = errors
                .field_errors()
                .iter()
                .map(|(field, field_errors)| {
                    let messages: Vec<String> = field_errors
                        .iter()
                        .map(|error| {
                            error
                                .message
                                .clone()
                                .map(|message| message.to_string())
                                .unwrap_or_else(|| error.code.to_string())
                        })
                        .collect();

                    format!("{}: {}", field, messages.join(", "))
                })
                .collect::<Vec<_>>()
                .join("; ");

            AppError::Validation(detail)
        })
    }
}
