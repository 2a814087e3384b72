use crate::error::{AppError, FieldError};

/// Collects field-level problems so a request reports all of them at once.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, path: &str, message: &str) -> &mut Self {
        if !ok {
            self.errors.push(FieldError::new(path, message));
        }
        self
    }

    pub fn non_empty(&mut self, path: &str, value: &str) -> &mut Self {
        self.check(!value.trim().is_empty(), path, "must not be empty")
    }

    pub fn max_len(&mut self, path: &str, value: &str, max: usize) -> &mut Self {
        let ok = value.chars().count() <= max;
        self.check(ok, path, &format!("must be at most {max} characters"))
    }

    pub fn in_range(&mut self, path: &str, value: i64, min: i64, max: i64) -> &mut Self {
        let ok = (min..=max).contains(&value);
        self.check(ok, path, &format!("must be between {min} and {max}"))
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_failing_field() {
        let mut v = Validator::new();
        v.non_empty("title", "  ")
            .in_range("plannedDurationMinutes", 0, 1, 600)
            .max_len("notes", "ok", 10);
        match v.finish() {
            Err(AppError::Validation(details)) => {
                assert_eq!(details.len(), 2);
                assert_eq!(details[0].path, "title");
                assert_eq!(details[1].message, "must be between 1 and 600");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn passes_when_clean() {
        let mut v = Validator::new();
        v.non_empty("name", "Maths").in_range("order", 3, 0, 100);
        assert!(v.finish().is_ok());
    }
}
