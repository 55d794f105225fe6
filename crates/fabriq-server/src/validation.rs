//! Structural validation of bound inputs.
//!
//! Input types describe their own constraints by implementing [`Validate`];
//! the [`Validator`] is constructed once at startup and handed to the
//! [`Dispatcher`](crate::Dispatcher). Failures are reported per field as a
//! constraint tag (`required`, `email`, `min`, `max`, `oneof`, `gte`, `lte`).
//!
//! # Example
//!
//! ```rust
//! use fabriq_server::{Validate, Validator, Violations};
//!
//! struct Signup {
//!     email: String,
//!     age: u8,
//! }
//!
//! impl Validate for Signup {
//!     fn validate(&self, v: &mut Violations) {
//!         v.required("email", &self.email).email("email", &self.email);
//!         v.gte("age", self.age, 18);
//!     }
//! }
//!
//! let errors = Validator::new()
//!     .validate(&Signup { email: String::new(), age: 12 })
//!     .unwrap_err();
//! assert_eq!(errors.get("email"), Some("required"));
//! assert_eq!(errors.get("age"), Some("gte"));
//! ```

use fabriq_core::FieldErrors;

/// Constraints declared by an input type.
pub trait Validate {
    /// Records every violated constraint into `violations`.
    fn validate(&self, violations: &mut Violations) {
        let _ = violations;
    }
}

/// Values that can be checked for presence.
pub trait Presence {
    /// Returns `true` if the value counts as provided.
    fn is_present(&self) -> bool;
}

impl Presence for str {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Presence for String {
    fn is_present(&self) -> bool {
        self.as_str().is_present()
    }
}

impl<T> Presence for Option<T> {
    fn is_present(&self) -> bool {
        self.is_some()
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

/// Collector of constraint failures for one value.
#[derive(Debug, Default)]
pub struct Violations {
    errors: FieldErrors,
    fail_fast: bool,
}

impl Violations {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure. The first failure per field wins.
    pub fn add(&mut self, field: &str, tag: &str) -> &mut Self {
        if !(self.fail_fast && !self.errors.is_empty()) {
            self.errors.add(field, tag);
        }
        self
    }

    /// Records `tag` for `field` unless `ok` holds.
    pub fn check(&mut self, field: &str, ok: bool, tag: &str) -> &mut Self {
        if !ok {
            self.add(field, tag);
        }
        self
    }

    /// The value must be present (non-blank, non-empty, or `Some`).
    pub fn required<T: Presence + ?Sized>(&mut self, field: &str, value: &T) -> &mut Self {
        self.check(field, value.is_present(), "required")
    }

    /// A non-empty value must look like an email address.
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, value.is_empty() || looks_like_email(value), "email")
    }

    /// The value must have at least `min` characters.
    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        self.check(field, value.chars().count() >= min, "min")
    }

    /// The value must have at most `max` characters.
    pub fn max_len(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        self.check(field, value.chars().count() <= max, "max")
    }

    /// The value must be one of `allowed`.
    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) -> &mut Self {
        self.check(field, allowed.contains(&value), "oneof")
    }

    /// The value must be greater than or equal to `min`.
    pub fn gte<T: PartialOrd>(&mut self, field: &str, value: T, min: T) -> &mut Self {
        self.check(field, value >= min, "gte")
    }

    /// The value must be less than or equal to `max`.
    pub fn lte<T: PartialOrd>(&mut self, field: &str, value: T, max: T) -> &mut Self {
        self.check(field, value <= max, "lte")
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consumes the collector.
    #[must_use]
    pub fn into_errors(self) -> FieldErrors {
        self.errors
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}

/// Runs [`Validate`] implementations.
///
/// Shared read-only across requests once constructed.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    fail_fast: bool,
}

impl Validator {
    /// Creates a validator that reports every failed field.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops recording after the first failed field.
    #[must_use]
    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    /// Validates `value`, returning the failed fields.
    pub fn validate<T: Validate + ?Sized>(&self, value: &T) -> Result<(), FieldErrors> {
        let mut violations = Violations {
            errors: FieldErrors::new(),
            fail_fast: self.fail_fast,
        };
        value.validate(&mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations.into_errors())
        }
    }
}
