//! Assertion helpers for access decisions

use crate::core_access::{AccessError, Denial};
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a Result is Err and return the error
pub fn assert_err<T: Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
        Err(e) => e,
    }
}

/// Assert that an operation was refused with exactly `expected`
pub fn assert_denied<T: Debug>(result: Result<T, AccessError>, expected: Denial) {
    match result {
        Err(AccessError::Denied(denial)) if denial == expected => {}
        Err(AccessError::Denied(denial)) => panic!(
            "Expected denial {}, got {}",
            expected.code(),
            denial.code()
        ),
        Err(other) => panic!("Expected denial {}, got error {:?}", expected.code(), other),
        Ok(value) => panic!("Expected denial {}, got Ok: {:?}", expected.code(), value),
    }
}

/// Assert that an operation failed input validation
pub fn assert_invalid_input<T: Debug>(result: Result<T, AccessError>) {
    match result {
        Err(AccessError::InvalidInput(_)) => {}
        other => panic!("Expected InvalidInput, got {:?}", other),
    }
}

/// Assert that a collection contains an element
pub fn assert_contains<T: PartialEq + Debug>(collection: &[T], element: &T) {
    if !collection.contains(element) {
        panic!(
            "Expected collection to contain {:?}, but it didn't. Collection: {:?}",
            element, collection
        );
    }
}
