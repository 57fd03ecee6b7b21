//! FFI bindings for Growth Flux
//!
//! This module provides C-compatible functions for calling the scoring engine
//! from other languages. All functions use C strings (null-terminated) and
//! return allocated memory that must be freed by the caller using
//! `growth_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::catalog::TagCatalog;
use crate::config::ConfigProfile;
use crate::error::ScoreError;
use crate::estimator::KalmanEstimator;
use crate::pipeline::GrowthProcessor;
use crate::predict::predict;
use crate::types::{Observation, RawObservation, StudentId, TagFilterState};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Turn a JSON result into a C string, recording the error on failure
fn result_to_cstr(result: Result<String, ScoreError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Recompute a tag state from a JSON array of signed observations.
///
/// Returns the state JSON, or the JSON literal `null` for an empty array.
///
/// # Safety
/// - `profile_json` and `observations_json` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `growth_free_string`.
/// - Returns NULL on error; call `growth_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn growth_compute_state(
    profile_json: *const c_char,
    observations_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let profile_str = match cstr_to_string(profile_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid profile string pointer");
            return ptr::null_mut();
        }
    };

    let observations_str = match cstr_to_string(observations_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid observations string pointer");
            return ptr::null_mut();
        }
    };

    result_to_cstr((|| -> Result<String, ScoreError> {
        let estimator = KalmanEstimator::new(ConfigProfile::from_json(&profile_str)?)?;
        let observations: Vec<Observation> = serde_json::from_str(&observations_str)?;
        let state = estimator.replay(&observations)?;
        Ok(serde_json::to_string(&state)?)
    })())
}

/// Fold one signed observation into a prior state.
///
/// # Safety
/// - `profile_json` and `observation_json` must be valid null-terminated C strings.
/// - `state_json` may be NULL (initialize) or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `growth_free_string`.
/// - Returns NULL on error; call `growth_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn growth_apply_observation(
    profile_json: *const c_char,
    state_json: *const c_char,
    observation_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let profile_str = match cstr_to_string(profile_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid profile string pointer");
            return ptr::null_mut();
        }
    };

    let observation_str = match cstr_to_string(observation_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid observation string pointer");
            return ptr::null_mut();
        }
    };

    let state_str = if state_json.is_null() {
        None
    } else {
        match cstr_to_string(state_json) {
            Some(s) => Some(s),
            None => {
                set_last_error("Invalid state string");
                return ptr::null_mut();
            }
        }
    };

    result_to_cstr((|| -> Result<String, ScoreError> {
        let estimator = KalmanEstimator::new(ConfigProfile::from_json(&profile_str)?)?;
        let prior: Option<TagFilterState> = match state_str {
            Some(json) => serde_json::from_str(&json)?,
            None => None,
        };
        let observation: Observation = serde_json::from_str(&observation_str)?;
        let state = estimator.step(prior.as_ref(), &observation)?;
        Ok(serde_json::to_string(&state)?)
    })())
}

/// Predict a tag state `horizon_days` ahead.
///
/// # Safety
/// - `state_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `growth_free_string`.
/// - Returns NULL on error; call `growth_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn growth_predict(state_json: *const c_char, horizon_days: f64) -> *mut c_char {
    clear_last_error();

    let state_str = match cstr_to_string(state_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid state string pointer");
            return ptr::null_mut();
        }
    };

    result_to_cstr((|| -> Result<String, ScoreError> {
        let state: TagFilterState = serde_json::from_str(&state_str)?;
        let prediction = predict(&state, horizon_days)?;
        Ok(serde_json::to_string(&prediction)?)
    })())
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to a GrowthProcessor
pub struct GrowthProcessorHandle {
    processor: GrowthProcessor,
}

/// Create a new GrowthProcessor from a profile and a tag list.
///
/// # Safety
/// - `profile_json` and `tags_json` must be valid null-terminated C strings.
/// - Returns a pointer to a newly allocated GrowthProcessor.
/// - Must be freed with `growth_processor_free`.
/// - Returns NULL on error; call `growth_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn growth_processor_new(
    profile_json: *const c_char,
    tags_json: *const c_char,
) -> *mut GrowthProcessorHandle {
    clear_last_error();

    let profile_str = match cstr_to_string(profile_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid profile string pointer");
            return ptr::null_mut();
        }
    };

    let tags_str = match cstr_to_string(tags_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid tags string pointer");
            return ptr::null_mut();
        }
    };

    let created = ConfigProfile::from_json(&profile_str).and_then(|profile| {
        let catalog = TagCatalog::from_json(&tags_str)?;
        GrowthProcessor::new(profile, catalog)
    });

    match created {
        Ok(processor) => Box::into_raw(Box::new(GrowthProcessorHandle { processor })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a GrowthProcessor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `growth_processor_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn growth_processor_free(processor: *mut GrowthProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Record a raw teacher log entry; returns the updated tag state JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `growth_processor_new`.
/// - `raw_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `growth_free_string`.
/// - Returns NULL on error; call `growth_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn growth_processor_record(
    processor: *mut GrowthProcessorHandle,
    raw_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &mut *processor;

    let raw_str = match cstr_to_string(raw_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid observation string pointer");
            return ptr::null_mut();
        }
    };

    result_to_cstr((|| -> Result<String, ScoreError> {
        let raw: RawObservation = serde_json::from_str(&raw_str)?;
        let state = handle.processor.record(&raw)?;
        Ok(serde_json::to_string(&state)?)
    })())
}

/// Build a growth report for one student.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `growth_processor_new`.
/// - `student_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `growth_free_string`.
/// - Returns NULL on error; call `growth_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn growth_processor_report(
    processor: *mut GrowthProcessorHandle,
    student_id: *const c_char,
    horizon_days: f64,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &*processor;

    let student_str = match cstr_to_string(student_id) {
        Some(s) => s,
        None => {
            set_last_error("Invalid student_id string pointer");
            return ptr::null_mut();
        }
    };

    result_to_cstr(
        handle
            .processor
            .report_json(&StudentId(student_str), horizon_days),
    )
}

/// Save processor states to JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `growth_processor_new`.
/// - Returns a newly allocated string that must be freed with `growth_free_string`.
/// - Returns NULL on error; call `growth_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn growth_processor_save_states(
    processor: *mut GrowthProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &*processor;
    result_to_cstr(handle.processor.save_states())
}

/// Load processor states from JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `growth_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `growth_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn growth_processor_load_states(
    processor: *mut GrowthProcessorHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }

    let handle = &mut *processor;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match handle.processor.load_states(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Growth Flux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Growth Flux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn growth_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Growth Flux call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn growth_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Growth Flux library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn growth_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn profile_json() -> CString {
        CString::new(
            r#"{"processNoise":0.1,"initialUncertainty":10,"timeDecayFactor":0.01,"minObservations":3,"maxDaysBetween":30}"#,
        )
        .unwrap()
    }

    fn tags_json() -> CString {
        CString::new(
            r#"[{"tag_id":"ask-question","name":"主动提问","sentiment":"POSITIVE","default_weight":5}]"#,
        )
        .unwrap()
    }

    fn observations_json() -> CString {
        CString::new(
            r#"[
                {"student_id":"stu-1","tag_id":"ask-question","sentiment":"POSITIVE","timestamp":"2024-03-01T08:00:00Z","signed_weight":5.0},
                {"student_id":"stu-1","tag_id":"ask-question","sentiment":"POSITIVE","timestamp":"2024-03-02T08:00:00Z","signed_weight":5.0},
                {"student_id":"stu-1","tag_id":"ask-question","sentiment":"POSITIVE","timestamp":"2024-03-03T08:00:00Z","signed_weight":6.0},
                {"student_id":"stu-1","tag_id":"ask-question","sentiment":"POSITIVE","timestamp":"2024-03-04T08:00:00Z","signed_weight":7.0}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_ffi_compute_and_predict() {
        let profile = profile_json();
        let observations = observations_json();

        unsafe {
            let state = growth_compute_state(profile.as_ptr(), observations.as_ptr());
            assert!(!state.is_null());

            let state_str = CStr::from_ptr(state).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(state_str).unwrap();
            assert_eq!(value["total_observations"], 4);
            assert_eq!(value["is_reliable"], true);

            let prediction = growth_predict(state, 7.0);
            assert!(!prediction.is_null());
            let prediction_str = CStr::from_ptr(prediction).to_str().unwrap();
            assert!(prediction_str.contains("\"direction\":\"UP\""));

            growth_free_string(prediction);
            growth_free_string(state);
        }
    }

    #[test]
    fn test_ffi_compute_empty_is_null_literal() {
        let profile = profile_json();
        let empty = CString::new("[]").unwrap();

        unsafe {
            let state = growth_compute_state(profile.as_ptr(), empty.as_ptr());
            assert!(!state.is_null());
            assert_eq!(CStr::from_ptr(state).to_str().unwrap(), "null");
            growth_free_string(state);
        }
    }

    #[test]
    fn test_ffi_apply_observation_initializes() {
        let profile = profile_json();
        let observation = CString::new(
            r#"{"student_id":"stu-1","tag_id":"ask-question","sentiment":"POSITIVE","timestamp":"2024-03-01T08:00:00Z","signed_weight":8.0}"#,
        )
        .unwrap();

        unsafe {
            let state = growth_apply_observation(profile.as_ptr(), ptr::null(), observation.as_ptr());
            assert!(!state.is_null());

            let value: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(state).to_str().unwrap()).unwrap();
            assert_eq!(value["level"], 8.0);
            assert_eq!(value["is_reliable"], false);

            // same observation again is a valid tie, not out of order
            let next = growth_apply_observation(profile.as_ptr(), state, observation.as_ptr());
            assert!(!next.is_null());

            growth_free_string(next);
            growth_free_string(state);
        }
    }

    #[test]
    fn test_ffi_processor_lifecycle() {
        let profile = profile_json();
        let tags = tags_json();

        unsafe {
            let processor = growth_processor_new(profile.as_ptr(), tags.as_ptr());
            assert!(!processor.is_null());

            for day in 1..=4 {
                let raw = CString::new(format!(
                    r#"{{"student_id":"stu-1","tag_id":"ask-question","timestamp":"2024-03-0{}T08:00:00Z","weight":{}}}"#,
                    day,
                    3 + day
                ))
                .unwrap();
                let state = growth_processor_record(processor, raw.as_ptr());
                assert!(!state.is_null());
                growth_free_string(state);
            }

            let student = CString::new("stu-1").unwrap();
            let report = growth_processor_report(processor, student.as_ptr(), 7.0);
            assert!(!report.is_null());
            let report_str = CStr::from_ptr(report).to_str().unwrap();
            assert!(report_str.contains("report_version"));
            growth_free_string(report);

            let states = growth_processor_save_states(processor);
            assert!(!states.is_null());

            let processor2 = growth_processor_new(profile.as_ptr(), tags.as_ptr());
            assert_eq!(growth_processor_load_states(processor2, states), 0);

            growth_free_string(states);
            growth_processor_free(processor);
            growth_processor_free(processor2);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let bad_profile = CString::new(
            r#"{"process_noise":0,"initial_uncertainty":10,"time_decay_factor":0,"min_observations":3,"max_days_between":30}"#,
        )
        .unwrap();
        let tags = tags_json();

        unsafe {
            let processor = growth_processor_new(bad_profile.as_ptr(), tags.as_ptr());
            assert!(processor.is_null());

            let error = growth_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("process_noise"));

            let result = growth_processor_record(ptr::null_mut(), tags.as_ptr());
            assert!(result.is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = growth_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
