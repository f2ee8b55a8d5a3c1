// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hwkeystore error provides convenience methods and types for error handling.
//!
//! Here are some important types and helper functions:
//!
//! `Error` type enumerates the error conditions the key store reports to its callers. It is used
//! as the root cause of every `anyhow::Error` raised internally.
//!
//! `SerializedError` is used to send error codes on the wire.
//!
//! `map_or_log_err` is a convenience method used to convert `anyhow::Error` into
//! `SerializedError` wire type.
//!
//! Hwkeystore functions should use `anyhow::Result` to return error conditions, and context
//! should be added every time an error is forwarded.

use crate::asn1::Asn1Error;
use std::cmp::PartialEq;

/// This is the main hwkeystore error type.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A caller supplied parameter is malformed or not permitted.
    #[error("Error::InvalidArgument")]
    InvalidArgument,
    /// An output buffer cannot hold the result.
    #[error("Error::BufferTooSmall")]
    BufferTooSmall,
    /// An input ends before a declared length.
    #[error("Error::InsufficientData")]
    InsufficientData,
    /// A key material record or key blob envelope is inconsistent.
    #[error("Error::InvalidKeyInfo")]
    InvalidKeyInfo,
    /// The crypto backend failed, including AEAD authentication failures.
    #[error("Error::CryptoEngineError")]
    CryptoEngineError,
    /// A buffer could not be allocated.
    #[error("Error::MallocFail")]
    MallocFail,
    /// The algorithm or operation is not supported.
    #[error("Error::NotSupported")]
    NotSupported,
    /// The request does not fit the current state of a key node or operation.
    #[error("Error::BadState")]
    BadState,
    /// A required object, such as an operation context, is absent.
    #[error("Error::NullPointer")]
    NullPointer,
}

impl Error {
    /// Returns the wire code of this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::BadState => -2,
            Error::InvalidArgument => -3,
            Error::NotSupported => -4,
            Error::InsufficientData => -6,
            Error::BufferTooSmall => -7,
            Error::NullPointer => -14,
            Error::InvalidKeyInfo => -19,
            Error::MallocFail => -21,
            Error::CryptoEngineError => -31,
        }
    }

    /// Maps a wire code back onto an `Error`, if it is one of ours.
    pub fn from_code(code: i32) -> Option<Self> {
        [
            Error::InvalidArgument,
            Error::BufferTooSmall,
            Error::InsufficientData,
            Error::InvalidKeyInfo,
            Error::CryptoEngineError,
            Error::MallocFail,
            Error::NotSupported,
            Error::BadState,
            Error::NullPointer,
        ]
        .into_iter()
        .find(|e| e.code() == code)
    }
}

/// This type is used to send error codes on the wire.
///
/// Errors are squashed into one number space using following rules:
/// - All `Error` variants map to their `Error::code`.
/// - A stray `Asn1Error` root cause maps to `Error::InvalidArgument`.
/// - A stray `hwkeystore_crypto::Error` root cause maps to `Error::CryptoEngineError`, except
///   allocation failures which map to `Error::MallocFail`.
/// - All other error conditions are mapped to `Error::BadState`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct SerializedError(pub i32);

impl SerializedError {
    /// Short hand for the `Error` this code stands for.
    pub fn error(&self) -> Option<Error> {
        Error::from_code(self.0)
    }
}

/// Returns a SerializedError given a reference to Error.
pub fn error_to_serialized_error(e: &Error) -> SerializedError {
    SerializedError(e.code())
}

/// Returns a SerializedError given a reference to anyhow::Error.
pub fn anyhow_error_to_serialized_error(e: &anyhow::Error) -> SerializedError {
    let root_cause = e.root_cause();
    if let Some(e) = root_cause.downcast_ref::<Error>() {
        return error_to_serialized_error(e);
    }
    if root_cause.downcast_ref::<Asn1Error>().is_some() {
        return error_to_serialized_error(&Error::InvalidArgument);
    }
    match root_cause.downcast_ref::<hwkeystore_crypto::Error>() {
        Some(hwkeystore_crypto::Error::AllocationFailed(_)) => {
            error_to_serialized_error(&Error::MallocFail)
        }
        Some(_) => error_to_serialized_error(&Error::CryptoEngineError),
        None => error_to_serialized_error(&Error::BadState),
    }
}

/// Returns the `Error` at the root of an `anyhow::Error`, applying the same mapping rules as
/// `anyhow_error_to_serialized_error`.
pub fn root_error(e: &anyhow::Error) -> Error {
    anyhow_error_to_serialized_error(e).error().unwrap_or(Error::BadState)
}

/// This function should be used by the key store facade to translate error conditions
/// into wire error codes.
///
/// All error conditions get logged by this function.
///
/// `handle_ok` will be called if `result` is `Ok(value)` where `value` will be passed
/// as argument to `handle_ok`. `handle_ok` must generate a `Result<T, SerializedError>`, but it
/// typically returns Ok(value).
///
/// # Examples
///
/// ```
/// use hwkeystore::error::{map_or_log_err, Error};
///
/// fn load_key() -> anyhow::Result<Vec<u8>> {
///     Err(anyhow::anyhow!(Error::BadState))
/// }
///
/// assert!(map_or_log_err(load_key(), Ok).is_err());
/// ```
pub fn map_or_log_err<T, U, F>(
    result: anyhow::Result<U>,
    handle_ok: F,
) -> Result<T, SerializedError>
where
    F: FnOnce(U) -> Result<T, SerializedError>,
{
    map_err_with(
        result,
        |e| {
            log::error!("{:?}", e);
            e
        },
        handle_ok,
    )
}

/// This function behaves similar to map_or_log_error, but it does not log the errors, instead
/// it calls map_err on the error before mapping it to a wire result allowing callers to
/// log or transform the error before mapping it.
pub fn map_err_with<T, U, F1, F2>(
    result: anyhow::Result<U>,
    map_err: F1,
    handle_ok: F2,
) -> Result<T, SerializedError>
where
    F1: FnOnce(anyhow::Error) -> anyhow::Error,
    F2: FnOnce(U) -> Result<T, SerializedError>,
{
    result.map_or_else(
        |e| {
            let e = map_err(e);
            Err(anyhow_error_to_serialized_error(&e))
        },
        handle_ok,
    )
}

// mod tests
