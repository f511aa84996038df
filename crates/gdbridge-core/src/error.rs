use crate::pointers::Handle;
use gdbridge_sys::{CallErrorType, VariantType};
use std::ffi::NulError;
use std::str::Utf8Error;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("engine interface {found} is older than the minimum supported {required}")]
    AbiVersionMismatch { required: String, found: String },

    #[error("engine does not provide interface function `{0}`")]
    MissingInterfaceFunction(&'static str),

    #[error("engine interface has not been loaded")]
    NotInitialized,

    #[error("unknown engine class `{0}`")]
    UnknownClass(String),

    #[error("engine refused to construct `{0}`")]
    ConstructionFailed(String),

    #[error("unknown method `{class}::{method}`")]
    UnknownMethod { class: String, method: String },

    #[error("signature of `{class}::{method}` changed: expected hash {expected}, engine has {actual}")]
    SignatureVersionMismatch {
        class: String,
        method: String,
        expected: i64,
        actual: i64,
    },

    #[error("instance method `{0}` called without a receiver")]
    NullSelfForInstanceMethod(String),

    #[error("engine call failed: {error:?} (argument {argument}, expected {expected})")]
    EngineCall {
        error: CallErrorType,
        argument: i32,
        expected: i32,
    },

    #[error("engine returned status {0}")]
    EngineStatus(i64),

    #[error("handle {0} is stale")]
    StaleHandle(Handle),

    #[error("handle {0} was already freed")]
    DoubleFree(Handle),

    #[error("handle {0} is checked out")]
    CheckedOut(Handle),

    #[error("handle {0} is already checked out")]
    AlreadyCheckedOut(Handle),

    #[error("handle {0} is not checked out")]
    NotCheckedOut(Handle),

    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        expected: VariantType,
        found: VariantType,
    },

    #[error("value {value} does not fit in {target}")]
    OutOfRange { target: &'static str, value: String },

    #[error("unrecognized variant tag {0}")]
    UnknownVariantTag(u32),

    #[error("wrong number of arguments: expected {expected}, got {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("object pointer is null")]
    NullObject,

    #[error("object of class `{from}` cannot be cast to `{to}`")]
    InvalidCast { from: String, to: String },

    #[error("refcounted object of class `{0}` is freed by dropping its last reference")]
    ManualFreeOfRefCounted(String),

    #[error("instance of `{0}` is already borrowed by an outer callback")]
    InstanceBusy(String),

    #[error("class `{0}` is already registered")]
    ClassAlreadyRegistered(String),

    #[error("class `{class}` already has a method `{method}`")]
    MethodAlreadyExists { class: String, method: String },

    #[error("no built-in `{method}` on {ty:?}")]
    UnknownBuiltinMethod { ty: VariantType, method: String },

    #[error("callback panicked: {0}")]
    Panic(String),

    #[error("String conversion error: {0}")]
    Nul(#[from] NulError),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] Utf8Error),
}

impl BridgeError {
    /// Map an engine status integer; zero is success and everything else is
    /// passed through untouched.
    pub fn from_status(status: i64) -> BridgeResult<()> {
        match status {
            0 => Ok(()),
            code => Err(BridgeError::EngineStatus(code)),
        }
    }

    /// Map the error record filled by a variant call.
    pub fn from_call_error(error: &gdbridge_sys::CallError) -> BridgeResult<()> {
        match CallErrorType::try_from(error.error) {
            Ok(CallErrorType::Ok) => Ok(()),
            Ok(kind) => Err(BridgeError::EngineCall {
                error: kind,
                argument: error.argument,
                expected: error.expected,
            }),
            Err(_) => Err(BridgeError::EngineStatus(error.error as i64)),
        }
    }

    /// Fatal errors are programmer errors on handles; nothing can recover from them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::StaleHandle(_) | BridgeError::DoubleFree(_)
        )
    }

    pub fn type_mismatch(expected: VariantType, found: u32) -> Self {
        match VariantType::try_from(found) {
            Ok(found) => BridgeError::TypeMismatch { expected, found },
            Err(_) => BridgeError::UnknownVariantTag(found),
        }
    }
}

/// Report a fatal error and terminate the process.
///
/// Only used where there is no caller to hand the error back to, such as
/// a destructor running during reclamation. Unwinding across the engine is
/// never an option.
#[cold]
pub fn fatal(err: BridgeError) -> ! {
    tracing::error!(target: "gdbridge::fatal", "{err}");
    crate::interface::print_error_to_engine(&err.to_string(), "fatal", file!(), line!());
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(BridgeError::from_status(0), Ok(()));
        assert_eq!(
            BridgeError::from_status(7),
            Err(BridgeError::EngineStatus(7))
        );
    }

    #[test]
    fn test_from_call_error() {
        let ok = gdbridge_sys::CallError::default();
        assert_eq!(BridgeError::from_call_error(&ok), Ok(()));

        let too_many = gdbridge_sys::CallError {
            error: CallErrorType::TooManyArguments.into(),
            argument: 0,
            expected: 2,
        };
        assert_eq!(
            BridgeError::from_call_error(&too_many),
            Err(BridgeError::EngineCall {
                error: CallErrorType::TooManyArguments,
                argument: 0,
                expected: 2,
            })
        );
    }

    #[test]
    fn test_fatal_classification() {
        let handle = Handle::new(3, 9);
        assert!(BridgeError::StaleHandle(handle).is_fatal());
        assert!(BridgeError::DoubleFree(handle).is_fatal());
        assert!(!BridgeError::CheckedOut(handle).is_fatal());
        assert!(!BridgeError::NullObject.is_fatal());
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            BridgeError::type_mismatch(VariantType::Int, 4),
            BridgeError::TypeMismatch {
                expected: VariantType::Int,
                found: VariantType::String
            }
        );
        assert_eq!(
            BridgeError::type_mismatch(VariantType::Int, 999),
            BridgeError::UnknownVariantTag(999)
        );
    }
}
