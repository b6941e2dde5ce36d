// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Panic-safe transaction boundary.
//!
//! [`run_in_transaction`] runs a callback against an open transaction and
//! always finishes it: commit on `Ok`, rollback on `Err`, rollback on panic.
//! What happens to a panic after the rollback is the caller's explicit
//! choice via [`PanicPolicy`].
//!
//! ```
//! use querykit::transaction::{run_in_transaction, PanicPolicy, TransactionControl, TxOutcome};
//!
//! struct NoopTx;
//! impl TransactionControl for NoopTx {
//!     type Error = std::io::Error;
//!     fn commit(self) -> Result<(), Self::Error> { Ok(()) }
//!     fn rollback(self) -> Result<(), Self::Error> { Ok(()) }
//! }
//!
//! let outcome = run_in_transaction(NoopTx, PanicPolicy::Abort, |_tx| Ok::<_, String>(42)).unwrap();
//! assert!(matches!(outcome, TxOutcome::Committed(42)));
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, error, warn};

/// Driver-side handle of one open transaction.
pub trait TransactionControl {
    type Error;

    fn commit(self) -> Result<(), Self::Error>;
    fn rollback(self) -> Result<(), Self::Error>;
}

/// Something that can open a transaction (a connection or pool).
pub trait TransactionBegin {
    type Tx: TransactionControl;

    fn begin(&self) -> Result<Self::Tx, <Self::Tx as TransactionControl>::Error>;
}

/// What to do with a panic raised inside the callback, after rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PanicPolicy {
    /// Report the panic as [`TxOutcome::Aborted`]
    #[default]
    Abort,
    /// Resume unwinding once the transaction is rolled back
    Propagate,
}

/// How a transaction finished.
#[derive(Debug, PartialEq, Eq)]
pub enum TxOutcome<T, U> {
    Committed(T),
    /// The callback returned an error; the transaction was rolled back
    RolledBack(U),
    /// The callback panicked; the transaction was rolled back
    Aborted { message: String },
}

impl<T, U> TxOutcome<T, U> {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Committed(_) => "committed",
            Self::RolledBack(_) => "rolled_back",
            Self::Aborted { .. } => "aborted",
        }
    }
}

#[derive(Error, Debug)]
pub enum TransactionError<E> {
    #[error("begin transaction failed: {0}")]
    Begin(E),
    #[error("commit failed: {0}")]
    Commit(E),
    #[error("rollback failed: {rollback} (rolling back after: {cause})")]
    Rollback { cause: String, rollback: E },
}

/// Run `f` inside `tx`, then commit or roll back.
///
/// - `Ok(v)` → commit → [`TxOutcome::Committed`]
/// - `Err(e)` → rollback → [`TxOutcome::RolledBack`]
/// - panic → rollback → [`TxOutcome::Aborted`], or the panic resumes under
///   [`PanicPolicy::Propagate`]
///
/// A failed commit or rollback is returned as [`TransactionError`].
pub fn run_in_transaction<C, T, U, F>(
    mut tx: C,
    policy: PanicPolicy,
    f: F,
) -> Result<TxOutcome<T, U>, TransactionError<C::Error>>
where
    C: TransactionControl,
    C::Error: fmt::Display,
    U: fmt::Display,
    F: FnOnce(&mut C) -> Result<T, U>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut tx)));

    let outcome = match result {
        Ok(Ok(value)) => {
            tx.commit().map_err(TransactionError::Commit)?;
            TxOutcome::Committed(value)
        }
        Ok(Err(cause)) => {
            rollback(tx, || cause.to_string())?;
            TxOutcome::RolledBack(cause)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "Transaction callback panicked, rolling back");
            let rolled_back = rollback(tx, || format!("panic: {message}"));
            if policy == PanicPolicy::Propagate {
                crate::metrics::record_transaction("aborted");
                panic::resume_unwind(payload);
            }
            rolled_back?;
            TxOutcome::Aborted { message }
        }
    };

    crate::metrics::record_transaction(outcome.label());
    debug!(outcome = outcome.label(), "Transaction finished");
    Ok(outcome)
}

/// Open a transaction on `source` and hand it to [`run_in_transaction`].
pub fn exec_in_transaction<S, T, U, F>(
    source: &S,
    policy: PanicPolicy,
    f: F,
) -> Result<TxOutcome<T, U>, TransactionError<<S::Tx as TransactionControl>::Error>>
where
    S: TransactionBegin,
    <S::Tx as TransactionControl>::Error: fmt::Display,
    U: fmt::Display,
    F: FnOnce(&mut S::Tx) -> Result<T, U>,
{
    let tx = source.begin().map_err(TransactionError::Begin)?;
    run_in_transaction(tx, policy, f)
}

fn rollback<C>(tx: C, cause: impl FnOnce() -> String) -> Result<(), TransactionError<C::Error>>
where
    C: TransactionControl,
    C::Error: fmt::Display,
{
    tx.rollback().map_err(|rollback| {
        let cause = cause();
        warn!(error = %rollback, cause = %cause, "Transaction rollback failed");
        TransactionError::Rollback { cause, rollback }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
