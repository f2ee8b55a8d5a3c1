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

//! A ks_err macro that expands error messages to include the file and line number, and a
//! kserr macro that raises one of our `Error` kinds with such a message attached.

///
/// # Examples
///
/// ```
/// use hwkeystore::ks_err;
///
/// let msg = ks_err!("Key is expired.");
/// assert!(msg.ends_with("Key is expired."));
/// ```
#[macro_export]
macro_rules! ks_err {
    { $($arg:tt)+ } => {
        format!("{}:{}: {}", file!(), line!(), format_args!($($arg)+))
    };
    {} => {
        format!("{}:{}", file!(), line!())
    };
}

/// Builds an `anyhow::Error` whose root cause is the given `Error` kind, with a `ks_err!`
/// message as context.
///
/// # Examples
///
/// ```
/// use hwkeystore::{error::Error, kserr};
///
/// let e = kserr!(BadState, "stale handle {}", 3);
/// assert_eq!(e.root_cause().downcast_ref::<Error>(), Some(&Error::BadState));
/// ```
#[macro_export]
macro_rules! kserr {
    { $kind:ident, $($arg:tt)+ } => {
        anyhow::Error::new($crate::error::Error::$kind).context($crate::ks_err!($($arg)+))
    };
}
