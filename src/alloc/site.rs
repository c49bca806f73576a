use std::{
    borrow::Cow,
    ffi::{c_char, CStr},
    fmt,
    num::NonZeroUsize,
};

use serde::{Deserialize, Serialize};

use crate::serialize::serde_address;

/// A pointer value the tracer has seen, used as the matching key between
/// allocations and deallocations. Null is not representable: `free(NULL)`
/// and failed allocations never reach the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(#[serde(with = "serde_address")] NonZeroUsize);

impl Address {
    /// `None` for the null pointer
    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(Self)
    }

    pub const fn new(value: NonZeroUsize) -> Self {
        Self(value)
    }

    pub const fn get(self) -> usize {
        self.0.get()
    }

    /// The value as stored in an SQLite `INTEGER` column. The bit pattern is
    /// kept, so addresses above `i64::MAX` come back intact from
    /// [`Address::from_sql_value`].
    pub(crate) const fn to_sql_value(self) -> i64 {
        self.0.get() as u64 as i64
    }

    pub(crate) fn from_sql_value(value: i64) -> Option<Self> {
        usize::try_from(value as u64)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Where an allocation call was made from. Supplied by the caller, usually
/// through [`crate::call_site!`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    pub file: Cow<'static, str>,
    pub line: u32,
}

impl CallSite {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self {
            file: Cow::Borrowed(file),
            line,
        }
    }

    /// The call site recorded by the variants that do not take one: empty
    /// file, line zero.
    pub const fn unknown() -> Self {
        Self::new("", 0)
    }

    /// Copy a call site handed over from C. A null `file` is recorded as
    /// unknown and negative lines are clamped to zero.
    ///
    /// # Safety
    ///
    /// `file` is null or points to a NUL-terminated string.
    pub unsafe fn from_c(file: *const c_char, line: i32) -> Self {
        let file = if file.is_null() {
            Cow::Borrowed("")
        } else {
            // SAFETY: requirement passed to caller
            Cow::Owned(unsafe { CStr::from_ptr(file) }.to_string_lossy().into_owned())
        };
        Self {
            file,
            line: u32::try_from(line).unwrap_or(0),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.file.is_empty() && self.line == 0
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}", self.file, self.line)
        }
    }
}

/// The [`CallSite`] of the macro invocation
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::alloc::CallSite::new(::std::file!(), ::std::line!())
    };
}
