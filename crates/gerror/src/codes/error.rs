use std::error::Error;
use std::fmt;

use crate::context::ErrorContext;
use crate::GlobalId;

/// Generic Error — a structured, zero-dep error type.
///
/// Two internal representations, same external API:
///
/// - **Simple**: 3 GlobalIds on the stack. Zero heap allocation.  
///   Use for hot-path errors like `EAGAIN`, `WouldBlock`, `ConnectionReset`.
///
/// - **Full**: Boxed `ErrorContext` with message, source chain, metadata.  
///   Use for diagnostic errors, setup failures, configuration errors.
///
/// Users never see `Repr` — they interact through `.system()`, `.error_code()`,
/// `.user_code()`, `.kind()`, and `.os_error()`.
///
/// # Size
///
/// - Production: 32 bytes (16-byte aligned)
/// - Debug:      80 bytes (16-byte aligned)
///
/// Both variants coexist — pick the right constructor for the situation.
pub struct GError {
    repr: Repr,
}

enum Repr {
    /// Zero-allocation fast path.
    /// 3 × GlobalId: system, error_code, user_code.
    /// Optional os_error packed alongside.
    Simple {
        system:     GlobalId,
        error_code: GlobalId,
        user_code:  GlobalId,
        os_error:   Option<i32>,
    },
    /// Heap-allocated full diagnostic context.
    Full(Box<ErrorContext>),
}

// ── Constructors ──────────────────────────────────────────────────

impl GError {
    /// Create a zero-allocation error with just the three identifying codes.
    ///
    /// ```
    /// use gerror::{GError, GlobalId};
    /// const SYS_NET: GlobalId = GlobalId::new("net", 3);
    /// const ERR_EAGAIN: GlobalId = GlobalId::new("eagain", 11);
    /// const UC_ACCEPT: GlobalId = GlobalId::new("accept", 1);
    ///
    /// let err = GError::simple(SYS_NET, ERR_EAGAIN, UC_ACCEPT);
    /// ```
    #[inline]
    pub fn simple(system: GlobalId, error_code: GlobalId, user_code: GlobalId) -> Self {
        Self {
            repr: Repr::Simple {
                system,
                error_code,
                user_code,
                os_error: None,
            },
        }
    }

    /// Create a zero-allocation error with an OS errno attached.
    ///
    /// Use when wrapping raw io_uring CQE results or syscall failures
    /// where the caller may need to inspect the raw errno.
    #[inline]
    pub fn simple_os(
        system: GlobalId,
        error_code: GlobalId,
        user_code: GlobalId,
        os_error: i32,
    ) -> Self {
        Self {
            repr: Repr::Simple {
                system,
                error_code,
                user_code,
                os_error: Some(os_error),
            },
        }
    }

    /// Create a full diagnostic error from a pre-built ErrorContext.
    ///
    /// Prefer the `err!` macro over calling this directly.
    pub fn full(ctx: ErrorContext) -> Self {
        Self {
            repr: Repr::Full(Box::new(ctx)),
        }
    }

    /// Convert any `std::error::Error` into a `GError`.
    ///
    /// Low-level escape hatch for callbacks or contexts where you have
    /// a bare error value rather than a `Result`. Uses `UNSET` codes —
    /// prefer `ResultExt::gerr_ctx()` when you have a `Result` and want
    /// structured codes.
    ///
    /// ```ignore
    /// // In a callback where you only have the error value:
    /// let gerr = GError::from_std(some_toml_error);
    ///
    /// // Prefer this instead when you have a Result:
    /// toml::from_str(&data)
    ///     .gerr_ctx(SYS_APP, ERR_PARSE, UC_CONFIG, "parsing config")?;
    /// ```
    pub fn from_std<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let ctx = ErrorContext {
            system: crate::convert::SYS_IO,
            #[cfg(not(feature = "production"))]
            message: err.to_string(),
            ..Default::default()
        }
        .with_source(err);
        Self::full(ctx)
    }
}

// ── Accessors ─────────────────────────────────────────────────────

impl GError {
    /// The system (crate) where the error originated.
    #[inline]
    pub fn system(&self) -> &GlobalId {
        match &self.repr {
            Repr::Simple { system, .. } => system,
            Repr::Full(ctx) => &ctx.system,
        }
    }

    /// The specific error code.
    #[inline]
    pub fn error_code(&self) -> &GlobalId {
        match &self.repr {
            Repr::Simple { error_code, .. } => error_code,
            Repr::Full(ctx) => &ctx.error_code,
        }
    }

    /// The caller-defined operation context.
    #[inline]
    pub fn user_code(&self) -> &GlobalId {
        match &self.repr {
            Repr::Simple { user_code, .. } => user_code,
            Repr::Full(ctx) => &ctx.user_code,
        }
    }

    /// The triple `(system, error_code, user_code)` for matching.
    ///
    /// ```ignore
    /// let (sys, err, uc) = gerr.kind();
    /// ```
    #[inline]
    pub fn kind(&self) -> (&GlobalId, &GlobalId, &GlobalId) {
        match &self.repr {
            Repr::Simple { system, error_code, user_code, .. } => {
                (system, error_code, user_code)
            }
            Repr::Full(ctx) => {
                (&ctx.system, &ctx.error_code, &ctx.user_code)
            }
        }
    }

    /// The subsystem, if available (only in Full variant).
    /// Returns `GlobalId::UNSET` for Simple errors.
    #[inline]
    pub fn subsystem(&self) -> &GlobalId {
        match &self.repr {
            Repr::Simple { .. } => &GlobalId::UNSET,
            Repr::Full(ctx) => &ctx.subsystem,
        }
    }

    /// Raw OS errno, if this error wraps a syscall failure.
    #[inline]
    pub fn os_error(&self) -> Option<i32> {
        match &self.repr {
            Repr::Simple { os_error, .. } => *os_error,
            Repr::Full(ctx) => ctx.os_error,
        }
    }

    /// Returns `true` if this is a zero-allocation Simple error.
    #[inline]
    pub fn is_simple(&self) -> bool {
        matches!(&self.repr, Repr::Simple { .. })
    }

    /// Access the full ErrorContext, if available.
    /// Returns `None` for Simple errors.
    pub fn context(&self) -> Option<&ErrorContext> {
        match &self.repr {
            Repr::Simple { .. } => None,
            Repr::Full(ctx) => Some(ctx),
        }
    }

    /// Consume this error and return the ErrorContext, if available.
    /// For Simple errors, constructs a minimal ErrorContext.
    pub fn into_context(self) -> ErrorContext {
        match self.repr {
            Repr::Simple { system, error_code, user_code, os_error } => {
                ErrorContext {
                    system,
                    error_code,
                    user_code,
                    os_error,
                    ..Default::default()
                }
            }
            Repr::Full(ctx) => *ctx,
        }
    }

    /// Attempt to downcast the source error to a concrete type.
    ///
    /// This is the equivalent of Java's `instanceof` check on a cause.
    ///
    /// ```ignore
    /// if let Some(io_err) = gerr.downcast_ref::<std::io::Error>() {
    ///     eprintln!("raw os error: {:?}", io_err.raw_os_error());
    /// }
    /// ```
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match &self.repr {
            Repr::Simple { .. } => None,
            Repr::Full(ctx) => ctx.source.as_ref()?.downcast_ref::<E>(),
        }
    }

    /// Re-tag this error at a higher layer, preserving the original as source.
    ///
    /// Use when catching a lower-layer GError and re-classifying it for
    /// the caller. The original error becomes the `.source()`.
    ///
    /// ```ignore
    /// // net layer returns (SYS_NET, ERR_ECONNRESET, UC_READ)
    /// // app layer wraps it as (SYS_APP, ERR_REQUEST_FAILED, UC_HANDLE)
    /// let app_err = net_err.wrap(SYS_APP, ERR_REQUEST_FAILED, UC_HANDLE);
    /// // app_err.source() → the original net_err
    /// ```
    pub fn wrap(self, system: GlobalId, error_code: GlobalId, user_code: GlobalId) -> Self {
        let ctx = ErrorContext {
            system,
            error_code,
            user_code,
            #[cfg(not(feature = "production"))]
            message: format!("{}", &self),
            #[cfg(not(feature = "production"))]
            file: "",
            #[cfg(not(feature = "production"))]
            line: 0,
            ..Default::default()
        }
        .with_source(self);
        Self::full(ctx)
    }
}

// ── std::error::Error ─────────────────────────────────────────────

impl Error for GError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.repr {
            Repr::Simple { .. } => None,
            Repr::Full(ctx) => ctx.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static)),
        }
    }
}

// ── Display ───────────────────────────────────────────────────────

impl fmt::Display for GError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Simple { system, error_code, user_code, os_error } => {
                write!(f, "[{}/{}] {}", system, error_code, user_code)?;
                if let Some(errno) = os_error {
                    write!(f, " (os error {})", errno)?;
                }
                Ok(())
            }
            Repr::Full(ctx) => {
                write!(f, "[{}/{}/{}] {}",
                    ctx.system, ctx.subsystem, ctx.error_code, ctx.user_code)?;

                #[cfg(not(feature = "production"))]
                if !ctx.message.is_empty() {
                    write!(f, ": {}", ctx.message)?;
                }

                if let Some(errno) = ctx.os_error {
                    write!(f, " (os error {})", errno)?;
                }

                if let Some(src) = &ctx.source {
                    write!(f, " — caused by: {}", src)?;
                }

                #[cfg(not(feature = "production"))]
                if !ctx.file.is_empty() {
                    write!(f, " at {}:{}", ctx.file, ctx.line)?;
                }

                Ok(())
            }
        }
    }
}

// ── Debug ─────────────────────────────────────────────────────────

impl fmt::Debug for GError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Simple { system, error_code, user_code, os_error } => {
                f.debug_struct("GError::Simple")
                    .field("system", system)
                    .field("error_code", error_code)
                    .field("user_code", user_code)
                    .field("os_error", os_error)
                    .finish()
            }
            Repr::Full(ctx) => {
                f.debug_struct("GError::Full")
                    .field("context", ctx)
                    .finish()
            }
        }
    }
}

// ── Send + Sync ───────────────────────────────────────────────────

// GError is Send + Sync:
// - Simple variant: GlobalId is Copy (no references), Option<i32> is trivial
// - Full variant: ErrorContext contains Box<dyn Error + Send + Sync>
// Both are safe to send across threads.
unsafe impl Send for GError {}
unsafe impl Sync for GError {}
