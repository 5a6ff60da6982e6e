use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns `true` if tensor operations on this thread record a graph.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Runs `f` with graph recording disabled.
///
/// Operations inside `f` produce constants, even when their inputs require
/// gradients. The previous mode is restored when `f` returns or unwinds.
pub fn no_grad<R>(f: impl FnOnce() -> R) -> R {
    with_grad_mode(false, f)
}

/// Runs `f` with graph recording enabled.
///
/// Used by code that must differentiate internally (energy-based vector
/// fields, adjoint dynamics) even when called from inside [`no_grad`].
pub fn enable_grad<R>(f: impl FnOnce() -> R) -> R {
    with_grad_mode(true, f)
}

fn with_grad_mode<R>(enabled: bool, f: impl FnOnce() -> R) -> R {
    let _guard = ModeGuard::set(enabled);
    f()
}

struct ModeGuard {
    previous: bool,
}

impl ModeGuard {
    fn set(enabled: bool) -> Self {
        let previous = GRAD_ENABLED.with(|mode| mode.replace(enabled));
        Self { previous }
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|mode| mode.set(self.previous));
    }
}
