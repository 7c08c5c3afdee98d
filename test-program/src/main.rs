//! Captures a frame inside a signal handler with `capture_safe`, then finishes
//! resolving it on the main thread.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let registry = tracing_subscriber::Registry::default().with(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::DEBUG.into())
            .from_env()
            .unwrap(),
    );

    let tree_layer = tracing_tree::HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    registry.with(tree_layer).init();
}

#[cfg(unix)]
mod signal {
    use std::cell::UnsafeCell;
    use std::sync::atomic::{AtomicBool, Ordering};

    use objaddr::SafeObjectFrame;

    struct Slot(UnsafeCell<SafeObjectFrame>);

    // SAFETY: written once by the handler before `READY` is set, only read
    // after observing `READY`.
    unsafe impl Sync for Slot {}

    // The frame is too big for a signal stack, so it's filled in here.
    static CAPTURED: Slot = Slot(UnsafeCell::new(SafeObjectFrame::new()));
    static READY: AtomicBool = AtomicBool::new(false);

    pub(crate) extern "C" fn on_signal(_signal: libc::c_int) {
        // SAFETY: see `Slot`.
        objaddr::capture_safe_into(on_signal as usize, unsafe { &mut *CAPTURED.0.get() });
        READY.store(true, Ordering::Release);
    }

    pub(crate) fn capture_in_handler() -> Option<SafeObjectFrame> {
        let handler = on_signal as extern "C" fn(libc::c_int);
        // SAFETY: the handler only calls async-signal-safe code.
        unsafe {
            if libc::signal(libc::SIGUSR1, handler as libc::sighandler_t) == libc::SIG_ERR {
                return None;
            }
            libc::raise(libc::SIGUSR1);
        }

        if !READY.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: `READY` is set, so the handler is done with the slot.
        Some(unsafe { (*CAPTURED.0.get()).clone() })
    }
}

#[cfg(unix)]
fn main() {
    init_tracing();

    if !objaddr::can_capture_safe() {
        tracing::warn!("the loader here has no lock-free lookup, nothing to capture");
        return;
    }

    let Some(safe) = signal::capture_in_handler() else {
        tracing::error!("signal handler did not run");
        std::process::exit(1);
    };
    tracing::info!(
        "captured in handler: {} + {:#x}",
        safe.object_path,
        safe.address_relative_to_object_start
    );

    let eager = objaddr::resolve(signal::on_signal as usize);
    match objaddr::finalize(&safe) {
        Ok(deferred) => {
            println!("deferred: {deferred}");
            println!("eager:    {eager}");
            if deferred != eager {
                tracing::error!("deferred and eager resolution disagree");
                std::process::exit(1);
            }
        }
        Err(err) => {
            tracing::error!("finalize failed: {err}");
            std::process::exit(1);
        }
    }
}

#[cfg(not(unix))]
fn main() {
    init_tracing();
    let frame = objaddr::finalize(&objaddr::capture_safe(main as usize));
    println!("{frame:?}");
}
