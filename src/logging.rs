use std::sync::Mutex;

use tracing_subscriber::{fmt::format::FmtSpan, prelude::*, EnvFilter, Registry};

lazy_static! {
    static ref LOG_INITIALIZED: Mutex<bool> = Mutex::new(false);
}

/// Install the global subscriber.  Nothing is logged unless `RUST_LOG` is set
/// to a non-empty value; scripts commonly export it empty and that must not
/// turn logging on.  Safe to call more than once.
pub fn init_logging() {
    let mut initialized = match LOG_INITIALIZED.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if *initialized {
        return;
    }
    *initialized = true;

    let env_filter = match std::env::var("RUST_LOG") {
        Ok(rustlog) if !rustlog.is_empty() => match EnvFilter::try_from_default_env() {
            Ok(env_filter) => env_filter,
            Err(_) => return,
        },
        _ => return,
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
        .compact()
        // Output usually lands in a log file.
        .with_ansi(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // A test harness may have installed its own subscriber already.
    let _ = Registry::default().with(layer).try_init();
}
