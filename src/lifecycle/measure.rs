use crate::host::Host;
use crate::scheduler::Callback;
use crate::{catch_callback_panic, Result, VitalsError};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Run `f` between `<label>-start` and `<label>-end` marks and record a
/// `<label>` measure.
///
/// If any step fails (including `f` panicking) the marks and the measure
/// created here are cleared before the error is returned.
pub fn measure_callback<T, F>(host: &Host, label: &str, f: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    let perf = host.performance();
    let start = format!("{label}-start");
    let end = format!("{label}-end");

    let outcome = (|| -> Result<T> {
        perf.mark(&start)?;
        let mut value = None;
        catch_callback_panic(|| value = Some(f()))?;
        perf.mark(&end)?;
        let measure = perf.measure(label, &start, Some(&end))?;
        debug!(label, duration_ms = measure.duration, "callback measured");
        value.ok_or_else(|| VitalsError::CallbackPanicked("callback produced no value".to_string()))
    })();

    match outcome {
        Ok(value) => Ok(value),
        Err(e) => {
            perf.clear_marks(Some(&start));
            perf.clear_marks(Some(&end));
            perf.clear_measures(Some(label));
            Err(e)
        }
    }
}

/// Wrap `callback` in [`measure_callback`] when the page supports marks.
/// Measurement errors stop at this wrapper.
pub(crate) fn measured(host: Weak<Host>, label: String, callback: Callback) -> Callback {
    Arc::new(move || {
        let Some(host) = host.upgrade() else {
            callback();
            return;
        };
        if !host.capabilities().performance_marks {
            callback();
            return;
        }
        if let Err(e) = measure_callback(&host, &label, || callback()) {
            warn!(label = %label, "measured callback failed: {e}");
        }
    })
}
