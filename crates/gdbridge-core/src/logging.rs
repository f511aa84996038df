//! `tracing` setup for a loaded library.
//!
//! Events go to stderr through the usual `fmt` layer. Warnings and errors
//! are also forwarded to the engine console by [`EngineLayer`].

use crate::config::LOG_ENV_VAR;
use crate::interface;
use std::fmt::Write as _;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Targets already reported to the engine by their emitter.
const SELF_REPORTING_TARGETS: &[&str] = &["gdbridge::callback", "gdbridge::fatal"];

/// Forwards `WARN` and `ERROR` events to `print_warning` / `print_error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineLayer;

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.message, " {}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.message, " {}={value}", field.name());
        }
    }
}

impl<S: Subscriber> Layer<S> for EngineLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::WARN || SELF_REPORTING_TARGETS.contains(&metadata.target()) {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let file = metadata.file().unwrap_or("<unknown>");
        let line = metadata.line().unwrap_or(0);
        if level == Level::ERROR {
            interface::print_error_to_engine(&visitor.message, metadata.target(), file, line);
        } else {
            interface::print_warning_to_engine(&visitor.message, metadata.target(), file, line);
        }
    }
}

fn build_filter(directive: Option<&str>) -> EnvFilter {
    match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn")),
    }
}

/// Install the global subscriber. `false` when one was already installed,
/// for instance by the host application.
pub fn install(directive: Option<&str>) -> bool {
    let installed = tracing_subscriber::registry()
        .with(build_filter(directive))
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EngineLayer)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("logging installed");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_directive_wins() {
        let filter = build_filter(Some("gdbridge=trace"));
        assert!(filter.to_string().contains("gdbridge=trace"));
    }

    #[test]
    fn test_engine_layer_is_silent_before_load() {
        let subscriber = tracing_subscriber::registry().with(EngineLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("nothing to forward to");
            tracing::warn!(target: "gdbridge::callback", "skipped");
        });
    }
}
