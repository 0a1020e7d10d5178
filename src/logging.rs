//! Log line formatting.
//!
//! Lines render as `[LEVEL] 2024-01-02 03:04:05.678 +00:00 | message`, the
//! level name padded to five columns. Events carrying a `session` field get
//! a `[session: <id>] | ` prefix between the timestamp and the message.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber for the given `--log_level` value.
pub fn init(log_level: &str) {
    let directive = if log_level == "disable" {
        "off"
    } else {
        log_level
    };
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .event_format(LineFormat)
        .with_env_filter(filter)
        .init();
}

/// `[LEVEL] timestamp | message` with five-column level names.
struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = LineFields::default();
        event.record(&mut fields);

        write!(
            writer,
            "[{:<5}] {} | ",
            event.metadata().level().as_str(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f %Z")
        )?;
        if let Some(session) = fields.session {
            write!(writer, "[session: {}] | ", session)?;
        }
        writeln!(writer, "{}", fields.message)
    }
}

/// Collects the `message` and optional `session` fields of an event.
#[derive(Default)]
struct LineFields {
    message: String,
    session: Option<u64>,
}

impl Visit for LineFields {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "session" {
            self.session = Some(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_subscriber(capture: &Capture) -> impl Subscriber {
        tracing_subscriber::fmt()
            .event_format(LineFormat)
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::TRACE)
            .finish()
    }

    #[test]
    fn session_events_carry_the_prefix() {
        let capture = Capture::default();
        tracing::subscriber::with_default(capture_subscriber(&capture), || {
            tracing::info!(session = 10000_u64, "start connection from 127.0.0.1:9");
        });

        let output = capture.contents();
        assert!(output.starts_with("[INFO ] "), "got: {output}");
        assert!(
            output.ends_with(" | [session: 10000] | start connection from 127.0.0.1:9\n"),
            "got: {output}"
        );
    }

    #[test]
    fn plain_events_have_no_session_prefix() {
        let capture = Capture::default();
        tracing::subscriber::with_default(capture_subscriber(&capture), || {
            tracing::warn!("accept error: too many open files");
        });

        let output = capture.contents();
        assert!(output.starts_with("[WARN ] "), "got: {output}");
        assert!(!output.contains("[session:"), "got: {output}");
        assert!(
            output.ends_with(" | accept error: too many open files\n"),
            "got: {output}"
        );
    }

    #[test]
    fn level_names_are_padded_to_five_columns() {
        let capture = Capture::default();
        tracing::subscriber::with_default(capture_subscriber(&capture), || {
            tracing::error!("boom");
            tracing::trace!("peek");
        });

        let output = capture.contents();
        assert!(output.contains("[ERROR] "), "got: {output}");
        assert!(output.contains("[TRACE] "), "got: {output}");
    }
}
