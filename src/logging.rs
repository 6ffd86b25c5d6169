//! Pluggable logging for the library.
//!
//! All diagnostics go through a process-wide [`Logger`] capability with
//! five severities. The default [`StandardLogger`] writes plain prefixed
//! lines to stdout/stderr; [`LogFacade`] forwards to the `log` crate so
//! applications already using `env_logger` or similar keep one sink.
//!
//! Install a replacement before spawning server or client activity:
//!
//! ```rust
//! use mboxid::logging::{install_logger, LogFacade};
//! use std::sync::Arc;
//!
//! install_logger(Arc::new(LogFacade));
//! ```

use std::sync::{Arc, RwLock};

/// Logging capability with five severity levels.
///
/// Messages arrive fully formatted; implementations only route them.
/// `auth` carries connection authorization decisions, which deployments
/// often want on a separate audit channel.
pub trait Logger: Send + Sync {
    fn debug(&self, msg: &str);
    fn info(&self, msg: &str);
    fn warning(&self, msg: &str);
    fn error(&self, msg: &str);
    fn auth(&self, msg: &str);
}

/// Default logger writing `libmboxid: <level>: <msg>` lines; errors go to
/// stderr, everything else to stdout.
#[derive(Debug, Default)]
pub struct StandardLogger;

const PREFIX: &str = "libmboxid";

impl Logger for StandardLogger {
    fn debug(&self, msg: &str) {
        println!("{PREFIX}: debug: {msg}");
    }

    fn info(&self, msg: &str) {
        println!("{PREFIX}: info: {msg}");
    }

    fn warning(&self, msg: &str) {
        println!("{PREFIX}: warning: {msg}");
    }

    fn error(&self, msg: &str) {
        eprintln!("{PREFIX}: error: {msg}");
    }

    fn auth(&self, msg: &str) {
        println!("{PREFIX}: auth: {msg}");
    }
}

/// Logger forwarding to the `log` crate macros. Authorization messages are
/// logged at info level under the `mboxid::auth` target.
#[derive(Debug, Default)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn debug(&self, msg: &str) {
        log::debug!(target: "mboxid", "{msg}");
    }

    fn info(&self, msg: &str) {
        log::info!(target: "mboxid", "{msg}");
    }

    fn warning(&self, msg: &str) {
        log::warn!(target: "mboxid", "{msg}");
    }

    fn error(&self, msg: &str) {
        log::error!(target: "mboxid", "{msg}");
    }

    fn auth(&self, msg: &str) {
        log::info!(target: "mboxid::auth", "{msg}");
    }
}

/// Logger discarding every message; for tests that exercise error paths.
#[derive(Debug, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _msg: &str) {}
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
    fn auth(&self, _msg: &str) {}
}

static LOGGER: RwLock<Option<Arc<dyn Logger>>> = RwLock::new(None);

/// Replace the process-wide logger.
pub fn install_logger(new_logger: Arc<dyn Logger>) {
    *LOGGER.write().unwrap() = Some(new_logger);
}

/// The currently installed logger; the standard logger if none was
/// installed. Never null.
pub fn logger() -> Arc<dyn Logger> {
    if let Some(logger) = LOGGER.read().unwrap().as_ref() {
        return Arc::clone(logger);
    }
    let standard: Arc<dyn Logger> = Arc::new(StandardLogger);
    *LOGGER.write().unwrap() = Some(Arc::clone(&standard));
    standard
}

/// Hex dump helper for frame-level debug messages.
pub(crate) fn hex_dump(data: &[u8]) -> String {
    hex::encode_upper(data)
}

pub(crate) fn log_debug(msg: String) {
    logger().debug(&msg);
}

pub(crate) fn log_info(msg: String) {
    logger().info(&msg);
}

pub(crate) fn log_warning(msg: String) {
    logger().warning(&msg);
}

pub(crate) fn log_error(msg: String) {
    logger().error(&msg);
}

pub(crate) fn log_auth(msg: String) {
    logger().auth(&msg);
}
