use std::cell::{Cell, RefCell};
use std::io::{self, IsTerminal, Write};

use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    Unsupported,
}

impl Permission {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

/// Desktop-style notification capability.
pub trait Notifier {
    /// Asks for permission once; callers do not retry on refusal.
    fn request_authorization(&self) -> Permission;

    /// Current permission state, re-read on every call.
    fn is_authorized(&self) -> bool;

    fn fire(&self, title: &str, body: &str) -> anyhow::Result<()>;
}

/// Rings the terminal bell and prints the notification to stderr.
#[derive(Debug)]
pub struct TerminalNotifier {
    enabled: bool,
}

impl TerminalNotifier {
    pub fn new(enabled: bool) -> Self {
        debug!(enabled, "initialized terminal notifier");
        Self { enabled }
    }
}

impl Notifier for TerminalNotifier {
    fn request_authorization(&self) -> Permission {
        let permission = if self.enabled {
            Permission::Granted
        } else {
            Permission::Denied
        };
        info!(permission = ?permission, "notification permission resolved");
        permission
    }

    fn is_authorized(&self) -> bool {
        self.enabled
    }

    fn fire(&self, title: &str, body: &str) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        let bell = if err.is_terminal() { "\x07" } else { "" };
        writeln!(err, "{bell}[{title}] {body}")?;
        info!(title, "emitted notification");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Collects notifications for a host that displays them itself.
///
/// Permission starts as configured and can change mid-session, the way a
/// user might flip it in browser settings.
#[derive(Debug)]
pub struct QueuedNotifier {
    permission: Cell<Permission>,
    requests: Cell<usize>,
    delivered: RefCell<Vec<Notification>>,
}

impl QueuedNotifier {
    pub fn new(permission: Permission) -> Self {
        Self {
            permission: Cell::new(permission),
            requests: Cell::new(0),
            delivered: RefCell::new(Vec::new()),
        }
    }

    pub fn set_permission(&self, permission: Permission) {
        self.permission.set(permission);
    }

    pub fn authorization_requests(&self) -> usize {
        self.requests.get()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.borrow().clone()
    }

    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.delivered.borrow_mut())
    }
}

impl Notifier for QueuedNotifier {
    fn request_authorization(&self) -> Permission {
        self.requests.set(self.requests.get() + 1);
        self.permission.get()
    }

    fn is_authorized(&self) -> bool {
        self.permission.get().is_granted()
    }

    fn fire(&self, title: &str, body: &str) -> anyhow::Result<()> {
        if !self.is_authorized() {
            warn!(title, "dropping notification without permission");
            return Ok(());
        }
        self.delivered.borrow_mut().push(Notification {
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
