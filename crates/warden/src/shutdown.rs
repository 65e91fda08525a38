//! Cooperative shutdown.
//!
//! A [`Shutdown`] handle is shared by everything that waits: quota naps and
//! retry delays sleep through [`Shutdown::sleep`], which returns
//! [`HarvestError::Interrupted`] as soon as a shutdown is requested.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{HarvestError, Result};

#[derive(Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every sleeper.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Fail with [`HarvestError::Interrupted`] if shutdown was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_requested() {
            Err(HarvestError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, or until shutdown is requested.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a request between the two
        // cannot be missed.
        notified.as_mut().enable();
        self.check()?;

        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = &mut notified => Err(HarvestError::Interrupted),
        }
    }
}
