//! Change-notification fan-out from backends to devices and applications

use std::collections::HashMap;
use std::sync::Mutex;

use hardware_types::Udi;
use tokio::sync::mpsc;

/// What happened to a device on the backend side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    /// The device's state changed in some unspecified way. Subscribing
    /// devices drop their whole property cache; granular payloads are not
    /// reliably available from all backends.
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub udi: Udi,
}

/// Subscription registry owned by one backend.
///
/// Delivery is a synchronous fan-out into unbounded channels; senders whose
/// receiver has been dropped are pruned on the next notify.
#[derive(Default)]
pub struct Notifier {
    by_udi: Mutex<HashMap<Udi, Vec<mpsc::UnboundedSender<ChangeEvent>>>>,
    all: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for a single UDI.
    pub fn subscribe(&self, udi: &Udi) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.by_udi
            .lock()
            .expect("notifier registry poisoned")
            .entry(udi.clone())
            .or_default()
            .push(tx);
        rx
    }

    /// Subscribe to every event this backend emits.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.all
            .lock()
            .expect("notifier registry poisoned")
            .push(tx);
        rx
    }

    pub fn notify(&self, event: ChangeEvent) {
        {
            let mut by_udi = self.by_udi.lock().expect("notifier registry poisoned");
            if let Some(subs) = by_udi.get_mut(&event.udi) {
                subs.retain(|tx| tx.send(event.clone()).is_ok());
                if subs.is_empty() {
                    by_udi.remove(&event.udi);
                }
            }
        }

        let mut all = self.all.lock().expect("notifier registry poisoned");
        all.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(udi: &str) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Changed,
            udi: Udi::new(udi),
        }
    }

    #[test]
    fn per_udi_subscribers_only_see_their_device() {
        let notifier = Notifier::new();
        let mut a = notifier.subscribe(&Udi::new("/dev/a"));
        let mut b = notifier.subscribe(&Udi::new("/dev/b"));

        notifier.notify(changed("/dev/a"));

        assert_eq!(a.try_recv().unwrap().udi, Udi::new("/dev/a"));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn global_subscribers_see_everything() {
        let notifier = Notifier::new();
        let mut all = notifier.subscribe_all();

        notifier.notify(changed("/dev/a"));
        notifier.notify(ChangeEvent {
            kind: ChangeKind::Removed,
            udi: Udi::new("/dev/b"),
        });

        assert_eq!(all.try_recv().unwrap().udi, Udi::new("/dev/a"));
        assert_eq!(all.try_recv().unwrap().kind, ChangeKind::Removed);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let notifier = Notifier::new();
        let rx = notifier.subscribe(&Udi::new("/dev/a"));
        drop(rx);

        notifier.notify(changed("/dev/a"));

        assert!(
            notifier
                .by_udi
                .lock()
                .unwrap()
                .get(&Udi::new("/dev/a"))
                .is_none()
        );
    }
}
