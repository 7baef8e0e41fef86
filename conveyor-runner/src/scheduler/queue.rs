//! Admission queues
//!
//! One task per resource class receives queued runs in submission order and
//! admits them one at a time as capacity permits become available, so a class
//! is served strictly first in, first out.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawns the admission task of one resource class
///
/// `admit` is called with each item and the permit it now holds; the permit
/// must stay alive until the item's work is finished.
pub fn spawn_admission_queue<T, F>(
    resource_class: String,
    semaphore: Arc<Semaphore>,
    mut queue: mpsc::UnboundedReceiver<T>,
    admit: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T, OwnedSemaphorePermit) + Send + 'static,
{
    tokio::spawn(async move {
        debug!("Admission queue for '{}' started", resource_class);

        while let Some(item) = queue.recv().await {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Capacity of '{}' closed, stopping admission", resource_class);
                    break;
                }
            };

            admit(item, permit);
        }

        debug!("Admission queue for '{}' stopped", resource_class);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_fifo_admission() {
        let semaphore = Arc::new(Semaphore::new(1));
        let (tx, rx) = mpsc::unbounded_channel();
        let admitted = Arc::new(Mutex::new(Vec::new()));
        let (permit_tx, mut permit_rx) = mpsc::unbounded_channel();

        let log = Arc::clone(&admitted);
        let handle = spawn_admission_queue("small".to_string(), semaphore.clone(), rx, move |item, permit| {
            log.lock().unwrap().push(item);
            let _ = permit_tx.send(permit);
        });

        for item in 1..=3 {
            tx.send(item).unwrap();
        }

        // Only one permit: each item waits for the previous one to finish
        for expected in 1..=3 {
            let permit = permit_rx.recv().await.unwrap();
            assert_eq!(admitted.lock().unwrap().last(), Some(&expected));
            assert_eq!(semaphore.available_permits(), 0);
            drop(permit);
        }

        drop(tx);
        handle.await.unwrap();
        assert_eq!(*admitted.lock().unwrap(), [1, 2, 3]);
    }
}
