use tokio::sync::watch;

pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub fn request(tx: &watch::Sender<bool>) {
    let _ = tx.send(true);
}

/// Resolves once shutdown has been requested or every sender is gone. Cancel-safe, so it
/// can sit in a `select!` loop.
pub async fn wait(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_request() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move { wait(&mut rx).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        request(&tx);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait resolves")
            .expect("join");
    }

    #[tokio::test]
    async fn wait_returns_when_sender_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait(&mut rx))
            .await
            .expect("wait resolves");
    }
}
