use canopy_api::messages::SizeRecalc;

use crate::bus::Message;
use crate::error;
use crate::lock;
use crate::state::Shared;

/// recomputes the directory size from its live children. a changed size
/// makes the parent stale in turn
pub async fn recalculate(state: &Shared, signal: &SizeRecalc) -> error::Result<()> {
    let key = signal.directory_key.as_str();

    let mut guard = state.locks().acquire(lock::folder(key)).await?;
    let result = state.store().recompute_size(key).await;

    guard.release().await;

    let Some(change) = result? else {
        tracing::debug!("size signal for \"{key}\" ignored, not a live directory");

        return Ok(());
    };

    if !change.changed() {
        return Ok(());
    }

    tracing::debug!("directory \"{key}\" size {} -> {}", change.old, change.new);

    if let Some(parent) = change.parent {
        state.publish(Message::size_recalc(&parent))?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::test_support::Env;

    #[tokio::test]
    async fn changed_size_signals_parent() {
        let env = Env::new();
        let top = env.dir("top", None).await;
        let inner = env.dir("inner", Some(&top.key)).await;
        let file = env.file("f.bin", Some(&inner.key), 30).await;

        env.drain().await;

        assert_eq!(env.node(&top.key).await.size, 30);

        env.state.store().mark_deleted(&file.key, chrono::Utc::now(), false)
            .await
            .expect("failed to mark deleted");

        let signal = SizeRecalc { directory_key: inner.key.clone() };

        recalculate(&env.state, &signal).await.expect("recalculation failed");

        assert_eq!(env.node(&inner.key).await.size, 0);
        assert_eq!(env.queue.pending(), vec![Message::size_recalc(&top.key)]);

        env.drain().await;

        assert_eq!(env.node(&top.key).await.size, 0);

        recalculate(&env.state, &signal).await.expect("repeat recalculation failed");

        assert!(env.queue.pending().is_empty());
    }

    #[tokio::test]
    async fn ignores_non_directories() {
        let env = Env::new();
        let file = env.file("f.bin", None, 3).await;

        recalculate(&env.state, &SizeRecalc { directory_key: file.key.clone() })
            .await
            .expect("file signal should be ignored");
        recalculate(&env.state, &SizeRecalc { directory_key: "missing".into() })
            .await
            .expect("missing signal should be ignored");

        assert_eq!(env.node(&file.key).await.size, 3);
    }
}
